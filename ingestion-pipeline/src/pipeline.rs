use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    error::AppError,
    resources::ResourcePool,
    storage::{
        db::SurrealDbClient,
        store::{sha256_digest, DocumentStore},
        types::{collection::Collection, model_selector::ModelSelector, tenant::Tenant},
        vector::{ChunkRecord, VectorCollection},
    },
    utils::{
        config::AppConfig,
        embedding::{EmbedderConfig, EmbeddingProvider},
        extraction::{extract_document_text, RawDocument},
        vault::CredentialVault,
    },
};
use serde::Serialize;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunking::split_document;

/// Attempts per document for the embed-and-upsert batch. Safe to retry
/// because chunk identifiers are deterministic, so a replay upserts over
/// the same records.
const EMBED_ATTEMPTS: usize = 3;

/// Where ingested documents should land.
#[derive(Debug, Clone)]
pub enum IngestTarget {
    /// Create a collection for the tenant. The selector string is parsed
    /// up front; the provider key is encrypted before anything touches
    /// disk.
    New {
        name: String,
        model: String,
        api_key: String,
    },
    /// Add documents to a collection the tenant already owns.
    Existing { collection_id: String },
}

/// Per-document result: which stage it reached and why it stopped.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub file_name: String,
    /// Storage-relative location, present once the bytes were persisted.
    pub location: Option<String>,
    /// Content digest of the persisted bytes.
    pub sha256: Option<String>,
    pub stored: bool,
    pub indexed: bool,
    pub chunk_count: usize,
    pub error: Option<String>,
}

impl DocumentOutcome {
    fn pending(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_owned(),
            location: None,
            sha256: None,
            stored: false,
            indexed: false,
            chunk_count: 0,
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub collection_id: String,
    /// Chunks durably indexed by this call.
    pub chunk_count: usize,
    pub documents: Vec<DocumentOutcome>,
}

/// Metadata held back until at least one document is durably indexed.
struct PendingCollection {
    name: String,
    selector: ModelSelector,
    encrypted_api_key: String,
}

/// Turns raw uploads into persisted files, indexed chunks, and a committed
/// registry row, in that order.
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    store: DocumentStore,
    pool: Arc<ResourcePool>,
    vault: Arc<CredentialVault>,
    config: AppConfig,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        store: DocumentStore,
        pool: Arc<ResourcePool>,
        vault: Arc<CredentialVault>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            store,
            pool,
            vault,
            config,
        }
    }

    /// Runs the full ingestion flow for one request.
    ///
    /// A failing document never aborts the others; the report carries the
    /// per-document outcomes. The call fails as a whole only when
    /// validation fails or no document at all could be indexed.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, document_count = documents.len()))]
    pub async fn ingest(
        &self,
        tenant_id: &str,
        target: IngestTarget,
        documents: Vec<RawDocument>,
    ) -> Result<IngestReport, AppError> {
        if documents.is_empty() {
            return Err(AppError::Validation(
                "at least one document is required".into(),
            ));
        }
        if !Tenant::exists(tenant_id, &self.db).await? {
            return Err(AppError::Validation(format!(
                "tenant {tenant_id} does not exist"
            )));
        }

        // Validation runs before any byte is written: the selector parse
        // and the ownership check both short-circuit here.
        let (collection_id, pending) = match target {
            IngestTarget::New {
                name,
                model,
                api_key,
            } => {
                let selector = ModelSelector::parse(&model)?;
                let encrypted_api_key = self.vault.encrypt(&api_key)?;
                (
                    Uuid::new_v4().to_string(),
                    Some(PendingCollection {
                        name,
                        selector,
                        encrypted_api_key,
                    }),
                )
            }
            IngestTarget::Existing { collection_id } => {
                Collection::get_owned(&collection_id, tenant_id, &self.db).await?;
                (collection_id, None)
            }
        };

        let pipeline_started = Instant::now();

        let stage_started = Instant::now();
        let mut outcomes = self
            .persist_documents(tenant_id, &collection_id, &documents)
            .await;
        let persist_ms = duration_millis(stage_started.elapsed());

        let embedder = self
            .pool
            .embedder(&EmbedderConfig::from_app_config(&self.config))
            .await?;
        let handle = self
            .pool
            .collection_handle(tenant_id, &collection_id, embedder.dimension())
            .await?;

        let stage_started = Instant::now();
        let mut indexed_chunks = 0;
        for (document, outcome) in documents.iter().zip(outcomes.iter_mut()) {
            if !outcome.stored {
                continue;
            }
            match self.index_document(document, &embedder, &handle).await {
                Ok(count) if count > 0 => {
                    outcome.indexed = true;
                    outcome.chunk_count = count;
                    indexed_chunks += count;
                }
                Ok(_) => {
                    outcome.error = Some("no extractable text".into());
                }
                Err(err) => {
                    warn!(
                        file_name = %outcome.file_name,
                        error = %err,
                        "document failed to index"
                    );
                    outcome.error = Some(err.to_string());
                }
            }
        }
        let index_ms = duration_millis(stage_started.elapsed());

        if indexed_chunks == 0 {
            // Nothing made it into the index, so the collection must not
            // register as ready. Persisted files stay where they are.
            let reason = outcomes
                .iter()
                .find_map(|o| o.error.clone())
                .unwrap_or_else(|| "no document produced indexable text".into());
            return Err(AppError::Embedding(format!(
                "no documents could be ingested: {reason}"
            )));
        }

        let stored_paths: Vec<String> = outcomes
            .iter()
            .filter(|o| o.stored)
            .filter_map(|o| o.location.clone())
            .collect();

        let committed = match pending {
            Some(new) => {
                let collection = Collection::new(
                    collection_id.clone(),
                    tenant_id.to_owned(),
                    new.name,
                    new.selector,
                    new.encrypted_api_key,
                    stored_paths,
                );
                self.db.store_item(collection.clone()).await?;
                collection
            }
            None => {
                Collection::append_documents(&collection_id, stored_paths, &self.db).await?;
                Collection::get_owned(&collection_id, tenant_id, &self.db).await?
            }
        };

        // Advisory on-disk mirror; the registry row stays authoritative.
        if let Err(err) = committed.write_mirror(&self.store).await {
            warn!(collection_id = %committed.id, error = %err, "failed to refresh collection mirror");
        }

        info!(
            collection_id = %committed.id,
            chunk_count = indexed_chunks,
            persist_ms,
            index_ms,
            total_ms = duration_millis(pipeline_started.elapsed()),
            "ingestion finished"
        );

        Ok(IngestReport {
            collection_id: committed.id,
            chunk_count: indexed_chunks,
            documents: outcomes,
        })
    }

    /// Writes every upload to `{tenant}/{collection}/{file}`. A failed
    /// write marks that document and moves on; earlier files from the
    /// same call are not rolled back.
    async fn persist_documents(
        &self,
        tenant_id: &str,
        collection_id: &str,
        documents: &[RawDocument],
    ) -> Vec<DocumentOutcome> {
        let mut outcomes = Vec::with_capacity(documents.len());

        for document in documents {
            let mut outcome = DocumentOutcome::pending(&document.file_name);
            let location =
                DocumentStore::document_location(tenant_id, collection_id, &document.file_name);

            match self.store.put(&location, document.bytes.clone()).await {
                Ok(()) => {
                    outcome.stored = true;
                    outcome.sha256 = Some(sha256_digest(&document.bytes));
                    outcome.location = Some(location);
                }
                Err(err) => {
                    warn!(
                        file_name = %document.file_name,
                        error = %err,
                        "failed to persist document"
                    );
                    outcome.error = Some(err.to_string());
                }
            }

            outcomes.push(outcome);
        }

        outcomes
    }

    /// Extract, chunk, embed, and upsert one document. The whole batch for
    /// the document goes to the vector store in one call; a bounded retry
    /// replays it on transient failure.
    async fn index_document(
        &self,
        document: &RawDocument,
        embedder: &EmbeddingProvider,
        handle: &VectorCollection,
    ) -> Result<usize, AppError> {
        let pages = extract_document_text(document).await;
        let source = common::storage::store::sanitize_file_name(&document.file_name);
        let chunks = split_document(
            &source,
            &pages,
            self.config.chunk_size,
            self.config.chunk_overlap,
        )?;

        if chunks.is_empty() {
            return Ok(0);
        }

        let retry_strategy = ExponentialBackoff::from_millis(100)
            .map(jitter)
            .take(EMBED_ATTEMPTS - 1);

        let count = Retry::spawn(retry_strategy, || async {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let embeddings = embedder
                .embed_batch(texts)
                .await
                .map_err(|e| AppError::Embedding(e.to_string()))?;

            let records: Vec<ChunkRecord> = chunks
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| ChunkRecord {
                    id: chunk.id.clone(),
                    text: chunk.text.clone(),
                    source: chunk.source.clone(),
                    page: chunk.page,
                    seq: chunk.seq,
                    embedding,
                })
                .collect();

            handle
                .upsert_chunks(&records)
                .await
                .map_err(|e| AppError::Embedding(e.to_string()))
        })
        .await?;

        Ok(count)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::vector::chunk_table_name;
    use common::utils::config::StorageKind;
    use common::utils::embedding::EmbeddingBackend;

    async fn test_pipeline() -> (IngestionPipeline, Arc<SurrealDbClient>, Arc<ResourcePool>) {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");

        let config = AppConfig {
            storage: StorageKind::Memory,
            embedding_backend: EmbeddingBackend::Hashed,
            embedding_dimensions: 32,
            ..AppConfig::default()
        };

        let store = DocumentStore::new(&config)
            .await
            .expect("Failed to create store");
        let pool = Arc::new(ResourcePool::new(
            Arc::clone(&db),
            config.handle_cache_capacity,
        ));
        let vault = Arc::new(
            CredentialVault::from_key_bytes(&[7u8; 32]).expect("Failed to build vault"),
        );

        let pipeline = IngestionPipeline::new(
            Arc::clone(&db),
            store,
            Arc::clone(&pool),
            vault,
            config,
        );

        (pipeline, db, pool)
    }

    async fn register_tenant(db: &SurrealDbClient, name: &str) -> Tenant {
        Tenant::register(name, "secret", db)
            .await
            .expect("Failed to register tenant")
    }

    fn new_target() -> IngestTarget {
        IngestTarget::New {
            name: "manuals".into(),
            model: "openai".into(),
            api_key: "sk-alice".into(),
        }
    }

    #[tokio::test]
    async fn test_ingest_creates_ready_collection() {
        let (pipeline, db, _pool) = test_pipeline().await;
        let tenant = register_tenant(&db, "alice").await;

        let report = pipeline
            .ingest(
                &tenant.id,
                new_target(),
                vec![RawDocument::new(
                    "manual.txt",
                    "the boiler pressure limit is 12 bar",
                )],
            )
            .await
            .expect("Ingestion failed");

        assert!(report.chunk_count >= 1);
        assert_eq!(report.documents.len(), 1);
        assert!(report.documents[0].stored);
        assert!(report.documents[0].indexed);
        assert!(report.documents[0].sha256.is_some());

        let collection = Collection::get_owned(&report.collection_id, &tenant.id, &db)
            .await
            .expect("Collection should be registered");
        assert_eq!(collection.name, "manuals");
        assert_eq!(collection.documents.len(), 1);
        assert_eq!(
            collection.model_selector().expect("selector"),
            ModelSelector::OpenAi
        );
        assert_ne!(collection.encrypted_api_key, "sk-alice");
    }

    #[tokio::test]
    async fn test_ingest_into_existing_unions_manifest() {
        let (pipeline, db, _pool) = test_pipeline().await;
        let tenant = register_tenant(&db, "alice").await;

        let report = pipeline
            .ingest(
                &tenant.id,
                new_target(),
                vec![RawDocument::new("manual.txt", "pressure limits everywhere")],
            )
            .await
            .expect("Ingestion failed");

        // Re-adding the same file plus a fresh one: manifest unions.
        let second = pipeline
            .ingest(
                &tenant.id,
                IngestTarget::Existing {
                    collection_id: report.collection_id.clone(),
                },
                vec![
                    RawDocument::new("manual.txt", "pressure limits everywhere"),
                    RawDocument::new("appendix.txt", "valve torque tables"),
                ],
            )
            .await
            .expect("Second ingestion failed");

        assert_eq!(second.collection_id, report.collection_id);

        let collection = Collection::get_owned(&report.collection_id, &tenant.id, &db)
            .await
            .expect("Collection lookup failed");
        assert_eq!(collection.documents.len(), 2);
    }

    #[tokio::test]
    async fn test_reingestion_is_idempotent_for_chunks() {
        let (pipeline, db, pool) = test_pipeline().await;
        let tenant = register_tenant(&db, "alice").await;

        let report = pipeline
            .ingest(
                &tenant.id,
                new_target(),
                vec![RawDocument::new("manual.txt", "stable chunk identifiers")],
            )
            .await
            .expect("Ingestion failed");

        pipeline
            .ingest(
                &tenant.id,
                IngestTarget::Existing {
                    collection_id: report.collection_id.clone(),
                },
                vec![RawDocument::new("manual.txt", "stable chunk identifiers")],
            )
            .await
            .expect("Re-ingestion failed");

        let handle = pool
            .collection_handle(&tenant.id, &report.collection_id, 32)
            .await
            .expect("Failed to open handle");
        assert_eq!(
            handle.count().await.expect("Count failed"),
            report.chunk_count,
            "re-ingesting the same file must not duplicate chunks"
        );
    }

    #[tokio::test]
    async fn test_per_document_failure_is_isolated() {
        let (pipeline, db, _pool) = test_pipeline().await;
        let tenant = register_tenant(&db, "alice").await;

        let report = pipeline
            .ingest(
                &tenant.id,
                new_target(),
                vec![
                    RawDocument::new("manual.txt", "the boiler pressure limit is 12 bar"),
                    RawDocument::new("broken.pdf", &b"not really a pdf"[..]),
                ],
            )
            .await
            .expect("Mixed batch should still succeed");

        assert_eq!(report.documents.len(), 2);
        let good = &report.documents[0];
        let bad = &report.documents[1];
        assert!(good.indexed);
        assert!(bad.stored, "unreadable files are still persisted");
        assert!(!bad.indexed);
        assert!(bad.error.is_some());
    }

    #[tokio::test]
    async fn test_unsupported_model_fails_before_any_write() {
        let (pipeline, db, _pool) = test_pipeline().await;
        let tenant = register_tenant(&db, "alice").await;

        let err = pipeline
            .ingest(
                &tenant.id,
                IngestTarget::New {
                    name: "manuals".into(),
                    model: "unsupported-model".into(),
                    api_key: "sk".into(),
                },
                vec![RawDocument::new("manual.txt", "text")],
            )
            .await
            .expect_err("Unknown selector must fail");
        assert!(matches!(err, AppError::UnsupportedModel(_)));
    }

    #[tokio::test]
    async fn test_foreign_collection_is_masked() {
        let (pipeline, db, _pool) = test_pipeline().await;
        let alice = register_tenant(&db, "alice").await;
        let bob = register_tenant(&db, "bob").await;

        let report = pipeline
            .ingest(
                &alice.id,
                new_target(),
                vec![RawDocument::new("manual.txt", "alice's documents")],
            )
            .await
            .expect("Ingestion failed");

        let err = pipeline
            .ingest(
                &bob.id,
                IngestTarget::Existing {
                    collection_id: report.collection_id,
                },
                vec![RawDocument::new("intruder.txt", "bob's documents")],
            )
            .await
            .expect_err("Foreign collection must be masked");
        assert!(matches!(err, AppError::NotFoundOrNotOwned(_)));
    }

    #[tokio::test]
    async fn test_no_indexable_text_registers_nothing() {
        let (pipeline, db, _pool) = test_pipeline().await;
        let tenant = register_tenant(&db, "alice").await;

        let err = pipeline
            .ingest(
                &tenant.id,
                new_target(),
                vec![RawDocument::new("broken.pdf", &b"garbage"[..])],
            )
            .await
            .expect_err("All-failed batch must fail");
        assert!(matches!(err, AppError::Embedding(_)));

        let collections = Collection::list_for_tenant(&tenant.id, &db)
            .await
            .expect("List failed");
        assert!(
            collections.is_empty(),
            "a collection must not register as ready with nothing indexed"
        );
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_rejected() {
        let (pipeline, _db, _pool) = test_pipeline().await;

        let err = pipeline
            .ingest(
                "ghost-tenant",
                new_target(),
                vec![RawDocument::new("manual.txt", "text")],
            )
            .await
            .expect_err("Unknown tenant must fail");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_chunk_table_name_is_per_collection() {
        let (pipeline, db, _pool) = test_pipeline().await;
        let tenant = register_tenant(&db, "alice").await;

        let report = pipeline
            .ingest(
                &tenant.id,
                new_target(),
                vec![RawDocument::new("manual.txt", "isolated tables per tenant")],
            )
            .await
            .expect("Ingestion failed");

        let table = chunk_table_name(&tenant.id, &report.collection_id);
        assert!(table.starts_with("chunks_"));
        assert!(table.contains(&tenant.id.replace('-', "_")));
    }
}
