use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use common::{
    error::AppError,
    resources::ResourcePool,
    storage::{db::SurrealDbClient, types::collection::Collection},
    utils::{
        config::AppConfig,
        embedding::EmbedderConfig,
        extraction::{extract_document_text, flatten_pages, RawDocument},
        vault::CredentialVault,
    },
};

use crate::{
    models::{ModelDispatch, ProviderDispatch},
    prompt::grounded_prompt,
};

/// One unit of grounding context, reported back as provenance.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextSource {
    /// A retrieved chunk, with its KNN distance (smaller is closer).
    Chunk {
        id: String,
        source: String,
        distance: f32,
    },
    /// The caller-supplied ad-hoc document, included unconditionally.
    Supplementary { file_name: String },
}

/// Per-stage wall-clock timings for observability.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageTimings {
    pub retrieval_ms: u64,
    pub generation_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    /// Context units handed to the model: retrieved chunks plus the
    /// supplementary document when present.
    pub retrieved_count: usize,
    pub provenance: Vec<ContextSource>,
    pub timings: StageTimings,
}

/// Answers a tenant's question over one of their collections: ownership
/// gate, credential resolution, retrieval, prompt assembly, generation.
pub struct QueryPipeline {
    db: Arc<SurrealDbClient>,
    pool: Arc<ResourcePool>,
    vault: Arc<CredentialVault>,
    config: AppConfig,
    dispatch: Arc<dyn ModelDispatch>,
}

impl QueryPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        pool: Arc<ResourcePool>,
        vault: Arc<CredentialVault>,
        config: AppConfig,
    ) -> Self {
        let dispatch = Arc::new(ProviderDispatch::new(&config));
        Self::with_dispatch(db, pool, vault, config, dispatch)
    }

    /// Injects a custom generation seam; tests use a scripted dispatch.
    pub fn with_dispatch(
        db: Arc<SurrealDbClient>,
        pool: Arc<ResourcePool>,
        vault: Arc<CredentialVault>,
        config: AppConfig,
        dispatch: Arc<dyn ModelDispatch>,
    ) -> Self {
        Self {
            db,
            pool,
            vault,
            config,
            dispatch,
        }
    }

    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, collection_id = %collection_id))]
    pub async fn query(
        &self,
        tenant_id: &str,
        collection_id: &str,
        query_text: &str,
        supplementary: Option<RawDocument>,
    ) -> Result<QueryOutcome, AppError> {
        if query_text.trim().is_empty() {
            return Err(AppError::Validation("query text must not be empty".into()));
        }

        let started = Instant::now();

        // Ownership gate first; nothing below runs for a foreign or
        // missing collection.
        let collection = Collection::get_owned(collection_id, tenant_id, &self.db).await?;

        // Selector resolution is total over the closed enum, and the
        // tenant key is decrypted only when the variant needs it.
        let selector = collection.model_selector()?;
        let credential = if selector.requires_tenant_credential() {
            Some(self.vault.decrypt(&collection.encrypted_api_key)?)
        } else {
            None
        };

        let embedder = self
            .pool
            .embedder(&EmbedderConfig::from_app_config(&self.config))
            .await?;
        let handle = self
            .pool
            .collection_handle(tenant_id, collection_id, embedder.dimension())
            .await?;

        let retrieval_started = Instant::now();
        let query_embedding = embedder
            .embed(query_text)
            .await
            .map_err(|e| AppError::Embedding(e.to_string()))?;
        let hits = handle
            .search(&query_embedding, self.config.retrieval_top_k)
            .await?;
        let retrieval_ms = duration_millis(retrieval_started.elapsed());

        let mut context_units: Vec<String> = Vec::with_capacity(hits.len() + 1);
        let mut provenance: Vec<ContextSource> = Vec::with_capacity(hits.len() + 1);
        for hit in hits {
            context_units.push(hit.text);
            provenance.push(ContextSource::Chunk {
                id: hit.id,
                source: hit.source,
                distance: hit.distance,
            });
        }

        // The ad-hoc document never competes in ranking; when present it
        // is appended after the retrieved chunks, unconditionally.
        if let Some(document) = supplementary {
            let pages = extract_document_text(&document).await;
            let text = flatten_pages(&pages);
            if !text.trim().is_empty() {
                context_units.push(text);
                provenance.push(ContextSource::Supplementary {
                    file_name: document.file_name,
                });
            }
        }

        let prompt = grounded_prompt(&context_units, query_text);

        let generation_started = Instant::now();
        let answer = self
            .dispatch
            .generate(selector, credential.as_deref(), &prompt)
            .await?;
        let generation_ms = duration_millis(generation_started.elapsed());

        let timings = StageTimings {
            retrieval_ms,
            generation_ms,
            total_ms: duration_millis(started.elapsed()),
        };

        info!(
            retrieved = context_units.len(),
            retrieval_ms = timings.retrieval_ms,
            generation_ms = timings.generation_ms,
            total_ms = timings.total_ms,
            model = %selector,
            "query answered"
        );

        Ok(QueryOutcome {
            answer,
            retrieved_count: context_units.len(),
            provenance,
            timings,
        })
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
