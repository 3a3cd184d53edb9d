use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;

/// HNSW search width, matching the index defaults used elsewhere.
const KNN_EF: usize = 40;

/// One indexed chunk as stored in a collection's vector table. The record
/// id is the deterministic chunk identifier, so re-ingesting the same file
/// overwrites instead of duplicating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    /// Base name of the source document.
    pub source: String,
    /// Zero-based page the span came from.
    pub page: u32,
    /// Position of the chunk within the whole document.
    pub seq: u32,
    pub embedding: Vec<f32>,
}

/// A retrieval hit: chunk fields plus KNN distance (smaller is closer).
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredChunk {
    #[serde(deserialize_with = "deserialize_record_id")]
    pub id: String,
    pub text: String,
    pub source: String,
    pub page: u32,
    pub seq: u32,
    pub distance: f32,
}

/// Handle to one collection's vector table.
///
/// Construction defines the table and its HNSW index, which is the
/// expensive part; handles are memoized per `(tenant, collection)` by the
/// resource pool and must be obtained through it on request paths.
#[derive(Clone)]
pub struct VectorCollection {
    db: Arc<SurrealDbClient>,
    table: String,
    dimension: usize,
}

impl VectorCollection {
    /// Opens (and on first use creates) the vector table for a collection.
    pub async fn open(
        db: Arc<SurrealDbClient>,
        tenant_id: &str,
        collection_id: &str,
        dimension: usize,
    ) -> Result<Self, AppError> {
        let table = chunk_table_name(tenant_id, collection_id);

        db.query(format!(
            "DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;
             DEFINE INDEX IF NOT EXISTS idx_embedding_{table} ON TABLE {table} FIELDS embedding HNSW DIMENSION {dimension};"
        ))
        .await?;

        Ok(Self {
            db,
            table,
            dimension,
        })
    }

    /// Upserts one document's chunks as a single transaction: the batch is
    /// either fully visible or not applied at all.
    pub async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<usize, AppError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        for chunk in chunks {
            if chunk.embedding.len() != self.dimension {
                return Err(AppError::Embedding(format!(
                    "chunk {} has dimension {}, index expects {}",
                    chunk.id,
                    chunk.embedding.len(),
                    self.dimension
                )));
            }
        }

        let mut transaction = String::from("BEGIN TRANSACTION;");
        for chunk in chunks {
            let id = serde_json::to_string(&chunk.id)
                .map_err(|e| AppError::Validation(format!("unencodable chunk id: {e}")))?;
            let content = serde_json::to_string(chunk)
                .map_err(|e| AppError::Validation(format!("unencodable chunk: {e}")))?;
            transaction.push_str(&format!(
                "UPSERT type::thing('{}', {id}) CONTENT {content};",
                self.table
            ));
        }
        transaction.push_str("COMMIT TRANSACTION;");

        self.db.query(transaction).await?;

        Ok(chunks.len())
    }

    /// Nearest-neighbour search over the collection, closest first.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, AppError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let knn_query = format!(
            "SELECT *, vector::distance::knn() AS distance FROM {} WHERE embedding <|{k},{KNN_EF}|> {query:?} ORDER BY distance",
            self.table
        );

        let hits: Vec<ScoredChunk> = self.db.query(knn_query).await?.take(0)?;

        Ok(hits)
    }

    /// Number of chunks currently indexed.
    pub async fn count(&self) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: usize,
        }

        let row: Option<CountRow> = self
            .db
            .query(format!("SELECT count() AS count FROM {} GROUP ALL", self.table))
            .await?
            .take(0)?;

        Ok(row.map_or(0, |r| r.count))
    }
}

/// Table name for a collection's chunks, `{tenant}_{collection}` with
/// identifier-safe characters.
pub fn chunk_table_name(tenant_id: &str, collection_id: &str) -> String {
    format!(
        "chunks_{}_{}",
        sanitize_identifier(tenant_id),
        sanitize_identifier(collection_id)
    )
}

/// Removes a collection's vector table entirely. Returns whether the table
/// existed; removing an already-removed collection is a no-op.
pub async fn drop_chunk_table(
    db: &SurrealDbClient,
    tenant_id: &str,
    collection_id: &str,
) -> Result<bool, AppError> {
    let table = chunk_table_name(tenant_id, collection_id);

    if !chunk_table_exists(db, &table).await? {
        return Ok(false);
    }

    db.query(format!("REMOVE TABLE IF EXISTS {table}")).await?;

    Ok(true)
}

async fn chunk_table_exists(db: &SurrealDbClient, table: &str) -> Result<bool, AppError> {
    let info: Option<serde_json::Value> = db.query("INFO FOR DB").await?.take(0)?;

    Ok(info
        .as_ref()
        .and_then(|v| v.get("tables"))
        .and_then(|tables| tables.get(table))
        .is_some())
}

fn sanitize_identifier(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn deserialize_record_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct RecordIdVisitor;

    impl<'de> serde::de::Visitor<'de> for RecordIdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or a record id")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value)
        }

        fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let thing = surrealdb::sql::Thing::deserialize(
                serde::de::value::MapAccessDeserializer::new(map),
            )?;
            Ok(thing.id.to_raw())
        }
    }

    deserializer.deserialize_any(RecordIdVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> Arc<SurrealDbClient> {
        let database = Uuid::new_v4().to_string();
        Arc::new(
            SurrealDbClient::memory("test_ns", &database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        )
    }

    fn chunk(id: &str, text: &str, seq: u32, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            text: text.to_string(),
            source: "manual.txt".to_string(),
            page: 0,
            seq,
            embedding,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_search_orders_by_distance() {
        let db = memory_db().await;
        let collection = VectorCollection::open(db, "tenant-a", "coll-1", 3)
            .await
            .expect("Failed to open vector collection");

        collection
            .upsert_chunks(&[
                chunk("manual.txt_page0_chunk0", "about boilers", 0, vec![0.9, 0.1, 0.0]),
                chunk("manual.txt_page0_chunk1", "about pumps", 1, vec![0.0, 0.1, 0.9]),
            ])
            .await
            .expect("Failed to upsert chunks");

        let hits = collection
            .search(&[1.0, 0.0, 0.0], 2)
            .await
            .expect("Search failed");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "manual.txt_page0_chunk0");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_reingestion_upserts_instead_of_duplicating() {
        let db = memory_db().await;
        let collection = VectorCollection::open(db, "tenant-a", "coll-1", 3)
            .await
            .expect("Failed to open vector collection");

        let chunks = vec![
            chunk("manual.txt_page0_chunk0", "original", 0, vec![1.0, 0.0, 0.0]),
            chunk("manual.txt_page0_chunk1", "original", 1, vec![0.0, 1.0, 0.0]),
        ];
        collection
            .upsert_chunks(&chunks)
            .await
            .expect("First upsert failed");
        collection
            .upsert_chunks(&chunks)
            .await
            .expect("Second upsert failed");

        assert_eq!(collection.count().await.expect("Count failed"), 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let db = memory_db().await;
        let collection = VectorCollection::open(db, "tenant-a", "coll-1", 3)
            .await
            .expect("Failed to open vector collection");

        let err = collection
            .upsert_chunks(&[chunk("id", "text", 0, vec![1.0, 0.0])])
            .await
            .expect_err("Mismatched dimension should fail");
        assert!(matches!(err, AppError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_drop_chunk_table_reports_existence() {
        let db = memory_db().await;
        let collection = VectorCollection::open(Arc::clone(&db), "tenant-a", "coll-1", 3)
            .await
            .expect("Failed to open vector collection");
        collection
            .upsert_chunks(&[chunk("id", "text", 0, vec![1.0, 0.0, 0.0])])
            .await
            .expect("Upsert failed");

        assert!(drop_chunk_table(&db, "tenant-a", "coll-1")
            .await
            .expect("First drop failed"));
        assert!(!drop_chunk_table(&db, "tenant-a", "coll-1")
            .await
            .expect("Second drop failed"));
    }

    #[test]
    fn test_table_name_is_identifier_safe() {
        let name = chunk_table_name("a-b-c", "d.e/f");
        assert_eq!(name, "chunks_a_b_c_d_e_f");
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }
}
