use std::sync::Arc;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, vector::VectorCollection},
    utils::{
        cache::{BoundedMemoCache, MemoCache},
        embedding::{EmbedderConfig, EmbeddingProvider},
    },
};

/// The two memoized resource families every request path goes through.
///
/// Injected explicitly into the pipelines instead of living as process
/// globals, so tests get their own pool and nothing leaks across them.
pub struct ResourcePool {
    db: Arc<SurrealDbClient>,
    /// One embedding provider per deployment configuration; unbounded
    /// because there is one entry per configured provider in practice.
    embedders: MemoCache<String, Arc<EmbeddingProvider>>,
    /// One vector-table handle per `(tenant, collection)`, LRU-bounded.
    handles: BoundedMemoCache<(String, String), Arc<VectorCollection>>,
}

impl ResourcePool {
    pub fn new(db: Arc<SurrealDbClient>, handle_capacity: usize) -> Self {
        Self {
            db,
            embedders: MemoCache::new(),
            handles: BoundedMemoCache::new(handle_capacity),
        }
    }

    /// Cached embedding provider for a configuration fingerprint.
    pub async fn embedder(
        &self,
        config: &EmbedderConfig,
    ) -> Result<Arc<EmbeddingProvider>, AppError> {
        self.embedders
            .get_or_try_init(&config.fingerprint(), || async {
                Ok(Arc::new(EmbeddingProvider::from_config(config)?))
            })
            .await
    }

    /// Cached vector-table handle for a collection. The factory defines
    /// the table and HNSW index on first use.
    pub async fn collection_handle(
        &self,
        tenant_id: &str,
        collection_id: &str,
        dimension: usize,
    ) -> Result<Arc<VectorCollection>, AppError> {
        let key = (tenant_id.to_owned(), collection_id.to_owned());
        let db = Arc::clone(&self.db);

        self.handles
            .get_or_try_init(&key, || async move {
                Ok(Arc::new(
                    VectorCollection::open(db, tenant_id, collection_id, dimension).await?,
                ))
            })
            .await
    }

    /// Drops the cached handle for a collection, e.g. after its table was
    /// removed. Underlying data is not touched.
    pub fn invalidate_collection_handle(&self, tenant_id: &str, collection_id: &str) {
        self.handles
            .invalidate(&(tenant_id.to_owned(), collection_id.to_owned()));
    }

    pub fn cached_handle_count(&self) -> usize {
        self.handles.len()
    }
}
