use crate::{
    error::AppError,
    resources::ResourcePool,
    storage::{db::SurrealDbClient, store::DocumentStore, vector},
    stored_object,
};
use tracing::warn;

use super::model_selector::ModelSelector;

stored_object!(Collection, "collection", {
    owner_id: String,
    name: String,
    /// Selector kept as its wire string; parsed at the point of use so an
    /// unrecognized value surfaces as `UnsupportedModel`, not a decode
    /// failure.
    model: String,
    /// Vault ciphertext of the tenant's provider key. Only ever decrypted
    /// for selectors that need a caller-held credential.
    encrypted_api_key: String,
    /// Manifest of storage-relative document paths, append-only set.
    documents: Vec<String>
});

/// The row shape returned by `list_for_tenant`.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct CollectionSummary {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub name: String,
    pub model: String,
}

/// Result of a collection delete. All three targets are attempted on every
/// call; all-false means nothing existed, which is the idempotent outcome,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DeleteOutcome {
    pub metadata_deleted: bool,
    pub files_deleted: bool,
    pub index_deleted: bool,
}

impl DeleteOutcome {
    pub fn any_deleted(&self) -> bool {
        self.metadata_deleted || self.files_deleted || self.index_deleted
    }

    /// Some targets went away while others stayed behind; callers must
    /// surface this, never swallow it.
    pub fn is_partial(&self) -> bool {
        self.any_deleted()
            && !(self.metadata_deleted && self.files_deleted && self.index_deleted)
    }
}

impl Collection {
    pub fn new(
        id: String,
        owner_id: String,
        name: String,
        model: ModelSelector,
        encrypted_api_key: String,
        documents: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            owner_id,
            name,
            model: model.to_string(),
            encrypted_api_key,
            documents,
        }
    }

    pub fn model_selector(&self) -> Result<ModelSelector, AppError> {
        ModelSelector::parse(&self.model)
    }

    /// The ownership gate for every collection-scoped operation. A
    /// collection owned by someone else produces the byte-identical error
    /// to one that does not exist, so existence never leaks across
    /// tenants.
    pub async fn get_owned(
        collection_id: &str,
        tenant_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let collection: Option<Collection> = db.get_item(collection_id).await?;

        match collection {
            Some(c) if c.owner_id == tenant_id => Ok(c),
            _ => Err(AppError::not_found_or_not_owned(collection_id)),
        }
    }

    pub async fn list_for_tenant(
        tenant_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<CollectionSummary>, AppError> {
        let summaries: Vec<CollectionSummary> = db
            .client
            .query(
                "SELECT id, name, model FROM collection
                 WHERE owner_id = $owner_id ORDER BY created_at DESC",
            )
            .bind(("owner_id", tenant_id.to_owned()))
            .await?
            .take(0)?;

        Ok(summaries)
    }

    /// Unions new paths into the manifest in one server-side statement, so
    /// racing appends cannot lose each other's paths and re-adding an
    /// existing path is a no-op.
    pub async fn append_documents(
        collection_id: &str,
        paths: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<Vec<String>, AppError> {
        let updated: Option<Collection> = db
            .client
            .query(
                "UPDATE type::thing('collection', $id) SET
                    documents = array::union(documents, $paths),
                    updated_at = $now
                 RETURN AFTER",
            )
            .bind(("id", collection_id.to_owned()))
            .bind(("paths", paths))
            .bind(("now", surrealdb::sql::Datetime::from(Utc::now())))
            .await?
            .take(0)?;

        updated
            .map(|c| c.documents)
            .ok_or_else(|| AppError::not_found_or_not_owned(collection_id))
    }

    /// Writes the advisory `collection.json` mirror next to the documents.
    /// The registry row stays authoritative; the mirror exists so the
    /// on-disk tree is self-describing. The encrypted key is deliberately
    /// left out of it.
    pub async fn write_mirror(&self, store: &DocumentStore) -> Result<(), AppError> {
        let mirror = serde_json::json!({
            "collection_id": self.id,
            "owner_id": self.owner_id,
            "name": self.name,
            "model": self.model,
            "documents": self.documents,
        });
        let location = format!(
            "{}collection.json",
            DocumentStore::collection_prefix(&self.owner_id, &self.id)
        );
        let payload = serde_json::to_vec_pretty(&mirror)
            .map_err(|e| AppError::Validation(format!("unencodable mirror: {e}")))?;

        store.put(&location, payload.into()).await?;

        Ok(())
    }
}

/// Tears down a collection: registry row, document directory, and vector
/// table, in that order. Every target is attempted even when an earlier
/// one fails; the outcome reports each individually.
///
/// The row delete is owner-filtered, so a foreign collection id behaves
/// exactly like a missing one: all three report false.
pub async fn delete_collection(
    tenant_id: &str,
    collection_id: &str,
    db: &SurrealDbClient,
    store: &DocumentStore,
    pool: &ResourcePool,
) -> Result<DeleteOutcome, AppError> {
    let metadata_deleted = match delete_metadata(tenant_id, collection_id, db).await {
        Ok(deleted) => deleted,
        Err(err) => {
            warn!(%collection_id, error = %err, "collection metadata delete failed");
            false
        }
    };

    let files_deleted = match delete_files(tenant_id, collection_id, store).await {
        Ok(deleted) => deleted,
        Err(err) => {
            warn!(%collection_id, error = %err, "collection file delete failed");
            false
        }
    };

    let index_deleted = match vector::drop_chunk_table(db, tenant_id, collection_id).await {
        Ok(deleted) => deleted,
        Err(err) => {
            warn!(%collection_id, error = %err, "collection index delete failed");
            false
        }
    };

    // The cached handle would point at a dropped table.
    pool.invalidate_collection_handle(tenant_id, collection_id);

    let outcome = DeleteOutcome {
        metadata_deleted,
        files_deleted,
        index_deleted,
    };

    if outcome.is_partial() {
        warn!(
            %collection_id,
            metadata = outcome.metadata_deleted,
            files = outcome.files_deleted,
            index = outcome.index_deleted,
            "collection delete was partial"
        );
    }

    Ok(outcome)
}

async fn delete_metadata(
    tenant_id: &str,
    collection_id: &str,
    db: &SurrealDbClient,
) -> Result<bool, AppError> {
    let deleted: Option<Collection> = db
        .client
        .query("DELETE type::thing('collection', $id) WHERE owner_id = $owner RETURN BEFORE")
        .bind(("id", collection_id.to_owned()))
        .bind(("owner", tenant_id.to_owned()))
        .await?
        .take(0)?;

    Ok(deleted.is_some())
}

async fn delete_files(
    tenant_id: &str,
    collection_id: &str,
    store: &DocumentStore,
) -> Result<bool, AppError> {
    let prefix = DocumentStore::collection_prefix(tenant_id, collection_id);
    let existing = store.list(Some(&prefix)).await?;
    if existing.is_empty() {
        return Ok(false);
    }

    store.delete_prefix(&prefix).await?;

    Ok(true)
}
