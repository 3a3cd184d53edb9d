use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(Tenant, "tenant", {
    name: String,
    password: String
});

impl Tenant {
    /// Registers a new tenant. The secret is hashed inside the database
    /// with argon2; the plaintext never lands in a row.
    pub async fn register(
        name: &str,
        secret: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        if Self::find_by_name(name, db).await?.is_some() {
            return Err(AppError::DuplicateName(name.to_owned()));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let created: Option<Tenant> = db
            .client
            .query(
                "CREATE type::thing('tenant', $id) SET
                    name = $name,
                    password = crypto::argon2::generate($secret),
                    created_at = $created_at,
                    updated_at = $updated_at",
            )
            .bind(("id", id))
            .bind(("name", name.to_owned()))
            .bind(("secret", secret.to_owned()))
            .bind(("created_at", surrealdb::sql::Datetime::from(now)))
            .bind(("updated_at", surrealdb::sql::Datetime::from(now)))
            .await
            // The unique name index rejects a racing registration.
            .map_err(|e| match e {
                err if err.to_string().contains("unique_tenant_name") => {
                    AppError::DuplicateName(name.to_owned())
                }
                err => AppError::Database(err),
            })?
            .take(0)?;

        created.ok_or(AppError::Validation("tenant failed to create".into()))
    }

    /// Verifies name and secret. The comparison runs through the
    /// database's argon2 verifier, never a plaintext equality. A wrong
    /// name and a wrong secret are the same `InvalidCredentials`.
    pub async fn authenticate(
        name: &str,
        secret: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let tenant: Option<Tenant> = db
            .client
            .query(
                "SELECT * FROM tenant
                WHERE name = $name
                AND crypto::argon2::compare(password, $secret)",
            )
            .bind(("name", name.to_owned()))
            .bind(("secret", secret.to_owned()))
            .await?
            .take(0)?;

        tenant.ok_or(AppError::InvalidCredentials)
    }

    pub async fn find_by_name(
        name: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let tenant: Option<Tenant> = db
            .client
            .query("SELECT * FROM tenant WHERE name = $name LIMIT 1")
            .bind(("name", name.to_owned()))
            .await?
            .take(0)?;

        Ok(tenant)
    }

    /// Cheap existence probe used by the pipelines before doing any work
    /// on behalf of a tenant id.
    pub async fn exists(tenant_id: &str, db: &SurrealDbClient) -> Result<bool, AppError> {
        let tenant: Option<Tenant> = db.get_item(tenant_id).await?;
        Ok(tenant.is_some())
    }
}
