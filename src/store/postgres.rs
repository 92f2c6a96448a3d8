use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::CredentialStore;
use crate::models::{Credential, CredentialPatch, NewCredential};

const CREDENTIAL_COLUMNS: &str = "id, service_name, key_name, encrypted_key, is_active, usage_limit, current_usage, expires_at, last_error, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("connecting to credential database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn list_by_service(
        &self,
        service_name: &str,
        active_only: bool,
    ) -> anyhow::Result<Vec<Credential>> {
        let sql = format!(
            "SELECT {} FROM api_keys WHERE service_name = $1 AND ($2 = false OR is_active = true) ORDER BY current_usage ASC, created_at ASC",
            CREDENTIAL_COLUMNS
        );
        let rows = sqlx::query_as::<_, Credential>(&sql)
            .bind(service_name)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("listing credentials for service '{}'", service_name))?;
        Ok(rows)
    }

    async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Credential>> {
        let sql = format!("SELECT {} FROM api_keys WHERE id = $1", CREDENTIAL_COLUMNS);
        let row = sqlx::query_as::<_, Credential>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("loading credential {}", id))?;
        Ok(row)
    }

    async fn update_fields(&self, id: Uuid, patch: CredentialPatch) -> anyhow::Result<bool> {
        // last_error is Option<Option<_>>: the flag says whether to touch the column at all.
        let (set_last_error, last_error) = match patch.last_error {
            Some(value) => (true, value),
            None => (false, None),
        };

        let result = sqlx::query(
            r#"UPDATE api_keys SET
                   is_active     = COALESCE($2, is_active),
                   encrypted_key = COALESCE($3, encrypted_key),
                   usage_limit   = COALESCE($4, usage_limit),
                   last_error    = CASE WHEN $5 THEN $6 ELSE last_error END,
                   updated_at    = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(patch.is_active)
        .bind(patch.encrypted_key)
        .bind(patch.usage_limit)
        .bind(set_last_error)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .with_context(|| format!("updating credential {}", id))?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert(&self, record: NewCredential) -> anyhow::Result<Credential> {
        let sql = format!(
            r#"INSERT INTO api_keys (service_name, key_name, encrypted_key, usage_limit, expires_at)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {}"#,
            CREDENTIAL_COLUMNS
        );
        let row = sqlx::query_as::<_, Credential>(&sql)
            .bind(&record.service_name)
            .bind(&record.key_name)
            .bind(&record.encrypted_key)
            .bind(record.usage_limit)
            .bind(record.expires_at)
            .fetch_one(&self.pool)
            .await
            .with_context(|| {
                format!(
                    "inserting credential '{}' for service '{}'",
                    record.key_name, record.service_name
                )
            })?;
        Ok(row)
    }

    async fn increment_usage(&self, id: Uuid) -> anyhow::Result<bool> {
        // Single statement so concurrent callers never lose an increment.
        let result = sqlx::query(
            "UPDATE api_keys SET current_usage = current_usage + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("incrementing usage for credential {}", id))?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_usage(&self, service_name: &str) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE api_keys SET current_usage = 0, updated_at = NOW() WHERE service_name = $1",
        )
        .bind(service_name)
        .execute(&self.pool)
        .await
        .with_context(|| format!("resetting usage for service '{}'", service_name))?;

        Ok(result.rows_affected())
    }
}
