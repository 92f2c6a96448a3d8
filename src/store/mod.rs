pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Credential, CredentialPatch, NewCredential};

/// Narrow persistence interface the pool is built on.
/// Implementations: PgStore (PostgreSQL via sqlx), MemoryStore (dashmap).
///
/// Errors carry `anyhow` context naming the credential id or service so an
/// operator can act on them; the pool lifts them into `PoolError::Database`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All credentials of a service, optionally only those flagged active.
    /// Ordered by `(current_usage, created_at)` ascending.
    async fn list_by_service(
        &self,
        service_name: &str,
        active_only: bool,
    ) -> anyhow::Result<Vec<Credential>>;

    async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Credential>>;

    /// Apply a partial update. Returns false if no record has this id.
    async fn update_fields(&self, id: Uuid, patch: CredentialPatch) -> anyhow::Result<bool>;

    async fn insert(&self, record: NewCredential) -> anyhow::Result<Credential>;

    /// Atomically add one to `current_usage`. Returns false if no record has this id.
    async fn increment_usage(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Zero `current_usage` for every credential of a service. Returns rows touched.
    async fn reset_usage(&self, service_name: &str) -> anyhow::Result<u64>;
}
