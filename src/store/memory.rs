use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::CredentialStore;
use crate::models::{Credential, CredentialPatch, NewCredential};

/// In-process store backed by a DashMap.
///
/// Used by unit tests and the integration scenarios under `tests/`.
/// Mutations hold the shard write lock for the record, so increments are
/// atomic with respect to each other.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<Uuid, Credential>>,
    last_created: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed record as-is (fixtures, imports).
    pub fn seed(&self, credential: Credential) {
        self.records.insert(credential.id, credential);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Creation timestamps strictly increase so `created_at` tie-breaks are
    /// deterministic even for back-to-back inserts.
    fn next_created_at(&self) -> DateTime<Utc> {
        let mut last = self
            .last_created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Utc::now();
        let ts = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(ts);
        ts
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn list_by_service(
        &self,
        service_name: &str,
        active_only: bool,
    ) -> anyhow::Result<Vec<Credential>> {
        let mut rows: Vec<Credential> = self
            .records
            .iter()
            .filter(|r| r.service_name == service_name && (!active_only || r.is_active))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| {
            a.current_usage
                .cmp(&b.current_usage)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(rows)
    }

    async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Credential>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn update_fields(&self, id: Uuid, patch: CredentialPatch) -> anyhow::Result<bool> {
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(false);
        };
        if let Some(active) = patch.is_active {
            record.is_active = active;
        }
        if let Some(key) = patch.encrypted_key {
            record.encrypted_key = key;
        }
        if let Some(limit) = patch.usage_limit {
            record.usage_limit = limit;
        }
        if let Some(last_error) = patch.last_error {
            record.last_error = last_error;
        }
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert(&self, record: NewCredential) -> anyhow::Result<Credential> {
        if record.usage_limit < 0 {
            anyhow::bail!(
                "usage_limit must be non-negative for credential '{}'",
                record.key_name
            );
        }
        let created_at = self.next_created_at();
        let credential = Credential {
            id: Uuid::new_v4(),
            service_name: record.service_name,
            key_name: record.key_name,
            encrypted_key: record.encrypted_key,
            is_active: true,
            usage_limit: record.usage_limit,
            current_usage: 0,
            expires_at: record.expires_at,
            last_error: None,
            created_at,
            updated_at: created_at,
        };
        self.records.insert(credential.id, credential.clone());
        Ok(credential)
    }

    async fn increment_usage(&self, id: Uuid) -> anyhow::Result<bool> {
        match self.records.get_mut(&id) {
            Some(mut record) => {
                record.current_usage += 1;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reset_usage(&self, service_name: &str) -> anyhow::Result<u64> {
        let mut touched = 0;
        for mut record in self.records.iter_mut() {
            if record.service_name == service_name {
                record.current_usage = 0;
                record.updated_at = Utc::now();
                touched += 1;
            }
        }
        Ok(touched)
    }
}
