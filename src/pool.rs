//! Selection, usage accounting and deactivation over a `CredentialStore`.
//!
//! The pool never caches records: every selection re-reads the store so that
//! several processes can share one pool.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::PoolError;
use crate::models::{Credential, CredentialPatch, DecryptedCredential, NewCredential};
use crate::store::CredentialStore;
use crate::telemetry;
use crate::vault::{mask, SecretCodec, SecretString};

pub struct CredentialPool {
    store: Arc<dyn CredentialStore>,
    codec: Arc<SecretCodec>,
}

impl CredentialPool {
    pub fn new(store: Arc<dyn CredentialStore>, codec: Arc<SecretCodec>) -> Self {
        Self { store, codec }
    }

    pub fn codec(&self) -> &Arc<SecretCodec> {
        &self.codec
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Pick the least-used eligible credential, oldest first on ties.
    ///
    /// Candidates that fail to decrypt are skipped; the call only fails with
    /// `DecryptionFailed` when no candidate decrypts.
    pub async fn select_one(&self, service_name: &str) -> Result<DecryptedCredential, PoolError> {
        let picked = self.pick(service_name).await?;
        telemetry::record_selection(service_name);
        Ok(picked)
    }

    /// `select_one` without counting a selection. The caller records one if
    /// it actually hands the credential out.
    pub(crate) async fn pick(&self, service_name: &str) -> Result<DecryptedCredential, PoolError> {
        let candidates = self.eligible(service_name).await?;

        let mut last_err = None;
        for record in &candidates {
            match self.decrypt_record(record) {
                Ok(secret) => {
                    tracing::debug!(
                        service = service_name,
                        credential_id = %record.id,
                        key = %secret.masked(),
                        usage = record.current_usage,
                        limit = record.usage_limit,
                        "selected credential"
                    );
                    return Ok(DecryptedCredential::from_record(record, secret));
                }
                Err(e) => {
                    tracing::warn!(
                        service = service_name,
                        credential_id = %record.id,
                        "skipping credential that failed to decrypt: {}",
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| PoolError::KeyNotFound {
            service: service_name.to_string(),
        }))
    }

    /// Every eligible credential, decrypted, in selection order. Records that
    /// fail to decrypt are skipped; fails only if none decrypt.
    pub async fn select_all(
        &self,
        service_name: &str,
    ) -> Result<Vec<DecryptedCredential>, PoolError> {
        let candidates = self.eligible(service_name).await?;

        let mut decrypted = Vec::with_capacity(candidates.len());
        let mut last_err = None;
        for record in &candidates {
            match self.decrypt_record(record) {
                Ok(secret) => decrypted.push(DecryptedCredential::from_record(record, secret)),
                Err(e) => {
                    tracing::warn!(
                        service = service_name,
                        credential_id = %record.id,
                        "skipping credential that failed to decrypt: {}",
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        match (decrypted.is_empty(), last_err) {
            (true, Some(e)) => Err(e),
            (true, None) => Err(PoolError::KeyNotFound {
                service: service_name.to_string(),
            }),
            (false, _) => Ok(decrypted),
        }
    }

    /// Atomic `current_usage + 1` at the store level.
    pub async fn record_usage(&self, credential_id: Uuid) -> Result<(), PoolError> {
        let found = self
            .store
            .increment_usage(credential_id)
            .await
            .map_err(PoolError::Database)?;
        if !found {
            return Err(PoolError::CredentialNotFound { id: credential_id });
        }
        Ok(())
    }

    /// Mark a credential inactive. Already-inactive credentials succeed silently.
    pub async fn deactivate(&self, credential_id: Uuid, reason: &str) -> Result<(), PoolError> {
        let record = self.get(credential_id).await?;
        if !record.is_active {
            tracing::debug!(credential_id = %credential_id, "credential already inactive");
            return Ok(());
        }

        let found = self
            .store
            .update_fields(credential_id, CredentialPatch::deactivate(reason))
            .await
            .map_err(PoolError::Database)?;
        if !found {
            return Err(PoolError::CredentialNotFound { id: credential_id });
        }

        telemetry::record_deactivation(&record.service_name);
        tracing::warn!(
            service = %record.service_name,
            credential_id = %credential_id,
            key_name = %record.key_name,
            reason = reason,
            "credential deactivated"
        );
        Ok(())
    }

    /// Administrative only: the pool itself never reactivates.
    pub async fn reactivate(&self, credential_id: Uuid) -> Result<(), PoolError> {
        let found = self
            .store
            .update_fields(credential_id, CredentialPatch::reactivate())
            .await
            .map_err(PoolError::Database)?;
        if !found {
            return Err(PoolError::CredentialNotFound { id: credential_id });
        }
        tracing::info!(credential_id = %credential_id, "credential reactivated");
        Ok(())
    }

    /// Zero usage counters for a service. Meant for a daily external schedule.
    pub async fn reset_usage(&self, service_name: &str) -> Result<u64, PoolError> {
        let touched = self
            .store
            .reset_usage(service_name)
            .await
            .map_err(PoolError::Database)?;
        tracing::info!(service = service_name, credentials = touched, "usage counters reset");
        Ok(touched)
    }

    /// All records of a service, active or not.
    pub async fn list(&self, service_name: &str) -> Result<Vec<Credential>, PoolError> {
        self.store
            .list_by_service(service_name, false)
            .await
            .map_err(PoolError::Database)
    }

    pub async fn get(&self, credential_id: Uuid) -> Result<Credential, PoolError> {
        self.store
            .get_by_id(credential_id)
            .await
            .map_err(PoolError::Database)?
            .ok_or(PoolError::CredentialNotFound { id: credential_id })
    }

    /// Validate, encrypt and insert a new key.
    pub async fn add_credential(
        &self,
        service_name: &str,
        key_name: &str,
        plaintext: &str,
        usage_limit: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Credential, PoolError> {
        if !self.codec.validate_format(plaintext) {
            tracing::warn!(
                service = service_name,
                key = %mask(plaintext),
                "rejecting key with unexpected format"
            );
            return Err(PoolError::InvalidFormat {
                service: service_name.to_string(),
            });
        }

        let encrypted_key = self.codec.encrypt(plaintext)?;
        let record = self
            .store
            .insert(NewCredential {
                service_name: service_name.to_string(),
                key_name: key_name.to_string(),
                encrypted_key,
                usage_limit,
                expires_at,
            })
            .await
            .map_err(PoolError::Database)?;

        tracing::info!(
            service = service_name,
            credential_id = %record.id,
            key = %mask(plaintext),
            "credential added"
        );
        Ok(record)
    }

    pub fn decrypt_record(&self, record: &Credential) -> Result<SecretString, PoolError> {
        self.codec
            .decrypt(&record.encrypted_key)
            .map(SecretString::new)
            .map_err(|e| e.for_credential(record.id))
    }

    /// Active, unexpired, under-limit records in selection order.
    async fn eligible(&self, service_name: &str) -> Result<Vec<Credential>, PoolError> {
        let active = self
            .store
            .list_by_service(service_name, true)
            .await
            .map_err(PoolError::Database)?;

        let now = Utc::now();
        let unexpired: Vec<Credential> = active
            .into_iter()
            .filter(|c| c.is_effectively_active(now))
            .collect();
        if unexpired.is_empty() {
            return Err(PoolError::KeyNotFound {
                service: service_name.to_string(),
            });
        }

        let mut eligible: Vec<Credential> = unexpired
            .into_iter()
            .filter(|c| c.is_eligible_at(now))
            .collect();
        if eligible.is_empty() {
            return Err(PoolError::QuotaExceeded {
                service: service_name.to_string(),
            });
        }

        eligible.sort_by(|a, b| {
            a.current_usage
                .cmp(&b.current_usage)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(eligible)
    }
}
