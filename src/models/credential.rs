use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vault::SecretString;

/// A pooled upstream API key as persisted in `api_keys`.
///
/// `encrypted_key` is either `"<ivHex>:<cipherHex>"` or a legacy bare
/// `"<cipherHex>"` encrypted under an all-zero IV. It is skipped on
/// serialization so it never leaves the process through the admin API.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Credential {
    pub id: Uuid,
    pub service_name: String,
    pub key_name: String,
    #[serde(skip_serializing)]
    pub encrypted_key: String,
    pub is_active: bool,
    pub usage_limit: i64,
    pub current_usage: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Active flag combined with expiry: a stale `is_active = true` on an
    /// expired record still counts as inactive.
    pub fn is_effectively_active(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired_at(now)
    }

    pub fn is_over_limit(&self) -> bool {
        self.current_usage >= self.usage_limit
    }

    /// Whether the credential may be handed out by the pool right now.
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.is_effectively_active(now) && !self.is_over_limit()
    }
}

/// Insert payload for administrative key creation.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub service_name: String,
    pub key_name: String,
    pub encrypted_key: String,
    pub usage_limit: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial update applied by `CredentialStore::update_fields`.
/// `None` leaves the column untouched; `updated_at` is always bumped.
#[derive(Debug, Clone, Default)]
pub struct CredentialPatch {
    pub is_active: Option<bool>,
    pub encrypted_key: Option<String>,
    pub last_error: Option<Option<String>>,
    pub usage_limit: Option<i64>,
}

impl CredentialPatch {
    pub fn deactivate(reason: &str) -> Self {
        Self {
            is_active: Some(false),
            last_error: Some(Some(reason.to_string())),
            ..Default::default()
        }
    }

    pub fn reactivate() -> Self {
        Self {
            is_active: Some(true),
            last_error: Some(None),
            ..Default::default()
        }
    }

    pub fn rekey(encrypted_key: String) -> Self {
        Self {
            encrypted_key: Some(encrypted_key),
            ..Default::default()
        }
    }
}

/// A credential selected for use, with its secret decrypted in memory only.
#[derive(Debug, Clone)]
pub struct DecryptedCredential {
    pub id: Uuid,
    pub service_name: String,
    pub key_name: String,
    pub secret: SecretString,
    pub current_usage: i64,
    pub usage_limit: i64,
}

impl DecryptedCredential {
    pub fn from_record(record: &Credential, secret: SecretString) -> Self {
        Self {
            id: record.id,
            service_name: record.service_name.clone(),
            key_name: record.key_name.clone(),
            secret,
            current_usage: record.current_usage,
            usage_limit: record.usage_limit,
        }
    }
}

/// Outcome of `RotationCoordinator::rotate`.
#[derive(Debug, Clone, Serialize)]
pub struct RotationResult {
    pub success: bool,
    pub previous_id: Option<Uuid>,
    pub new_id: Option<Uuid>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}
