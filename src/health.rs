//! Read-only health probing of individual credentials against the live
//! upstream endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{Credential, HealthRecord, HealthStatus};
use crate::pool::CredentialPool;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw result of one probe call, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Status(u16),
    Timeout,
    Transport(String),
}

/// A minimal, read-only upstream call used to test a key without doing real work.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn ping(&self, secret: &str, timeout: Duration) -> ProbeOutcome;
}

pub struct HealthProbe {
    pool: Arc<CredentialPool>,
    transport: Arc<dyn ProbeTransport>,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(
        pool: Arc<CredentialPool>,
        transport: Arc<dyn ProbeTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            transport,
            timeout,
        }
    }

    /// Probe one credential. Never mutates the record.
    ///
    /// Short-circuits on the stored state first (inactive, then over limit) so
    /// that dead keys cost no upstream call.
    pub async fn probe(&self, record: &Credential) -> HealthRecord {
        let now = Utc::now();

        if !record.is_effectively_active(now) {
            let reason = if record.is_active { "expired" } else { "inactive" };
            return build(record, HealthStatus::Inactive, Some(reason.to_string()), None);
        }
        if record.is_over_limit() {
            return build(record, HealthStatus::LimitExceeded, None, None);
        }

        let secret = match self.pool.decrypt_record(record) {
            Ok(s) => s,
            Err(e) => {
                return build(record, HealthStatus::DecryptionFailed, Some(e.to_string()), None)
            }
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            self.timeout,
            self.transport.ping(secret.expose(), self.timeout),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::Timeout,
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let (status, detail) = match outcome {
            ProbeOutcome::Status(code) => {
                let status = HealthStatus::from_http_status(code);
                let detail = (!status.is_healthy())
                    .then(|| format!("{} (HTTP {})", status.reason(), code));
                (status, detail)
            }
            ProbeOutcome::Timeout => (
                HealthStatus::Timeout,
                Some(format!("timeout after {:?}", self.timeout)),
            ),
            ProbeOutcome::Transport(msg) => (
                HealthStatus::UpstreamError,
                Some(format!("upstream error: {}", msg)),
            ),
        };

        if !status.is_healthy() {
            tracing::info!(
                service = %record.service_name,
                credential_id = %record.id,
                key = %secret.masked(),
                status = status.reason(),
                latency_ms,
                "credential probe failed"
            );
        }

        build(record, status, detail, Some(latency_ms))
    }
}

fn build(
    record: &Credential,
    status: HealthStatus,
    detail: Option<String>,
    latency_ms: Option<u64>,
) -> HealthRecord {
    let healthy = status.is_healthy();
    HealthRecord {
        credential_id: record.id,
        key_name: record.key_name.clone(),
        is_active: record.is_active,
        is_healthy: healthy,
        status,
        checked_at: Utc::now(),
        error_count: u32::from(!healthy),
        last_error: if healthy {
            None
        } else {
            Some(detail.unwrap_or_else(|| status.reason().to_string()))
        },
        latency_ms,
    }
}
