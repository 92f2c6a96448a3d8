use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classified outcome of a single credential probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Inactive,
    LimitExceeded,
    DecryptionFailed,
    Unauthorized,
    RateLimited,
    UpstreamError,
    Timeout,
    UnexpectedStatus,
}

impl HealthStatus {
    pub fn is_healthy(self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Map an HTTP status from the probe endpoint.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            200 => HealthStatus::Healthy,
            401 | 403 => HealthStatus::Unauthorized,
            429 => HealthStatus::RateLimited,
            500..=599 => HealthStatus::UpstreamError,
            _ => HealthStatus::UnexpectedStatus,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Inactive => "inactive",
            HealthStatus::LimitExceeded => "limit exceeded",
            HealthStatus::DecryptionFailed => "decryption failed",
            HealthStatus::Unauthorized => "unauthorized",
            HealthStatus::RateLimited => "rate limited",
            HealthStatus::UpstreamError => "upstream error",
            HealthStatus::Timeout => "timeout",
            HealthStatus::UnexpectedStatus => "unexpected status",
        }
    }
}

/// Point-in-time health of one credential. Computed on demand, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub credential_id: Uuid,
    pub key_name: String,
    pub is_active: bool,
    pub is_healthy: bool,
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub latency_ms: Option<u64>,
}

/// Thresholds deciding whether a pool is in acceptable standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    pub min_healthy: usize,
    pub min_active: usize,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            min_healthy: 1,
            min_active: 2,
        }
    }
}

/// Aggregate view over one service's pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    pub service_name: String,
    pub total_credentials: usize,
    pub active_credentials: usize,
    pub inactive_credentials: usize,
    pub healthy_credentials: usize,
    pub total_usage: i64,
    pub average_usage: f64,
    /// Unhealthy active / active; 0 when nothing is active.
    pub error_rate: f64,
    pub system_healthy: bool,
    pub computed_at: DateTime<Utc>,
}

impl PoolMetrics {
    pub fn compute(
        service_name: &str,
        total_usage: i64,
        records: &[HealthRecord],
        policy: HealthPolicy,
    ) -> Self {
        let total = records.len();
        let active = records.iter().filter(|r| r.is_active).count();
        let healthy = records.iter().filter(|r| r.is_healthy).count();
        let unhealthy_active = records
            .iter()
            .filter(|r| r.is_active && !r.is_healthy)
            .count();

        let average_usage = if total == 0 {
            0.0
        } else {
            total_usage as f64 / total as f64
        };
        let error_rate = if active == 0 {
            0.0
        } else {
            unhealthy_active as f64 / active as f64
        };

        Self {
            service_name: service_name.to_string(),
            total_credentials: total,
            active_credentials: active,
            inactive_credentials: total - active,
            healthy_credentials: healthy,
            total_usage,
            average_usage,
            error_rate,
            system_healthy: healthy >= policy.min_healthy && active >= policy.min_active,
            computed_at: Utc::now(),
        }
    }
}

/// Result of one `monitor_and_recover` sweep.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub service_name: String,
    pub checked: usize,
    pub deactivated: Vec<Uuid>,
    pub failed_deactivations: usize,
    pub records: Vec<HealthRecord>,
}
