use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use uuid::Uuid;

use crate::errors::PoolError;
use crate::health::HealthProbe;
use crate::models::{
    DecryptedCredential, HealthPolicy, HealthRecord, MonitorReport, PoolMetrics, RotationResult,
};
use crate::pool::CredentialPool;
use crate::telemetry;

/// Turns probe results into pool mutations, and is the single entry point
/// for "this credential just failed in production, get me a working one".
pub struct RotationCoordinator {
    pool: Arc<CredentialPool>,
    probe: Arc<HealthProbe>,
    policy: HealthPolicy,
}

impl RotationCoordinator {
    pub fn new(pool: Arc<CredentialPool>, probe: Arc<HealthProbe>, policy: HealthPolicy) -> Self {
        Self {
            pool,
            probe,
            policy,
        }
    }

    /// Probe every credential of the service (active and inactive)
    /// concurrently. Read-only.
    pub async fn check_all(&self, service_name: &str) -> Result<Vec<HealthRecord>, PoolError> {
        let records = self.pool.list(service_name).await?;
        let results = join_all(records.iter().map(|r| self.probe.probe(r))).await;

        tracing::debug!(
            service = service_name,
            checked = results.len(),
            healthy = results.iter().filter(|r| r.is_healthy).count(),
            "health check complete"
        );
        Ok(results)
    }

    /// Probe everything, then deactivate each credential that is still
    /// flagged active but failed its probe.
    pub async fn monitor_and_recover(&self, service_name: &str) -> Result<MonitorReport, PoolError> {
        let records = self.check_all(service_name).await?;

        let mut deactivated = Vec::new();
        let mut failed_deactivations = 0;
        for record in records.iter().filter(|r| r.is_active && !r.is_healthy) {
            let reason = record
                .last_error
                .clone()
                .unwrap_or_else(|| record.status.reason().to_string());
            match self.pool.deactivate(record.credential_id, &reason).await {
                Ok(()) => deactivated.push(record.credential_id),
                Err(e) => {
                    failed_deactivations += 1;
                    tracing::error!(
                        service = service_name,
                        credential_id = %record.credential_id,
                        "failed to deactivate unhealthy credential: {}",
                        e
                    );
                }
            }
        }

        if !deactivated.is_empty() {
            tracing::warn!(
                service = service_name,
                count = deactivated.len(),
                "monitor deactivated unhealthy credentials"
            );
        }

        Ok(MonitorReport {
            service_name: service_name.to_string(),
            checked: records.len(),
            deactivated,
            failed_deactivations,
            records,
        })
    }

    /// Retire `failed_id` (if any) and look for a replacement.
    ///
    /// An exhausted pool is reported as `success: false`, not as an error;
    /// store failures still propagate.
    pub async fn rotate(
        &self,
        service_name: &str,
        failed_id: Option<Uuid>,
        reason: &str,
    ) -> Result<RotationResult, PoolError> {
        self.rotate_to(service_name, failed_id, reason)
            .await
            .map(|(result, _)| result)
    }

    /// `rotate`, also returning the decrypted replacement so the caller can
    /// use it without selecting again.
    pub(crate) async fn rotate_to(
        &self,
        service_name: &str,
        failed_id: Option<Uuid>,
        reason: &str,
    ) -> Result<(RotationResult, Option<DecryptedCredential>), PoolError> {
        if let Some(id) = failed_id {
            self.pool.deactivate(id, reason).await?;
        }

        let (next, reason) = match self.pool.pick(service_name).await {
            Ok(next) => (Some(next), reason.to_string()),
            Err(
                e @ (PoolError::KeyNotFound { .. }
                | PoolError::QuotaExceeded { .. }
                | PoolError::DecryptionFailed { .. }),
            ) => {
                tracing::error!(
                    service = service_name,
                    previous_id = ?failed_id,
                    "rotation found no alternative credential: {}",
                    e
                );
                (None, format!("{}; no alternative: {}", reason, e))
            }
            Err(e) => return Err(e),
        };

        let success = next.is_some();
        let new_id = next.as_ref().map(|c| c.id);
        if success {
            tracing::info!(
                service = service_name,
                previous_id = ?failed_id,
                new_id = ?new_id,
                "credential rotated"
            );
        }

        let result = RotationResult {
            success,
            previous_id: failed_id,
            new_id,
            reason,
            timestamp: Utc::now(),
        };
        Ok((result, next))
    }

    /// Probe every credential and publish the resulting pool metrics.
    pub async fn metrics(&self, service_name: &str) -> Result<PoolMetrics, PoolError> {
        let credentials = self.pool.list(service_name).await?;
        let total_usage = credentials.iter().map(|c| c.current_usage).sum();
        let records = join_all(credentials.iter().map(|c| self.probe.probe(c))).await;

        let metrics = PoolMetrics::compute(service_name, total_usage, &records, self.policy);
        telemetry::publish_pool_metrics(&metrics);
        Ok(metrics)
    }

    /// Publish pool metrics from probe results already in hand. Reads the
    /// store for usage and active flags but sends nothing upstream.
    pub async fn metrics_from(
        &self,
        service_name: &str,
        records: &[HealthRecord],
    ) -> Result<PoolMetrics, PoolError> {
        let credentials = self.pool.list(service_name).await?;
        let total_usage = credentials.iter().map(|c| c.current_usage).sum();

        // deactivations made since the probe count as inactive
        let current: Vec<HealthRecord> = records
            .iter()
            .map(|r| {
                let mut r = r.clone();
                if let Some(c) = credentials.iter().find(|c| c.id == r.credential_id) {
                    r.is_active = c.is_active;
                }
                r
            })
            .collect();

        let metrics = PoolMetrics::compute(service_name, total_usage, &current, self.policy);
        telemetry::publish_pool_metrics(&metrics);
        Ok(metrics)
    }
}
