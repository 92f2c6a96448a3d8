//! Background job: probe every configured service and deactivate
//! credentials that fail, so the invoker stops selecting them.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::models::MonitorReport;
use crate::rotation::RotationCoordinator;

/// Spawn the monitor loop. The first pass runs immediately.
pub fn spawn(
    coordinator: Arc<RotationCoordinator>,
    services: Vec<String>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            run_once(&coordinator, &services).await;
        }
    })
}

/// One monitor pass over every service. Per-service failures are logged and
/// do not stop the pass.
pub async fn run_once(coordinator: &RotationCoordinator, services: &[String]) -> Vec<MonitorReport> {
    let mut reports = Vec::with_capacity(services.len());
    for service in services {
        match coordinator.monitor_and_recover(service).await {
            Ok(report) => {
                tracing::info!(
                    service = %service,
                    checked = report.checked,
                    deactivated = report.deactivated.len(),
                    failed_deactivations = report.failed_deactivations,
                    "monitor pass complete"
                );
                if let Err(e) = coordinator.metrics_from(service, &report.records).await {
                    tracing::warn!(service = %service, "failed to refresh pool metrics: {}", e);
                }
                reports.push(report);
            }
            Err(e) => tracing::error!(service = %service, "monitor job failed: {}", e),
        }
    }
    reports
}
