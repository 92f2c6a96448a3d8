use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use super::{ErrorClass, Upstream, UpstreamError};
use crate::errors::PoolError;
use crate::models::DecryptedCredential;
use crate::pool::CredentialPool;
use crate::rotation::RotationCoordinator;
use crate::telemetry;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on each individual upstream call.
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// Wraps upstream calls with credential selection, rotation on credential
/// errors and exponential backoff on transient ones.
pub struct ResilientInvoker<U: Upstream> {
    pool: Arc<CredentialPool>,
    coordinator: Arc<RotationCoordinator>,
    upstream: Arc<U>,
    config: RetryConfig,
}

impl<U: Upstream> ResilientInvoker<U> {
    pub fn new(
        pool: Arc<CredentialPool>,
        coordinator: Arc<RotationCoordinator>,
        upstream: Arc<U>,
        config: RetryConfig,
    ) -> Self {
        Self {
            pool,
            coordinator,
            upstream,
            config,
        }
    }

    /// Run `request` against the service's pool.
    ///
    /// Selection errors end the call immediately. Credential errors retire
    /// the key and retry at once with another; transient errors back off
    /// before the next attempt. A pool with nothing left to rotate to is an
    /// explicit `ServiceUnavailable`, never an empty success.
    pub async fn invoke(
        &self,
        service_name: &str,
        request: &U::Request,
    ) -> Result<U::Response, PoolError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error: Option<UpstreamError> = None;
        // replacement already chosen by a rotation
        let mut next: Option<DecryptedCredential> = None;

        for attempt in 1..=max_attempts {
            let credential = match next.take() {
                Some(replacement) => {
                    telemetry::record_selection(service_name);
                    replacement
                }
                None => self.pool.select_one(service_name).await?,
            };

            let outcome = match tokio::time::timeout(
                self.config.call_timeout,
                self.upstream.invoke(
                    credential.secret.expose(),
                    request,
                    self.config.call_timeout,
                ),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::Timeout(self.config.call_timeout)),
            };

            let err = match outcome {
                Ok(response) => {
                    telemetry::record_attempt(service_name, "success");
                    if let Err(e) = self.pool.record_usage(credential.id).await {
                        // the response is still returned
                        warn!(
                            service = service_name,
                            credential_id = %credential.id,
                            "failed to record usage: {}",
                            e
                        );
                    }
                    debug!(
                        service = service_name,
                        credential_id = %credential.id,
                        attempt,
                        "upstream call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => e,
            };

            let class = err.classify();
            telemetry::record_attempt(service_name, class.as_str());
            warn!(
                service = service_name,
                credential_id = %credential.id,
                key = %credential.secret.masked(),
                attempt,
                max_attempts,
                class = class.as_str(),
                "Attempt {}/{} failed: {}",
                attempt,
                max_attempts,
                err
            );

            match class {
                ErrorClass::Credential => {
                    let (rotation, replacement) = self
                        .coordinator
                        .rotate_to(service_name, Some(credential.id), &err.to_string())
                        .await?;
                    if !rotation.success {
                        return Err(PoolError::ServiceUnavailable {
                            attempts: attempt,
                            message: format!("pool exhausted: {}", rotation.reason),
                        });
                    }
                    next = replacement;
                }
                ErrorClass::Transient => {
                    if attempt < max_attempts {
                        let wait = calculate_backoff(&self.config, attempt);
                        debug!(service = service_name, "Retrying in {:?}", wait);
                        sleep(wait).await;
                    }
                }
                ErrorClass::Fatal => return Err(PoolError::Upstream(err)),
            }

            last_error = Some(err);
        }

        Err(PoolError::ServiceUnavailable {
            attempts: max_attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt was made".to_string()),
        })
    }
}

/// `base * 2^(attempt - 1)`, capped at `max_delay`.
pub fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    config
        .base_delay
        .saturating_mul(1u32 << exponent)
        .min(config.max_delay)
}
