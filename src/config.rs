use std::time::Duration;

use serde::Deserialize;

use crate::models::HealthPolicy;
use crate::upstream::retry::RetryConfig;
use crate::vault::codec::DEFAULT_KDF_ITERATIONS;

const DEFAULT_UPSTREAM: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Passphrase the at-rest encryption key is derived from. Required.
    pub encryption_passphrase: String,
    pub kdf_iterations: u32,
    /// Admin API key. When unset the admin API rejects every request.
    pub admin_key: Option<String>,
    pub upstream_base_url: String,
    pub model: String,
    /// Services the background jobs iterate over. Set via KEYPOOL_SERVICES
    /// (comma-separated). Default: gemini.
    pub services: Vec<String>,
    pub probe_timeout_secs: u64,
    pub call_timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub min_healthy: usize,
    pub min_active: usize,
    /// 0 disables the monitor job.
    pub monitor_interval_secs: u64,
    pub json_logs: bool,
}

impl Config {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            min_healthy: self.min_healthy,
            min_active: self.min_active,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    load_from(|name| std::env::var(name).ok())
}

/// Build a config from an arbitrary variable source. `load` passes the
/// process environment; tests pass a map.
pub fn load_from<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let num = |name: &str, default: u64| -> u64 {
        var(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
    };

    // Fail closed: there is no placeholder passphrase.
    let encryption_passphrase = var("API_ENCRYPTION_KEY").ok_or_else(|| {
        anyhow::anyhow!("API_ENCRYPTION_KEY is not set; refusing to start without an encryption passphrase")
    })?;

    let upstream_base_url =
        var("KEYPOOL_UPSTREAM_BASE_URL").unwrap_or_else(|| DEFAULT_UPSTREAM.into());
    let parsed = url::Url::parse(&upstream_base_url)
        .map_err(|e| anyhow::anyhow!("KEYPOOL_UPSTREAM_BASE_URL is not a valid URL: {}", e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!(
            "KEYPOOL_UPSTREAM_BASE_URL must be http(s), got scheme {:?}",
            parsed.scheme()
        );
    }

    let kdf_iterations = num("KEYPOOL_KDF_ITERATIONS", DEFAULT_KDF_ITERATIONS as u64);
    if kdf_iterations == 0 || kdf_iterations > u32::MAX as u64 {
        anyhow::bail!("KEYPOOL_KDF_ITERATIONS must be between 1 and {}", u32::MAX);
    }

    let services: Vec<String> = var("KEYPOOL_SERVICES")
        .unwrap_or_else(|| "gemini".into())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    Ok(Config {
        port: var("KEYPOOL_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080),
        database_url: var("DATABASE_URL").unwrap_or_else(|| "postgres://localhost/keypool".into()),
        encryption_passphrase,
        kdf_iterations: kdf_iterations as u32,
        admin_key: var("KEYPOOL_ADMIN_KEY"),
        upstream_base_url,
        model: var("KEYPOOL_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
        services,
        probe_timeout_secs: num("KEYPOOL_PROBE_TIMEOUT_SECS", 10).max(1),
        call_timeout_secs: num("KEYPOOL_CALL_TIMEOUT_SECS", 60).max(1),
        max_attempts: num("KEYPOOL_MAX_ATTEMPTS", 5).clamp(1, 100) as u32,
        base_delay_ms: num("KEYPOOL_BASE_DELAY_MS", 1_000),
        max_delay_ms: num("KEYPOOL_MAX_DELAY_MS", 30_000),
        min_healthy: num("KEYPOOL_MIN_HEALTHY", 1) as usize,
        min_active: num("KEYPOOL_MIN_ACTIVE", 2) as usize,
        monitor_interval_secs: num("KEYPOOL_MONITOR_INTERVAL_SECS", 300),
        json_logs: var("KEYPOOL_LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_from(move |name| map.get(name).cloned())
    }

    #[test]
    fn test_missing_passphrase_fails_closed() {
        let err = from(&[]).unwrap_err();
        assert!(err.to_string().contains("API_ENCRYPTION_KEY"));
        assert!(from(&[("API_ENCRYPTION_KEY", "   ")]).is_err());
    }

    #[test]
    fn test_defaults() {
        let cfg = from(&[("API_ENCRYPTION_KEY", "secret")]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.services, vec!["gemini".to_string()]);
        assert_eq!(cfg.kdf_iterations, DEFAULT_KDF_ITERATIONS);
        assert!(cfg.admin_key.is_none());
        assert!(!cfg.json_logs);

        let retry = cfg.retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(1_000));
        assert_eq!(retry.max_delay, Duration::from_millis(30_000));
        assert_eq!(retry.call_timeout, Duration::from_secs(60));
        assert_eq!(cfg.probe_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.health_policy(), HealthPolicy::default());
    }

    #[test]
    fn test_overrides() {
        let cfg = from(&[
            ("API_ENCRYPTION_KEY", "secret"),
            ("KEYPOOL_SERVICES", "gemini, translate ,,"),
            ("KEYPOOL_MAX_ATTEMPTS", "3"),
            ("KEYPOOL_MIN_ACTIVE", "4"),
            ("KEYPOOL_ADMIN_KEY", "admin"),
            ("KEYPOOL_LOG_FORMAT", "JSON"),
            ("KEYPOOL_PORT", "not-a-port"),
        ])
        .unwrap();
        assert_eq!(cfg.services, vec!["gemini", "translate"]);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.min_active, 4);
        assert_eq!(cfg.admin_key.as_deref(), Some("admin"));
        assert!(cfg.json_logs);
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn test_invalid_upstream_url_rejected() {
        assert!(from(&[
            ("API_ENCRYPTION_KEY", "secret"),
            ("KEYPOOL_UPSTREAM_BASE_URL", "not a url"),
        ])
        .is_err());
        assert!(from(&[
            ("API_ENCRYPTION_KEY", "secret"),
            ("KEYPOOL_UPSTREAM_BASE_URL", "ftp://example.com"),
        ])
        .is_err());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        assert!(from(&[
            ("API_ENCRYPTION_KEY", "secret"),
            ("KEYPOOL_KDF_ITERATIONS", "0"),
        ])
        .is_err());
    }
}
