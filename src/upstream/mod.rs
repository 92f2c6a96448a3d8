//! The opaque upstream call and the classification of its failures.

pub mod gemini;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// One call against the upstream provider, authenticated with a plaintext key.
/// Implementations: GeminiClient; stubs in tests.
#[async_trait]
pub trait Upstream: Send + Sync {
    type Request: Send + Sync;
    type Response: Send;

    async fn invoke(
        &self,
        secret: &str,
        request: &Self::Request,
        timeout: Duration,
    ) -> Result<Self::Response, UpstreamError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    /// Ambiguous or partial output (e.g. suspiciously short text).
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

/// How the retry loop should react to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The key itself is rejected or exhausted: deactivate and rotate, no delay.
    Credential,
    /// Network trouble or a flaky upstream: back off and retry.
    Transient,
    /// Anything else: do not retry.
    Fatal,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Credential => "rotate",
            ErrorClass::Transient => "transient",
            ErrorClass::Fatal => "fatal",
        }
    }
}

const CREDENTIAL_INDICATORS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "invalid key",
    "invalid api key",
    "invalid_api_key",
    "api key not valid",
    "api_key_invalid",
    "permission denied",
    "permission_denied",
    "quota",
    "rate limit",
    "rate-limit",
    "rate_limit",
    "resource exhausted",
    "resource_exhausted",
    "too many requests",
    "overloaded",
];

const TRANSIENT_INDICATORS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "econnreset",
    "socket hang up",
    "temporarily unavailable",
];

impl UpstreamError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            UpstreamError::Timeout(_)
            | UpstreamError::Transport(_)
            | UpstreamError::InvalidResponse(_) => ErrorClass::Transient,
            UpstreamError::Status { status, message } => {
                if matches!(status, 401 | 403 | 429) {
                    return ErrorClass::Credential;
                }
                let lower = message.to_lowercase();
                if CREDENTIAL_INDICATORS.iter().any(|i| lower.contains(i)) {
                    return ErrorClass::Credential;
                }
                if *status >= 500 || *status == 408 {
                    return ErrorClass::Transient;
                }
                if TRANSIENT_INDICATORS.iter().any(|i| lower.contains(i)) {
                    return ErrorClass::Transient;
                }
                ErrorClass::Fatal
            }
        }
    }
}
