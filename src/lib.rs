//! keypool: encrypted, self-healing API key pool for rate-limited LLM
//! providers.
//!
//! The library holds every component; `main.rs` only wires configuration,
//! the CLI and the background jobs around it.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod errors;
pub mod health;
pub mod jobs;
pub mod models;
pub mod pool;
pub mod rotation;
pub mod store;
pub mod telemetry;
pub mod upstream;
pub mod vault;

use pool::CredentialPool;
use rotation::RotationCoordinator;

/// Shared application state passed to admin API handlers.
pub struct AppState {
    pub pool: Arc<CredentialPool>,
    pub coordinator: Arc<RotationCoordinator>,
    /// `None` locks the admin API entirely.
    pub admin_key: Option<String>,
}
