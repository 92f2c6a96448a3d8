pub mod credential;
pub mod health;

pub use credential::{Credential, CredentialPatch, DecryptedCredential, NewCredential, RotationResult};
pub use health::{HealthPolicy, HealthRecord, HealthStatus, MonitorReport, PoolMetrics};
