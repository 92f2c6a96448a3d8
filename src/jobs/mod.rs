//! Background and one-shot maintenance jobs owned by the binary.

pub mod monitor;
pub mod reencrypt;
pub mod usage_reset;
