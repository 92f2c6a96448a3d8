use clap::{Parser, Subcommand};

/// keypool: encrypted, self-healing API key pool
#[derive(Parser)]
#[command(name = "keypool", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the admin API and background jobs
    Serve {
        /// Port to bind (overrides KEYPOOL_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage stored keys
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Probe every key of a service without changing anything
    Check {
        #[arg(short, long, default_value = "gemini")]
        service: String,
    },

    /// Probe every key and deactivate the ones that fail
    Monitor {
        #[arg(short, long, default_value = "gemini")]
        service: String,
    },

    /// Retire a key (if given) and report the replacement
    Rotate {
        #[arg(short, long, default_value = "gemini")]
        service: String,
        /// Key to retire first
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = "manual rotation")]
        reason: String,
    },

    /// Zero the usage counters of a service
    ResetUsage {
        #[arg(short, long, default_value = "gemini")]
        service: String,
    },

    /// Print pool metrics
    Metrics {
        #[arg(short, long, default_value = "gemini")]
        service: String,
    },

    /// Rewrite stored keys in the current encryption format
    MigrateLegacy {
        #[arg(short, long, default_value = "gemini")]
        service: String,
        /// Previous passphrase, to re-encrypt every key under the current one
        #[arg(long, env = "KEYPOOL_PREVIOUS_ENCRYPTION_KEY", hide_env_values = true)]
        previous_passphrase: Option<String>,
    },

    /// Send one prompt through the pool (selection, rotation and retry)
    Generate {
        #[arg(short, long, default_value = "gemini")]
        service: String,
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        system: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Encrypt and store a new key
    Add {
        #[arg(short, long, default_value = "gemini")]
        service: String,
        #[arg(long)]
        name: String,
        /// Plaintext key; prefer the env var over the command line
        #[arg(long, env = "KEYPOOL_NEW_KEY", hide_env_values = true)]
        key: String,
        #[arg(long, default_value = "1000")]
        limit: i64,
        /// RFC 3339 expiry, e.g. 2026-12-31T00:00:00Z
        #[arg(long)]
        expires_at: Option<String>,
    },
    /// List keys (metadata only)
    List {
        #[arg(short, long, default_value = "gemini")]
        service: String,
    },
    /// Take a key out of rotation
    Deactivate {
        id: String,
        #[arg(long, default_value = "deactivated by operator")]
        reason: String,
    },
    /// Put a deactivated key back into rotation
    Reactivate { id: String },
}
