use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use keypool::config::{self, Config};
use keypool::health::HealthProbe;
use keypool::jobs;
use keypool::pool::CredentialPool;
use keypool::rotation::RotationCoordinator;
use keypool::store::postgres::PgStore;
use keypool::upstream::gemini::{GeminiClient, GenerateRequest};
use keypool::upstream::retry::ResilientInvoker;
use keypool::vault::SecretCodec;
use keypool::{api, AppState};

mod cli;

/// Everything a command needs, wired from configuration.
struct Components {
    db: PgStore,
    pool: Arc<CredentialPool>,
    coordinator: Arc<RotationCoordinator>,
    gemini: Arc<GeminiClient>,
}

impl Components {
    async fn build(cfg: &Config) -> anyhow::Result<Self> {
        let db = PgStore::connect(&cfg.database_url).await?;
        db.migrate().await.context("running database migrations")?;

        let codec = SecretCodec::with_iterations(&cfg.encryption_passphrase, cfg.kdf_iterations)
            .context("initialising secret codec")?;
        let pool = Arc::new(CredentialPool::new(Arc::new(db.clone()), Arc::new(codec)));

        let gemini = Arc::new(
            GeminiClient::new(&cfg.upstream_base_url, &cfg.model)
                .context("building upstream HTTP client")?,
        );
        let probe = Arc::new(HealthProbe::new(
            pool.clone(),
            gemini.clone(),
            cfg.probe_timeout(),
        ));
        let coordinator = Arc::new(RotationCoordinator::new(
            pool.clone(),
            probe,
            cfg.health_policy(),
        ));

        Ok(Self {
            db,
            pool,
            coordinator,
            gemini,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // clap reads env-backed arguments, so .env has to be loaded first
    dotenvy::dotenv().ok();
    let args = cli::Cli::parse();
    let cfg = config::load()?;
    init_tracing(cfg.json_logs);

    let command = args.command.unwrap_or(cli::Commands::Serve { port: None });

    let components = Components::build(&cfg).await?;

    let result = match command {
        cli::Commands::Serve { port } => {
            run_server(&cfg, &components, port.unwrap_or(cfg.port)).await
        }
        cli::Commands::Key { command } => handle_key_command(&components, command).await,
        cli::Commands::Check { service } => {
            let records = components.coordinator.check_all(&service).await?;
            println!(
                "{:<38} {:<20} {:<7} {:<18} {:>8}  ERROR",
                "ID", "NAME", "ACTIVE", "STATUS", "LATENCY"
            );
            for r in records {
                println!(
                    "{:<38} {:<20} {:<7} {:<18} {:>8}  {}",
                    r.credential_id,
                    r.key_name,
                    r.is_active,
                    format!("{:?}", r.status),
                    r.latency_ms.map(|l| format!("{}ms", l)).unwrap_or_else(|| "-".into()),
                    r.last_error.unwrap_or_default()
                );
            }
            Ok(())
        }
        cli::Commands::Monitor { service } => {
            let report = components.coordinator.monitor_and_recover(&service).await?;
            println!("Checked:     {}", report.checked);
            println!("Deactivated: {}", report.deactivated.len());
            for id in &report.deactivated {
                println!("  - {}", id);
            }
            if report.failed_deactivations > 0 {
                println!("Failed to deactivate: {}", report.failed_deactivations);
            }
            Ok(())
        }
        cli::Commands::Rotate {
            service,
            id,
            reason,
        } => {
            let failed_id = id.map(|raw| parse_id(&raw)).transpose()?;
            let result = components
                .coordinator
                .rotate(&service, failed_id, &reason)
                .await?;
            if result.success {
                println!("Rotated. Next key: {}", display_id(result.new_id));
            } else {
                println!("No alternative key available: {}", result.reason);
            }
            Ok(())
        }
        cli::Commands::ResetUsage { service } => {
            let n = components.pool.reset_usage(&service).await?;
            println!("Reset usage for {} key(s) of '{}'", n, service);
            Ok(())
        }
        cli::Commands::Metrics { service } => {
            let m = components.coordinator.metrics(&service).await?;
            println!("{}", serde_json::to_string_pretty(&m)?);
            Ok(())
        }
        cli::Commands::MigrateLegacy {
            service,
            previous_passphrase,
        } => {
            let previous = previous_passphrase
                .map(|p| SecretCodec::with_iterations(&p, cfg.kdf_iterations))
                .transpose()
                .context("initialising previous secret codec")?;
            let report =
                jobs::reencrypt::run(&components.pool, &service, previous.as_ref()).await?;
            println!("Migrated: {}", report.migrated);
            println!("Skipped:  {}", report.skipped);
            if !report.failed.is_empty() {
                println!("Failed:   {}", report.failed.len());
                for id in &report.failed {
                    println!("  - {}", id);
                }
            }
            Ok(())
        }
        cli::Commands::Generate {
            service,
            prompt,
            system,
        } => {
            let invoker = ResilientInvoker::new(
                components.pool.clone(),
                components.coordinator.clone(),
                components.gemini.clone(),
                cfg.retry_config(),
            );
            let request = GenerateRequest {
                system_instruction: system,
                ..GenerateRequest::new(prompt)
            };
            let response = invoker.invoke(&service, &request).await?;
            println!("{}", response.text);
            Ok(())
        }
    };

    components.db.pool().close().await;
    result
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "keypool=debug,tower_http=debug".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_server(cfg: &Config, components: &Components, port: u16) -> anyhow::Result<()> {
    if cfg.admin_key.is_none() {
        tracing::warn!("KEYPOOL_ADMIN_KEY is not set; the admin API will refuse all requests");
    }

    let state = Arc::new(AppState {
        pool: components.pool.clone(),
        coordinator: components.coordinator.clone(),
        admin_key: cfg.admin_key.clone(),
    });
    let app = api::router(state);

    if cfg.monitor_interval_secs > 0 {
        jobs::monitor::spawn(
            components.coordinator.clone(),
            cfg.services.clone(),
            Duration::from_secs(cfg.monitor_interval_secs),
        );
        tracing::info!(
            services = ?cfg.services,
            "Background monitor job started (every {}s)",
            cfg.monitor_interval_secs
        );
    }
    jobs::usage_reset::spawn(components.pool.clone(), cfg.services.clone());
    tracing::info!("Background usage reset job started (every 24h)");

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("keypool admin API listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_key_command(c: &Components, cmd: cli::KeyCommands) -> anyhow::Result<()> {
    match cmd {
        cli::KeyCommands::Add {
            service,
            name,
            key,
            limit,
            expires_at,
        } => {
            if limit <= 0 {
                anyhow::bail!("--limit must be positive, got {}", limit);
            }
            let expires_at = expires_at
                .map(|raw| {
                    DateTime::parse_from_rfc3339(&raw)
                        .map(|d| d.with_timezone(&Utc))
                        .map_err(|e| anyhow::anyhow!("invalid --expires-at '{}': {}", raw, e))
                })
                .transpose()?;

            let record = c
                .pool
                .add_credential(&service, &name, key.trim(), limit, expires_at)
                .await?;
            println!("Key stored:");
            println!("  Service: {}", record.service_name);
            println!("  Name:    {}", record.key_name);
            println!("  Limit:   {}", record.usage_limit);
            println!("  ID:      {}", record.id);
        }
        cli::KeyCommands::List { service } => {
            let records = c.pool.list(&service).await?;
            if records.is_empty() {
                println!("No keys for service '{}'", service);
                return Ok(());
            }
            println!(
                "{:<38} {:<20} {:<7} {:>12}  {:<25} LAST ERROR",
                "ID", "NAME", "ACTIVE", "USAGE", "EXPIRES"
            );
            for r in records {
                println!(
                    "{:<38} {:<20} {:<7} {:>12}  {:<25} {}",
                    r.id,
                    r.key_name,
                    r.is_active,
                    format!("{}/{}", r.current_usage, r.usage_limit),
                    r.expires_at
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_else(|| "never".into()),
                    r.last_error.unwrap_or_default()
                );
            }
        }
        cli::KeyCommands::Deactivate { id, reason } => {
            let id = parse_id(&id)?;
            c.pool.deactivate(id, &reason).await?;
            println!("Key {} deactivated", id);
        }
        cli::KeyCommands::Reactivate { id } => {
            let id = parse_id(&id)?;
            c.pool.reactivate(id).await?;
            println!("Key {} reactivated", id);
        }
    }
    Ok(())
}

fn parse_id(raw: &str) -> anyhow::Result<Uuid> {
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid key ID: {}", raw))
}

fn display_id(id: Option<Uuid>) -> String {
    id.map(|i| i.to_string()).unwrap_or_else(|| "-".into())
}
