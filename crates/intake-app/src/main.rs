//! Intake host binary - composition root.
//!
//! 1. Load configuration from TOML
//! 2. Open the session database (or an in-memory primary)
//! 3. Build the conversation engine over the offline collaborators
//! 4. Start the maintenance loop
//! 5. Serve `identity|message` lines from stdin until EOF or Ctrl-C

mod cli;
mod inbound;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncWriteExt, BufReader};

use intake_conversation::{ConversationEngine, MaintenanceTask, OfflineServices};
use intake_core::config::IntakeConfig;
use intake_storage::{MemoryPrimary, PrimaryStore, SqlitePrimary};

use cli::CliArgs;
use inbound::{next_inbound, Inbound};

/// Expand ~ to the home directory.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    match data_dir.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(data_dir),
    }
}

fn open_primary(
    config: &IntakeConfig,
    in_memory: bool,
) -> Result<Arc<dyn PrimaryStore>, Box<dyn std::error::Error>> {
    if in_memory {
        tracing::info!("Sessions kept in memory only");
        return Ok(Arc::new(MemoryPrimary::new()));
    }

    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join(&config.session.database_file);
    let primary = SqlitePrimary::open(&db_path)?;
    tracing::info!(path = %db_path.display(), "Session database opened");
    Ok(Arc::new(primary))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = IntakeConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    // Tracing goes to stderr so stdout carries only turn outcomes.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting intake v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    let primary = open_primary(&config, args.in_memory)?;
    let services = OfflineServices::new(&args.checkout_url);
    let engine = Arc::new(ConversationEngine::new(
        &config,
        primary,
        services.collaborators(),
    ));

    let maintenance = Arc::new(MaintenanceTask::new(
        Arc::clone(&engine),
        Duration::from_secs(config.maintenance.interval_secs.max(1)),
    ));
    let runner = Arc::clone(&maintenance);
    let maintenance_handle = tokio::spawn(async move { runner.run().await });

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut buf = Vec::new();
    let mut stdout = tokio::io::stdout();
    tracing::info!("Reading identity|message lines from stdin");

    loop {
        let inbound = tokio::select! {
            inbound = next_inbound(&mut reader, &mut buf) => inbound,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                Inbound::Closed
            }
        };
        let (identity, text) = match inbound {
            Inbound::Message { identity, text } => (identity, text),
            Inbound::Skipped => continue,
            Inbound::Closed => break,
        };

        let output = match engine.handle_message(&identity, &text).await {
            Ok(outcome) => serde_json::to_string(&outcome)?,
            Err(e) => {
                tracing::warn!(error = %e, "Message rejected");
                serde_json::json!({ "path": "rejected", "error": e.to_string() }).to_string()
            }
        };
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    maintenance.shutdown();
    if let Err(e) = maintenance_handle.await {
        tracing::warn!(error = %e, "Maintenance task ended abnormally");
    }
    tracing::info!(cache = ?engine.cache_stats(), "Shutting down");
    Ok(())
}
