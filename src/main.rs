//! # coachcal Main Entry Point
//!
//! Serves the HTTP API by default; `migrate` and `sync-event-types` are
//! one-shot maintenance commands.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use coachcal::{
    config::ConfigLoader,
    db,
    event_type_sync::SyncRequest,
    server::{AppState, run_server, spawn_shutdown_listener},
    telemetry::init_tracing,
};

/// Scheduling back end mirroring Cal.com
#[derive(Parser)]
#[command(name = "coachcal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply migrations and serve the HTTP API (default)
    Serve {
        /// Skip applying pending migrations at startup
        #[arg(long)]
        skip_migrations: bool,
    },

    /// Apply pending database migrations and exit
    Migrate,

    /// Reconcile one calendar integration's event types with Cal.com
    SyncEventTypes {
        /// Local calendar integration id
        #[arg(long)]
        integration: Uuid,

        /// Delete local event types missing remotely instead of deactivating them
        #[arg(long)]
        delete_missing: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Arc::new(ConfigLoader::new().load().context("loading configuration")?);
    init_tracing(&config).context("initializing telemetry")?;

    match config.redacted_json() {
        Ok(redacted) => tracing::info!(profile = %config.profile, config = %redacted, "Loaded configuration"),
        Err(err) => tracing::warn!(error = %err, "Could not render configuration"),
    }

    let pool = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command.unwrap_or(Commands::Serve {
        skip_migrations: false,
    }) {
        Commands::Serve { skip_migrations } => {
            if !skip_migrations {
                db::run_migrations(&pool).await?;
            }
            let shutdown = CancellationToken::new();
            spawn_shutdown_listener(shutdown.clone());
            run_server(config, Arc::new(pool), shutdown).await?;
        }
        Commands::Migrate => {
            db::run_migrations(&pool).await?;
            tracing::info!("Migrations applied");
        }
        Commands::SyncEventTypes {
            integration,
            delete_missing,
        } => {
            let state = AppState::new(Arc::clone(&config), Arc::new(pool))?;
            let record = state
                .integrations
                .get_by_id(integration)
                .await?
                .ok_or_else(|| anyhow!("calendar integration '{integration}' not found"))?;

            let report = state
                .event_type_sync
                .sync(SyncRequest {
                    user_id: record.user_id,
                    calendar_integration_id: record.id,
                    remote: Vec::new(),
                    delete_missing: delete_missing.then_some(true),
                })
                .await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                return Err(anyhow!(
                    "sync rolled back: {}",
                    report.error.unwrap_or_default()
                ));
            }
        }
    }

    Ok(())
}
