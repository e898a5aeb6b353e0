//! # Stall Node
//!
//! Process entry point for a single till.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. tracing (RUST_LOG, default "info,stall=debug,sqlx=warn")           │
//! │  2. SyncConfig::load  (stall.toml, then STALL_* overrides)             │
//! │  3. Database::new     (authoritative store, migrations)                │
//! │  4. SqliteLocalStore  (durable queue, migrations)                      │
//! │  5. SyncAgent::start  (scheduler task)                                 │
//! │  6. wait for Ctrl+C / SIGTERM, then stop the scheduler                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stall_db::{Database, DbConfig};
use stall_sync::{
    DatabaseLedger, SqliteLocalStore, SyncAgentBuilder, SyncConfig, TracingEmitter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stall=debug,sqlx=warn")),
        )
        .with_target(true)
        .init();

    info!("Starting Stall node...");

    let config = SyncConfig::load(None).context("loading configuration")?;
    info!(
        device_id = %config.device_id(),
        tenant_id = %config.operator.tenant_id,
        mode = ?config.mode(),
        "Configuration loaded"
    );

    let authority_path = config.authority_db_path();
    if let Some(parent) = authority_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let db = Database::new(DbConfig::new(&authority_path))
        .await
        .context("opening authoritative store")?;

    let local = SqliteLocalStore::open(config.local_db_path())
        .await
        .context("opening local queue")?;

    let mut agent = SyncAgentBuilder::new(config)
        .with_local_store(Arc::new(local))
        .with_ledger(Arc::new(DatabaseLedger::new(db.clone())))
        .with_emitter(Arc::new(TracingEmitter))
        .build()?;

    let handle = agent.start().await?;

    // The ledger is in-process, so it is reachable as soon as it opened.
    handle.set_online(true).await?;

    let status = handle.status().await;
    info!(
        pending = status.queue.pending,
        stuck = status.queue.error,
        "Node ready"
    );

    shutdown_signal().await;

    agent.shutdown().await?;
    db.close().await;

    info!("Node shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping sync agent...");
}
