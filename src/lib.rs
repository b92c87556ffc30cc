//! croncall -- call HTTP endpoints on cron schedules.
//!
//! Cron timers push trigger events onto an unbounded queue; a bounded pool of
//! workers drains it, invokes each job's target and records one outcome per
//! attempt.

pub mod api;
pub mod config;
pub mod invoker;
pub mod job;
pub mod scheduler;
pub mod storage;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::state::AppState;
use crate::config::CroncallConfig;
use crate::invoker::HttpInvoker;
use crate::scheduler::Scheduler;
use crate::storage::SqliteStore;

/// Run the croncall daemon: storage, scheduler and API server, until SIGINT/SIGTERM.
pub async fn serve(config: &CroncallConfig) -> Result<()> {
    // 1. Initialize Storage
    let db_path = config.storage.db_path.to_string_lossy().into_owned();
    tracing::info!(%db_path, "Initializing database");
    let store = SqliteStore::new(storage::open_pool(&db_path)?);

    // 2. Initialize Scheduler
    let invoker = HttpInvoker::new(config.dispatch.request_timeout())
        .context("failed to build HTTP client")?;
    let scheduler = Scheduler::new(
        Arc::new(store.clone()),
        Arc::new(invoker),
        config.dispatch.concurrency,
    );

    // 3. Load jobs and start dispatching
    scheduler.start().await;

    // 4. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let app = api::router(AppState {
        store,
        scheduler: scheduler.clone(),
    });

    tracing::info!(%addr, "croncall listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(stop_timers_on(shutdown_signal(), scheduler.clone()))
        .await?;

    // 5. Drain
    scheduler.shutdown(config.dispatch.shutdown_grace()).await;
    tracing::info!("croncall stopped");
    Ok(())
}

/// Resolve once `signal` fires, halting cron timers before the HTTP server
/// starts its own graceful drain.
async fn stop_timers_on(signal: impl Future<Output = ()>, scheduler: Scheduler) {
    signal.await;
    scheduler.stop();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received, shutting down gracefully..."),
        _ = terminate => tracing::info!("SIGTERM received, shutting down gracefully..."),
    }
}
