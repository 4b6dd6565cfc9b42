//! callctx server entry point.
//!
//! Boots the webhook server: loads configuration, opens the database, wires
//! the upstream clients, and serves until SIGINT/SIGTERM. Logs are JSON on
//! stderr.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use callctx_client::Services;
use callctx_core::{AppConfig, TaskRunner};
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod routes;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    let bind_addr = config.bind_addr.clone();
    let services = Services::from_config(config).await.context("starting services")?;
    let runner = Arc::new(TaskRunner::spawn());

    let app = handler::router(handler::AppState::from_services(&services, runner.clone()));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "callctx server listening");

    let purge = services.spawn_purge_loop();
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    purge.abort();
    runner.shutdown().await;
    services.db.close().await.context("closing database")?;
    tracing::info!("callctx server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = wait_for_signal("ctrl-c", tokio::signal::ctrl_c());

    #[cfg(unix)]
    let terminate = wait_for_signal("SIGTERM", async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        signal.recv().await;
        Ok(())
    });

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

/// Resolve when `signal` fires. A handler that cannot be installed never
/// resolves, so it cannot trigger shutdown on its own.
async fn wait_for_signal<F>(name: &'static str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!(error = %e, signal = name, "failed to install signal handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_failed_handler_install_does_not_shut_down() {
        let failed = wait_for_signal("SIGTERM", async { Err(std::io::Error::other("no signal driver")) });
        assert!(tokio::time::timeout(Duration::from_millis(50), failed).await.is_err());
    }

    #[tokio::test]
    async fn test_delivered_signal_resolves() {
        let delivered = wait_for_signal("ctrl-c", async { Ok(()) });
        assert!(tokio::time::timeout(Duration::from_millis(50), delivered).await.is_ok());
    }
}
