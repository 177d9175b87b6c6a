//! Process entry point (§4.I): parses CLI flags, initializes logging,
//! constructs the shared connection state, and runs the connection
//! supervisor and HTTP front end side by side until `SIGINT`/`SIGTERM`.

mod config;
mod dispatcher;
mod error;
mod http;
mod manifest;
mod supervisor;
#[cfg(feature = "scripting")]
mod tools;
mod transport;
mod wire;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, Cli};
use supervisor::{ConnectionHandle, Supervisor};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match AppConfig::from_cli(cli) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("serial-mcp-adapter: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .init();

    tracing::info!(
        line = %config.line.display(),
        port = config.port,
        baud = config.baud,
        "starting serial-mcp-adapter"
    );

    let conn = ConnectionHandle::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(wait_for_shutdown_signal(shutdown_tx.clone()));

    let supervisor = Supervisor::new(config.clone(), conn.clone());
    let supervisor_shutdown = shutdown_rx.clone();
    let supervisor_task = tokio::spawn(async move { supervisor.run(supervisor_shutdown).await });

    let http_result = http::serve(config, conn, shutdown_rx).await;

    let _ = shutdown_tx.send(true);
    let _ = supervisor_task.await;

    if let Err(e) = http_result {
        tracing::error!(error = %e, "HTTP server failed to start");
        std::process::exit(1);
    }
}

/// Resolves on `SIGINT` or `SIGTERM` and publishes the shutdown signal that
/// both the HTTP server and the supervisor watch for (§4.I, §5).
async fn wait_for_shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}
