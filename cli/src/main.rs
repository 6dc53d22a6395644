// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `intelli-gateway` — the gateway daemon binary. A single `serve` mode: no
//! daemon/task/agent/workflow subcommand tree (out of scope for this
//! project), just "start listening, mediate tool calls, shut down cleanly".

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use intelli_gateway::bootstrap;
use intelli_gateway_core::infrastructure::config::GatewayConfig;
use intelli_gateway_core::presentation::api;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

/// Intelli Agent Gateway — mediates between LLM agents and privileged tools.
#[derive(Parser)]
#[command(name = "intelli-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Bind address (overrides GATEWAY_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides GATEWAY_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Root directory for file-backed registries (overrides GATEWAY_DATA_DIR)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let mut config = GatewayConfig::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir.display(),
        sandbox_pool_size = config.sandbox_pool_size,
        "resolved gateway configuration"
    );

    let state = bootstrap::build_state(&config).await.context("building gateway state")?;
    let cancel = tokio_util::sync::CancellationToken::new();
    let background = bootstrap::spawn_background_tasks(&state, cancel.clone());

    let app = api::app(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind to {addr}"))?;
    info!(%addr, "intelli-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("shutting down: cancelling background loops");
    cancel.cancel();
    for handle in background {
        let _ = handle.await;
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| tracing_subscriber::EnvFilter::try_new(level)).context("building log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl+c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
