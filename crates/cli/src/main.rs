//! Streams messages from a websocket feed into a sink.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod adapter;
mod config;
mod error;
mod logging;
mod metrics;
mod supervisor;

use config::{Config, LogLevel, LoggerConfig};
use error::{Error, Result};

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config files, merged in order
    #[arg(
        long,
        short,
        env = "CHAIN_SINK_CONFIG_FILES",
        value_delimiter = ' ',
        num_args = 1..,
        required = true
    )]
    config: Vec<PathBuf>,

    /// Overrides the configured log level
    #[arg(long, env = "CHAIN_SINK_LOG_LEVEL")]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            let _ = logging::init(&LoggerConfig::default());
            error!(%error, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    if let Some(level) = args.log_level {
        config.logger.level = level;
    }
    if let Err(error) = logging::init(&config.logger) {
        eprintln!("chain-sink: {error}");
        return ExitCode::FAILURE;
    }

    // Another component may have installed a provider already.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    info!(
        streams = config.stream_count,
        mode = ?config.stream.mode,
        adapter = ?config.adapter.kind,
        metrics = config.metrics.enabled,
        "starting chain-sink"
    );

    match supervisor::run(config, shutdown).await {
        Ok(()) => {
            info!("chain-sink stopped");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "error running streams");
            ExitCode::FAILURE
        }
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;

        info!("Shutting down");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        _ => {
            tracing::warn!("failed to install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received interrupt signal");
}
