// SBMS Exporter - Prometheus exporter for SBMS battery management systems
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # SBMS Exporter
//!
//! Reads the telemetry stream of an SBMS device and serves it to Prometheus.
//!
//! ## Usage
//!
//! ```bash
//! # Read from the serial adapter
//! sbms-exporter --serial-port /dev/ttyUSB0
//!
//! # Custom address and path
//! sbms-exporter -s /dev/ttyUSB0 --listen-address 127.0.0.1:9200 --telemetry-path /scrape
//! ```

mod config;
mod device;
mod metrics;
mod server;

use clap::Parser;
use config::{parse_level, Args, ConfigError};
use device::DeviceError;
use prometheus::Registry;
use sbms::{Exporter, SbmsError, StreamError};
use server::AppState;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Fatal errors of the exporter process
#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Exporter stopped: {0}")]
    Exporter(#[from] SbmsError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Server(std::io::Error),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Reader thread exited without reporting")]
    WorkerLost,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::from_default_env().add_directive(parse_level(&args.log_level).into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("SBMS Exporter v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let serial_port = args.serial_port.clone();
    let (server_config, sink_config) = args.into_configs()?;

    let registry = Arc::new(Registry::new());
    let exporter = Exporter::with_config(Arc::clone(&registry), &sink_config)?;
    let stats = exporter.stats();

    let device = device::open(&serial_port)?;

    let addr = server_config.listen_address;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::Bind { addr, source })?;

    let mut worker = device::spawn_worker(exporter, device)?;

    // Build router
    let state = Arc::new(AppState::new(
        registry,
        stats,
        server_config.telemetry_path.clone(),
    ));
    let app = server::router(state);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    info!("Listening on http://{}", addr);
    info!("Metrics endpoint: http://{}{}", addr, server_config.telemetry_path);

    let outcome = tokio::select! {
        reason = &mut worker => match reason {
            Ok(SbmsError::Stream(StreamError::Closed)) => Ok(()),
            Ok(reason) => Err(AppError::Exporter(reason)),
            Err(_) => Err(AppError::WorkerLost),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
        served = &mut server => {
            // The reader thread blocks on the device; it goes down with the process
            return match served? {
                Ok(()) => {
                    warn!("HTTP server stopped");
                    Ok(())
                }
                Err(e) => Err(AppError::Server(e)),
            };
        }
    };

    let _ = shutdown_tx.send(());
    server.await?.map_err(AppError::Server)?;
    info!("Server stopped");

    outcome
}
