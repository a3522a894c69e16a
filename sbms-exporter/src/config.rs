// SBMS Exporter - Command line configuration
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Command line arguments and the configuration derived from them.

use clap::Parser;
use sbms::SinkConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// Paths served by the exporter itself
const RESERVED_PATHS: [&str; 3] = ["/", "/health", "/status"];

/// SBMS Prometheus Exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The serial port (or any file or FIFO) to read records from
    #[arg(short, long)]
    pub serial_port: PathBuf,

    /// Address to listen on for web interface and telemetry
    #[arg(short, long, default_value = "0.0.0.0:9101")]
    pub listen_address: SocketAddr,

    /// Path under which to expose metrics
    #[arg(short, long, default_value = "/metrics")]
    pub telemetry_path: String,

    /// Prefix of every exported metric name
    #[arg(short, long, default_value = sbms::sink::DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// HTTP side of the exporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_address: SocketAddr,
    pub telemetry_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 9101)),
            telemetry_path: "/metrics".to_string(),
        }
    }
}

/// Invalid argument combinations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Telemetry path {0:?} collides with a built-in endpoint")]
    ReservedPath(String),

    #[error("Telemetry path must not be empty")]
    EmptyPath,
}

impl Args {
    /// Validate and split into server and sink configuration
    pub fn into_configs(self) -> Result<(ServerConfig, SinkConfig), ConfigError> {
        let telemetry_path = normalize_path(&self.telemetry_path)?;
        Ok((
            ServerConfig {
                listen_address: self.listen_address,
                telemetry_path,
            },
            SinkConfig {
                namespace: self.namespace,
            },
        ))
    }
}

/// Ensure a leading slash and reject paths already routed
fn normalize_path(path: &str) -> Result<String, ConfigError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyPath);
    }

    let normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };

    if RESERVED_PATHS.contains(&normalized.as_str()) {
        return Err(ConfigError::ReservedPath(normalized));
    }
    Ok(normalized)
}

/// Map a `--log-level` value, defaulting to info
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
