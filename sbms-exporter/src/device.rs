// SBMS Exporter - Device input
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Opening the device and running the exporter loop beside the runtime.
//!
//! The serial port is consumed with blocking reads, so the loop lives on a
//! dedicated thread and reports how it ended through a oneshot channel.

use sbms::{Exporter, MetricRegistry, SbmsError};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread;
use tokio::sync::oneshot;
use tracing::info;

/// Device setup errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("Failed to start reader thread: {0}")]
    Spawn(io::Error),
}

/// Open the serial port (or any readable file or FIFO) at `path`
pub fn open(path: &Path) -> Result<File, DeviceError> {
    let file = File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => DeviceError::NotFound(path.to_path_buf()),
        _ => DeviceError::Open {
            path: path.to_path_buf(),
            source,
        },
    })?;
    info!(device = %path.display(), "Device opened");
    Ok(file)
}

/// Run `exporter` over `stream` on its own thread.
///
/// The receiver resolves with the condition that ended the loop.
pub fn spawn_worker<M, R>(
    mut exporter: Exporter<M>,
    stream: R,
) -> Result<oneshot::Receiver<SbmsError>, DeviceError>
where
    M: MetricRegistry + 'static,
    R: Read + Send + 'static,
{
    let (tx, rx) = oneshot::channel();

    thread::Builder::new()
        .name("sbms-reader".to_string())
        .spawn(move || {
            let reason = exporter.export(stream);
            // Nobody is waiting once the runtime has shut down
            let _ = tx.send(reason);
        })
        .map_err(DeviceError::Spawn)?;

    Ok(rx)
}
