// SBMS - Battery telemetry decoding and exposition
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Exporter loop
//!
//! The single worker that drives a byte stream through the pipeline:
//!
//! ```text
//! stream -> FrameReader -> decode -> GaugeSink::update -> ConnectivityGate
//! ```
//!
//! The loop is synchronous and runs until the stream ends; a scraper may read
//! the registry concurrently at any point.

use crate::decoder::decode;
use crate::error::{Result, SbmsError, StreamError};
use crate::gate::{ConnectivityGate, GateState, MetricRegistry, Transition};
use crate::reader::FrameReader;
use crate::sink::{GaugeSink, SinkConfig};
use std::io::{BufReader, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters shared with the status endpoint
#[derive(Debug, Default)]
pub struct ExporterStats {
    /// Whether the gate is currently up
    pub connected: AtomicBool,
    /// Records decoded successfully
    pub records_decoded: AtomicU64,
    /// Records rejected by the decoder
    pub records_rejected: AtomicU64,
}

impl ExporterStats {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn decoded(&self) -> u64 {
        self.records_decoded.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> u64 {
        self.records_rejected.load(Ordering::SeqCst)
    }
}

/// Decodes device records and keeps the registry in step with them
#[derive(Debug)]
pub struct Exporter<M: MetricRegistry> {
    sink: GaugeSink,
    gate: ConnectivityGate<M>,
    stats: Arc<ExporterStats>,
}

impl<M: MetricRegistry> Exporter<M> {
    /// Create an exporter with the default namespace.
    ///
    /// Registers the `up` gauge with `registry` immediately.
    pub fn new(registry: M) -> Result<Self> {
        Self::with_config(registry, &SinkConfig::default())
    }

    /// Create an exporter with a custom sink configuration
    pub fn with_config(registry: M, config: &SinkConfig) -> Result<Self> {
        let sink = GaugeSink::new(config)?;
        let gate = ConnectivityGate::new(registry, sink.up(), sink.collectors())?;

        Ok(Self {
            sink,
            gate,
            stats: Arc::new(ExporterStats::default()),
        })
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<ExporterStats> {
        Arc::clone(&self.stats)
    }

    /// Current gate state
    pub fn state(&self) -> GateState {
        self.gate.state()
    }

    /// The injected registry
    pub fn registry(&self) -> &M {
        self.gate.registry()
    }

    /// Handle one raw record.
    ///
    /// A record that fails to decode moves the gate down; it is not an error
    /// for the caller. Errors are registry failures only.
    pub fn process(&mut self, record: &[u8]) -> Result<Transition> {
        let transition = match decode(record) {
            Ok(reading) => {
                self.stats.records_decoded.fetch_add(1, Ordering::Relaxed);
                // Values land before registration so a scrape never sees
                // a freshly registered set with stale values.
                self.sink.update(&reading);
                self.gate.on_success()
            }
            Err(e) => {
                self.stats.records_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Rejected record");
                self.gate.on_failure()
            }
        };

        self.stats
            .connected
            .store(self.gate.is_up(), Ordering::SeqCst);
        transition
    }

    /// Consume `stream` until it ends.
    ///
    /// Always returns the condition that ended the loop:
    /// [`StreamError::Closed`] at end of input, [`StreamError::Io`] on a read
    /// failure, or [`SbmsError::Registry`] if the registry rejected the metric
    /// set. The gate is down when this returns.
    pub fn export<R: Read>(&mut self, stream: R) -> SbmsError {
        let reason = self.drain(stream);
        self.disconnect();

        match &reason {
            SbmsError::Stream(StreamError::Closed) => info!("Input stream closed"),
            SbmsError::Stream(e) => warn!(error = %e, "Input stream failed"),
            e => error!(error = %e, "Exporter stopped"),
        }
        reason
    }

    fn drain<R: Read>(&mut self, stream: R) -> SbmsError {
        for record in FrameReader::new(BufReader::new(stream)) {
            let record = match record {
                Ok(record) => record,
                Err(e) => return StreamError::Io(e).into(),
            };
            if let Err(e) = self.process(&record) {
                return e;
            }
        }
        StreamError::Closed.into()
    }

    /// Force the gate down
    pub fn disconnect(&mut self) {
        if let Err(e) = self.gate.on_failure() {
            error!(error = %e, "Failed to clear metric set");
        }
        self.stats.connected.store(false, Ordering::SeqCst);
    }
}
