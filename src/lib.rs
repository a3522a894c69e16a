// SBMS - Battery telemetry decoding and exposition
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # SBMS
//!
//! Decodes the telemetry stream of an SBMS solar battery management system
//! and exposes it as Prometheus gauges that follow the device's connectivity.
//!
//! ## Key Features
//!
//! - **Frame decoding**: 59-byte lines of base-91 digits described by a
//!   declarative layout table
//! - **Connectivity gate**: the device metric set is registered only while
//!   records decode, so a disconnected device shows `up 0` and nothing stale
//! - **Injected registry**: no global state; pass any [`MetricRegistry`]
//!
//! ## Quick Start
//!
//! ```rust
//! use sbms::{Exporter, GateState};
//! use prometheus::Registry;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(Registry::new());
//! let mut exporter = Exporter::new(registry.clone()).unwrap();
//!
//! exporter.process(b"3';2LD$,I)I*I+I+H}I%I+I**h##+#)P####->##################%N(").unwrap();
//! assert_eq!(exporter.state(), GateState::Up);
//!
//! exporter.process(b"garbage").unwrap();
//! assert_eq!(exporter.state(), GateState::Down);
//! assert_eq!(registry.gather().len(), 1); // only sbms_up
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Frame layout and base-91 digit packing
//! - [`decoder`]: Frame to [`Reading`] decoding
//! - [`reader`]: Line-delimited record reader
//! - [`gate`]: Connectivity state machine
//! - [`sink`]: Reading to gauge mapping
//! - [`exporter`]: The worker loop tying them together

// Modules
pub mod decoder;
pub mod error;
pub mod exporter;
pub mod gate;
pub mod protocol;
pub mod reader;
pub mod sink;

// Re-exports for convenient access
pub use decoder::{decode, Reading, SignedMagnitude};
pub use error::{DecodeError, Result, SbmsError, StreamError};
pub use exporter::{Exporter, ExporterStats};
pub use gate::{ConnectivityGate, GateState, MetricRegistry, Transition};
pub use protocol::{Field, FieldSpec, Transform, FRAME_LAYOUT, FRAME_LEN};
pub use reader::FrameReader;
pub use sink::{GaugeSink, SinkConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
