// SBMS - Battery telemetry decoding and exposition
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Connectivity gate
//!
//! Two-state machine deciding whether the device metric set is exposed.
//! While `Down` only the `up` gauge is registered (value 0). The first
//! successful decode moves the gate `Up`, registering every other collector
//! and setting `up` to 1. A decode failure or the end of the stream moves it
//! back `Down`, removing those collectors so scrapers never see stale values.
//!
//! Entry and exit actions are idempotent: repeated successes register once,
//! repeated failures unregister once.

use crate::error::Result;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, Registry};
use std::sync::Arc;
use tracing::{info, warn};

/// Registry the gate registers collectors with.
///
/// Implementations must tolerate concurrent `gather` calls from the
/// exposition endpoint while the worker registers and unregisters.
pub trait MetricRegistry: Send + Sync {
    /// Attach a collector
    fn register(&self, collector: Box<dyn Collector>) -> prometheus::Result<()>;

    /// Detach a previously registered collector
    fn unregister(&self, collector: Box<dyn Collector>) -> prometheus::Result<()>;

    /// Snapshot every registered metric family
    fn gather(&self) -> Vec<MetricFamily>;
}

impl MetricRegistry for Registry {
    fn register(&self, collector: Box<dyn Collector>) -> prometheus::Result<()> {
        Registry::register(self, collector)
    }

    fn unregister(&self, collector: Box<dyn Collector>) -> prometheus::Result<()> {
        Registry::unregister(self, collector)
    }

    fn gather(&self) -> Vec<MetricFamily> {
        Registry::gather(self)
    }
}

impl<T: MetricRegistry + ?Sized> MetricRegistry for Arc<T> {
    fn register(&self, collector: Box<dyn Collector>) -> prometheus::Result<()> {
        (**self).register(collector)
    }

    fn unregister(&self, collector: Box<dyn Collector>) -> prometheus::Result<()> {
        (**self).unregister(collector)
    }

    fn gather(&self) -> Vec<MetricFamily> {
        (**self).gather()
    }
}

/// Gate states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    /// Device unreachable or sending garbage; only `up` is exposed
    #[default]
    Down,
    /// Last record decoded; full metric set exposed
    Up,
}

impl GateState {
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up)
    }
}

/// Observable effect of feeding an outcome to the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Down to Up; metric set registered
    Connected,
    /// Up to Down; metric set unregistered
    Disconnected,
    /// State kept
    Unchanged,
}

/// Collector handle that can be registered repeatedly.
///
/// The registry takes ownership of a boxed collector on every call, so the
/// gate keeps one shared handle per collector and hands out cheap wrappers.
struct SharedCollector(Arc<dyn Collector>);

impl Collector for SharedCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.0.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.0.collect()
    }
}

/// Connectivity state machine owning registration of the metric set
pub struct ConnectivityGate<M: MetricRegistry> {
    registry: M,
    up: Gauge,
    collectors: Vec<Arc<dyn Collector>>,
    state: GateState,
}

impl<M: MetricRegistry> ConnectivityGate<M> {
    /// Create a gate in the `Down` state.
    ///
    /// Registers `up` (for the lifetime of the registry) and sets it to 0.
    /// `collectors` is the set attached while the gate is `Up`.
    pub fn new(registry: M, up: Gauge, collectors: Vec<Box<dyn Collector>>) -> Result<Self> {
        registry.register(Box::new(up.clone()))?;
        up.set(0.0);

        Ok(Self {
            registry,
            up,
            collectors: collectors.into_iter().map(Arc::from).collect(),
            state: GateState::Down,
        })
    }

    /// Current state
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Whether the metric set is currently registered
    pub fn is_up(&self) -> bool {
        self.state.is_up()
    }

    /// The injected registry
    pub fn registry(&self) -> &M {
        &self.registry
    }

    /// Number of collectors toggled by the gate
    pub fn collector_count(&self) -> usize {
        self.collectors.len()
    }

    /// Feed a successful decode.
    ///
    /// If registration fails part way, collectors registered so far are
    /// removed again and the gate stays `Down`.
    pub fn on_success(&mut self) -> Result<Transition> {
        if self.state.is_up() {
            return Ok(Transition::Unchanged);
        }

        for (registered, collector) in self.collectors.iter().enumerate() {
            if let Err(e) = self.registry.register(self.handle(collector)) {
                for collector in &self.collectors[..registered] {
                    let _ = self.registry.unregister(self.handle(collector));
                }
                self.up.set(0.0);
                return Err(e.into());
            }
        }

        self.up.set(1.0);
        self.state = GateState::Up;
        info!(
            collectors = self.collectors.len(),
            "Device connected, metric set registered"
        );
        Ok(Transition::Connected)
    }

    /// Feed a decode failure or the end of the stream.
    ///
    /// Every collector is detached even if one fails; the first error is
    /// returned afterwards and the gate is `Down` regardless.
    pub fn on_failure(&mut self) -> Result<Transition> {
        self.up.set(0.0);
        if !self.state.is_up() {
            return Ok(Transition::Unchanged);
        }

        let mut first_error = None;
        for collector in &self.collectors {
            if let Err(e) = self.registry.unregister(self.handle(collector)) {
                warn!(error = %e, "Failed to unregister collector");
                first_error.get_or_insert(e);
            }
        }

        self.state = GateState::Down;
        info!("Device disconnected, metric set unregistered");

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(Transition::Disconnected),
        }
    }

    fn handle(&self, collector: &Arc<dyn Collector>) -> Box<dyn Collector> {
        Box::new(SharedCollector(Arc::clone(collector)))
    }
}

impl<M: MetricRegistry> std::fmt::Debug for ConnectivityGate<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityGate")
            .field("state", &self.state)
            .field("collectors", &self.collectors.len())
            .finish()
    }
}
