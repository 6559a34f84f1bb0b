//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Sensors · Circuits · Link (domain)
//! ```
//!
//! Driven adapters (sensor drivers, relay outputs, bus sessions, clocks,
//! storage, displays) implement these traits.  The domain core holds them
//! as trait objects or generics and never touches hardware directly.

use core::time::Duration;

use chrono::NaiveDateTime;

use crate::config::{OutputConfig, SystemConfig};
use crate::control::actuator::ActuatorState;
use crate::error::{ActuatorError, LinkError, SensorError};
use crate::sensors::dht::Quantity;

// ───────────────────────────────────────────────────────────────
// Sensor driver port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// One physical measurement channel.
///
/// Implementations may block on a bus transaction but must bound every
/// wait; the owning [`Sensor`](crate::sensors::Sensor) additionally
/// discards samples that arrive after its read timeout.
pub trait SensorDriver: Send {
    /// Take one sample.  `now_ms` is monotonic uptime.
    fn sample(&mut self, now_ms: u64) -> Result<f32, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Output driver port (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Physical level written to an output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputLevel {
    /// Relay / GPIO: `true` drives the pin high.
    Digital(bool),
    /// Proportional output, 0–100 %.
    Duty(f32),
}

/// Write-side port for a single actuator output.
pub trait OutputDriver: Send {
    fn write(&mut self, level: OutputLevel) -> Result<(), ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Hardware port (assembly-time factory for drivers)
// ───────────────────────────────────────────────────────────────

/// Hands out the drivers the controller is assembled from.  Called once
/// per configured sensor channel and circuit output, in declaration order.
pub trait HardwarePort {
    /// Driver for one DHT22 channel on `gpio`.
    fn dht_channel(
        &mut self,
        sensor: &str,
        gpio: i32,
        quantity: Quantity,
    ) -> crate::error::Result<Box<dyn SensorDriver>>;

    /// Driver for a circuit's output.
    fn output(&mut self, circuit: &str, output: &OutputConfig) -> crate::error::Result<Box<dyn OutputDriver>>;
}

// ───────────────────────────────────────────────────────────────
// Change sink port (domain → display / bus / log)
// ───────────────────────────────────────────────────────────────

/// Notifications emitted by the core.  Every method defaults to a no-op
/// so adapters implement only what they consume.
pub trait ChangeSink: Send + Sync {
    /// A sensor produced a new trustworthy value.
    fn on_value_changed(&self, _sensor: &str, _value: f32) {}

    /// A circuit commanded (or re-confirmed) its actuator state.
    fn on_circuit_state_changed(&self, _circuit: &str, _state: ActuatorState) {}

    /// Free-text event for the operator log.
    fn log_event(&self, _text: &str) {}
}

/// Sink that drops everything.
pub struct NullSink;

impl ChangeSink for NullSink {}

/// Fans every notification out to several sinks in order.
#[derive(Default)]
pub struct SinkChain {
    sinks: Vec<std::sync::Arc<dyn ChangeSink>>,
}

impl SinkChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: std::sync::Arc<dyn ChangeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: std::sync::Arc<dyn ChangeSink>) {
        self.sinks.push(sink);
    }
}

impl ChangeSink for SinkChain {
    fn on_value_changed(&self, sensor: &str, value: f32) {
        for s in &self.sinks {
            s.on_value_changed(sensor, value);
        }
    }

    fn on_circuit_state_changed(&self, circuit: &str, state: ActuatorState) {
        for s in &self.sinks {
            s.on_circuit_state_changed(circuit, state);
        }
    }

    fn log_event(&self, text: &str) {
        for s in &self.sinks {
            s.log_event(text);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    /// Milliseconds since boot (monotonic).
    fn monotonic_ms(&self) -> u64;

    /// Local wall-clock time, `None` until the clock has been synced.
    fn wallclock(&self) -> Option<NaiveDateTime>;
}

// ───────────────────────────────────────────────────────────────
// Restart port
// ───────────────────────────────────────────────────────────────

/// Full device restart.  On hardware this does not return.
pub trait RestartPort: Send + Sync {
    fn restart(&self, reason: &'static str);
}

// ───────────────────────────────────────────────────────────────
// Bus session port (driven adapter: domain ↔ message broker)
// ───────────────────────────────────────────────────────────────

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// One message-bus session.
///
/// `connect` performs a single handshake bounded by `timeout` and never
/// retries internally; retry cadence belongs to the
/// [`ConnectionManager`](crate::link::ConnectionManager).
pub trait BusSession: Send {
    fn connect(&mut self, client_id: &str, timeout: Duration) -> Result<(), LinkError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, pattern: &str, qos: QoS) -> Result<(), LinkError>;

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), LinkError>;

    /// Move every message received since the last call into `out`.
    fn drain_inbound(&mut self, out: &mut Vec<InboundMessage>);
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from the components it drives)
// ───────────────────────────────────────────────────────────────

/// Callback the [`Scheduler`](crate::scheduler::Scheduler) invokes for each
/// task that is due in the current pass.
pub trait TaskDelegate {
    fn on_task_due(&mut self, task: &crate::scheduler::TaskKind, now_ms: u64);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST validate before persisting and reject invalid
/// values with [`ConfigError::ValidationFailed`] rather than clamping.
pub trait ConfigPort {
    /// Load configuration; [`SystemConfig::default()`] if none is stored.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

