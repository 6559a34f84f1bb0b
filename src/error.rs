//! Unified error types for the Terrarium firmware.
//!
//! A single `Error` enum that every subsystem converts into, so the
//! scheduler pass and the link loop handle failures uniformly. All
//! variants are `Copy` and carry no heap data.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A sensor could not produce a trustworthy value.
    Sensor(SensorError),
    /// An actuator output could not be written.
    Actuator(ActuatorError),
    /// The message-bus link failed.
    Link(LinkError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

/// Reasons a sensor read is rejected. Any of these puts the sensor in the
/// error state; consumers must not use its last value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The hardware transaction failed (no response, bus error).
    ReadFailed,
    /// The driver exceeded its per-read time budget.
    Timeout,
    /// A frame arrived but its checksum did not match.
    ChecksumMismatch,
    /// No sample has ever been received (remote sensors).
    NoData,
    /// Every child of an aggregate is currently faulted.
    AllChildrenFaulted,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed => write!(f, "read failed"),
            Self::Timeout => write!(f, "read timed out"),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
            Self::NoData => write!(f, "no data received"),
            Self::AllChildrenFaulted => write!(f, "all children faulted"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// GPIO level write failed.
    GpioWriteFailed,
    /// PWM duty-cycle write failed.
    PwmWriteFailed,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
            Self::PwmWriteFailed => write!(f, "PWM write failed"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// A publish was attempted while the session is offline.
    Disconnected,
    /// The connection handshake failed or timed out.
    ConnectFailed,
    /// The broker rejected a subscription.
    SubscribeFailed,
    /// The session refused an outbound message.
    PublishFailed,
    /// An inbound sensor payload was not a number.
    MalformedPayload,
    /// The link stayed down past the watchdog ceiling; the device restarts.
    WatchdogExpired,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "not connected"),
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::SubscribeFailed => write!(f, "subscribe failed"),
            Self::PublishFailed => write!(f, "publish failed"),
            Self::MalformedPayload => write!(f, "malformed payload"),
            Self::WatchdogExpired => write!(f, "link watchdog expired"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
