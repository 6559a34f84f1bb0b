//! Inbound commands to the controller.
//!
//! These represent actions requested by an operator surface (serial
//! console, display buttons) that the
//! [`Controller`](super::service::Controller) interprets and acts upon.
//! Bus commands do not pass through here; the link forces circuits
//! directly.

use crate::control::actuator::ActuatorState;
use crate::control::window::Band;

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    /// Replace a circuit's day and night bands (validated, auto-saved).
    SetBands { circuit: String, day: Band, night: Band },

    /// Drive a circuit's output directly, bypassing `inverse_output`.
    /// The next regular tick takes over again.
    ForceCircuit { circuit: String, state: ActuatorState },

    /// Persist the current config on the next auto-save check.
    SaveConfig,
}
