//! Control layer: actuator model, time windows and the circuit state machine.

pub mod actuator;
pub mod circuit;
pub mod window;

pub use actuator::{Actuator, ActuatorKind, ActuatorState};
pub use circuit::{Circuit, CircuitHandle, CircuitParams, CircuitState, CircuitStatus, FallbackFn, Regulation};
pub use window::{Band, BandPosition, DutyWindow};
