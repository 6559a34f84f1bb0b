//! Log-based change sink adapter.
//!
//! Implements [`ChangeSink`] by writing value and circuit changes to the
//! ESP-IDF logger (UART / USB-CDC in production).  Stands in for the
//! display the controller would otherwise drive.

use log::info;

use crate::app::ports::ChangeSink;
use crate::control::actuator::ActuatorState;

pub struct LogChangeSink;

impl Default for LogChangeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogChangeSink {
    pub fn new() -> Self {
        Self
    }
}

impl ChangeSink for LogChangeSink {
    fn on_value_changed(&self, sensor: &str, value: f32) {
        info!("VALUE | {} = {:.1}", sensor, value);
    }

    fn on_circuit_state_changed(&self, circuit: &str, state: ActuatorState) {
        info!("CIRCUIT | {} -> {:?}", circuit, state);
    }

    fn log_event(&self, text: &str) {
        info!("EVENT | {}", text);
    }
}
