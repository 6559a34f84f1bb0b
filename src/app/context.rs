//! Process-wide state handed to every component at startup.
//!
//! There are no ambient globals: the [`AppContext`] is built once by the
//! controller assembly and shared by handle.  Sensors and circuits are
//! registered in declaration order and never removed.

use std::sync::Arc;

use crate::app::ports::{ChangeSink, Clock};
use crate::control::{CircuitHandle, CircuitStatus};
use crate::error::{Error, Result};
use crate::sensors::{SensorHandle, SensorReading};

/// Name lookup for sensors and circuits.
#[derive(Default)]
pub struct Registry {
    sensors: Vec<SensorHandle>,
    circuits: Vec<CircuitHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensor.  Returns its index.
    pub fn add_sensor(&mut self, sensor: SensorHandle) -> Result<usize> {
        if self.name_taken(sensor.name()) {
            return Err(Error::Config("duplicate sensor name"));
        }
        self.sensors.push(sensor);
        Ok(self.sensors.len() - 1)
    }

    /// Register a circuit.  Returns its index.
    pub fn add_circuit(&mut self, circuit: CircuitHandle) -> Result<usize> {
        if self.name_taken(circuit.name()) {
            return Err(Error::Config("duplicate circuit name"));
        }
        self.circuits.push(circuit);
        Ok(self.circuits.len() - 1)
    }

    fn name_taken(&self, name: &str) -> bool {
        self.find_sensor(name).is_some() || self.find_circuit(name).is_some()
    }

    pub fn find_sensor(&self, name: &str) -> Option<&SensorHandle> {
        self.sensors.iter().find(|s| s.name() == name)
    }

    pub fn find_circuit(&self, name: &str) -> Option<&CircuitHandle> {
        self.circuits.iter().find(|c| c.name() == name)
    }

    pub fn sensor(&self, index: usize) -> Option<&SensorHandle> {
        self.sensors.get(index)
    }

    pub fn circuit(&self, index: usize) -> Option<&CircuitHandle> {
        self.circuits.get(index)
    }

    pub fn sensors(&self) -> &[SensorHandle] {
        &self.sensors
    }

    pub fn circuits(&self) -> &[CircuitHandle] {
        &self.circuits
    }
}

/// Snapshot of every sensor and circuit, for display code.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub sensors: Vec<SensorReading>,
    pub circuits: Vec<CircuitStatus>,
}

pub struct AppContext {
    pub registry: Registry,
    pub sink: Arc<dyn ChangeSink>,
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn new(sink: Arc<dyn ChangeSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Registry::new(),
            sink,
            clock,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            sensors: self.registry.sensors().iter().map(|s| s.reading()).collect(),
            circuits: self.registry.circuits().iter().map(|c| c.status()).collect(),
        }
    }
}
