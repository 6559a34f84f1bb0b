//! Recording doubles for integration tests.
//!
//! Every output write, sink notification and restart request is kept so
//! tests can assert on the full history without touching real GPIO.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use terrarium::adapters::hardware::SimHardware;
use terrarium::adapters::mqtt::{MqttSession, SimBroker};
use terrarium::adapters::time::ManualClock;
use terrarium::app::ports::{ChangeSink, ConfigError, ConfigPort, OutputDriver, OutputLevel, RestartPort};
use terrarium::app::service::{Controller, Wiring};
use terrarium::config::SystemConfig;
use terrarium::control::ActuatorState;
use terrarium::error::ActuatorError;

// ── RecordingOutput ───────────────────────────────────────────

/// Output driver whose clone keeps seeing every level written.
#[derive(Clone, Default)]
pub struct RecordingOutput {
    levels: Arc<Mutex<Vec<OutputLevel>>>,
}

#[allow(dead_code)]
impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> Vec<OutputLevel> {
        self.levels.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<OutputLevel> {
        self.levels.lock().unwrap().last().copied()
    }

    pub fn writes(&self) -> usize {
        self.levels.lock().unwrap().len()
    }
}

impl OutputDriver for RecordingOutput {
    fn write(&mut self, level: OutputLevel) -> Result<(), ActuatorError> {
        self.levels.lock().unwrap().push(level);
        Ok(())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub values: Mutex<Vec<(String, f32)>>,
    pub states: Mutex<Vec<(String, ActuatorState)>>,
    pub events: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn last_value(&self, sensor: &str) -> Option<f32> {
        self.values
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(s, _)| s == sensor)
            .map(|(_, v)| *v)
    }

    pub fn last_state(&self, circuit: &str) -> Option<ActuatorState> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(c, _)| c == circuit)
            .map(|(_, s)| *s)
    }

    pub fn state_count(&self, circuit: &str) -> usize {
        self.states.lock().unwrap().iter().filter(|(c, _)| c == circuit).count()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ChangeSink for RecordingSink {
    fn on_value_changed(&self, sensor: &str, value: f32) {
        self.values.lock().unwrap().push((sensor.to_owned(), value));
    }

    fn on_circuit_state_changed(&self, circuit: &str, state: ActuatorState) {
        self.states.lock().unwrap().push((circuit.to_owned(), state));
    }

    fn log_event(&self, text: &str) {
        self.events.lock().unwrap().push(text.to_owned());
    }
}

// ── CountingRestart ───────────────────────────────────────────

#[derive(Default)]
pub struct CountingRestart(AtomicU32);

#[allow(dead_code)]
impl CountingRestart {
    pub fn count(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl RestartPort for CountingRestart {
    fn restart(&self, _reason: &'static str) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

// ── MockConfigStore ───────────────────────────────────────────

/// In-memory [`ConfigPort`] that counts saves.
#[derive(Default)]
pub struct MockConfigStore {
    stored: RefCell<Option<SystemConfig>>,
    saves: Cell<u32>,
}

#[allow(dead_code)]
impl MockConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> u32 {
        self.saves.get()
    }

    pub fn stored(&self) -> Option<SystemConfig> {
        self.stored.borrow().clone()
    }
}

impl ConfigPort for MockConfigStore {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        self.stored.borrow().clone().ok_or(ConfigError::NotFound)
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config
            .validate()
            .map_err(|_| ConfigError::ValidationFailed("invalid config"))?;
        *self.stored.borrow_mut() = Some(config.clone());
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

// ── Rig ───────────────────────────────────────────────────────

/// A fully wired controller on simulated hardware and a simulated broker.
pub struct Rig {
    pub controller: Controller<MqttSession>,
    pub hardware: SimHardware,
    pub broker: SimBroker,
    pub clock: Arc<ManualClock>,
    pub restart: Arc<CountingRestart>,
    pub sink: Arc<RecordingSink>,
}

#[allow(dead_code)]
impl Rig {
    /// Stock deployment at `hh:mm`.
    pub fn at(hour: u32, minute: u32) -> Self {
        Self::with_config(SystemConfig::default(), hour, minute)
    }

    pub fn with_config(config: SystemConfig, hour: u32, minute: u32) -> Self {
        let clock = Arc::new(ManualClock::at(hour, minute));
        let broker = SimBroker::new();
        let restart = Arc::new(CountingRestart::default());
        let sink = Arc::new(RecordingSink::default());
        let mut hardware = SimHardware::new(&config);
        let controller = Controller::build(
            config,
            Wiring {
                hardware: &mut hardware,
                clock: clock.clone(),
                restart: restart.clone(),
                session: Some(MqttSession::with_broker("mqtt://sim:1883", broker.clone())),
                sinks: vec![sink.clone()],
            },
        )
        .expect("stock config builds");
        Self {
            controller,
            hardware,
            broker,
            clock,
            restart,
            sink,
        }
    }

    /// Advance the clock in `step_ms` increments, running the scheduler
    /// after each one.
    pub fn run_for(&mut self, total_ms: u64, step_ms: u64) {
        let mut elapsed = 0;
        while elapsed < total_ms {
            self.clock.advance(step_ms);
            self.controller.tick();
            elapsed += step_ms;
        }
    }

    pub fn pin_high(&self, circuit: &str) -> Option<bool> {
        self.hardware.output_monitor(circuit)?.is_high()
    }
}
