//! Controller service: the hexagonal core.
//!
//! [`Controller`] assembles sensors, circuits and the optional bus link
//! from a [`SystemConfig`] and drives them through the [`Scheduler`].
//! All I/O flows through port traits injected at build time, so the whole
//! controller runs on the host against simulated hardware.
//!
//! ```text
//!  HardwarePort ──▶ ┌─────────────────────────────┐ ──▶ ChangeSink
//!                   │          Controller          │
//!     BusSession ◀─▶│ Sensors · Circuits · Link    │ ◀── Clock
//!                   └─────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::{SensorSource, SystemConfig};
use crate::control::actuator::Actuator;
use crate::control::circuit::{Circuit, CircuitParams, CircuitState};
use crate::control::window::Band;
use crate::error::{Error, LinkError, Result};
use crate::link::ConnectionManager;
use crate::scheduler::{Scheduler, TaskKind};
use crate::sensors::Sensor;

use super::commands::AppCommand;
use super::context::{AppContext, Registry, Snapshot};
use super::ports::{BusSession, ChangeSink, Clock, ConfigPort, HardwarePort, RestartPort, SinkChain, TaskDelegate};

/// Quiet period after the last config edit before it is written to flash.
pub const AUTO_SAVE_DELAY_MS: u64 = 5_000;

/// Collaborators the controller is assembled from.
pub struct Wiring<'a, S> {
    pub hardware: &'a mut dyn HardwarePort,
    pub clock: Arc<dyn Clock>,
    pub restart: Arc<dyn RestartPort>,
    /// Bus session; ignored when the link is disabled in config.
    pub session: Option<S>,
    /// Display-side sinks (log, screen).  They also receive the link's
    /// operator-log events.
    pub sinks: Vec<Arc<dyn ChangeSink>>,
}

pub struct Controller<S: BusSession> {
    ctx: AppContext,
    config: SystemConfig,
    scheduler: Scheduler,
    link: Option<Arc<ConnectionManager<S>>>,
    config_dirty: bool,
    dirty_since_ms: u64,
}

impl<S: BusSession + 'static> Controller<S> {
    /// Build every sensor, circuit and the link, and register their
    /// periodic tasks.  Sensors are created in declaration order, so an
    /// aggregate always finds its children.
    pub fn build(config: SystemConfig, wiring: Wiring<'_, S>) -> Result<Self> {
        config.validate()?;
        let Wiring {
            hardware,
            clock,
            restart,
            session,
            sinks,
        } = wiring;

        let display: Arc<dyn ChangeSink> = Arc::new(sinks.into_iter().fold(SinkChain::new(), SinkChain::with));

        let link = match session {
            Some(session) if config.link.enabled => Some(Arc::new(ConnectionManager::new(
                &config.link,
                session,
                restart,
                display.clone(),
            ))),
            _ => None,
        };

        let mut chain = SinkChain::new().with(display);
        if let Some(link) = &link {
            chain.push(link.clone());
        }
        let sink: Arc<dyn ChangeSink> = Arc::new(chain);

        let mut ctx = AppContext::new(sink.clone(), clock);
        let mut scheduler = Scheduler::new();
        let timing = config.timing;
        let read_timeout = Duration::from_millis(u64::from(timing.read_timeout_ms));

        for sc in &config.sensors {
            let (sensor, periodic) = match &sc.source {
                SensorSource::Dht22 { gpio, quantity } => {
                    let driver = hardware.dht_channel(&sc.name, *gpio, *quantity)?;
                    (
                        Sensor::direct(&sc.name, driver, read_timeout, ctx.clock.clone(), sink.clone()),
                        true,
                    )
                }
                SensorSource::Remote => (Sensor::remote(&sc.name, sink.clone()), false),
                SensorSource::TimeSwitch => (Sensor::time_switch(&sc.name, sink.clone()), false),
                SensorSource::Aggregate { children, default } => {
                    let handles = children
                        .iter()
                        .map(|c| ctx.registry.find_sensor(c).cloned())
                        .collect::<Option<Vec<_>>>()
                        .ok_or(Error::Config("aggregate child must be declared before the aggregate"))?;
                    (Sensor::aggregate(&sc.name, handles, *default, sink.clone()), true)
                }
            };
            let idx = ctx.registry.add_sensor(sensor)?;
            if periodic {
                scheduler
                    .add(&sc.name, TaskKind::RefreshSensor(idx), u64::from(timing.sensor_period_ms))
                    .ok_or(Error::Config("too many periodic tasks"))?;
            }
        }

        for cc in &config.circuits {
            let sensor = ctx
                .registry
                .find_sensor(&cc.sensor)
                .cloned()
                .ok_or(Error::Config("circuit references unknown sensor"))?;
            let driver = hardware.output(&cc.name, &cc.output)?;
            let actuator = Actuator::new(cc.output.kind, cc.output.polarity_inverted, driver);
            let params = CircuitParams {
                duty: cc.duty,
                day_window: cc.day_window,
                day_band: cc.day_band,
                night_band: cc.night_band,
                inverse_output: cc.inverse_output,
                fallback: cc.fallback.map(|f| f.as_fn()),
                fallback_interval_ms: u64::from(timing.fallback_interval_secs) * 1_000,
            };
            let circuit = Circuit::new(&cc.name, sensor, actuator, params, sink.clone());
            let idx = ctx.registry.add_circuit(circuit)?;
            scheduler
                .add(&cc.name, TaskKind::TickCircuit(idx), u64::from(cc.tick_ms))
                .ok_or(Error::Config("too many periodic tasks"))?;
        }

        if link.is_some() {
            scheduler
                .add("link", TaskKind::PollLink, u64::from(timing.link_poll_ms))
                .ok_or(Error::Config("too many periodic tasks"))?;
        }

        info!(
            "Controller: {} sensors, {} circuits, link {}",
            ctx.registry.sensors().len(),
            ctx.registry.circuits().len(),
            if link.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            ctx,
            config,
            scheduler,
            link,
            config_dirty: false,
            dirty_since_ms: 0,
        })
    }
}

impl<S: BusSession> Controller<S> {
    /// Run every task due now.  Returns how many ran.
    pub fn tick(&mut self) -> usize {
        let now_ms = self.ctx.clock.monotonic_ms();
        let mut runner = TaskRunner {
            ctx: &self.ctx,
            link: self.link.as_deref(),
        };
        self.scheduler.run_due(now_ms, &mut runner)
    }

    /// Milliseconds until the next task is due.
    pub fn next_due_in(&self) -> Option<u64> {
        self.scheduler.next_due_in(self.ctx.clock.monotonic_ms())
    }

    // ── Command handling ──────────────────────────────────────

    pub fn handle_command(&mut self, cmd: AppCommand) -> Result<()> {
        match cmd {
            AppCommand::SetBands { circuit, day, night } => self.set_bands(&circuit, day, night),
            AppCommand::ForceCircuit { circuit, state } => {
                let c = self
                    .ctx
                    .registry
                    .find_circuit(&circuit)
                    .ok_or(Error::Config("unknown circuit"))?;
                c.force(state, true);
                Ok(())
            }
            AppCommand::SaveConfig => {
                self.mark_config_dirty();
                self.dirty_since_ms = 0;
                info!("Controller: explicit config save requested");
                Ok(())
            }
        }
    }

    /// Operator band adjustment.  The live circuit and the stored config
    /// change together, or not at all.
    pub fn set_bands(&mut self, circuit: &str, day: Band, night: Band) -> Result<()> {
        let live = self
            .ctx
            .registry
            .find_circuit(circuit)
            .ok_or(Error::Config("unknown circuit"))?;
        let cfg = self
            .config
            .find_circuit_mut(circuit)
            .ok_or(Error::Config("unknown circuit"))?;
        live.set_bands(day, night)?;
        cfg.day_band = day;
        cfg.night_band = night;
        self.mark_config_dirty();
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn snapshot(&self) -> Snapshot {
        self.ctx.snapshot()
    }

    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn link(&self) -> Option<&Arc<ConnectionManager<S>>> {
        self.link.as_ref()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn circuit_state(&self, name: &str) -> Option<CircuitState> {
        self.ctx.registry.find_circuit(name).map(|c| c.state())
    }

    // ── Config dirty-flag management ──────────────────────────

    pub fn mark_config_dirty(&mut self) {
        if !self.config_dirty {
            self.config_dirty = true;
            self.dirty_since_ms = self.ctx.clock.monotonic_ms();
        }
    }

    /// Save once the config has been quiet for [`AUTO_SAVE_DELAY_MS`].
    /// Returns `true` if the config was saved.
    pub fn auto_save_if_needed(&mut self, storage: &impl ConfigPort) -> bool {
        if !self.config_dirty {
            return false;
        }
        let quiet_ms = self.ctx.clock.monotonic_ms().saturating_sub(self.dirty_since_ms);
        if quiet_ms < AUTO_SAVE_DELAY_MS {
            return false;
        }
        self.save(storage, "auto-saved")
    }

    /// Save now if dirty.
    pub fn force_save_if_dirty(&mut self, storage: &impl ConfigPort) {
        if self.config_dirty {
            self.save(storage, "force-saved");
        }
    }

    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty
    }

    fn save(&mut self, storage: &impl ConfigPort, what: &str) -> bool {
        match storage.save(&self.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("Controller: config {}", what);
                true
            }
            Err(e) => {
                warn!("Controller: config save failed: {}", e);
                false
            }
        }
    }
}

/// Borrows the controller's parts for one scheduler pass.
struct TaskRunner<'a, S> {
    ctx: &'a AppContext,
    link: Option<&'a ConnectionManager<S>>,
}

impl<S: BusSession> TaskDelegate for TaskRunner<'_, S> {
    fn on_task_due(&mut self, task: &TaskKind, now_ms: u64) {
        match *task {
            TaskKind::RefreshSensor(idx) => {
                if let Some(sensor) = self.ctx.registry.sensor(idx) {
                    sensor.refresh(now_ms);
                }
            }
            TaskKind::TickCircuit(idx) => {
                if let Some(circuit) = self.ctx.registry.circuit(idx) {
                    circuit.tick(self.ctx.clock.wallclock(), now_ms);
                }
            }
            TaskKind::PollLink => {
                if let Some(link) = self.link {
                    match link.poll(now_ms, &self.ctx.registry) {
                        Ok(()) => {}
                        // Already reported when it fired.
                        Err(LinkError::WatchdogExpired) => {}
                        Err(e) => debug!("Controller: link poll: {}", e),
                    }
                }
            }
        }
    }
}
