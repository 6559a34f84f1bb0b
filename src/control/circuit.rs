//! Per-circuit control state machine.
//!
//! ```text
//!              outside duty                 read fails
//!   OffDuty <────────────── any ──────────────> Fallback
//!      │                                          │ read ok
//!      └──> OnDuty { Holding | Engaging | Disengaging } <┘
//! ```
//!
//! Evaluated once per tick:
//!
//! 1. Outside the duty window the output is hard-set inactive.
//! 2. The day window picks the day or night band.
//! 3. A time-switch sensor forces the output active.
//! 4. A failed read enters `Fallback`; the injected action fires once per
//!    fallback interval, counted from entry.
//! 5. Otherwise the value is classified against the band: inside holds,
//!    below engages, above disengages.  `inverse_output` swaps the level
//!    commanded for engage/disengage.
//!
//! Every evaluated tick republishes `last_commanded` to the sink.

use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use log::{debug, error, info, warn};

use crate::app::ports::ChangeSink;
use crate::control::actuator::{Actuator, ActuatorState};
use crate::control::window::{Band, BandPosition, DutyWindow};
use crate::error::Result;
use crate::sensors::{SensorHandle, SensorKind};
use crate::sync::lock;

pub type CircuitHandle = Arc<Circuit>;

/// Open-loop action applied on each fallback interval.
pub type FallbackFn = fn(ActuatorState) -> ActuatorState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regulation {
    Holding,
    Engaging,
    Disengaging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    OffDuty,
    OnDuty(Regulation),
    Fallback,
}

/// Static parameters of a circuit.
#[derive(Debug, Clone, Copy)]
pub struct CircuitParams {
    pub duty: DutyWindow,
    pub day_window: DutyWindow,
    pub day_band: Band,
    pub night_band: Band,
    pub inverse_output: bool,
    pub fallback: Option<FallbackFn>,
    pub fallback_interval_ms: u64,
}

/// Point-in-time view for display code.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub commanded: ActuatorState,
    pub day_band: Band,
    pub night_band: Band,
}

struct Inner {
    actuator: Actuator,
    day_band: Band,
    night_band: Band,
    state: CircuitState,
    last_commanded: ActuatorState,
    next_fallback_ms: u64,
}

pub struct Circuit {
    name: String,
    sensor: SensorHandle,
    duty: DutyWindow,
    day_window: DutyWindow,
    inverse_output: bool,
    fallback: Option<FallbackFn>,
    fallback_interval_ms: u64,
    inner: Mutex<Inner>,
    sink: Arc<dyn ChangeSink>,
}

impl Circuit {
    pub fn new(
        name: &str,
        sensor: SensorHandle,
        actuator: Actuator,
        params: CircuitParams,
        sink: Arc<dyn ChangeSink>,
    ) -> CircuitHandle {
        let last_commanded = actuator.state();
        Arc::new(Self {
            name: name.to_owned(),
            sensor,
            duty: params.duty,
            day_window: params.day_window,
            inverse_output: params.inverse_output,
            fallback: params.fallback,
            fallback_interval_ms: params.fallback_interval_ms.max(1),
            inner: Mutex::new(Inner {
                actuator,
                day_band: params.day_band,
                night_band: params.night_band,
                state: CircuitState::OffDuty,
                last_commanded,
                next_fallback_ms: 0,
            }),
            sink,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sensor(&self) -> &SensorHandle {
        &self.sensor
    }

    pub fn state(&self) -> CircuitState {
        lock(&self.inner).state
    }

    pub fn last_commanded(&self) -> ActuatorState {
        lock(&self.inner).last_commanded
    }

    pub fn bands(&self) -> (Band, Band) {
        let inner = lock(&self.inner);
        (inner.day_band, inner.night_band)
    }

    /// Replace both bands.  Nothing changes unless both are valid.
    pub fn set_bands(&self, day: Band, night: Band) -> Result<()> {
        day.validate()?;
        night.validate()?;
        let mut inner = lock(&self.inner);
        inner.day_band = day;
        inner.night_band = night;
        info!("Circuit '{}': bands day {} night {}", self.name, day, night);
        Ok(())
    }

    pub fn status(&self) -> CircuitStatus {
        let inner = lock(&self.inner);
        CircuitStatus {
            name: self.name.clone(),
            state: inner.state,
            commanded: inner.last_commanded,
            day_band: inner.day_band,
            night_band: inner.night_band,
        }
    }

    /// Drive the output directly.  With `bypass_inversion` the level is
    /// applied as given; otherwise `inverse_output` is honoured.
    pub fn force(&self, state: ActuatorState, bypass_inversion: bool) {
        let level = if bypass_inversion { state } else { self.logical(state) };
        let commanded = {
            let mut inner = lock(&self.inner);
            self.drive(&mut inner, level);
            inner.last_commanded
        };
        info!("Circuit '{}': forced {:?}", self.name, commanded);
        self.sink.on_circuit_state_changed(&self.name, commanded);
    }

    /// Run one control evaluation.  Without a wall clock there is no duty
    /// window to evaluate, so the tick is skipped.
    pub fn tick(&self, wallclock: Option<NaiveDateTime>, now_ms: u64) -> CircuitState {
        let Some(now) = wallclock else {
            debug!("Circuit '{}': no wall clock, tick skipped", self.name);
            return self.state();
        };
        let t = now.time();

        // Sensor lock is taken and released before the circuit lock.
        let on_duty = self.duty.contains(t);
        let reading = if on_duty && self.sensor.kind() != SensorKind::JustSwitch {
            Some(self.sensor.read())
        } else {
            None
        };

        let (state, commanded) = {
            let mut inner = lock(&self.inner);
            let state = if !on_duty {
                self.drive(&mut inner, ActuatorState::Inactive);
                CircuitState::OffDuty
            } else if let Some(reading) = reading {
                let band = if self.day_window.contains(t) {
                    inner.day_band
                } else {
                    inner.night_band
                };
                match reading {
                    Ok(value) => {
                        if inner.state == CircuitState::Fallback {
                            info!("Circuit '{}': sensor back ({:.1}), leaving fallback", self.name, value);
                        }
                        CircuitState::OnDuty(self.regulate(&mut inner, band, value))
                    }
                    Err(e) => {
                        self.run_fallback(&mut inner, now_ms, e);
                        CircuitState::Fallback
                    }
                }
            } else {
                self.drive(&mut inner, ActuatorState::Active);
                CircuitState::OnDuty(Regulation::Engaging)
            };

            if inner.state != state {
                debug!("Circuit '{}': {:?} -> {:?}", self.name, inner.state, state);
                inner.state = state;
            }
            (state, inner.last_commanded)
        };

        self.sink.on_circuit_state_changed(&self.name, commanded);
        state
    }

    fn regulate(&self, inner: &mut Inner, band: Band, value: f32) -> Regulation {
        match band.classify(value) {
            BandPosition::Within => Regulation::Holding,
            BandPosition::Below => {
                self.drive(inner, self.logical(ActuatorState::Active));
                Regulation::Engaging
            }
            BandPosition::Above => {
                self.drive(inner, self.logical(ActuatorState::Inactive));
                Regulation::Disengaging
            }
        }
    }

    fn run_fallback(&self, inner: &mut Inner, now_ms: u64, cause: crate::error::SensorError) {
        if inner.state != CircuitState::Fallback {
            warn!(
                "Circuit '{}': sensor '{}' {}, entering fallback",
                self.name,
                self.sensor.name(),
                cause
            );
            inner.next_fallback_ms = now_ms.saturating_add(self.fallback_interval_ms);
            return;
        }
        let Some(action) = self.fallback else {
            return;
        };
        if now_ms < inner.next_fallback_ms {
            return;
        }
        let level = action(inner.last_commanded);
        info!("Circuit '{}': fallback -> {:?}", self.name, level);
        self.drive(inner, level);
        inner.next_fallback_ms += self.fallback_interval_ms;
        if inner.next_fallback_ms <= now_ms {
            inner.next_fallback_ms = now_ms + self.fallback_interval_ms;
        }
    }

    fn logical(&self, state: ActuatorState) -> ActuatorState {
        if self.inverse_output { state.toggled() } else { state }
    }

    fn drive(&self, inner: &mut Inner, level: ActuatorState) {
        match inner.actuator.apply(level) {
            Ok(()) => inner.last_commanded = level,
            Err(e) => error!("Circuit '{}': output write failed: {}", self.name, e),
        }
    }
}

impl core::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Circuit")
            .field("name", &self.name)
            .field("sensor", &self.sensor.name())
            .field("duty", &self.duty)
            .finish_non_exhaustive()
    }
}
