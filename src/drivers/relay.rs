//! Relay and PWM output drivers.
//!
//! Both implement [`OutputDriver`].  On ESP-IDF they write through
//! [`hw_init`]; on the host the write is a no-op and only the
//! [`OutputMonitor`] records what was commanded.

use std::sync::{Arc, Mutex};

use log::warn;

use crate::app::ports::{OutputDriver, OutputLevel};
use crate::drivers::hw_init;
use crate::error::ActuatorError;
use crate::sync::lock;

#[derive(Debug, Default)]
struct Recorded {
    last: Option<OutputLevel>,
    writes: usize,
    failing: bool,
}

/// Shared view of what an output driver last wrote.  Cloning is cheap and
/// every clone observes the same driver.
#[derive(Debug, Clone, Default)]
pub struct OutputMonitor {
    inner: Arc<Mutex<Recorded>>,
}

impl OutputMonitor {
    pub fn last(&self) -> Option<OutputLevel> {
        lock(&self.inner).last
    }

    /// Last digital level, `None` if nothing was written or the output is
    /// proportional.
    pub fn is_high(&self) -> Option<bool> {
        match self.last() {
            Some(OutputLevel::Digital(high)) => Some(high),
            _ => None,
        }
    }

    pub fn writes(&self) -> usize {
        lock(&self.inner).writes
    }

    /// Make every following write fail (test hook).
    pub fn set_failing(&self, failing: bool) {
        lock(&self.inner).failing = failing;
    }

    fn record(&self, level: OutputLevel) -> bool {
        let mut r = lock(&self.inner);
        if r.failing {
            return false;
        }
        r.last = Some(level);
        r.writes += 1;
        true
    }
}

/// On/off relay on one GPIO.
pub struct RelayOutput {
    gpio: i32,
    monitor: OutputMonitor,
}

impl RelayOutput {
    pub fn new(gpio: i32) -> Self {
        Self {
            gpio,
            monitor: OutputMonitor::default(),
        }
    }

    pub fn gpio(&self) -> i32 {
        self.gpio
    }

    pub fn monitor(&self) -> OutputMonitor {
        self.monitor.clone()
    }
}

impl OutputDriver for RelayOutput {
    fn write(&mut self, level: OutputLevel) -> Result<(), ActuatorError> {
        let high = match level {
            OutputLevel::Digital(high) => high,
            OutputLevel::Duty(pct) => pct > 0.0,
        };
        if let Err(rc) = hw_init::gpio_write(self.gpio, high) {
            warn!("Relay GPIO{}: write failed (rc={})", self.gpio, rc);
            return Err(ActuatorError::GpioWriteFailed);
        }
        if !self.monitor.record(OutputLevel::Digital(high)) {
            return Err(ActuatorError::GpioWriteFailed);
        }
        Ok(())
    }
}

/// Proportional output on one LEDC channel.
pub struct PwmOutput {
    channel: u32,
    monitor: OutputMonitor,
}

impl PwmOutput {
    /// `channel` must have been attached by [`hw_init::init_pwm`].
    pub fn new(channel: u32) -> Self {
        Self {
            channel,
            monitor: OutputMonitor::default(),
        }
    }

    pub fn monitor(&self) -> OutputMonitor {
        self.monitor.clone()
    }
}

impl OutputDriver for PwmOutput {
    fn write(&mut self, level: OutputLevel) -> Result<(), ActuatorError> {
        let pct = match level {
            OutputLevel::Digital(true) => 100.0,
            OutputLevel::Digital(false) => 0.0,
            OutputLevel::Duty(pct) => pct.clamp(0.0, 100.0),
        };
        if let Err(rc) = hw_init::ledc_set(self.channel, hw_init::duty_counts(pct)) {
            warn!("PWM CH{}: duty write failed (rc={})", self.channel, rc);
            return Err(ActuatorError::PwmWriteFailed);
        }
        if !self.monitor.record(OutputLevel::Duty(pct)) {
            return Err(ActuatorError::PwmWriteFailed);
        }
        Ok(())
    }
}
