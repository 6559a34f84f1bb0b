//! System configuration parameters
//!
//! The compiled-in [`Default`] describes the stock enclosure: two DHT22
//! probes fused into temperature and humidity aggregates, four circuits and
//! the broker link.  A stored copy (NVS, postcard-encoded) overrides it.

use serde::{Deserialize, Serialize};

use crate::control::actuator::{ActuatorKind, ActuatorState};
use crate::control::window::{Band, DutyWindow};
use crate::error::{Error, Result};
use crate::pins;
use crate::sensors::dht::Quantity;

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub sensors: Vec<SensorConfig>,
    pub circuits: Vec<CircuitConfig>,
    pub link: LinkConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Unique; doubles as the bus topic suffix.
    pub name: String,
    pub source: SensorSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorSource {
    /// One channel of a DHT22 on `gpio`.  Channels sharing a pin share the
    /// device.
    Dht22 { gpio: i32, quantity: Quantity },
    /// Value delivered over the bus.
    Remote,
    /// Pure time-of-day switch.
    TimeSwitch,
    /// Trimmed mean over the named sensors.
    Aggregate { children: Vec<String>, default: f32 },
}

/// Physical output a circuit drives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub gpio: i32,
    pub kind: ActuatorKind,
    /// Wiring polarity: `true` for active-low relays.
    pub polarity_inverted: bool,
}

/// Open-loop behaviour while the bound sensor is faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackMode {
    Toggle,
    ForceActive,
    ForceInactive,
}

impl FallbackMode {
    pub fn as_fn(self) -> fn(ActuatorState) -> ActuatorState {
        match self {
            Self::Toggle => ActuatorState::toggled,
            Self::ForceActive => |_| ActuatorState::Active,
            Self::ForceInactive => |_| ActuatorState::Inactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Unique; doubles as the bus topic suffix.
    pub name: String,
    /// Name of the bound sensor.
    pub sensor: String,
    pub output: OutputConfig,
    /// When the circuit may actuate at all.
    pub duty: DutyWindow,
    /// Selects `day_band` over `night_band`.
    pub day_window: DutyWindow,
    pub day_band: Band,
    pub night_band: Band,
    /// Engage above the band instead of below it.
    pub inverse_output: bool,
    pub tick_ms: u32,
    pub fallback: Option<FallbackMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub enabled: bool,
    /// Client identity and topic root.
    pub client_id: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub connect_timeout_ms: u32,
    /// Minimum spacing between two connection attempts.
    pub min_attempt_spacing_ms: u32,
    /// Continuous outage after which the device restarts.
    pub watchdog_ceiling_secs: u32,
    /// Retained status string published on every successful connect.
    pub announce: String,
    /// Reject non-numeric sensor payloads instead of reading them as `0.0`.
    pub reject_malformed_payloads: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Refresh period for hardware sensors and aggregates (milliseconds)
    pub sensor_period_ms: u32,
    /// Per-read budget before a sample is discarded (milliseconds)
    pub read_timeout_ms: u32,
    /// Link maintenance period (milliseconds)
    pub link_poll_ms: u32,
    /// Interval between fallback actions (seconds)
    pub fallback_interval_secs: u32,
    /// Main-loop sleep between scheduler passes (milliseconds)
    pub loop_sleep_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let dht = |name: &str, gpio, quantity| SensorConfig {
            name: name.to_owned(),
            source: SensorSource::Dht22 { gpio, quantity },
        };
        let fused = |name: &str, children: [&str; 2], default| SensorConfig {
            name: name.to_owned(),
            source: SensorSource::Aggregate {
                children: children.iter().map(|c| (*c).to_owned()).collect(),
                default,
            },
        };
        let relay = |gpio, polarity_inverted| OutputConfig {
            gpio,
            kind: ActuatorKind::Digital,
            polarity_inverted,
        };
        let lights_on = DutyWindow::hm(7, 0, 22, 0);

        Self {
            sensors: vec![
                dht("Berg-temp", pins::DHT_BERG_GPIO, Quantity::Temperature),
                dht("Berg-hum", pins::DHT_BERG_GPIO, Quantity::Humidity),
                dht("Erde-temp", pins::DHT_ERDE_GPIO, Quantity::Temperature),
                dht("Erde-hum", pins::DHT_ERDE_GPIO, Quantity::Humidity),
                fused("temperature", ["Berg-temp", "Erde-temp"], 25.0),
                fused("humidity", ["Berg-hum", "Erde-hum"], 80.0),
                SensorConfig {
                    name: "timer".to_owned(),
                    source: SensorSource::TimeSwitch,
                },
            ],
            circuits: vec![
                CircuitConfig {
                    name: "Zeitschalter".to_owned(),
                    sensor: "timer".to_owned(),
                    output: relay(pins::RELAY_TIMER_GPIO, false),
                    duty: lights_on,
                    day_window: lights_on,
                    day_band: Band { low: 0.0, high: 0.0 },
                    night_band: Band { low: 0.0, high: 0.0 },
                    inverse_output: false,
                    tick_ms: 5_000,
                    fallback: None,
                },
                CircuitConfig {
                    name: "Infrarot".to_owned(),
                    sensor: "temperature".to_owned(),
                    output: relay(pins::RELAY_INFRARED_GPIO, false),
                    duty: DutyWindow::always(),
                    day_window: lights_on,
                    day_band: Band { low: 24.0, high: 26.0 },
                    night_band: Band { low: 20.0, high: 22.0 },
                    inverse_output: false,
                    tick_ms: 5_000,
                    fallback: Some(FallbackMode::Toggle),
                },
                CircuitConfig {
                    name: "Luefter".to_owned(),
                    sensor: "humidity".to_owned(),
                    output: relay(pins::RELAY_FAN_GPIO, true),
                    duty: DutyWindow::always(),
                    day_window: lights_on,
                    day_band: Band { low: 85.0, high: 95.0 },
                    night_band: Band { low: 85.0, high: 95.0 },
                    inverse_output: true,
                    tick_ms: 5_000,
                    fallback: Some(FallbackMode::Toggle),
                },
                CircuitConfig {
                    name: "Nebel".to_owned(),
                    sensor: "humidity".to_owned(),
                    output: relay(pins::RELAY_FOG_GPIO, false),
                    duty: lights_on,
                    day_window: lights_on,
                    day_band: Band { low: 75.0, high: 85.0 },
                    night_band: Band { low: 70.0, high: 80.0 },
                    inverse_output: false,
                    tick_ms: 5_000,
                    fallback: Some(FallbackMode::Toggle),
                },
            ],
            link: LinkConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            client_id: "fcce".to_owned(),
            broker_host: "fcce.local".to_owned(),
            broker_port: 1883,
            connect_timeout_ms: 2_000,
            min_attempt_spacing_ms: 2_500,
            watchdog_ceiling_secs: 300, // 5 min
            announce: "Terrarium control center - online".to_owned(),
            reject_malformed_payloads: false,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sensor_period_ms: 2_000,
            read_timeout_ms: 500,
            link_poll_ms: 100,            // 10 Hz
            fallback_interval_secs: 900, // 15 min
            loop_sleep_ms: 50,
        }
    }
}

impl SystemConfig {
    pub fn find_circuit(&self, name: &str) -> Option<&CircuitConfig> {
        self.circuits.iter().find(|c| c.name == name)
    }

    pub fn find_circuit_mut(&mut self, name: &str) -> Option<&mut CircuitConfig> {
        self.circuits.iter_mut().find(|c| c.name == name)
    }

    pub fn find_sensor(&self, name: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.name == name)
    }

    /// Reject configurations the controller cannot be assembled from.
    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        if t.sensor_period_ms == 0 || t.link_poll_ms == 0 || t.fallback_interval_secs == 0 {
            return Err(Error::Config("timing periods must be non-zero"));
        }
        if t.read_timeout_ms == 0 {
            return Err(Error::Config("read timeout must be non-zero"));
        }

        for (i, s) in self.sensors.iter().enumerate() {
            if s.name.is_empty() {
                return Err(Error::Config("sensor name must not be empty"));
            }
            if s.name == RESERVED_TOPIC {
                return Err(Error::Config("sensor name is reserved"));
            }
            if self.sensors[..i].iter().any(|o| o.name == s.name) {
                return Err(Error::Config("duplicate sensor name"));
            }
            if let SensorSource::Aggregate { children, default } = &s.source {
                if !default.is_finite() {
                    return Err(Error::Config("aggregate default must be finite"));
                }
                // Children must be declared earlier, which also rules out cycles.
                if children.iter().any(|c| !self.sensors[..i].iter().any(|o| &o.name == c)) {
                    return Err(Error::Config("aggregate child must be declared before the aggregate"));
                }
            }
        }

        for (i, c) in self.circuits.iter().enumerate() {
            if c.name.is_empty() {
                return Err(Error::Config("circuit name must not be empty"));
            }
            if c.name == RESERVED_TOPIC {
                return Err(Error::Config("circuit name is reserved"));
            }
            if self.circuits[..i].iter().any(|o| o.name == c.name)
                || self.sensors.iter().any(|s| s.name == c.name)
            {
                return Err(Error::Config("duplicate circuit name"));
            }
            if self.find_sensor(&c.sensor).is_none() {
                return Err(Error::Config("circuit references unknown sensor"));
            }
            if c.tick_ms == 0 {
                return Err(Error::Config("circuit tick must be non-zero"));
            }
            c.day_band.validate()?;
            c.night_band.validate()?;
        }

        if self.link.enabled && self.link.client_id.is_empty() {
            return Err(Error::Config("link client id must not be empty"));
        }
        Ok(())
    }
}

/// Topic suffix carrying status strings; no entity may use it.
pub const RESERVED_TOPIC: &str = "config";
