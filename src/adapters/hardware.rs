//! Hardware adapters: build the drivers the controller is assembled from.
//!
//! [`EspHardware`] is the only place that claims real pins: DHT22 data
//! lines as open-drain GPIOs shared by their two channels, relay GPIOs and
//! LEDC channels for proportional outputs.  [`SimHardware`] hands out
//! [`SimProbe`]s and monitored outputs for host runs and tests.

use std::collections::HashMap;

use log::info;

use crate::app::ports::{HardwarePort, OutputDriver, SensorDriver};
use crate::config::{OutputConfig, SystemConfig};
use crate::control::actuator::ActuatorKind;
use crate::drivers::relay::{OutputMonitor, PwmOutput, RelayOutput};
use crate::error::{Error, Result};
use crate::sensors::dht::Quantity;
use crate::sensors::sim::SimProbe;

/// Relay pins with their idle level, and PWM pins in channel order.
fn output_plan(config: &SystemConfig) -> (Vec<(i32, bool)>, Vec<i32>) {
    let mut relays = Vec::new();
    let mut pwm = Vec::new();
    for c in &config.circuits {
        match c.output.kind {
            // Idle is the physical level of `Inactive`.
            ActuatorKind::Digital => relays.push((c.output.gpio, c.output.polarity_inverted)),
            ActuatorKind::Continuous { .. } => pwm.push(c.output.gpio),
        }
    }
    (relays, pwm)
}

fn build_output(output: &OutputConfig, pwm_channels: &HashMap<i32, u32>) -> Result<(Box<dyn OutputDriver>, OutputMonitor)> {
    match output.kind {
        ActuatorKind::Digital => {
            let relay = RelayOutput::new(output.gpio);
            let monitor = relay.monitor();
            Ok((Box::new(relay), monitor))
        }
        ActuatorKind::Continuous { .. } => {
            let channel = *pwm_channels
                .get(&output.gpio)
                .ok_or(Error::Config("PWM output was not planned"))?;
            let pwm = PwmOutput::new(channel);
            let monitor = pwm.monitor();
            Ok((Box::new(pwm), monitor))
        }
    }
}

fn channel_map(pwm: &[i32]) -> HashMap<i32, u32> {
    pwm.iter().enumerate().map(|(ch, &gpio)| (gpio, ch as u32)).collect()
}

// ── ESP-IDF ───────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use super::*;

    use esp_idf_hal::delay::Ets;
    use esp_idf_hal::gpio::{AnyIOPin, InputOutput, PinDriver, Pull};

    use crate::drivers::hw_init;
    use crate::sensors::dht::{Dht22, DhtChannel};

    type EspDhtChannel = DhtChannel<PinDriver<'static, AnyIOPin, InputOutput>, Ets>;

    #[derive(Default)]
    struct DhtSlot {
        temperature: Option<EspDhtChannel>,
        humidity: Option<EspDhtChannel>,
    }

    pub struct EspHardware {
        dht: HashMap<i32, DhtSlot>,
        pwm_channels: HashMap<i32, u32>,
    }

    impl EspHardware {
        /// Configure every output named in `config`.  Must run before the
        /// first circuit tick so relays start at their idle level.
        pub fn new(config: &SystemConfig) -> Result<Self> {
            let (relays, pwm) = output_plan(config);
            hw_init::init_outputs(&relays).map_err(|e| {
                log::error!("hw_init: {}", e);
                Error::Config("relay output init failed")
            })?;
            hw_init::init_pwm(&pwm).map_err(|e| {
                log::error!("hw_init: {}", e);
                Error::Config("PWM init failed")
            })?;
            Ok(Self {
                dht: HashMap::new(),
                pwm_channels: channel_map(&pwm),
            })
        }

        fn open_dht(gpio: i32) -> Result<DhtSlot> {
            // SAFETY: each DHT gpio is claimed exactly once (guarded by the
            // slot map) and is not used by any other driver.
            let pin = unsafe { AnyIOPin::new(gpio) };
            let mut driver = PinDriver::input_output_od(pin).map_err(|_| Error::Config("DHT pin init failed"))?;
            driver.set_pull(Pull::Up).map_err(|_| Error::Config("DHT pin pull-up failed"))?;
            driver.set_high().map_err(|_| Error::Config("DHT pin idle failed"))?;
            let (temperature, humidity) = Dht22::new(driver, Ets).into_channels();
            info!("Hardware: DHT22 on GPIO{}", gpio);
            Ok(DhtSlot {
                temperature: Some(temperature),
                humidity: Some(humidity),
            })
        }
    }

    impl HardwarePort for EspHardware {
        fn dht_channel(&mut self, sensor: &str, gpio: i32, quantity: Quantity) -> Result<Box<dyn SensorDriver>> {
            if !self.dht.contains_key(&gpio) {
                let slot = Self::open_dht(gpio)?;
                self.dht.insert(gpio, slot);
            }
            let slot = self.dht.get_mut(&gpio).ok_or(Error::Config("DHT slot missing"))?;
            let channel = match quantity {
                Quantity::Temperature => slot.temperature.take(),
                Quantity::Humidity => slot.humidity.take(),
            }
            .ok_or(Error::Config("DHT channel bound twice"))?;
            info!("Hardware: '{}' -> GPIO{} {:?}", sensor, gpio, quantity);
            Ok(Box::new(channel))
        }

        fn output(&mut self, circuit: &str, output: &OutputConfig) -> Result<Box<dyn OutputDriver>> {
            let (driver, _) = build_output(output, &self.pwm_channels)?;
            info!("Hardware: '{}' -> GPIO{} {:?}", circuit, output.gpio, output.kind);
            Ok(driver)
        }
    }
}

#[cfg(target_os = "espidf")]
pub use esp::EspHardware;

// ── Simulation ────────────────────────────────────────────────

/// Host-side hardware.  Every DHT channel becomes a [`SimProbe`] seeded
/// with a plausible enclosure value; every output is monitored.
pub struct SimHardware {
    probes: HashMap<String, SimProbe>,
    outputs: HashMap<String, OutputMonitor>,
    pwm_channels: HashMap<i32, u32>,
}

impl SimHardware {
    pub fn new(config: &SystemConfig) -> Self {
        let (_, pwm) = output_plan(config);
        Self {
            probes: HashMap::new(),
            outputs: HashMap::new(),
            pwm_channels: channel_map(&pwm),
        }
    }

    /// Probe handed to sensor `name`.
    pub fn probe(&self, name: &str) -> Option<SimProbe> {
        self.probes.get(name).cloned()
    }

    /// Monitor of circuit `name`'s output.
    pub fn output_monitor(&self, name: &str) -> Option<OutputMonitor> {
        self.outputs.get(name).cloned()
    }
}

impl HardwarePort for SimHardware {
    fn dht_channel(&mut self, sensor: &str, gpio: i32, quantity: Quantity) -> Result<Box<dyn SensorDriver>> {
        let initial = match quantity {
            Quantity::Temperature => 24.0,
            Quantity::Humidity => 80.0,
        };
        let probe = SimProbe::new(initial);
        self.probes.insert(sensor.to_owned(), probe.clone());
        info!("Hardware(sim): '{}' -> GPIO{} {:?}", sensor, gpio, quantity);
        Ok(Box::new(probe))
    }

    fn output(&mut self, circuit: &str, output: &OutputConfig) -> Result<Box<dyn OutputDriver>> {
        let (driver, monitor) = build_output(output, &self.pwm_channels)?;
        self.outputs.insert(circuit.to_owned(), monitor);
        Ok(driver)
    }
}
