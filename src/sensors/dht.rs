//! DHT22 / AM2302 temperature and humidity probe.
//!
//! Single-wire protocol, bit-banged over an open-drain pin:
//!
//! ```text
//!   host   ‾‾‾\___ ≥1 ms ___/‾‾‾
//!   probe                     \_ 80 µs _/‾ 80 µs ‾\  then 40 bits:
//!   bit                       \_ 50 µs _/‾ 26–28 µs (0) | 70 µs (1) ‾\
//! ```
//!
//! Every edge wait is bounded, so a missing or wedged probe costs at most a
//! few hundred microseconds.  One device serves two [`DhtChannel`]s; the
//! last frame is cached because the probe must not be polled more than
//! once every two seconds.

use std::sync::{Arc, Mutex};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use serde::{Deserialize, Serialize};

use crate::app::ports::SensorDriver;
use crate::error::SensorError;
use crate::sync::lock;

/// Host start pulse length.
const START_LOW_US: u32 = 1_100;
/// Upper bound on any single level the probe holds.
const EDGE_TIMEOUT_US: u32 = 100;
/// Sample point after the rising edge of a data bit.
const BIT_SAMPLE_US: u32 = 35;
/// Minimum spacing between bus transactions.
pub const MIN_READ_INTERVAL_MS: u64 = 2_000;

/// One decoded measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DhtFrame {
    pub humidity: f32,
    pub temperature: f32,
}

/// Which half of the frame a channel reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantity {
    Temperature,
    Humidity,
}

pub struct Dht22<P, D> {
    pin: P,
    delay: D,
    last_read_ms: Option<u64>,
    last: Result<DhtFrame, SensorError>,
}

impl<P, D> Dht22<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    /// `pin` must be configured open drain with a pull-up and idle high.
    pub fn new(pin: P, delay: D) -> Self {
        Self {
            pin,
            delay,
            last_read_ms: None,
            last: Err(SensorError::NoData),
        }
    }

    /// Latest frame, touching the bus only if the cached one is older than
    /// [`MIN_READ_INTERVAL_MS`].
    pub fn measure(&mut self, now_ms: u64) -> Result<DhtFrame, SensorError> {
        let fresh = self
            .last_read_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < MIN_READ_INTERVAL_MS);
        if !fresh {
            self.last = self.read_raw().and_then(decode);
            self.last_read_ms = Some(now_ms);
        }
        self.last
    }

    /// Share this device between a temperature and a humidity channel.
    pub fn into_channels(self) -> (DhtChannel<P, D>, DhtChannel<P, D>) {
        let device = Arc::new(Mutex::new(self));
        (
            DhtChannel {
                device: device.clone(),
                quantity: Quantity::Temperature,
            },
            DhtChannel {
                device,
                quantity: Quantity::Humidity,
            },
        )
    }

    fn read_raw(&mut self) -> Result<[u8; 5], SensorError> {
        self.pin.set_low().map_err(|_| SensorError::ReadFailed)?;
        self.delay.delay_us(START_LOW_US);
        self.pin.set_high().map_err(|_| SensorError::ReadFailed)?;

        // Response: wait for the probe to pull low, then 80 µs low, 80 µs high.
        self.wait_while(true)?;
        self.wait_while(false)?;
        self.wait_while(true)?;

        let mut bytes = [0u8; 5];
        for i in 0..40 {
            self.wait_while(false)?;
            self.delay.delay_us(BIT_SAMPLE_US);
            let bit = self.is_high()?;
            bytes[i / 8] = (bytes[i / 8] << 1) | u8::from(bit);
            self.wait_while(true)?;
        }
        Ok(bytes)
    }

    /// Spin until the line leaves `high`, for at most [`EDGE_TIMEOUT_US`].
    fn wait_while(&mut self, high: bool) -> Result<(), SensorError> {
        for _ in 0..EDGE_TIMEOUT_US {
            if self.is_high()? != high {
                return Ok(());
            }
            self.delay.delay_us(1);
        }
        Err(SensorError::Timeout)
    }

    fn is_high(&mut self) -> Result<bool, SensorError> {
        self.pin.is_high().map_err(|_| SensorError::ReadFailed)
    }
}

/// Validate the checksum and scale a raw 40-bit frame.
pub fn decode(bytes: [u8; 5]) -> Result<DhtFrame, SensorError> {
    let sum = bytes[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != bytes[4] {
        return Err(SensorError::ChecksumMismatch);
    }
    let humidity = f32::from(u16::from_be_bytes([bytes[0], bytes[1]])) / 10.0;
    let raw_t = u16::from_be_bytes([bytes[2], bytes[3]]);
    let magnitude = f32::from(raw_t & 0x7FFF) / 10.0;
    let temperature = if raw_t & 0x8000 == 0 { magnitude } else { -magnitude };
    Ok(DhtFrame { humidity, temperature })
}

/// One quantity of a shared [`Dht22`].
pub struct DhtChannel<P, D> {
    device: Arc<Mutex<Dht22<P, D>>>,
    quantity: Quantity,
}

impl<P, D> DhtChannel<P, D> {
    pub fn quantity(&self) -> Quantity {
        self.quantity
    }
}

impl<P, D> SensorDriver for DhtChannel<P, D>
where
    P: InputPin + OutputPin + Send,
    D: DelayNs + Send,
{
    fn sample(&mut self, now_ms: u64) -> Result<f32, SensorError> {
        let frame = lock(&self.device).measure(now_ms)?;
        Ok(match self.quantity {
            Quantity::Temperature => frame.temperature,
            Quantity::Humidity => frame.humidity,
        })
    }
}
