//! Injectable probe for host runs and tests.
//!
//! A [`SimProbe`] is a cheap clonable handle: one clone is handed to a
//! [`Sensor`](super::Sensor) as its driver, the other stays with the test
//! (or the host simulator) to set the value, inject faults or stall reads.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::adapters::time::ManualClock;
use crate::app::ports::SensorDriver;
use crate::error::SensorError;
use crate::sync::lock;

#[derive(Default)]
struct Shared {
    value_bits: AtomicU32,
    fault: AtomicBool,
    stall_ms: AtomicU32,
    reads: AtomicU32,
    clock: Mutex<Option<Arc<ManualClock>>>,
}

#[derive(Clone, Default)]
pub struct SimProbe {
    inner: Arc<Shared>,
}

impl SimProbe {
    pub fn new(initial: f32) -> Self {
        let probe = Self::default();
        probe.set(initial);
        probe
    }

    pub fn set(&self, value: f32) {
        self.inner.value_bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// While `true`, every sample fails with [`SensorError::ReadFailed`].
    pub fn fail(&self, fault: bool) {
        self.inner.fault.store(fault, Ordering::Relaxed);
    }

    /// Delay each sample by `ms` before answering.
    pub fn stall(&self, ms: u32) {
        self.inner.stall_ms.store(ms, Ordering::Relaxed);
    }

    /// Spend stalls on `clock` instead of sleeping.
    pub fn drive_clock(&self, clock: Arc<ManualClock>) {
        *lock(&self.inner.clock) = Some(clock);
    }

    /// Number of samples taken so far.
    pub fn reads(&self) -> u32 {
        self.inner.reads.load(Ordering::Relaxed)
    }
}

impl SensorDriver for SimProbe {
    fn sample(&mut self, _now_ms: u64) -> Result<f32, SensorError> {
        self.inner.reads.fetch_add(1, Ordering::Relaxed);
        let stall = self.inner.stall_ms.load(Ordering::Relaxed);
        if stall > 0 {
            match lock(&self.inner.clock).as_ref() {
                Some(clock) => clock.advance(u64::from(stall)),
                None => std::thread::sleep(std::time::Duration::from_millis(u64::from(stall))),
            }
        }
        if self.inner.fault.load(Ordering::Relaxed) {
            return Err(SensorError::ReadFailed);
        }
        Ok(f32::from_bits(self.inner.value_bits.load(Ordering::Relaxed)))
    }
}
