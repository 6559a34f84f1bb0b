//! Sensor subsystem: value sources and the sensor-fusion layer.
//!
//! Every source is a [`Sensor`] shared as a [`SensorHandle`].  The variant
//! set is closed ([`Source`] is matched, never extended):
//!
//! ```text
//!   Direct      driver sampled on its own period
//!   Remote      fed by bus messages through push()
//!   TimeSwitch  no value; marks a pure timer circuit
//!   Aggregate   trimmed mean over samples pushed by its children
//! ```
//!
//! A child holds weak references to the aggregates it feeds and pushes
//! every fresh value into them.  Each sensor guards its fields with one
//! mutex; driver I/O never happens while that lock is held.

pub mod aggregate;
pub mod dht;
pub mod sim;

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{debug, info, warn};

use crate::app::ports::{ChangeSink, Clock, SensorDriver};
use crate::error::SensorError;
use crate::sync::lock;
use aggregate::TrimmedWindow;

pub type SensorHandle = Arc<Sensor>;

/// Public classification consumed by circuits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    RealValue,
    JustSwitch,
    Aggregate,
}

enum Source {
    Direct {
        driver: Mutex<Box<dyn SensorDriver>>,
        clock: Arc<dyn Clock>,
    },
    Remote,
    TimeSwitch,
    Aggregate {
        window: Mutex<TrimmedWindow>,
        children: Vec<SensorHandle>,
    },
}

#[derive(Debug, Clone, Copy)]
struct SensorState {
    last_value: f32,
    error: Option<SensorError>,
}

/// Point-in-time view of one sensor for display code.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub name: String,
    pub kind: SensorKind,
    pub value: Result<f32, SensorError>,
}

pub struct Sensor {
    name: String,
    source: Source,
    read_timeout: Duration,
    state: Mutex<SensorState>,
    parents: Mutex<Vec<Weak<Sensor>>>,
    sink: Arc<dyn ChangeSink>,
}

impl Sensor {
    fn build(name: &str, source: Source, read_timeout: Duration, sink: Arc<dyn ChangeSink>) -> Self {
        Self {
            name: name.to_owned(),
            source,
            read_timeout,
            state: Mutex::new(SensorState {
                last_value: 0.0,
                error: Some(SensorError::NoData),
            }),
            parents: Mutex::new(Vec::new()),
            sink,
        }
    }

    /// Hardware-backed sensor.  Samples that take longer than
    /// `read_timeout` on `clock` are discarded as [`SensorError::Timeout`].
    pub fn direct(
        name: &str,
        driver: Box<dyn SensorDriver>,
        read_timeout: Duration,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ChangeSink>,
    ) -> SensorHandle {
        let source = Source::Direct {
            driver: Mutex::new(driver),
            clock,
        };
        Arc::new(Self::build(name, source, read_timeout, sink))
    }

    /// Bus-fed sensor.  Reads fail with [`SensorError::NoData`] until the
    /// first [`push`](Self::push).
    pub fn remote(name: &str, sink: Arc<dyn ChangeSink>) -> SensorHandle {
        Arc::new(Self::build(name, Source::Remote, Duration::ZERO, sink))
    }

    /// Marker sensor for timer-only circuits.  Always reads `1.0`.
    pub fn time_switch(name: &str, sink: Arc<dyn ChangeSink>) -> SensorHandle {
        let sensor = Self::build(name, Source::TimeSwitch, Duration::ZERO, sink);
        lock(&sensor.state).error = None;
        Arc::new(sensor)
    }

    /// Fused sensor over `children`.  Reads `default` until a child has
    /// pushed a sample.
    pub fn aggregate(
        name: &str,
        children: Vec<SensorHandle>,
        default: f32,
        sink: Arc<dyn ChangeSink>,
    ) -> SensorHandle {
        let source = Source::Aggregate {
            window: Mutex::new(TrimmedWindow::new(default)),
            children,
        };
        let sensor = Self::build(name, source, Duration::ZERO, sink);
        {
            let mut st = lock(&sensor.state);
            st.last_value = default;
            st.error = None;
        }
        let sensor = Arc::new(sensor);
        if let Source::Aggregate { children, .. } = &sensor.source {
            for child in children {
                lock(&child.parents).push(Arc::downgrade(&sensor));
            }
        }
        sensor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SensorKind {
        match self.source {
            Source::Direct { .. } | Source::Remote => SensorKind::RealValue,
            Source::TimeSwitch => SensorKind::JustSwitch,
            Source::Aggregate { .. } => SensorKind::Aggregate,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.source, Source::Remote)
    }

    /// Names of the sensors feeding this aggregate (empty otherwise).
    pub fn children(&self) -> Vec<&str> {
        match &self.source {
            Source::Aggregate { children, .. } => children.iter().map(|c| c.name()).collect(),
            _ => Vec::new(),
        }
    }

    /// Current value, or the reason it cannot be trusted.
    pub fn read(&self) -> Result<f32, SensorError> {
        match &self.source {
            Source::TimeSwitch => Ok(1.0),
            Source::Direct { .. } | Source::Remote => {
                let st = *lock(&self.state);
                match st.error {
                    Some(e) => Err(e),
                    None => Ok(st.last_value),
                }
            }
            Source::Aggregate { window, children } => self.read_fused(window, children),
        }
    }

    fn read_fused(&self, window: &Mutex<TrimmedWindow>, children: &[SensorHandle]) -> Result<f32, SensorError> {
        if Self::all_children_faulted(children) {
            let was_ok = {
                let mut st = lock(&self.state);
                let was_ok = st.error.is_none();
                st.error = Some(SensorError::AllChildrenFaulted);
                was_ok
            };
            if was_ok {
                warn!("Sensor '{}': every input is faulted", self.name);
            }
            return Err(SensorError::AllChildrenFaulted);
        }

        let (value, recomputed) = {
            let mut w = lock(window);
            let recomputed = w.is_stale();
            (w.value(), recomputed)
        };
        {
            let mut st = lock(&self.state);
            st.last_value = value;
            st.error = None;
        }
        if recomputed {
            self.sink.on_value_changed(&self.name, value);
        }
        Ok(value)
    }

    /// True if a read right now would fail.
    pub fn is_faulted(&self) -> bool {
        match &self.source {
            Source::TimeSwitch => false,
            Source::Aggregate { children, .. } => Self::all_children_faulted(children),
            Source::Direct { .. } | Source::Remote => lock(&self.state).error.is_some(),
        }
    }

    /// True once this sensor has reported a real fault.  A source still
    /// waiting for its first sample does not count.
    fn has_failed(&self) -> bool {
        match &self.source {
            Source::TimeSwitch => false,
            Source::Aggregate { children, .. } => Self::all_children_faulted(children),
            Source::Direct { .. } | Source::Remote => {
                matches!(lock(&self.state).error, Some(e) if e != SensorError::NoData)
            }
        }
    }

    fn all_children_faulted(children: &[SensorHandle]) -> bool {
        !children.is_empty() && children.iter().all(|c| c.has_failed())
    }

    /// Record a new sample.  On an aggregate this adds to the window; on
    /// any other value source it replaces the current value and is fanned
    /// out to every aggregate this sensor feeds.
    pub fn push(&self, value: f32) {
        match &self.source {
            Source::TimeSwitch => debug!("Sensor '{}': push ignored on time switch", self.name),
            Source::Aggregate { window, .. } => lock(window).push(value),
            Source::Direct { .. } | Source::Remote => self.record(Ok(value)),
        }
    }

    /// Run one refresh cycle: sample the driver, or recompute and forward
    /// the fused value.  Remote and time-switch sensors have nothing to do.
    pub fn refresh(&self, now_ms: u64) {
        match &self.source {
            Source::Direct { driver, clock } => {
                let sample = {
                    let mut driver = lock(driver);
                    let started = clock.monotonic_ms();
                    let sample = driver.sample(now_ms);
                    let took = Duration::from_millis(clock.monotonic_ms().saturating_sub(started));
                    if took > self.read_timeout {
                        Err(SensorError::Timeout)
                    } else {
                        sample
                    }
                };
                self.record(sample);
            }
            Source::Aggregate { .. } => {
                if let Ok(value) = self.read() {
                    self.notify_parents(value);
                }
            }
            Source::Remote | Source::TimeSwitch => {}
        }
    }

    pub fn reading(&self) -> SensorReading {
        SensorReading {
            name: self.name.clone(),
            kind: self.kind(),
            value: self.read(),
        }
    }

    fn record(&self, sample: Result<f32, SensorError>) {
        let sample = sample.and_then(|v| if v.is_finite() { Ok(v) } else { Err(SensorError::ReadFailed) });
        let previous = {
            let mut st = lock(&self.state);
            let previous = st.error;
            match sample {
                Ok(v) => {
                    st.last_value = v;
                    st.error = None;
                }
                Err(e) => st.error = Some(e),
            }
            previous
        };

        match sample {
            Ok(v) => {
                if matches!(previous, Some(e) if e != SensorError::NoData) {
                    info!("Sensor '{}': recovered ({:.1})", self.name, v);
                }
                self.sink.on_value_changed(&self.name, v);
                self.notify_parents(v);
            }
            Err(e) => {
                if previous != Some(e) {
                    warn!("Sensor '{}': {}", self.name, e);
                }
            }
        }
    }

    fn notify_parents(&self, value: f32) {
        let parents: Vec<SensorHandle> = lock(&self.parents).iter().filter_map(Weak::upgrade).collect();
        for parent in parents {
            parent.push(value);
        }
    }
}

impl core::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}
