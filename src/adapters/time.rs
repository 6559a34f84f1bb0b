//! Clock adapters.
//!
//! - [`SystemClock`]: on ESP-IDF, uptime from `esp_timer_get_time()` and
//!   local time from the (SNTP-synced) system clock; on the host,
//!   `std::time::Instant` and `chrono::Local`.
//! - [`ManualClock`]: fully settable clock for tests and host simulation.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::app::ports::Clock;
use crate::sync::lock;

pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    #[cfg(target_os = "espidf")]
    fn monotonic_ms(&self) -> u64 {
        // SAFETY: esp_timer_get_time reads a free-running counter.
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    #[cfg(not(target_os = "espidf"))]
    fn monotonic_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// `None` until SNTP has set the clock.
    #[cfg(target_os = "espidf")]
    fn wallclock(&self) -> Option<NaiveDateTime> {
        use chrono::Datelike;

        let mut tv = esp_idf_svc::sys::timeval { tv_sec: 0, tv_usec: 0 };
        // SAFETY: tv is a valid out-pointer; the timezone argument may be null.
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        let secs = tv.tv_sec as esp_idf_svc::sys::time_t;
        // SAFETY: tm is plain data; localtime_r fills it.
        let mut tm: esp_idf_svc::sys::tm = unsafe { core::mem::zeroed() };
        if unsafe { esp_idf_svc::sys::localtime_r(&secs, &mut tm) }.is_null() {
            return None;
        }
        let local = NaiveDate::from_ymd_opt(tm.tm_year + 1900, (tm.tm_mon + 1) as u32, tm.tm_mday as u32)?
            .and_hms_opt(tm.tm_hour as u32, tm.tm_min as u32, tm.tm_sec.min(59) as u32)?;
        // An unsynced RTC starts at 1970.
        (local.year() >= 2020).then_some(local)
    }

    #[cfg(not(target_os = "espidf"))]
    fn wallclock(&self) -> Option<NaiveDateTime> {
        Some(chrono::Local::now().naive_local())
    }
}

/// Test clock.  Wall-clock time, once set, advances with the monotonic
/// counter.
#[derive(Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
    wall: Mutex<Option<(NaiveDateTime, u64)>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock already synced to `hh:mm` on an arbitrary day.
    pub fn at(hour: u32, minute: u32) -> Self {
        let clock = Self::new();
        clock.set_time(hour, minute);
        clock
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn set_ms(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::Relaxed);
    }

    /// Set (or clear, with `None`) the wall clock as of the current instant.
    pub fn set_wallclock(&self, wall: Option<NaiveDateTime>) {
        let now = self.now_ms.load(Ordering::Relaxed);
        *lock(&self.wall) = wall.map(|w| (w, now));
    }

    pub fn set_time(&self, hour: u32, minute: u32) {
        let wall = NaiveDate::from_ymd_opt(2024, 6, 1).and_then(|d| d.and_hms_opt(hour, minute, 0));
        self.set_wallclock(wall);
    }
}

impl Clock for ManualClock {
    fn monotonic_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Relaxed)
    }

    fn wallclock(&self) -> Option<NaiveDateTime> {
        let (base, at_ms) = (*lock(&self.wall))?;
        let elapsed = self.monotonic_ms().saturating_sub(at_ms);
        Some(base + Duration::milliseconds(elapsed as i64))
    }
}
