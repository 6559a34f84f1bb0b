//! Task Watchdog Timer (TWDT) and device restart.
//!
//! [`Watchdog`] resets the device if the control loop stalls for more
//! than [`TWDT_TIMEOUT_MS`]; the loop calls `feed()` on every pass.
//! [`SystemRestart`] is the [`RestartPort`] used by the link watchdog.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::{info, warn};

use crate::app::ports::RestartPort;

pub const TWDT_TIMEOUT_MS: u32 = 10_000;

pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    /// Initialise and subscribe the current task to the TWDT.
    pub fn new() -> Self {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: reconfigure/add only touch the TWDT driver state and
            // are called from the task that will feed it.
            unsafe {
                let cfg = esp_task_wdt_config_t {
                    timeout_ms: TWDT_TIMEOUT_MS,
                    idle_core_mask: 0,
                    trigger_panic: true,
                };
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK as i32 {
                    warn!("TWDT reconfigure returned {} (may already be configured)", ret);
                }

                let ret = esp_task_wdt_add(core::ptr::null_mut());
                let subscribed = ret == ESP_OK as i32;
                if subscribed {
                    info!("Watchdog: subscribed ({} ms timeout, panic on trigger)", TWDT_TIMEOUT_MS);
                } else {
                    warn!("Watchdog: failed to subscribe ({})", ret);
                }

                Self { subscribed }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("Watchdog(sim): no-op");
            Self {}
        }
    }

    /// Feed the watchdog.
    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        {
            if self.subscribed {
                // SAFETY: the current task is subscribed.
                unsafe {
                    esp_task_wdt_reset();
                }
            }
        }
    }
}

/// Restarts the chip.  On the host the request is only logged and counted.
#[derive(Default)]
pub struct SystemRestart {
    #[cfg(not(target_os = "espidf"))]
    requests: core::sync::atomic::AtomicU32,
}

impl SystemRestart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart requests seen so far (host only).
    #[cfg(not(target_os = "espidf"))]
    pub fn requests(&self) -> u32 {
        self.requests.load(core::sync::atomic::Ordering::Relaxed)
    }
}

impl RestartPort for SystemRestart {
    fn restart(&self, reason: &'static str) {
        warn!("Restart: {}", reason);
        #[cfg(target_os = "espidf")]
        {
            log::logger().flush();
            // SAFETY: esp_restart has no preconditions and does not return.
            unsafe { esp_restart() };
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.requests.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
            info!("Restart(sim): suppressed on host");
        }
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn host_restart_is_counted_not_performed() {
        let r = SystemRestart::new();
        r.restart("link watchdog");
        r.restart("link watchdog");
        assert_eq!(r.requests(), 2);
    }

    #[test]
    fn host_watchdog_feed_is_noop() {
        Watchdog::new().feed();
    }
}
