//! Terrarium Firmware: Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  EspHardware    LogChangeSink   NvsAdapter    SystemClock      │
//! │  (DHT+relays)   (ChangeSink)    (ConfigPort)  (Clock)          │
//! │  MqttSession    SystemRestart   WiFi STA + SNTP                │
//! │  (BusSession)   (RestartPort)                                  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │          Controller (sensors · circuits · link)        │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Scheduler (delegate-driven) · Task watchdog                   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sntp::EspSntp;
use log::{error, info, warn};

use terrarium::adapters::hardware::EspHardware;
use terrarium::adapters::log_sink::LogChangeSink;
use terrarium::adapters::mqtt::MqttSession;
use terrarium::adapters::nvs::NvsAdapter;
use terrarium::adapters::time::SystemClock;
use terrarium::adapters::wifi;
use terrarium::app::ports::ConfigPort;
use terrarium::app::service::{Controller, Wiring};
use terrarium::config::SystemConfig;
use terrarium::drivers::watchdog::{SystemRestart, Watchdog};

/// POSIX TZ for the duty windows (central European time).
const TIMEZONE: &str = "CET-1CEST,M3.5.0,M10.5.0/3";

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Terrarium v{}                       ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // SAFETY: no other thread exists yet that could read the environment.
    unsafe { std::env::set_var("TZ", TIMEZONE) };
    // SAFETY: tzset only re-reads TZ.
    unsafe { esp_idf_svc::sys::tzset() };

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = match NvsAdapter::new() {
        Ok(n) => Some(n),
        Err(e) => {
            warn!("NVS init failed ({}), running with defaults and no persistence", e);
            None
        }
    };
    let config = match nvs.as_ref().map(|n| n.load()) {
        Some(Ok(cfg)) => cfg,
        Some(Err(e)) => {
            warn!("Stored config unusable ({}), using defaults", e);
            SystemConfig::default()
        }
        None => SystemConfig::default(),
    };

    // ── 3. Network: WiFi STA + SNTP ───────────────────────────
    let ssid = option_env!("TERRARIUM_WIFI_SSID").unwrap_or("");
    let password = option_env!("TERRARIUM_WIFI_PASS").unwrap_or("");
    let _wifi = match wifi::connect_sta(peripherals.modem, sysloop, nvs_partition, ssid, password) {
        Ok(w) => Some(w),
        Err(e) => {
            // The link retries on its own and restarts past its ceiling.
            error!("WiFi: {}", e);
            None
        }
    };
    let _sntp = EspSntp::new_default()?;

    // ── 4. Assemble the controller ────────────────────────────
    let mut hardware = EspHardware::new(&config)?;
    let broker_url = format!("mqtt://{}:{}", config.link.broker_host, config.link.broker_port);
    let loop_sleep = Duration::from_millis(u64::from(config.timing.loop_sleep_ms));

    let mut controller = Controller::build(
        config,
        Wiring {
            hardware: &mut hardware,
            clock: Arc::new(SystemClock::new()),
            restart: Arc::new(SystemRestart::new()),
            session: Some(MqttSession::new(&broker_url)),
            sinks: vec![Arc::new(LogChangeSink::new())],
        },
    )?;

    // Subscribed only now: WiFi and SNTP bring-up above block unfed.
    let watchdog = Watchdog::new();
    info!("Entering control loop");

    // ── 5. Control loop ───────────────────────────────────────
    loop {
        controller.tick();
        if let Some(nvs) = &nvs {
            controller.auto_save_if_needed(nvs);
        }
        watchdog.feed();

        let idle = controller
            .next_due_in()
            .map_or(loop_sleep, |ms| loop_sleep.min(Duration::from_millis(ms)));
        std::thread::sleep(idle.max(Duration::from_millis(1)));
    }
}
