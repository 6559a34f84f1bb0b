//! Controller assembled from the stock config, driven by the scheduler.

use std::sync::Arc;

use terrarium::adapters::hardware::SimHardware;
use terrarium::adapters::mqtt::MqttSession;
use terrarium::adapters::time::ManualClock;
use terrarium::app::commands::AppCommand;
use terrarium::app::ports::NullSink;
use terrarium::app::service::{Controller, Wiring};
use terrarium::config::{SensorConfig, SensorSource, SystemConfig};
use terrarium::control::window::Band;
use terrarium::control::{ActuatorState, CircuitState, Regulation};
use terrarium::error::SensorError;

use crate::mock_hw::{CountingRestart, MockConfigStore, Rig};

#[test]
fn daytime_pass_regulates_every_circuit() {
    let mut rig = Rig::at(12, 0);
    rig.run_for(100, 100);

    let c = &rig.controller;
    // Lights are a pure timer.
    assert_eq!(c.circuit_state("Zeitschalter"), Some(CircuitState::OnDuty(Regulation::Engaging)));
    assert_eq!(rig.pin_high("Zeitschalter"), Some(true));
    // 24.0 sits on the day band's lower edge.
    assert_eq!(c.circuit_state("Infrarot"), Some(CircuitState::OnDuty(Regulation::Holding)));
    // 80 % is below the fan band.
    assert_eq!(c.circuit_state("Luefter"), Some(CircuitState::OnDuty(Regulation::Engaging)));
    assert_eq!(c.circuit_state("Nebel"), Some(CircuitState::OnDuty(Regulation::Holding)));

    let snap = c.snapshot();
    assert_eq!(snap.sensors.len(), 7);
    assert_eq!(snap.circuits.len(), 4);
    let temp = snap.sensors.iter().find(|s| s.name == "temperature").unwrap();
    assert_eq!(temp.value, Ok(24.0));
}

#[test]
fn night_pass_uses_night_bands_and_duty_windows() {
    let mut rig = Rig::at(23, 0);
    rig.run_for(100, 100);

    let c = &rig.controller;
    assert_eq!(c.circuit_state("Zeitschalter"), Some(CircuitState::OffDuty));
    assert_eq!(rig.pin_high("Zeitschalter"), Some(false));
    assert_eq!(c.circuit_state("Nebel"), Some(CircuitState::OffDuty));
    // Night band [20, 22]: 24.0 is too warm.
    assert_eq!(c.circuit_state("Infrarot"), Some(CircuitState::OnDuty(Regulation::Disengaging)));
}

#[test]
fn lights_switch_on_when_duty_window_opens() {
    let mut rig = Rig::at(6, 59);
    rig.run_for(100, 100);
    assert_eq!(rig.pin_high("Zeitschalter"), Some(false));

    rig.run_for(60_000, 500);
    assert_eq!(rig.pin_high("Zeitschalter"), Some(true));
}

#[test]
fn faulted_probes_put_heater_into_fallback() {
    let mut rig = Rig::at(12, 0);
    rig.run_for(100, 100);

    rig.hardware.probe("Berg-temp").unwrap().fail(true);
    rig.run_for(5_000, 100);
    // One probe left: still regulating.
    assert!(matches!(rig.controller.circuit_state("Infrarot"), Some(CircuitState::OnDuty(_))));

    rig.hardware.probe("Erde-temp").unwrap().fail(true);
    rig.run_for(5_000, 100);
    assert_eq!(rig.controller.circuit_state("Infrarot"), Some(CircuitState::Fallback));
    let temp = rig.controller.registry().find_sensor("temperature").unwrap();
    assert_eq!(temp.read(), Err(SensorError::AllChildrenFaulted));

    rig.hardware.probe("Erde-temp").unwrap().fail(false);
    rig.run_for(5_000, 100);
    assert!(matches!(rig.controller.circuit_state("Infrarot"), Some(CircuitState::OnDuty(_))));
}

#[test]
fn probe_changes_reach_the_circuit() {
    let mut rig = Rig::at(12, 0);
    rig.run_for(100, 100);

    for name in ["Berg-temp", "Erde-temp"] {
        rig.hardware.probe(name).unwrap().set(21.0);
    }
    // Enough refreshes to flush 24.0 out of the fused window.
    rig.run_for(25_000, 100);
    assert_eq!(rig.controller.circuit_state("Infrarot"), Some(CircuitState::OnDuty(Regulation::Engaging)));
    assert_eq!(rig.pin_high("Infrarot"), Some(true));
}

#[test]
fn slow_probe_read_times_out() {
    let mut cfg = SystemConfig::default();
    cfg.timing.read_timeout_ms = 20;
    let mut rig = Rig::with_config(cfg, 12, 0);
    let slow = rig.hardware.probe("Berg-hum").unwrap();
    slow.drive_clock(rig.clock.clone());
    slow.stall(60);
    rig.run_for(100, 100);

    let snap = rig.controller.snapshot();
    let hum = snap.sensors.iter().find(|s| s.name == "Berg-hum").unwrap();
    assert_eq!(hum.value, Err(SensorError::Timeout));
    // The other humidity probe keeps the aggregate alive.
    let fused = snap.sensors.iter().find(|s| s.name == "humidity").unwrap();
    assert!(fused.value.is_ok());
}

#[test]
fn missing_wallclock_holds_circuits() {
    let mut rig = Rig::at(12, 0);
    rig.clock.set_wallclock(None);
    rig.run_for(10_000, 100);
    assert_eq!(rig.controller.circuit_state("Zeitschalter"), Some(CircuitState::OffDuty));
    assert_eq!(rig.pin_high("Zeitschalter"), None);
}

// ── Commands ──────────────────────────────────────────────────

#[test]
fn band_edit_saved_once_after_quiet_period() {
    let mut rig = Rig::at(12, 0);
    let store = MockConfigStore::new();
    let day = Band::new(25.0, 27.0).unwrap();
    let night = Band::new(19.0, 21.0).unwrap();

    rig.controller
        .handle_command(AppCommand::SetBands {
            circuit: "Infrarot".into(),
            day,
            night,
        })
        .unwrap();
    let live = rig.controller.registry().find_circuit("Infrarot").unwrap();
    assert_eq!(live.bands(), (day, night));

    rig.clock.advance(2_000);
    assert!(!rig.controller.auto_save_if_needed(&store));
    rig.clock.advance(3_000);
    assert!(rig.controller.auto_save_if_needed(&store));
    assert!(!rig.controller.auto_save_if_needed(&store));
    assert_eq!(store.saves(), 1);
    assert_eq!(store.stored().unwrap().find_circuit("Infrarot").unwrap().night_band, night);

    // The new day band applies from the next tick.
    rig.run_for(100, 100);
    assert_eq!(rig.controller.circuit_state("Infrarot"), Some(CircuitState::OnDuty(Regulation::Engaging)));
}

#[test]
fn explicit_save_skips_quiet_period() {
    let mut rig = Rig::at(12, 0);
    let store = MockConfigStore::new();
    rig.clock.advance(60_000);
    rig.controller.handle_command(AppCommand::SaveConfig).unwrap();
    assert!(rig.controller.auto_save_if_needed(&store));
    assert_eq!(store.stored(), Some(SystemConfig::default()));
}

#[test]
fn force_save_writes_immediately() {
    let mut rig = Rig::at(12, 0);
    let store = MockConfigStore::new();
    rig.controller
        .set_bands("Nebel", Band::new(70.0, 90.0).unwrap(), Band::new(70.0, 90.0).unwrap())
        .unwrap();
    rig.controller.force_save_if_dirty(&store);
    assert_eq!(store.saves(), 1);
    rig.controller.force_save_if_dirty(&store);
    assert_eq!(store.saves(), 1);
}

#[test]
fn force_command_is_overridden_by_next_tick() {
    let mut rig = Rig::at(12, 0);
    rig.run_for(100, 100);
    rig.controller
        .handle_command(AppCommand::ForceCircuit {
            circuit: "Infrarot".into(),
            state: ActuatorState::Active,
        })
        .unwrap();
    assert_eq!(rig.pin_high("Infrarot"), Some(true));

    // Holding leaves the forced level in place.
    rig.run_for(5_000, 100);
    assert_eq!(rig.pin_high("Infrarot"), Some(true));

    for name in ["Berg-temp", "Erde-temp"] {
        rig.hardware.probe(name).unwrap().set(30.0);
    }
    rig.run_for(25_000, 100);
    assert_eq!(rig.pin_high("Infrarot"), Some(false));
}

#[test]
fn unknown_circuit_command_rejected() {
    let mut rig = Rig::at(12, 0);
    let err = rig.controller.handle_command(AppCommand::ForceCircuit {
        circuit: "Ghost".into(),
        state: ActuatorState::Active,
    });
    assert!(err.is_err());
}

// ── Assembly ──────────────────────────────────────────────────

fn build(config: SystemConfig) -> bool {
    let mut hw = SimHardware::new(&config);
    Controller::<MqttSession>::build(
        config,
        Wiring {
            hardware: &mut hw,
            clock: Arc::new(ManualClock::at(12, 0)),
            restart: Arc::new(CountingRestart::default()),
            session: None,
            sinks: vec![Arc::new(NullSink)],
        },
    )
    .is_ok()
}

#[test]
fn invalid_configs_are_refused() {
    assert!(build(SystemConfig::default()));

    let mut dup = SystemConfig::default();
    dup.sensors.push(SensorConfig {
        name: "timer".into(),
        source: SensorSource::Remote,
    });
    assert!(!build(dup));

    let mut dangling = SystemConfig::default();
    dangling.circuits[0].sensor = "nowhere".into();
    assert!(!build(dangling));

    let mut reserved = SystemConfig::default();
    reserved.sensors.push(SensorConfig {
        name: "config".into(),
        source: SensorSource::Remote,
    });
    assert!(!build(reserved));
}

#[test]
fn link_disabled_means_no_link_task() {
    let mut cfg = SystemConfig::default();
    cfg.link.enabled = false;
    let mut rig = Rig::with_config(cfg, 12, 0);
    rig.run_for(1_000, 100);
    assert!(rig.controller.link().is_none());
    assert_eq!(rig.broker.connect_attempts(), 0);
}
