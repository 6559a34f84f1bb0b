//! End-to-end control scenarios on hand-built circuits.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use terrarium::adapters::time::ManualClock;
use terrarium::app::ports::{ChangeSink, OutputLevel};
use terrarium::config::FallbackMode;
use terrarium::control::actuator::{Actuator, ActuatorKind};
use terrarium::control::circuit::{Circuit, CircuitHandle, CircuitParams, CircuitState, Regulation};
use terrarium::control::window::{Band, DutyWindow};
use terrarium::control::ActuatorState;
use terrarium::error::SensorError;
use terrarium::sensors::sim::SimProbe;
use terrarium::sensors::{Sensor, SensorHandle};

use crate::mock_hw::{RecordingOutput, RecordingSink};

fn at(hour: u32, minute: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2024, 6, 1).and_then(|d| d.and_hms_opt(hour, minute, 0))
}

fn params(day: Band, night: Band, inverse_output: bool) -> CircuitParams {
    CircuitParams {
        duty: DutyWindow::hm(7, 0, 22, 0),
        day_window: DutyWindow::hm(8, 0, 20, 0),
        day_band: day,
        night_band: night,
        inverse_output,
        fallback: Some(FallbackMode::Toggle.as_fn()),
        fallback_interval_ms: 900_000,
    }
}

fn circuit(
    name: &str,
    sensor: SensorHandle,
    params: CircuitParams,
    sink: Arc<dyn ChangeSink>,
) -> (CircuitHandle, RecordingOutput) {
    let out = RecordingOutput::new();
    let actuator = Actuator::new(ActuatorKind::Digital, false, Box::new(out.clone()));
    (Circuit::new(name, sensor, actuator, params, sink), out)
}

// ── Hysteresis ────────────────────────────────────────────────

#[test]
fn fan_scenario_engages_above_band() {
    let sink = Arc::new(RecordingSink::default());
    let humidity = Sensor::remote("hum", sink.clone());
    let band = Band::new(65.0, 75.0).unwrap();
    let (fan, out) = circuit("Fan", humidity.clone(), params(band, band, true), sink.clone());

    humidity.push(60.0);
    assert_eq!(fan.tick(at(12, 0), 0), CircuitState::OnDuty(Regulation::Engaging));
    // Inverse output: engaging below the band switches the fan off.
    assert_eq!(fan.last_commanded(), ActuatorState::Inactive);
    assert_eq!(out.last(), Some(OutputLevel::Digital(false)));

    humidity.push(70.0);
    let writes = out.writes();
    assert_eq!(fan.tick(at(12, 0), 5_000), CircuitState::OnDuty(Regulation::Holding));
    assert_eq!(fan.last_commanded(), ActuatorState::Inactive);
    assert_eq!(out.writes(), writes);

    humidity.push(80.0);
    assert_eq!(fan.tick(at(12, 0), 10_000), CircuitState::OnDuty(Regulation::Disengaging));
    assert_eq!(fan.last_commanded(), ActuatorState::Active);
    assert_eq!(out.last(), Some(OutputLevel::Digital(true)));

    // Every evaluated tick republishes, including the holding one.
    assert_eq!(sink.state_count("Fan"), 3);
}

#[test]
fn heater_follows_night_band_outside_day_window() {
    let temp = Sensor::remote("temp", Arc::new(RecordingSink::default()));
    let day = Band::new(24.0, 26.0).unwrap();
    let night = Band::new(20.0, 22.0).unwrap();
    let (heater, _) = circuit("Heat", temp.clone(), params(day, night, false), Arc::new(RecordingSink::default()));

    temp.push(23.0);
    // 12:00 is day: below [24, 26].
    assert_eq!(heater.tick(at(12, 0), 0), CircuitState::OnDuty(Regulation::Engaging));
    assert_eq!(heater.last_commanded(), ActuatorState::Active);
    // 21:00 is on duty but night: above [20, 22].
    assert_eq!(heater.tick(at(21, 0), 5_000), CircuitState::OnDuty(Regulation::Disengaging));
    assert_eq!(heater.last_commanded(), ActuatorState::Inactive);
}

#[test]
fn band_edges_hold() {
    let temp = Sensor::remote("temp", Arc::new(RecordingSink::default()));
    let band = Band::new(24.0, 26.0).unwrap();
    let (heater, out) = circuit("Heat", temp.clone(), params(band, band, false), Arc::new(RecordingSink::default()));

    for (i, v) in [24.0, 26.0, 24.0].into_iter().enumerate() {
        temp.push(v);
        assert_eq!(heater.tick(at(12, 0), i as u64 * 5_000), CircuitState::OnDuty(Regulation::Holding));
    }
    assert_eq!(out.writes(), 0);
}

// ── Duty window ───────────────────────────────────────────────

#[test]
fn off_duty_hard_sets_inactive_ignoring_inverse_output() {
    let hum = Sensor::remote("hum", Arc::new(RecordingSink::default()));
    let band = Band::new(65.0, 75.0).unwrap();
    let (fan, out) = circuit("Fan", hum.clone(), params(band, band, true), Arc::new(RecordingSink::default()));

    hum.push(90.0);
    assert_eq!(fan.tick(at(12, 0), 0), CircuitState::OnDuty(Regulation::Disengaging));
    assert_eq!(fan.last_commanded(), ActuatorState::Active);

    // 23:30 is past 22:00; the value no longer matters.
    assert_eq!(fan.tick(at(23, 30), 5_000), CircuitState::OffDuty);
    assert_eq!(fan.last_commanded(), ActuatorState::Inactive);
    assert_eq!(out.last(), Some(OutputLevel::Digital(false)));
}

#[test]
fn timer_switch_follows_duty_window_only() {
    let timer = Sensor::time_switch("timer", Arc::new(RecordingSink::default()));
    let band = Band::new(0.0, 0.0).unwrap();
    let (light, out) = circuit("Light", timer, params(band, band, false), Arc::new(RecordingSink::default()));

    assert_eq!(light.tick(at(6, 59), 0), CircuitState::OffDuty);
    assert_eq!(light.tick(at(7, 0), 5_000), CircuitState::OnDuty(Regulation::Engaging));
    assert_eq!(out.last(), Some(OutputLevel::Digital(true)));
    assert_eq!(light.tick(at(22, 0), 10_000), CircuitState::OffDuty);
    assert_eq!(out.last(), Some(OutputLevel::Digital(false)));
}

#[test]
fn missing_wallclock_skips_tick() {
    let hum = Sensor::remote("hum", Arc::new(RecordingSink::default()));
    let band = Band::new(65.0, 75.0).unwrap();
    let sink = Arc::new(RecordingSink::default());
    let (fan, out) = circuit("Fan", hum.clone(), params(band, band, false), sink.clone());
    hum.push(10.0);
    assert_eq!(fan.tick(None, 0), CircuitState::OffDuty);
    assert_eq!(out.writes(), 0);
    assert_eq!(sink.state_count("Fan"), 0);
}

// ── Fallback ──────────────────────────────────────────────────

#[test]
fn fallback_toggles_once_per_interval_and_exits_on_recovery() {
    let probe = SimProbe::new(22.0);
    let temp = Sensor::direct(
        "temp",
        Box::new(probe.clone()),
        Duration::from_millis(500),
        Arc::new(ManualClock::new()),
        Arc::new(RecordingSink::default()),
    );
    let band = Band::new(24.0, 26.0).unwrap();
    let (heater, _) = circuit("Heat", temp.clone(), params(band, band, false), Arc::new(RecordingSink::default()));

    temp.refresh(0);
    heater.tick(at(12, 0), 0);
    assert_eq!(heater.last_commanded(), ActuatorState::Active);

    probe.fail(true);
    temp.refresh(1_000);
    assert_eq!(temp.read(), Err(SensorError::ReadFailed));
    assert_eq!(heater.tick(at(12, 0), 1_000), CircuitState::Fallback);
    // Nothing happens until a full interval has elapsed.
    heater.tick(at(12, 0), 1_000 + 899_999);
    assert_eq!(heater.last_commanded(), ActuatorState::Active);
    heater.tick(at(12, 15), 1_000 + 900_000);
    assert_eq!(heater.last_commanded(), ActuatorState::Inactive);
    heater.tick(at(12, 20), 1_000 + 1_200_000);
    assert_eq!(heater.last_commanded(), ActuatorState::Inactive);
    heater.tick(at(12, 30), 1_000 + 1_800_000);
    assert_eq!(heater.last_commanded(), ActuatorState::Active);

    probe.fail(false);
    probe.set(27.0);
    temp.refresh(2_000_000);
    assert_eq!(heater.tick(at(12, 35), 2_000_000), CircuitState::OnDuty(Regulation::Disengaging));
}

// ── Fusion ────────────────────────────────────────────────────

#[test]
fn aggregate_trims_single_outlier() {
    let sink = Arc::new(RecordingSink::default());
    let child = Sensor::remote("probe", sink.clone());
    let fused = Sensor::aggregate("fused", vec![child.clone()], 25.0, sink.clone());

    for v in [20.0, 21.0, 19.0, 22.0, 90.0] {
        child.push(v);
    }
    assert_eq!(fused.read(), Ok(21.0));
    assert_eq!(sink.last_value("fused"), Some(21.0));
}

#[test]
fn aggregate_drives_circuit_and_survives_one_dead_child() {
    let sink = Arc::new(RecordingSink::default());
    let a = SimProbe::new(23.0);
    let b = SimProbe::new(23.0);
    let clock = Arc::new(ManualClock::new());
    let ta = Sensor::direct("a", Box::new(a.clone()), Duration::from_millis(500), clock.clone(), sink.clone());
    let tb = Sensor::direct("b", Box::new(b.clone()), Duration::from_millis(500), clock, sink.clone());
    let fused = Sensor::aggregate("temp", vec![ta.clone(), tb.clone()], 25.0, sink.clone());
    let band = Band::new(24.0, 26.0).unwrap();
    let (heater, _) = circuit("Heat", fused.clone(), params(band, band, false), sink.clone());

    ta.refresh(0);
    tb.refresh(0);
    assert_eq!(heater.tick(at(12, 0), 0), CircuitState::OnDuty(Regulation::Engaging));

    b.fail(true);
    tb.refresh(2_000);
    assert!(fused.read().is_ok());
    assert_ne!(heater.tick(at(12, 0), 2_000), CircuitState::Fallback);

    a.fail(true);
    ta.refresh(4_000);
    assert_eq!(fused.read(), Err(SensorError::AllChildrenFaulted));
    assert_eq!(heater.tick(at(12, 0), 4_000), CircuitState::Fallback);
}

#[test]
fn aggregate_over_silent_bus_children_regulates_on_default() {
    let sink = Arc::new(RecordingSink::default());
    let north = Sensor::remote("north", sink.clone());
    let south = Sensor::remote("south", sink.clone());
    let fused = Sensor::aggregate("temp", vec![north.clone(), south.clone()], 25.0, sink.clone());
    let band = Band::new(24.0, 26.0).unwrap();
    let (heater, _) = circuit("Heat", fused.clone(), params(band, band, false), sink.clone());

    // No bus message yet: the default sits inside the band.
    assert_eq!(fused.read(), Ok(25.0));
    assert_eq!(heater.tick(at(12, 0), 0), CircuitState::OnDuty(Regulation::Holding));

    north.push(22.0);
    assert_eq!(heater.tick(at(12, 0), 5_000), CircuitState::OnDuty(Regulation::Engaging));
}
