//! Broker link driven through the controller's scheduler.

use terrarium::config::{SensorConfig, SensorSource, SystemConfig};
use terrarium::control::ActuatorState;
use terrarium::link::LinkState;

use crate::mock_hw::Rig;

const ANNOUNCE: &str = "Terrarium control center - online";

fn with_remote_sensor(reject_malformed: bool) -> SystemConfig {
    let mut cfg = SystemConfig::default();
    cfg.sensors.push(SensorConfig {
        name: "outside".to_owned(),
        source: SensorSource::Remote,
    });
    cfg.link.reject_malformed_payloads = reject_malformed;
    cfg
}

fn connected(config: SystemConfig) -> Rig {
    let mut rig = Rig::with_config(config, 12, 0);
    rig.run_for(100, 100);
    assert!(rig.broker.is_connected());
    rig
}

// ── Session upkeep ────────────────────────────────────────────

#[test]
fn first_poll_connects_subscribes_and_announces() {
    let rig = connected(SystemConfig::default());
    let link = rig.controller.link().unwrap();

    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(rig.broker.client_id().as_deref(), Some("fcce"));
    assert_eq!(rig.broker.subscriptions(), vec!["fcce/+".to_owned()]);
    assert_eq!(rig.broker.last_on("fcce/config").as_deref(), Some(ANNOUNCE));
    assert!(rig.broker.published().iter().any(|p| p.topic == "fcce/config" && p.retain));

    let status = link.status();
    assert_eq!(status.retry_count, 0);
    assert_eq!(status.first_failure_at, None);
}

#[test]
fn dropped_session_is_rebuilt_with_spaced_attempts() {
    let mut rig = connected(SystemConfig::default());
    rig.broker.set_reachable(false);
    rig.broker.drop_connection();
    let before = rig.broker.connect_attempts();

    rig.run_for(10_000, 100);
    let attempts = rig.broker.connect_attempts() - before;
    assert!(attempts >= 3, "only {attempts} attempts in 10 s");
    assert!(attempts <= 10_000 / 2_500 + 1, "{attempts} attempts in 10 s");
    assert_eq!(rig.controller.link().unwrap().state(), LinkState::Disconnected);

    rig.broker.set_reachable(true);
    rig.run_for(2_500, 100);
    let link = rig.controller.link().unwrap();
    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(rig.broker.subscriptions(), vec!["fcce/+".to_owned()]);
    assert_eq!(link.status().retry_count, 0);
    assert_eq!(rig.restart.count(), 0);
}

#[test]
fn watchdog_restarts_exactly_once_past_ceiling() {
    let mut rig = Rig::at(12, 0);
    rig.broker.set_reachable(false);

    // Down since the first poll at t = 1 s.
    rig.run_for(301_000, 1_000);
    assert_eq!(rig.restart.count(), 0);
    assert!(!rig.controller.link().unwrap().status().watchdog_fired);

    rig.run_for(1_000, 1_000);
    assert_eq!(rig.restart.count(), 1);
    assert!(rig.controller.link().unwrap().status().watchdog_fired);

    rig.run_for(60_000, 1_000);
    assert_eq!(rig.restart.count(), 1);
}

#[test]
fn circuits_keep_running_while_offline() {
    let mut rig = Rig::at(12, 0);
    rig.broker.set_reachable(false);
    rig.run_for(10_000, 100);
    // Humidity 80 is below the fan band: inverse output keeps the
    // active-low fan relay released.
    assert_eq!(rig.pin_high("Luefter"), Some(true));
    assert!(rig.broker.published().is_empty());
}

// ── Inbound dispatch ──────────────────────────────────────────

#[test]
fn circuit_command_forces_output_and_republishes() {
    let mut rig = connected(SystemConfig::default());
    rig.broker.inject("fcce/Luefter", "1");
    rig.run_for(100, 100);

    let fan = rig.controller.registry().find_circuit("Luefter").unwrap();
    assert_eq!(fan.last_commanded(), ActuatorState::Active);
    // Active-low relay, forced active.
    assert_eq!(rig.pin_high("Luefter"), Some(false));
    assert_eq!(rig.broker.last_on("fcce/Luefter/state").as_deref(), Some("1"));
    assert!(rig.controller.link().unwrap().status().last_seen.is_some());
}

#[test]
fn unknown_circuit_request_is_ignored() {
    let mut rig = connected(SystemConfig::default());
    let fan = rig.controller.registry().find_circuit("Luefter").unwrap().clone();
    let before = fan.last_commanded();

    rig.broker.inject("fcce/Luefter", "on");
    rig.run_for(100, 100);
    assert_eq!(fan.last_commanded(), before);
    assert_eq!(rig.controller.link().unwrap().status().last_seen, None);
}

#[test]
fn sensor_update_is_pushed() {
    let mut rig = connected(with_remote_sensor(false));
    rig.broker.inject("fcce/outside", "17.5");
    rig.run_for(100, 100);
    let outside = rig.controller.registry().find_sensor("outside").unwrap();
    assert_eq!(outside.read(), Ok(17.5));
}

#[test]
fn malformed_sensor_update_reads_as_zero() {
    let mut rig = connected(with_remote_sensor(false));
    rig.broker.inject("fcce/outside", "17.5");
    rig.broker.inject("fcce/outside", "n/a");
    rig.run_for(100, 100);
    let outside = rig.controller.registry().find_sensor("outside").unwrap();
    assert_eq!(outside.read(), Ok(0.0));
}

#[test]
fn malformed_sensor_update_rejected_when_configured() {
    let mut rig = connected(with_remote_sensor(true));
    rig.broker.inject("fcce/outside", "17.5");
    rig.broker.inject("fcce/outside", "n/a");
    rig.run_for(100, 100);
    let outside = rig.controller.registry().find_sensor("outside").unwrap();
    assert_eq!(outside.read(), Ok(17.5));
}

#[test]
fn error_report_is_logged_and_counts_as_liveness() {
    let mut rig = connected(with_remote_sensor(false));
    rig.broker.inject("fcce/outside", "!probe offline");
    rig.run_for(100, 100);

    assert!(rig.sink.events().iter().any(|e| e == "outside: probe offline"));
    assert!(rig.controller.link().unwrap().status().last_seen.is_some());
    // Not parsed as a value.
    let outside = rig.controller.registry().find_sensor("outside").unwrap();
    assert!(outside.read().is_err());
}

#[test]
fn status_topic_liveness_ignores_own_announcement() {
    let mut rig = connected(SystemConfig::default());
    rig.broker.inject("fcce/config", ANNOUNCE);
    rig.run_for(100, 100);
    assert_eq!(rig.controller.link().unwrap().status().last_seen, None);

    rig.broker.inject("fcce/config", "/sensor-alive");
    rig.broker.inject("fcce/config", "/uptime 3d 4h");
    rig.run_for(100, 100);
    assert!(rig.controller.link().unwrap().status().last_seen.is_some());
    assert!(rig.sink.events().iter().any(|e| e == "peer uptime 3d 4h"));
}

#[test]
fn foreign_and_status_topics_are_not_routed() {
    let mut rig = connected(SystemConfig::default());
    rig.broker.inject("other/Luefter", "1");
    rig.broker.inject("fcce/Luefter/state", "1");
    rig.run_for(100, 100);
    let fan = rig.controller.registry().find_circuit("Luefter").unwrap();
    assert_eq!(fan.last_commanded(), ActuatorState::Inactive);
}

// ── Outbound status ───────────────────────────────────────────

#[test]
fn fused_values_are_republished_once_online() {
    let mut rig = connected(SystemConfig::default());
    rig.run_for(2_000, 100);
    assert_eq!(rig.broker.last_on("fcce/temperature/value").as_deref(), Some("24.0"));
    assert_eq!(rig.broker.last_on("fcce/humidity/value").as_deref(), Some("80.0"));
    assert_eq!(rig.broker.last_on("fcce/Berg-temp/value").as_deref(), Some("24.0"));
}
