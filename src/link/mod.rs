//! Message-bus link: connection upkeep and inbound dispatch.
//!
//! The [`ConnectionManager`] owns one [`BusSession`] and is polled by the
//! scheduler.  It never blocks on retries:
//!
//! ```text
//!   Disconnected ──(spacing elapsed)──▶ Connecting ──ok──▶ Connected
//!        ▲                                  │                 │
//!        └──────────────── fail ────────────┘    session lost ┘
//! ```
//!
//! Attempts are spaced by at least `min_attempt_spacing_ms`.  Once the
//! link has been down continuously for longer than the watchdog ceiling
//! the device is restarted, once.
//!
//! Two locks: one for the session, one for the bookkeeping.  Inbound
//! messages are drained under the session lock and dispatched after it is
//! released, since dispatch can publish.

pub mod topic;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::app::context::Registry;
use crate::app::ports::{BusSession, ChangeSink, InboundMessage, QoS, RestartPort};
use crate::config::{LinkConfig, RESERVED_TOPIC};
use crate::control::actuator::ActuatorState;
use crate::error::LinkError;
use crate::sync::lock;
use topic::StatusText;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connection bookkeeping, readable by display code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    pub last_attempt_at: Option<u64>,
    pub first_failure_at: Option<u64>,
    pub retry_count: u32,
    /// Last inbound message that was dispatched (uptime ms).
    pub last_seen: Option<u64>,
    pub watchdog_fired: bool,
}

#[derive(Debug, Clone)]
struct Settings {
    client_id: String,
    broker: String,
    connect_timeout: Duration,
    min_attempt_spacing_ms: u64,
    watchdog_ceiling_ms: u64,
    announce: String,
    reject_malformed: bool,
}

pub struct ConnectionManager<S> {
    settings: Settings,
    session: Mutex<S>,
    status: Mutex<LinkStatus>,
    subscriptions: Mutex<Vec<String>>,
    restart: Arc<dyn RestartPort>,
    events: Arc<dyn ChangeSink>,
}

impl<S: BusSession> ConnectionManager<S> {
    /// `events` receives operator-log text (error reports, peer status).
    pub fn new(config: &LinkConfig, session: S, restart: Arc<dyn RestartPort>, events: Arc<dyn ChangeSink>) -> Self {
        let settings = Settings {
            client_id: config.client_id.clone(),
            broker: format!("mqtt://{}:{}", config.broker_host, config.broker_port),
            connect_timeout: Duration::from_millis(u64::from(config.connect_timeout_ms)),
            min_attempt_spacing_ms: u64::from(config.min_attempt_spacing_ms),
            watchdog_ceiling_ms: u64::from(config.watchdog_ceiling_secs) * 1_000,
            announce: config.announce.clone(),
            reject_malformed: config.reject_malformed_payloads,
        };
        let subscriptions = vec![format!("{}/+", settings.client_id)];
        Self {
            settings,
            session: Mutex::new(session),
            status: Mutex::new(LinkStatus {
                state: LinkState::Disconnected,
                last_attempt_at: None,
                first_failure_at: None,
                retry_count: 0,
                last_seen: None,
                watchdog_fired: false,
            }),
            subscriptions: Mutex::new(subscriptions),
            restart,
            events,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.settings.client_id
    }

    /// Broker URL this link was configured with.
    pub fn broker(&self) -> &str {
        &self.settings.broker
    }

    pub fn state(&self) -> LinkState {
        lock(&self.status).state
    }

    pub fn status(&self) -> LinkStatus {
        lock(&self.status).clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.subscriptions).clone()
    }

    /// Register an extra topic pattern, subscribed now if connected and
    /// again on every reconnect.
    pub fn add_subscription(&self, pattern: &str) {
        {
            let mut subs = lock(&self.subscriptions);
            if subs.iter().any(|s| s == pattern) {
                return;
            }
            subs.push(pattern.to_owned());
        }
        if self.state() == LinkState::Connected {
            if let Err(e) = lock(&self.session).subscribe(pattern, QoS::AtMostOnce) {
                warn!("Link: subscribe '{}' failed: {}", pattern, e);
            }
        }
    }

    /// One bounded handshake: connect, subscribe every registered pattern,
    /// announce.  Never retries.
    pub fn connect(&self) -> bool {
        lock(&self.status).state = LinkState::Connecting;
        let subs = self.subscriptions();
        let config_topic = topic::entity_topic(&self.settings.client_id, RESERVED_TOPIC);

        let result = {
            let mut session = lock(&self.session);
            let result = session
                .connect(&self.settings.client_id, self.settings.connect_timeout)
                .and_then(|()| {
                    subs.iter()
                        .try_for_each(|pattern| session.subscribe(pattern, QoS::AtMostOnce))
                })
                .and_then(|()| {
                    session.publish(&config_topic, self.settings.announce.as_bytes(), QoS::AtMostOnce, true)
                });
            if result.is_err() {
                session.disconnect();
            }
            result
        };

        let mut status = lock(&self.status);
        match result {
            Ok(()) => {
                info!(
                    "Link: connected to {} as '{}' after {} attempt(s)",
                    self.settings.broker, self.settings.client_id, status.retry_count
                );
                status.state = LinkState::Connected;
                status.first_failure_at = None;
                status.retry_count = 0;
                true
            }
            Err(e) => {
                warn!("Link: connect to {} failed: {}", self.settings.broker, e);
                status.state = LinkState::Disconnected;
                false
            }
        }
    }

    /// Drive reconnection.  Call on every link poll.
    ///
    /// Returns `Err(WatchdogExpired)` once the outage has exceeded the
    /// ceiling; the restart is requested on the first such call only.
    pub fn reconnect_tick(&self, now_ms: u64) -> Result<(), LinkError> {
        let session_up = lock(&self.session).is_connected();
        {
            let mut status = lock(&self.status);
            if status.state == LinkState::Connected {
                if session_up {
                    return Ok(());
                }
                warn!("Link: session lost");
                status.state = LinkState::Disconnected;
            }
            let down_since = *status.first_failure_at.get_or_insert(now_ms);

            if now_ms.saturating_sub(down_since) > self.settings.watchdog_ceiling_ms {
                let first = !status.watchdog_fired;
                status.watchdog_fired = true;
                drop(status);
                if first {
                    error!(
                        "Link: down for more than {} s, restarting",
                        self.settings.watchdog_ceiling_ms / 1_000
                    );
                    self.restart.restart("link watchdog");
                }
                return Err(LinkError::WatchdogExpired);
            }

            if let Some(last) = status.last_attempt_at {
                if now_ms.saturating_sub(last) < self.settings.min_attempt_spacing_ms {
                    return Ok(());
                }
            }
            status.last_attempt_at = Some(now_ms);
            status.retry_count += 1;
            debug!("Link: connect attempt {}", status.retry_count);
        }
        self.connect();
        Ok(())
    }

    /// Fire-and-forget publish.  Returns whether the session accepted it;
    /// offline publishes are logged and dropped.
    pub fn publish(&self, topic: &str, payload: &str, qos: QoS) -> bool {
        self.publish_with(topic, payload, qos, false)
    }

    fn publish_with(&self, topic: &str, payload: &str, qos: QoS, retain: bool) -> bool {
        if self.state() != LinkState::Connected {
            debug!("Link: offline, dropped '{}'", topic);
            return false;
        }
        let result = lock(&self.session).publish(topic, payload.as_bytes(), qos, retain);
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Link: publish '{}' failed: {}", topic, e);
                false
            }
        }
    }

    /// Maintain the session and dispatch what arrived.
    pub fn poll(&self, now_ms: u64, registry: &Registry) -> Result<(), LinkError> {
        self.reconnect_tick(now_ms)?;
        if self.state() == LinkState::Connected {
            self.dispatch_pending(now_ms, registry);
        }
        Ok(())
    }

    /// Drain and dispatch inbound messages.  Returns how many counted as
    /// a liveness signal.
    pub fn dispatch_pending(&self, now_ms: u64, registry: &Registry) -> usize {
        let mut inbound = Vec::new();
        lock(&self.session).drain_inbound(&mut inbound);

        let alive = inbound.iter().filter(|msg| self.dispatch(msg, registry)).count();
        if alive > 0 {
            lock(&self.status).last_seen = Some(now_ms);
        }
        alive
    }

    /// Route one message.  Returns `true` if it counts as liveness.
    pub fn dispatch(&self, msg: &InboundMessage, registry: &Registry) -> bool {
        let Some(entity) = topic::entity(&self.settings.client_id, &msg.topic) else {
            debug!("Link: ignored topic '{}'", msg.topic);
            return false;
        };
        let payload = msg.payload.trim();

        if let Some(report) = topic::error_report(payload) {
            warn!("Link: '{}' reported: {}", entity, report);
            self.events.log_event(&format!("{entity}: {report}"));
            return true;
        }

        if entity == RESERVED_TOPIC {
            return self.handle_status(payload);
        }

        if let Some(circuit) = registry.find_circuit(entity) {
            return match ActuatorState::from_payload(payload) {
                Some(state) => {
                    circuit.force(state, true);
                    true
                }
                None => {
                    warn!("Link: unknown request '{}' for circuit '{}'", payload, entity);
                    false
                }
            };
        }

        if let Some(sensor) = registry.find_sensor(entity) {
            return match topic::parse_value(payload) {
                Ok(value) => {
                    sensor.push(value);
                    true
                }
                Err(e) if self.settings.reject_malformed => {
                    warn!("Link: {} for sensor '{}': '{}'", e, entity, payload);
                    false
                }
                Err(_) => {
                    debug!("Link: unparsable value '{}' for sensor '{}', using 0.0", payload, entity);
                    sensor.push(0.0);
                    true
                }
            };
        }

        debug!("Link: no entity named '{}'", entity);
        false
    }

    fn handle_status(&self, payload: &str) -> bool {
        if payload == self.settings.announce {
            // Our own retained announcement.
            return false;
        }
        match topic::classify_status(payload) {
            StatusText::SensorAlive => debug!("Link: sensor node alive"),
            StatusText::Uptime(uptime) => {
                info!("Link: peer uptime {}", uptime);
                self.events.log_event(&format!("peer uptime {uptime}"));
            }
            StatusText::Text(text) => self.events.log_event(text),
        }
        true
    }
}

/// Republishes sensor values and circuit states on their status topics.
impl<S: BusSession> ChangeSink for ConnectionManager<S> {
    fn on_value_changed(&self, sensor: &str, value: f32) {
        let topic = topic::value_topic(&self.settings.client_id, sensor);
        self.publish(&topic, &format!("{value:.1}"), QoS::AtMostOnce);
    }

    fn on_circuit_state_changed(&self, circuit: &str, state: ActuatorState) {
        let topic = topic::state_topic(&self.settings.client_id, circuit);
        self.publish_with(&topic, state.as_payload(), QoS::AtMostOnce, true);
    }
}
