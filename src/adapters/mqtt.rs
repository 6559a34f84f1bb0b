//! MQTT bus session adapter.
//!
//! Implements [`BusSession`]: one broker session, no internal retry.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::mqtt::client`.  A fresh
//!   client is created per connect attempt; a receiver thread moves
//!   complete inbound messages into a bounded inbox.
//! - **all other targets**: an in-process [`SimBroker`] with scripted
//!   connect failures, dropped sessions and injectable inbound messages.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::app::ports::{BusSession, InboundMessage, QoS};
use crate::error::LinkError;
use crate::sync::lock;

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicBool, Ordering};
#[cfg(target_os = "espidf")]
use core::time::Duration;
#[cfg(target_os = "espidf")]
use esp_idf_svc::mqtt::client::{
    Details, EspMqttClient, EventPayload, MqttClientConfiguration, QoS as EspQoS,
};
#[cfg(target_os = "espidf")]
use log::info;

/// Inbound messages held between two drains.
const MAX_INBOX: usize = 32;

fn enqueue(inbox: &Mutex<VecDeque<InboundMessage>>, msg: InboundMessage) {
    let mut inbox = lock(inbox);
    if inbox.len() >= MAX_INBOX {
        if let Some(dropped) = inbox.pop_front() {
            warn!("MQTT: inbox full, dropped message on '{}'", dropped.topic);
        }
    }
    inbox.push_back(msg);
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF session
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct MqttSession {
    url: String,
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
    inbox: Arc<Mutex<VecDeque<InboundMessage>>>,
}

#[cfg(target_os = "espidf")]
impl MqttSession {
    /// `url` like `mqtt://fcce.local:1883`.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            inbox: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    fn spawn_receiver(&self, mut conn: esp_idf_svc::mqtt::client::EspMqttConnection) -> Result<(), LinkError> {
        let connected = self.connected.clone();
        let inbox = self.inbox.clone();
        std::thread::Builder::new()
            .name("mqtt-rx".into())
            .stack_size(6 * 1024)
            .spawn(move || {
                // Ends once the owning client is dropped.
                while let Ok(event) = conn.next() {
                    match event.payload() {
                        EventPayload::Connected(_) => connected.store(true, Ordering::Release),
                        EventPayload::Disconnected => connected.store(false, Ordering::Release),
                        EventPayload::Received {
                            topic: Some(topic),
                            data,
                            details: Details::Complete,
                            ..
                        } => match core::str::from_utf8(data) {
                            Ok(payload) => enqueue(&inbox, InboundMessage::new(topic, payload)),
                            Err(_) => warn!("MQTT: non-UTF-8 payload on '{}' dropped", topic),
                        },
                        _ => {}
                    }
                }
                connected.store(false, Ordering::Release);
            })
            .map(|_| ())
            .map_err(|e| {
                warn!("MQTT: receiver thread spawn failed: {e}");
                LinkError::ConnectFailed
            })
    }
}

#[cfg(target_os = "espidf")]
fn esp_qos(qos: QoS) -> EspQoS {
    match qos {
        QoS::AtMostOnce => EspQoS::AtMostOnce,
        QoS::AtLeastOnce => EspQoS::AtLeastOnce,
        QoS::ExactlyOnce => EspQoS::ExactlyOnce,
    }
}

#[cfg(target_os = "espidf")]
impl BusSession for MqttSession {
    fn connect(&mut self, client_id: &str, timeout: Duration) -> Result<(), LinkError> {
        self.client = None;
        self.connected.store(false, Ordering::Release);

        let conf = MqttClientConfiguration {
            client_id: Some(client_id),
            ..Default::default()
        };
        let (client, conn) = EspMqttClient::new(&self.url, &conf).map_err(|e| {
            warn!("MQTT: client init failed: {e:?}");
            LinkError::ConnectFailed
        })?;
        self.spawn_receiver(conn)?;
        self.client = Some(client);

        let deadline = std::time::Instant::now() + timeout;
        while !self.connected.load(Ordering::Acquire) {
            if std::time::Instant::now() >= deadline {
                self.client = None;
                return Err(LinkError::ConnectFailed);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        info!("MQTT: connected to {}", self.url);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.client = None;
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::Acquire)
    }

    fn subscribe(&mut self, pattern: &str, qos: QoS) -> Result<(), LinkError> {
        let client = self.client.as_mut().ok_or(LinkError::Disconnected)?;
        client
            .subscribe(pattern, esp_qos(qos))
            .map(|_| ())
            .map_err(|_| LinkError::SubscribeFailed)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), LinkError> {
        let client = self.client.as_mut().ok_or(LinkError::Disconnected)?;
        client
            .enqueue(topic, esp_qos(qos), retain, payload)
            .map(|_| ())
            .map_err(|_| LinkError::PublishFailed)
    }

    fn drain_inbound(&mut self, out: &mut Vec<InboundMessage>) {
        out.extend(lock(&self.inbox).drain(..));
    }
}

// ───────────────────────────────────────────────────────────────
// Host simulation
// ───────────────────────────────────────────────────────────────

/// A message the simulated broker accepted.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[cfg(not(target_os = "espidf"))]
struct SimBus {
    reachable: bool,
    refuse_next: u32,
    connected: bool,
    connect_attempts: u32,
    client_id: Option<String>,
    subscriptions: Vec<String>,
    published: Vec<Published>,
    inbox: Mutex<VecDeque<InboundMessage>>,
}

/// Test/simulator handle on the broker behind a host [`MqttSession`].
#[cfg(not(target_os = "espidf"))]
#[derive(Clone)]
pub struct SimBroker {
    bus: Arc<Mutex<SimBus>>,
}

#[cfg(not(target_os = "espidf"))]
impl Default for SimBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl SimBroker {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(Mutex::new(SimBus {
                reachable: true,
                refuse_next: 0,
                connected: false,
                connect_attempts: 0,
                client_id: None,
                subscriptions: Vec::new(),
                published: Vec::new(),
                inbox: Mutex::new(VecDeque::new()),
            })),
        }
    }

    /// While unreachable every connect attempt fails.
    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.bus).reachable = reachable;
    }

    /// Fail the next `n` connect attempts.
    pub fn refuse_next(&self, n: u32) {
        lock(&self.bus).refuse_next = n;
    }

    /// Drop the current session as a network failure would.
    pub fn drop_connection(&self) {
        let mut bus = lock(&self.bus);
        bus.connected = false;
        bus.subscriptions.clear();
    }

    /// Queue a message for the client, as if published by a peer.
    /// Ignored while no session is up.
    pub fn inject(&self, topic: &str, payload: &str) {
        let bus = lock(&self.bus);
        if bus.connected {
            enqueue(&bus.inbox, InboundMessage::new(topic, payload));
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.bus).connected
    }

    pub fn connect_attempts(&self) -> u32 {
        lock(&self.bus).connect_attempts
    }

    pub fn client_id(&self) -> Option<String> {
        lock(&self.bus).client_id.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.bus).subscriptions.clone()
    }

    pub fn published(&self) -> Vec<Published> {
        lock(&self.bus).published.clone()
    }

    /// Most recent payload published on `topic`.
    pub fn last_on(&self, topic: &str) -> Option<String> {
        lock(&self.bus)
            .published
            .iter()
            .rev()
            .find(|p| p.topic == topic)
            .map(|p| p.payload.clone())
    }

    pub fn clear_published(&self) {
        lock(&self.bus).published.clear();
    }
}

#[cfg(not(target_os = "espidf"))]
pub struct MqttSession {
    url: String,
    broker: SimBroker,
}

#[cfg(not(target_os = "espidf"))]
impl MqttSession {
    pub fn new(url: &str) -> Self {
        Self::with_broker(url, SimBroker::new())
    }

    pub fn with_broker(url: &str, broker: SimBroker) -> Self {
        Self {
            url: url.to_owned(),
            broker,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn broker(&self) -> SimBroker {
        self.broker.clone()
    }
}

#[cfg(not(target_os = "espidf"))]
impl BusSession for MqttSession {
    fn connect(&mut self, client_id: &str, _timeout: core::time::Duration) -> Result<(), LinkError> {
        let mut bus = lock(&self.broker.bus);
        bus.connect_attempts += 1;
        if !bus.reachable {
            return Err(LinkError::ConnectFailed);
        }
        if bus.refuse_next > 0 {
            bus.refuse_next -= 1;
            return Err(LinkError::ConnectFailed);
        }
        bus.connected = true;
        bus.client_id = Some(client_id.to_owned());
        bus.subscriptions.clear();
        Ok(())
    }

    fn disconnect(&mut self) {
        lock(&self.broker.bus).connected = false;
    }

    fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    fn subscribe(&mut self, pattern: &str, _qos: QoS) -> Result<(), LinkError> {
        let mut bus = lock(&self.broker.bus);
        if !bus.connected {
            return Err(LinkError::Disconnected);
        }
        if !bus.subscriptions.iter().any(|s| s == pattern) {
            bus.subscriptions.push(pattern.to_owned());
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], _qos: QoS, retain: bool) -> Result<(), LinkError> {
        let mut bus = lock(&self.broker.bus);
        if !bus.connected {
            return Err(LinkError::Disconnected);
        }
        bus.published.push(Published {
            topic: topic.to_owned(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
        });
        Ok(())
    }

    fn drain_inbound(&mut self, out: &mut Vec<InboundMessage>) {
        let bus = lock(&self.broker.bus);
        out.extend(lock(&bus.inbox).drain(..));
    }
}
