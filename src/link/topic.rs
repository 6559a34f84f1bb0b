//! Topic convention: `<client-id>/<entity>`.
//!
//! Only single-segment entities are routed.  Status republished by this
//! device lives one level deeper (`<id>/<entity>/state`, `<id>/<entity>/value`)
//! so it never loops back into dispatch.

use crate::error::LinkError;

/// Leading marker of an error report payload.
pub const ERROR_MARKER: char = '!';
/// Status marker: the remote sensor node is alive.
pub const SENSOR_ALIVE: &str = "/sensor-alive";
/// Status marker: remote uptime report, display only.
pub const UPTIME: &str = "/uptime";

/// Routing key of `topic`, if it belongs to `client_id`.  A single leading
/// `/` is tolerated.
pub fn entity<'a>(client_id: &str, topic: &'a str) -> Option<&'a str> {
    let topic = topic.strip_prefix('/').unwrap_or(topic);
    let rest = topic.strip_prefix(client_id)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest)
}

pub fn entity_topic(client_id: &str, entity: &str) -> String {
    format!("{client_id}/{entity}")
}

pub fn state_topic(client_id: &str, circuit: &str) -> String {
    format!("{client_id}/{circuit}/state")
}

pub fn value_topic(client_id: &str, sensor: &str) -> String {
    format!("{client_id}/{sensor}/value")
}

/// Error report text, if `payload` carries the error marker.
pub fn error_report(payload: &str) -> Option<&str> {
    payload.trim_start().strip_prefix(ERROR_MARKER).map(str::trim)
}

/// Parse a sensor update.
pub fn parse_value(payload: &str) -> Result<f32, LinkError> {
    payload.trim().parse::<f32>().map_err(|_| LinkError::MalformedPayload)
}

/// Free-text strings carried on the `config` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusText<'a> {
    SensorAlive,
    Uptime(&'a str),
    Text(&'a str),
}

pub fn classify_status(payload: &str) -> StatusText<'_> {
    let payload = payload.trim();
    if payload.starts_with(SENSOR_ALIVE) {
        StatusText::SensorAlive
    } else if let Some(rest) = payload.strip_prefix(UPTIME) {
        StatusText::Uptime(rest.trim())
    } else {
        StatusText::Text(payload)
    }
}
