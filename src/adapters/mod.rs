//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements         | Connects to                  |
//! |------------|--------------------|------------------------------|
//! | `hardware` | HardwarePort       | DHT22 GPIOs, relays, LEDC    |
//! | `log_sink` | ChangeSink         | Serial log output            |
//! | `mqtt`     | BusSession         | ESP-IDF MQTT client / sim    |
//! | `nvs`      | ConfigPort         | NVS / in-memory store        |
//! | `time`     | Clock              | esp_timer + SNTP wall clock  |
//! | `wifi`     | (bootstrap)        | ESP-IDF WiFi STA             |

pub mod hardware;
pub mod log_sink;
pub mod mqtt;
pub mod nvs;
pub mod time;
pub mod wifi;
