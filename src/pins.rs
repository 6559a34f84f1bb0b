//! GPIO / peripheral pin assignments for the Terrarium controller board.
//!
//! Single source of truth: the default configuration and the firmware
//! entry point reference this module rather than hard-coding pin numbers.

// ---------------------------------------------------------------------------
// DHT22 temperature / humidity probes (single-wire, open drain)
// ---------------------------------------------------------------------------

/// Probe mounted on the rock face ("Berg").
pub const DHT_BERG_GPIO: i32 = 17;
/// Probe buried near the substrate ("Erde").
pub const DHT_ERDE_GPIO: i32 = 13;

// ---------------------------------------------------------------------------
// Relay board outputs (active HIGH unless noted)
// ---------------------------------------------------------------------------

/// Day/night light timer relay.
pub const RELAY_TIMER_GPIO: i32 = 27;
/// Infrared heater relay.
pub const RELAY_INFRARED_GPIO: i32 = 12;
/// Fan relay. Wired active LOW.
pub const RELAY_FAN_GPIO: i32 = 16;
/// Fogger relay.
pub const RELAY_FOG_GPIO: i32 = 32;
/// Unassigned relay channels.
pub const RELAY_SPARE1_GPIO: i32 = 26;
pub const RELAY_SPARE2_GPIO: i32 = 25;

// ---------------------------------------------------------------------------
// PWM configuration (proportional outputs on spare channels)
// ---------------------------------------------------------------------------

/// LEDC timer resolution (bits).  8-bit gives 0 – 255 duty levels.
pub const PWM_RESOLUTION_BITS: u32 = 8;
/// LEDC base frequency for proportional actuators (1 kHz).
pub const PWM_FREQ_HZ: u32 = 1_000;
