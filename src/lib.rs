//! Terrarium controller firmware library.
//!
//! Exposes the control core, its adapters and drivers for integration
//! testing and host simulation.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod link;
pub mod pins;
pub mod scheduler;
pub mod sensors;

mod sync;
