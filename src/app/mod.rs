//! Application core: the controller and its port boundary.
//!
//! The domain layers (sensors, circuits, link) are wired together here.
//! All interaction with hardware happens through **port traits** defined
//! in [`ports`], keeping this layer fully testable without real peripherals.

pub mod commands;
pub mod context;
pub mod ports;
pub mod service;
