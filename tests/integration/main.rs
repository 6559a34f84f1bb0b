//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against simulated hardware, a simulated broker and a manual clock.
//! All tests run on the host with no real hardware required.
#![cfg(not(target_os = "espidf"))]

mod circuit_scenarios;
mod controller_tests;
mod link_tests;
mod mock_hw;
