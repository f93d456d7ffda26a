//! Testing utilities for IQMESH network operations
//!
//! This crate provides:
//! - A simulated coordinator and node population behind a DPA channel
//! - Fault injection for transport, device and FRC failures
//! - Canned networks for common scenarios

pub mod network_simulator;
pub mod scenarios;

pub use network_simulator::{
    NetworkSpec, SimulatedNetwork, SimulatedNode, CONFIGURATION_LEN, MID_SLOT_LEN, MID_TABLE_BASE,
};
pub use scenarios::{mid_for, sequential_network, small_network};
