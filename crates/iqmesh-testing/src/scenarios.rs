//! Canned networks.

use crate::network_simulator::{NetworkSpec, SimulatedNode};

/// Deterministic MID for a node address.
pub fn mid_for(address: u8) -> u32 {
    0x8110_0000 | u32::from(address)
}

/// Nodes 1, 2 and 5 with node 2 offline.
pub fn small_network() -> NetworkSpec {
    NetworkSpec::default().with_nodes([
        SimulatedNode::new(1, mid_for(1)),
        SimulatedNode::new(2, mid_for(2)).offline(),
        SimulatedNode::new(5, mid_for(5)),
    ])
}

/// `count` online nodes at addresses 1..=count, each counting
/// `address % 50` packets in an RF test.
pub fn sequential_network(count: u8) -> NetworkSpec {
    NetworkSpec::default().with_nodes(
        (1..=count).map(|address| SimulatedNode::new(address, mid_for(address)).with_rf_counter(address % 50)),
    )
}
