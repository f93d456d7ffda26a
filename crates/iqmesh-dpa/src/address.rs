//! Device addressing in an IQMESH network.

use crate::error::{DpaError, Result};

/// Logical device address. 0 is the coordinator, 1..=239 are nodes.
pub type DeviceAddress = u8;

/// Coordinator address.
pub const COORDINATOR_ADDRESS: DeviceAddress = 0;

/// Highest address a bonded device can occupy.
pub const MAX_DEVICE_ADDRESS: DeviceAddress = 239;

/// Address used by a node that is not bonded yet.
pub const TEMPORARY_ADDRESS: DeviceAddress = 0xFE;

/// Broadcast address.
pub const BROADCAST_ADDRESS: DeviceAddress = 0xFF;

/// Number of addressable devices including the coordinator.
pub const MAX_DEVICES: usize = MAX_DEVICE_ADDRESS as usize + 1;

/// True for the coordinator and the bondable node range.
pub fn is_device_address(address: u16) -> bool {
    address <= u16::from(MAX_DEVICE_ADDRESS)
}

/// Narrow a raw address to a device address, rejecting the sentinels and
/// anything beyond 239.
pub fn device_address(address: u16) -> Result<DeviceAddress> {
    if is_device_address(address) {
        Ok(address as DeviceAddress)
    } else {
        Err(DpaError::InvalidAddress(address))
    }
}
