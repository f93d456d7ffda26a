//! Bitmap address codec.
//!
//! The coordinator reports bonded devices and FRC bit results as a 30-byte
//! bitmap where bit `i % 8` of byte `i / 8` stands for address `i`. The
//! same layout selects nodes for selective FRC.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{DeviceAddress, MAX_DEVICE_ADDRESS};
use crate::error::{DpaError, Result};

/// Length of an address bitmap in bytes.
pub const BITMAP_LEN: usize = 30;

/// Set of device addresses encoded as a 240-bit bitmap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NodeBitmap([u8; BITMAP_LEN]);

impl NodeBitmap {
    /// Empty bitmap.
    pub const fn new() -> Self {
        Self([0; BITMAP_LEN])
    }

    /// Wrap raw bitmap bytes.
    pub const fn from_bytes(bytes: [u8; BITMAP_LEN]) -> Self {
        Self(bytes)
    }

    /// Take the leading 30 bytes of a response payload.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let head = bytes.get(..BITMAP_LEN).ok_or_else(|| {
            DpaError::BadResponse(format!(
                "bitmap needs {} bytes, got {}",
                BITMAP_LEN,
                bytes.len()
            ))
        })?;
        let mut raw = [0u8; BITMAP_LEN];
        raw.copy_from_slice(head);
        Ok(Self(raw))
    }

    /// Build a bitmap from an address list.
    pub fn from_addresses(addresses: &[DeviceAddress]) -> Result<Self> {
        encode(addresses).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; BITMAP_LEN] {
        &self.0
    }

    pub fn contains(&self, address: DeviceAddress) -> bool {
        address <= MAX_DEVICE_ADDRESS
            && self.0[usize::from(address / 8)] & (1 << (address % 8)) != 0
    }

    pub fn insert(&mut self, address: DeviceAddress) -> Result<()> {
        if address > MAX_DEVICE_ADDRESS {
            return Err(DpaError::InvalidAddress(u16::from(address)));
        }
        self.0[usize::from(address / 8)] |= 1 << (address % 8);
        Ok(())
    }

    pub fn remove(&mut self, address: DeviceAddress) {
        if address <= MAX_DEVICE_ADDRESS {
            self.0[usize::from(address / 8)] &= !(1 << (address % 8));
        }
    }

    /// Addresses present, ascending.
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        decode(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for NodeBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeBitmap").field(&self.addresses()).finish()
    }
}

/// Decode a bitmap into an ascending address list.
pub fn decode(bitmap: &[u8; BITMAP_LEN]) -> Vec<DeviceAddress> {
    let mut addresses = Vec::new();
    for (byte_index, byte) in bitmap.iter().enumerate() {
        if *byte == 0 {
            continue;
        }
        for bit in 0..8u8 {
            if byte & (1 << bit) != 0 {
                addresses.push(byte_index as u8 * 8 + bit);
            }
        }
    }
    addresses
}

/// Encode an address list. Duplicates collapse; addresses above 239 are
/// rejected.
pub fn encode(addresses: &[DeviceAddress]) -> Result<[u8; BITMAP_LEN]> {
    let mut bitmap = [0u8; BITMAP_LEN];
    for &address in addresses {
        if address > MAX_DEVICE_ADDRESS {
            return Err(DpaError::InvalidAddress(u16::from(address)));
        }
        bitmap[usize::from(address / 8)] |= 1 << (address % 8);
    }
    Ok(bitmap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_layout() {
        let bitmap = encode(&[0, 9, 239]).unwrap();
        assert_eq!(bitmap[0], 0b0000_0001);
        assert_eq!(bitmap[1], 0b0000_0010);
        assert_eq!(bitmap[29], 0b1000_0000);
    }

    #[test]
    fn test_encode_rejects_sentinels() {
        assert!(encode(&[1, 254]).is_err());
        assert!(encode(&[255]).is_err());
    }

    #[test]
    fn test_insert_and_contains() {
        let mut bitmap = NodeBitmap::new();
        bitmap.insert(17).unwrap();
        assert!(bitmap.contains(17));
        assert!(!bitmap.contains(16));
        assert!(!bitmap.contains(255));
        bitmap.remove(17);
        assert!(bitmap.is_empty());
    }
}
