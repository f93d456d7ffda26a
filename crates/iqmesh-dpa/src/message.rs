//! DPA frames.
//!
//! Request layout: `NADR:u16le PNUM PCMD HWPID:u16le PDATA...`.
//! Responses carry the same header with PCMD's top bit set, followed by
//! `ResponseCode DpaValue` and the response payload.

use crate::address::{DeviceAddress, BROADCAST_ADDRESS, COORDINATOR_ADDRESS};
use crate::error::{DpaError, Result};

/// HWPID value matching every hardware profile.
pub const HWPID_DO_NOT_CHECK: u16 = 0xFFFF;

/// Maximum request payload.
pub const MAX_PDATA_LEN: usize = 58;

pub const REQUEST_HEADER_LEN: usize = 6;
pub const RESPONSE_HEADER_LEN: usize = 8;

/// Response PCMD flag.
pub const RESPONSE_FLAG: u8 = 0x80;

/// Peripheral numbers.
pub mod pnum {
    pub const COORDINATOR: u8 = 0x00;
    pub const NODE: u8 = 0x01;
    pub const OS: u8 = 0x02;
    pub const EEEPROM: u8 = 0x04;
    pub const FRC: u8 = 0x0D;
    pub const ENUMERATION: u8 = 0xFF;
}

/// Peripheral commands, grouped by peripheral.
pub mod cmd {
    pub mod coordinator {
        pub const BONDED_DEVICES: u8 = 0x02;
        pub const RESTORE: u8 = 0x0C;
        pub const SET_MID: u8 = 0x13;
    }

    pub mod node {
        pub const RESTORE: u8 = 0x07;
        pub const VALIDATE_BONDS: u8 = 0x08;
    }

    pub mod os {
        pub const READ: u8 = 0x00;
        pub const RESET: u8 = 0x01;
        pub const READ_CFG: u8 = 0x02;
        pub const RESTART: u8 = 0x08;
        pub const TEST_RF_SIGNAL: u8 = 0x0C;
    }

    pub mod eeeprom {
        pub const XREAD: u8 = 0x02;
    }

    pub mod frc {
        pub const SEND: u8 = 0x00;
        pub const EXTRA_RESULT: u8 = 0x01;
        pub const SEND_SELECTIVE: u8 = 0x02;
        pub const SET_PARAMS: u8 = 0x03;
    }

    pub mod enumeration {
        pub const GET_PER_INFO: u8 = 0x3F;
    }
}

/// Outgoing DPA request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpaRequest {
    /// Target network address
    pub nadr: u16,
    /// Peripheral number
    pub pnum: u8,
    /// Peripheral command
    pub pcmd: u8,
    /// Hardware profile filter
    pub hwpid: u16,
    /// Command payload
    pub pdata: Vec<u8>,
}

impl DpaRequest {
    /// Create a request that matches any hardware profile.
    pub fn new(nadr: impl Into<u16>, pnum: u8, pcmd: u8) -> Self {
        Self {
            nadr: nadr.into(),
            pnum,
            pcmd,
            hwpid: HWPID_DO_NOT_CHECK,
            pdata: Vec::new(),
        }
    }

    /// Request addressed to the coordinator.
    pub fn coordinator(pnum: u8, pcmd: u8) -> Self {
        Self::new(COORDINATOR_ADDRESS, pnum, pcmd)
    }

    /// Request addressed to every node.
    pub fn broadcast(pnum: u8, pcmd: u8) -> Self {
        Self::new(BROADCAST_ADDRESS, pnum, pcmd)
    }

    pub fn with_hwpid(mut self, hwpid: u16) -> Self {
        self.hwpid = hwpid;
        self
    }

    pub fn with_pdata(mut self, pdata: impl Into<Vec<u8>>) -> Self {
        self.pdata = pdata.into();
        self
    }

    pub fn is_coordinator(&self) -> bool {
        self.nadr == u16::from(COORDINATOR_ADDRESS)
    }

    /// FRC send or selective send, whose timing depends on the FRC response time.
    pub fn is_frc_send(&self) -> bool {
        self.pnum == pnum::FRC && matches!(self.pcmd, cmd::frc::SEND | cmd::frc::SEND_SELECTIVE)
    }

    /// Target as a device address, if it is one.
    pub fn device_address(&self) -> Option<DeviceAddress> {
        DeviceAddress::try_from(self.nadr).ok()
    }

    pub fn validate(&self) -> Result<()> {
        if self.pdata.len() > MAX_PDATA_LEN {
            return Err(DpaError::InvalidRequest(format!(
                "payload of {} bytes exceeds {} bytes",
                self.pdata.len(),
                MAX_PDATA_LEN
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REQUEST_HEADER_LEN + self.pdata.len());
        buf.extend_from_slice(&self.nadr.to_le_bytes());
        buf.push(self.pnum);
        buf.push(self.pcmd);
        buf.extend_from_slice(&self.hwpid.to_le_bytes());
        buf.extend_from_slice(&self.pdata);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < REQUEST_HEADER_LEN {
            return Err(DpaError::InvalidRequest(format!(
                "request frame of {} bytes is shorter than the header",
                bytes.len()
            )));
        }
        Ok(Self {
            nadr: u16::from_le_bytes([bytes[0], bytes[1]]),
            pnum: bytes[2],
            pcmd: bytes[3],
            hwpid: u16::from_le_bytes([bytes[4], bytes[5]]),
            pdata: bytes[REQUEST_HEADER_LEN..].to_vec(),
        })
    }
}

/// Incoming DPA response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpaResponse {
    pub nadr: u16,
    pub pnum: u8,
    /// Request PCMD with [`RESPONSE_FLAG`] set
    pub pcmd: u8,
    pub hwpid: u16,
    /// 0 on success
    pub response_code: u8,
    pub dpa_value: u8,
    pub pdata: Vec<u8>,
}

impl DpaResponse {
    /// Successful response to `request`.
    pub fn ok(request: &DpaRequest, pdata: impl Into<Vec<u8>>) -> Self {
        Self::with_code(request, 0, pdata)
    }

    pub fn with_code(request: &DpaRequest, response_code: u8, pdata: impl Into<Vec<u8>>) -> Self {
        Self {
            nadr: request.nadr,
            pnum: request.pnum,
            pcmd: request.pcmd | RESPONSE_FLAG,
            hwpid: request.hwpid,
            response_code,
            dpa_value: 0,
            pdata: pdata.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.response_code == 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RESPONSE_HEADER_LEN + self.pdata.len());
        buf.extend_from_slice(&self.nadr.to_le_bytes());
        buf.push(self.pnum);
        buf.push(self.pcmd);
        buf.extend_from_slice(&self.hwpid.to_le_bytes());
        buf.push(self.response_code);
        buf.push(self.dpa_value);
        buf.extend_from_slice(&self.pdata);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RESPONSE_HEADER_LEN {
            return Err(DpaError::BadResponse(format!(
                "response frame of {} bytes is shorter than the header",
                bytes.len()
            )));
        }
        Ok(Self {
            nadr: u16::from_le_bytes([bytes[0], bytes[1]]),
            pnum: bytes[2],
            pcmd: bytes[3],
            hwpid: u16::from_le_bytes([bytes[4], bytes[5]]),
            response_code: bytes[6],
            dpa_value: bytes[7],
            pdata: bytes[RESPONSE_HEADER_LEN..].to_vec(),
        })
    }

    /// Payload slice, or a decode error naming what was expected.
    pub fn pdata_range(&self, start: usize, len: usize, what: &str) -> Result<&[u8]> {
        self.pdata.get(start..start + len).ok_or_else(|| {
            DpaError::BadResponse(format!(
                "{} needs {} bytes at offset {}, payload has {}",
                what,
                len,
                start,
                self.pdata.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let request = DpaRequest::new(0x0102u16, pnum::OS, cmd::os::READ)
            .with_hwpid(0xABCD)
            .with_pdata(vec![7]);
        assert_eq!(request.to_bytes(), vec![0x02, 0x01, 0x02, 0x00, 0xCD, 0xAB, 7]);
        assert_eq!(DpaRequest::from_bytes(&request.to_bytes()).unwrap(), request);
    }

    #[test]
    fn test_response_header() {
        let request = DpaRequest::coordinator(pnum::COORDINATOR, cmd::coordinator::BONDED_DEVICES);
        let response = DpaResponse::ok(&request, vec![1, 2]);
        let bytes = response.to_bytes();
        assert_eq!(bytes[3], cmd::coordinator::BONDED_DEVICES | RESPONSE_FLAG);
        assert_eq!(bytes.len(), RESPONSE_HEADER_LEN + 2);
        assert!(DpaResponse::from_bytes(&bytes[..5]).is_err());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let request = DpaRequest::coordinator(pnum::OS, cmd::os::READ).with_pdata(vec![0; 59]);
        assert!(request.validate().is_err());
    }
}
