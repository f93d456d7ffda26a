//! Fast Response Command frames.
//!
//! FRC lets the coordinator collect one small result from many nodes in a
//! single transaction:
//! - `CMD_FRC_SEND` reaches every node
//! - `CMD_FRC_SEND_SELECTIVE` reaches the nodes set in a bitmap
//! - `CMD_FRC_EXTRARESULT` fetches the 9 bytes that do not fit inline
//! - `CMD_FRC_SET_PARAMS` changes the device-global response time

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bitmap::{NodeBitmap, BITMAP_LEN};
use crate::error::{DpaError, Result};
use crate::message::{cmd, pnum, DpaRequest, DpaResponse};

/// Inline FRC data returned after the status byte.
pub const FRC_DATA_LEN: usize = 55;

/// Continuation returned by `CMD_FRC_EXTRARESULT`.
pub const FRC_EXTRA_RESULT_LEN: usize = 9;

/// Largest status byte that still means success.
pub const MAX_FRC_STATUS_OK: u8 = 0xEF;

/// User data carried by one FRC request.
pub const MAX_USER_DATA_LEN: usize = 25;

/// Response time bits of the FRC parameters byte.
pub const RESPONSE_TIME_MASK: u8 = 0x70;

/// Offline FRC flag of the FRC parameters byte.
pub const OFFLINE_FRC_MASK: u8 = 0x08;

/// FRC command codes.
pub mod command {
    pub const PING: u8 = 0x00;
    pub const ACKNOWLEDGED_BROADCAST_BITS: u8 = 0x02;
    pub const FRC_RESPONSE_TIME: u8 = 0x84;
    pub const TEST_RF_SIGNAL: u8 = 0x85;
    pub const MEMORY_READ_4B: u8 = 0xF8;
}

/// Answer of a node whose application does not handle the FRC response
/// time event.
pub const FRC_RESPONSE_TIME_UNHANDLED: u8 = 0xFF;

/// Time the coordinator waits for node answers during one FRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FrcResponseTime {
    #[default]
    Ms40,
    Ms360,
    Ms680,
    Ms1320,
    Ms2600,
    Ms5160,
    Ms10280,
    Ms20620,
}

impl FrcResponseTime {
    pub const ALL: [FrcResponseTime; 8] = [
        FrcResponseTime::Ms40,
        FrcResponseTime::Ms360,
        FrcResponseTime::Ms680,
        FrcResponseTime::Ms1320,
        FrcResponseTime::Ms2600,
        FrcResponseTime::Ms5160,
        FrcResponseTime::Ms10280,
        FrcResponseTime::Ms20620,
    ];

    /// Value stored in the FRC parameters byte.
    pub fn as_byte(self) -> u8 {
        match self {
            FrcResponseTime::Ms40 => 0x00,
            FrcResponseTime::Ms360 => 0x10,
            FrcResponseTime::Ms680 => 0x20,
            FrcResponseTime::Ms1320 => 0x30,
            FrcResponseTime::Ms2600 => 0x40,
            FrcResponseTime::Ms5160 => 0x50,
            FrcResponseTime::Ms10280 => 0x60,
            FrcResponseTime::Ms20620 => 0x70,
        }
    }

    /// Decode the response time bits of an FRC parameters byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte & RESPONSE_TIME_MASK {
            0x10 => FrcResponseTime::Ms360,
            0x20 => FrcResponseTime::Ms680,
            0x30 => FrcResponseTime::Ms1320,
            0x40 => FrcResponseTime::Ms2600,
            0x50 => FrcResponseTime::Ms5160,
            0x60 => FrcResponseTime::Ms10280,
            0x70 => FrcResponseTime::Ms20620,
            _ => FrcResponseTime::Ms40,
        }
    }

    pub fn as_millis(self) -> u32 {
        match self {
            FrcResponseTime::Ms40 => 40,
            FrcResponseTime::Ms360 => 360,
            FrcResponseTime::Ms680 => 680,
            FrcResponseTime::Ms1320 => 1320,
            FrcResponseTime::Ms2600 => 2600,
            FrcResponseTime::Ms5160 => 5160,
            FrcResponseTime::Ms10280 => 10280,
            FrcResponseTime::Ms20620 => 20620,
        }
    }

    /// Exact match on one of the supported windows.
    pub fn from_millis(millis: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_millis() == millis)
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_millis(u64::from(self.as_millis()))
    }
}

/// FRC send request, plain or selective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrcRequest {
    pub command: u8,
    /// Selection for `CMD_FRC_SEND_SELECTIVE`; `None` sends to every node
    pub selected_nodes: Option<NodeBitmap>,
    pub user_data: Vec<u8>,
}

impl FrcRequest {
    pub fn broadcast(command: u8, user_data: impl Into<Vec<u8>>) -> Result<Self> {
        Self::build(command, None, user_data.into())
    }

    pub fn selective(
        command: u8,
        selected_nodes: NodeBitmap,
        user_data: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        Self::build(command, Some(selected_nodes), user_data.into())
    }

    fn build(command: u8, selected_nodes: Option<NodeBitmap>, user_data: Vec<u8>) -> Result<Self> {
        if user_data.len() > MAX_USER_DATA_LEN {
            return Err(DpaError::InvalidRequest(format!(
                "FRC user data of {} bytes exceeds {} bytes",
                user_data.len(),
                MAX_USER_DATA_LEN
            )));
        }
        Ok(Self {
            command,
            selected_nodes,
            user_data,
        })
    }

    /// Coordinator-addressed DPA request carrying this FRC.
    pub fn to_dpa_request(&self, hwpid: u16) -> DpaRequest {
        let mut pdata = Vec::with_capacity(1 + BITMAP_LEN + self.user_data.len());
        pdata.push(self.command);
        let pcmd = match &self.selected_nodes {
            Some(nodes) => {
                pdata.extend_from_slice(nodes.as_bytes());
                cmd::frc::SEND_SELECTIVE
            }
            None => cmd::frc::SEND,
        };
        pdata.extend_from_slice(&self.user_data);
        DpaRequest::coordinator(pnum::FRC, pcmd)
            .with_hwpid(hwpid)
            .with_pdata(pdata)
    }
}

/// Decoded FRC send response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrcResponse {
    /// Number of answering nodes, or an error code above 0xEF
    pub status: u8,
    pub data: Vec<u8>,
}

impl FrcResponse {
    pub fn from_dpa(response: &DpaResponse) -> Result<Self> {
        let (status, data) = response
            .pdata
            .split_first()
            .ok_or_else(|| DpaError::BadResponse("FRC response without status".into()))?;
        Ok(Self {
            status: *status,
            data: data.to_vec(),
        })
    }

    /// Decode and reject FRC-level failures.
    pub fn checked(response: &DpaResponse) -> Result<Self> {
        let frc = Self::from_dpa(response)?;
        if frc.status > MAX_FRC_STATUS_OK {
            return Err(DpaError::FrcStatus(frc.status));
        }
        Ok(frc)
    }

    /// The leading 30 data bytes read as a per-address bitmap.
    pub fn bitmap(&self) -> Result<NodeBitmap> {
        NodeBitmap::from_slice(&self.data)
    }
}

/// `CMD_FRC_SET_PARAMS` with only the response time bits set.
pub fn set_params_request(time: FrcResponseTime) -> DpaRequest {
    set_raw_params_request(time.as_byte())
}

/// `CMD_FRC_SET_PARAMS` carrying a whole parameters byte; the response
/// carries the previous byte.
pub fn set_raw_params_request(params: u8) -> DpaRequest {
    DpaRequest::coordinator(pnum::FRC, cmd::frc::SET_PARAMS).with_pdata(vec![params])
}

/// `params` with its response time bits replaced by `time`.
pub fn params_with_response_time(params: u8, time: FrcResponseTime) -> u8 {
    (params & !RESPONSE_TIME_MASK) | time.as_byte()
}

/// `CMD_FRC_EXTRARESULT`, parameterless.
pub fn extra_result_request() -> DpaRequest {
    DpaRequest::coordinator(pnum::FRC, cmd::frc::EXTRA_RESULT)
}

/// Previous parameters byte reported by a `CMD_FRC_SET_PARAMS` response.
pub fn previous_params(response: &DpaResponse) -> Result<u8> {
    Ok(response.pdata_range(0, 1, "FRC parameters")?[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_time_bytes() {
        for time in FrcResponseTime::ALL {
            assert_eq!(FrcResponseTime::from_byte(time.as_byte()), time);
            assert_eq!(FrcResponseTime::from_millis(time.as_millis()), Some(time));
        }
        assert_eq!(FrcResponseTime::from_millis(100), None);
    }

    #[test]
    fn test_params_keep_flags() {
        let params = OFFLINE_FRC_MASK | FrcResponseTime::Ms360.as_byte();
        assert_eq!(FrcResponseTime::from_byte(params), FrcResponseTime::Ms360);
        assert_eq!(
            params_with_response_time(params, FrcResponseTime::Ms40),
            OFFLINE_FRC_MASK
        );
        assert_eq!(
            params_with_response_time(0x8F, FrcResponseTime::Ms2600),
            0xCF
        );
    }

    #[test]
    fn test_selective_frame() {
        let nodes = NodeBitmap::from_addresses(&[1, 2]).unwrap();
        let request = FrcRequest::selective(command::TEST_RF_SIGNAL, nodes, vec![52, 5])
            .unwrap()
            .to_dpa_request(0xFFFF);
        assert_eq!(request.pcmd, cmd::frc::SEND_SELECTIVE);
        assert_eq!(request.pdata.len(), 1 + BITMAP_LEN + 2);
        assert_eq!(request.pdata[1], 0b0000_0110);
    }

    #[test]
    fn test_user_data_limit() {
        assert!(FrcRequest::broadcast(command::PING, vec![0; 26]).is_err());
    }

    #[test]
    fn test_bad_status() {
        let request = extra_result_request();
        let response = DpaResponse::ok(&request, vec![0xFE, 0, 0]);
        assert!(matches!(
            FrcResponse::checked(&response),
            Err(DpaError::FrcStatus(0xFE))
        ));
    }
}
