//! FRC response time measurement.
//!
//! Asks every bonded node how long its application needs to handle a given
//! FRC command and recommends the shortest response time that covers all
//! of them. The fan-out itself runs at 40 ms.

use std::collections::BTreeMap;

use iqmesh_dpa::frc::{command as frc_command, FRC_RESPONSE_TIME_UNHANDLED};
use iqmesh_dpa::{DeviceAddress, ExclusiveAccess, FrcResponseTime, TransactionTrail, HWPID_DO_NOT_CHECK};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{restore_frc_response_time, set_frc_response_time};
use crate::error::{Result, ServiceError};
use crate::frc::{run_selective, ResultWidth, SelectiveFrc};
use crate::result::{NodeOutcome, OperationReport, OperationSummary};

/// FRC command classes a node application can report a handler time for.
pub mod measured_command {
    pub const IQRF_2BITS: u8 = 0x10;
    pub const IQRF_1BYTE: u8 = 0x90;
    pub const IQRF_2BYTE: u8 = 0xE0;
    pub const IQRF_4BYTE: u8 = 0xF9;
    pub const USER_2BITS: u8 = 0x40;
    pub const USER_1BYTE: u8 = 0xC0;
    pub const USER_2BYTE: u8 = 0xF0;
    pub const USER_4BYTE: u8 = 0xFC;

    pub const ALL: [u8; 8] = [
        IQRF_2BITS, IQRF_1BYTE, IQRF_2BYTE, IQRF_4BYTE, USER_2BITS, USER_1BYTE, USER_2BYTE,
        USER_4BYTE,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrcResponseTimeParams {
    /// FRC command whose handler time is measured
    pub command: u8,
}

impl FrcResponseTimeParams {
    pub fn validate(&self) -> Result<()> {
        if !measured_command::ALL.contains(&self.command) {
            return Err(ServiceError::parsing(format!(
                "command 0x{:02x} is not a measurable FRC command",
                self.command
            )));
        }
        Ok(())
    }
}

/// One node's answer to the response time FRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandlerTime {
    NoAnswer,
    Unhandled,
    Handled(FrcResponseTime),
}

impl HandlerTime {
    fn decode(raw: u8) -> Self {
        match raw {
            0 => HandlerTime::NoAnswer,
            FRC_RESPONSE_TIME_UNHANDLED => HandlerTime::Unhandled,
            value => HandlerTime::Handled(FrcResponseTime::from_byte(value - 1)),
        }
    }

    fn outcome(self) -> NodeOutcome {
        let (responded, handled, response_time_ms) = match self {
            HandlerTime::NoAnswer => (false, false, None),
            HandlerTime::Unhandled => (true, false, None),
            HandlerTime::Handled(time) => (true, true, Some(time.as_millis())),
        };
        NodeOutcome::FrcResponseTime {
            responded,
            handled,
            response_time_ms,
        }
    }
}

/// Longest handler time, or the error that explains why there is none.
pub(crate) fn recommend(times: &BTreeMap<DeviceAddress, HandlerTime>) -> Result<FrcResponseTime> {
    if times.values().all(|t| *t == HandlerTime::NoAnswer) {
        return Err(ServiceError::NoRespondedNodes);
    }
    times
        .values()
        .filter_map(|t| match t {
            HandlerTime::Handled(time) => Some(*time),
            _ => None,
        })
        .max_by_key(|time| time.as_millis())
        .ok_or(ServiceError::NoHandledNodes)
}

pub(crate) async fn run(
    access: &ExclusiveAccess,
    bonded: &[DeviceAddress],
    params: &FrcResponseTimeParams,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    let frc = SelectiveFrc {
        command: frc_command::FRC_RESPONSE_TIME,
        user_data: vec![params.command, 0],
        width: ResultWidth::OneByte,
        hwpid: HWPID_DO_NOT_CHECK,
    };

    let saved = set_frc_response_time(access, FrcResponseTime::Ms40, repeat, trail).await?;
    let outcome = run_selective(access, bonded, &frc, repeat, trail, |raw| {
        HandlerTime::decode(raw as u8)
    })
    .await;
    let times = restore_frc_response_time(access, saved, repeat, trail, outcome).await?;

    let recommended = recommend(&times)?;
    let current = saved.device_response_time();
    let inaccessible = times.values().filter(|t| **t == HandlerTime::NoAnswer).count();
    let unhandled = times.values().filter(|t| **t == HandlerTime::Unhandled).count();
    info!(
        command = params.command,
        nodes = bonded.len(),
        inaccessible,
        unhandled,
        current_ms = current.as_millis(),
        recommended_ms = recommended.as_millis(),
        "FRC response time measured"
    );

    let per_node = times
        .into_iter()
        .map(|(address, time)| (address, time.outcome()))
        .collect();
    Ok(OperationReport::new(OperationSummary::FrcResponseTime {
        command: params.command,
        nodes_nr: bonded.len(),
        inaccessible_nodes_nr: inaccessible,
        unhandled_nodes_nr: unhandled,
        current_response_time_ms: current.as_millis(),
        recommended_response_time_ms: recommended.as_millis(),
    })
    .with_nodes(per_node))
}
