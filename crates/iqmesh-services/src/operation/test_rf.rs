//! RF signal test.
//!
//! Address 0 measures at the coordinator only. Address 255 measures at
//! every bonded node through a selective FRC, with the FRC response time
//! stretched to the measurement window for the duration of the fan-out.

use std::collections::BTreeMap;
use std::time::Duration;

use iqmesh_dpa::frc::command as frc_command;
use iqmesh_dpa::{
    cmd, pnum, DeviceAddress, DpaRequest, ExclusiveAccess, FrcResponseTime, TransactionTrail,
    BROADCAST_ADDRESS, COORDINATOR_ADDRESS, HWPID_DO_NOT_CHECK,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{restore_frc_response_time, set_frc_response_time};
use crate::error::{Result, ServiceError};
use crate::frc::{answered_value, run_selective, ResultWidth, SelectiveFrc};
use crate::result::{NodeOutcome, OperationReport, OperationSummary};

pub const MAX_RF_CHANNEL: u16 = 67;
pub const MAX_RX_FILTER: u16 = 64;

/// Filter value that disables RX filtering.
pub const RX_FILTER_OFF: u16 = 255;

/// Margin added to the measurement window for the coordinator transaction.
const COORDINATOR_TIMEOUT_MARGIN_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRfParams {
    /// 0 for the coordinator, 255 for every bonded node
    pub device_addr: u16,
    pub rf_channel: u16,
    pub rx_filter: u16,
    pub measurement_time_ms: u32,
}

impl TestRfParams {
    pub fn validate(&self) -> Result<()> {
        if self.device_addr != u16::from(COORDINATOR_ADDRESS)
            && self.device_addr != u16::from(BROADCAST_ADDRESS)
        {
            return Err(ServiceError::parsing(format!(
                "deviceAddr must be 0 or 255, got {}",
                self.device_addr
            )));
        }
        if self.rf_channel > MAX_RF_CHANNEL {
            return Err(ServiceError::parsing(format!(
                "rfChannel must be at most {}, got {}",
                MAX_RF_CHANNEL, self.rf_channel
            )));
        }
        if self.rx_filter > MAX_RX_FILTER && self.rx_filter != RX_FILTER_OFF {
            return Err(ServiceError::parsing(format!(
                "rxFilter must be at most {} or {}, got {}",
                MAX_RX_FILTER, RX_FILTER_OFF, self.rx_filter
            )));
        }
        self.measurement_time()?;
        Ok(())
    }

    pub fn targets_nodes(&self) -> bool {
        self.device_addr == u16::from(BROADCAST_ADDRESS)
    }

    pub fn measurement_time(&self) -> Result<FrcResponseTime> {
        FrcResponseTime::from_millis(self.measurement_time_ms).ok_or_else(|| {
            ServiceError::parsing(format!(
                "measurementTime of {} ms is not a supported FRC response time",
                self.measurement_time_ms
            ))
        })
    }

    // validated before use, so the narrowing cannot truncate
    fn channel_and_filter(&self) -> [u8; 2] {
        [self.rf_channel as u8, self.rx_filter as u8]
    }
}

pub(crate) async fn run(
    access: &ExclusiveAccess,
    bonded: &[DeviceAddress],
    params: &TestRfParams,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    let time = params.measurement_time()?;
    if params.targets_nodes() {
        test_nodes(access, bonded, params, time, repeat, trail).await
    } else {
        test_coordinator(access, params, time, repeat, trail).await
    }
}

async fn test_coordinator(
    access: &ExclusiveAccess,
    params: &TestRfParams,
    time: FrcResponseTime,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    let window = (time.as_millis() / 10) as u16;
    let mut pdata = params.channel_and_filter().to_vec();
    pdata.extend_from_slice(&window.to_le_bytes());
    let request = DpaRequest::coordinator(pnum::OS, cmd::os::TEST_RF_SIGNAL).with_pdata(pdata);
    let timeout = time.as_duration() + Duration::from_millis(COORDINATOR_TIMEOUT_MARGIN_MS);

    let response = access
        .execute_repeat(&request, repeat, Some(timeout), trail)
        .await?;
    let counter = response.pdata_range(0, 1, "RF signal counter")?[0];
    info!(counter, "Coordinator RF signal test finished");

    let per_node = BTreeMap::from([(
        COORDINATOR_ADDRESS,
        NodeOutcome::RfSignal {
            counter: Some(counter),
        },
    )]);
    Ok(OperationReport::new(OperationSummary::TestRfSignal {
        device_addr: COORDINATOR_ADDRESS,
        nodes_nr: 1,
        inaccessible_nodes_nr: 0,
    })
    .with_nodes(per_node))
}

async fn test_nodes(
    access: &ExclusiveAccess,
    bonded: &[DeviceAddress],
    params: &TestRfParams,
    time: FrcResponseTime,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    let frc = SelectiveFrc {
        command: frc_command::TEST_RF_SIGNAL,
        user_data: params.channel_and_filter().to_vec(),
        width: ResultWidth::OneByte,
        hwpid: HWPID_DO_NOT_CHECK,
    };

    let saved = set_frc_response_time(access, time, repeat, trail).await?;
    let outcome = run_selective(access, bonded, &frc, repeat, trail, |raw| {
        answered_value(raw).map(|counter| counter as u8)
    })
    .await;
    let counters = restore_frc_response_time(access, saved, repeat, trail, outcome).await?;

    let inaccessible = counters.values().filter(|c| c.is_none()).count();
    info!(
        nodes = bonded.len(),
        inaccessible,
        measurement_ms = time.as_millis(),
        "Node RF signal test finished"
    );

    let per_node = counters
        .into_iter()
        .map(|(address, counter)| (address, NodeOutcome::RfSignal { counter }))
        .collect();
    Ok(OperationReport::new(OperationSummary::TestRfSignal {
        device_addr: BROADCAST_ADDRESS,
        nodes_nr: bonded.len(),
        inaccessible_nodes_nr: inaccessible,
    })
    .with_nodes(per_node))
}
