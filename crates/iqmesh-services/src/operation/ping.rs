//! Ping of every bonded node with one FRC.

use std::collections::BTreeMap;

use iqmesh_dpa::frc::command as frc_command;
use iqmesh_dpa::{
    DeviceAddress, ExclusiveAccess, FrcRequest, FrcResponse, FrcResponseTime, NodeBitmap,
    TransactionTrail,
};
use tracing::info;

use super::{restore_frc_response_time, set_frc_response_time};
use crate::error::Result;
use crate::result::{NodeOutcome, OperationReport, OperationSummary};

pub(crate) async fn run(
    access: &ExclusiveAccess,
    bonded: &[DeviceAddress],
    hwpid: u16,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    let saved = set_frc_response_time(access, FrcResponseTime::Ms40, repeat, trail).await?;
    let outcome = ping_all(access, hwpid, repeat, trail).await;
    let responded = restore_frc_response_time(access, saved, repeat, trail, outcome).await?;

    let per_node = responded_per_node(bonded, &responded);
    let inaccessible = per_node
        .values()
        .filter(|o| **o == NodeOutcome::Responded(false))
        .count();
    info!(nodes = bonded.len(), inaccessible, hwpid, "Ping finished");

    Ok(OperationReport::new(OperationSummary::Ping {
        hwpid,
        nodes_nr: bonded.len(),
        inaccessible_nodes_nr: inaccessible,
    })
    .with_nodes(per_node))
}

async fn ping_all(
    access: &ExclusiveAccess,
    hwpid: u16,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<NodeBitmap> {
    let request = FrcRequest::broadcast(frc_command::PING, vec![0x00, 0x00])?.to_dpa_request(hwpid);
    let response = access.execute_repeat(&request, repeat, None, trail).await?;
    Ok(FrcResponse::checked(&response)?.bitmap()?)
}

/// One `Responded` entry per bonded node from an FRC bit result.
pub(crate) fn responded_per_node(
    bonded: &[DeviceAddress],
    bits: &NodeBitmap,
) -> BTreeMap<DeviceAddress, NodeOutcome> {
    bonded
        .iter()
        .map(|&address| (address, NodeOutcome::Responded(bits.contains(address))))
        .collect()
}
