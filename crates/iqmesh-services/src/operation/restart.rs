//! Restart of every bonded node.
//!
//! The restart rides an acknowledged broadcast: each node runs the embedded
//! `CMD_OS_RESTART` and sets its bit when it accepted the request.

use iqmesh_dpa::frc::command as frc_command;
use iqmesh_dpa::{
    cmd, pnum, DeviceAddress, ExclusiveAccess, FrcRequest, FrcResponse, FrcResponseTime,
    NodeBitmap, TransactionTrail, HWPID_DO_NOT_CHECK,
};
use tracing::info;

use super::ping::responded_per_node;
use super::{restore_frc_response_time, set_frc_response_time};
use crate::error::Result;
use crate::result::{NodeOutcome, OperationReport, OperationSummary};

/// Length byte of the embedded request: itself plus PNUM, PCMD and HWPID.
const EMBEDDED_REQUEST_LEN: u8 = 5;

/// FRC user data carrying `CMD_OS_RESTART` for nodes matching `hwpid`.
pub fn restart_user_data(hwpid: u16) -> Vec<u8> {
    let [lo, hi] = hwpid.to_le_bytes();
    vec![EMBEDDED_REQUEST_LEN, pnum::OS, cmd::os::RESTART, lo, hi]
}

pub(crate) async fn run(
    access: &ExclusiveAccess,
    bonded: &[DeviceAddress],
    hwpid: u16,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    let saved = set_frc_response_time(access, FrcResponseTime::Ms40, repeat, trail).await?;
    let outcome = restart_all(access, hwpid, repeat, trail).await;
    let acknowledged = restore_frc_response_time(access, saved, repeat, trail, outcome).await?;

    let per_node = responded_per_node(bonded, &acknowledged);
    let inaccessible = per_node
        .values()
        .filter(|o| **o == NodeOutcome::Responded(false))
        .count();
    info!(nodes = bonded.len(), inaccessible, hwpid, "Restart finished");

    Ok(OperationReport::new(OperationSummary::Restart {
        hwpid,
        nodes_nr: bonded.len(),
        inaccessible_nodes_nr: inaccessible,
    })
    .with_nodes(per_node))
}

async fn restart_all(
    access: &ExclusiveAccess,
    hwpid: u16,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<NodeBitmap> {
    // the filter travels in the embedded request, the FRC itself reaches everyone
    let request = FrcRequest::broadcast(
        frc_command::ACKNOWLEDGED_BROADCAST_BITS,
        restart_user_data(hwpid),
    )?
    .to_dpa_request(HWPID_DO_NOT_CHECK);
    let response = access.execute_repeat(&request, repeat, None, trail).await?;
    Ok(FrcResponse::checked(&response)?.bitmap()?)
}
