//! Network maintenance: MID repair, duplicated addresses and the
//! temporary address.

use std::collections::BTreeMap;

use iqmesh_dpa::{
    cmd, pnum, DeviceAddress, DpaRequest, ExclusiveAccess, FrcResponseTime, TransactionTrail,
    TEMPORARY_ADDRESS,
};
use tracing::info;

use super::{restore_frc_response_time, set_frc_response_time};
use crate::error::Result;
use crate::mid::MidConsistencyResolver;
use crate::result::{NodeOutcome, OperationReport, OperationSummary};

/// `{address, MID}` pairs that fit one `CMD_NODE_VALIDATE_BONDS`.
pub const MAX_VALIDATE_BONDS_PAIRS: usize = 11;

/// Payload of `CMD_NODE_VALIDATE_BONDS`: address followed by MID, per pair.
pub fn validate_bonds_payload(pairs: &[(DeviceAddress, u32)]) -> Vec<u8> {
    let mut pdata = Vec::with_capacity(pairs.len() * 5);
    for (address, mid) in pairs {
        pdata.push(*address);
        pdata.extend_from_slice(&mid.to_le_bytes());
    }
    pdata
}

pub(crate) async fn resolve_inconsistent_mids(
    access: &ExclusiveAccess,
    bonded: &[DeviceAddress],
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    let resolver = MidConsistencyResolver::new(access, repeat);

    let saved = set_frc_response_time(access, FrcResponseTime::Ms40, repeat, trail).await?;
    let outcome = resolver.resolve(bonded, trail).await;
    let resolution = restore_frc_response_time(access, saved, repeat, trail, outcome).await?;

    let failed: Vec<DeviceAddress> = resolution
        .inconsistent
        .iter()
        .copied()
        .filter(|a| !resolution.repaired.contains(a))
        .collect();
    info!(
        nodes = bonded.len(),
        inconsistent = resolution.inconsistent.len(),
        repaired = resolution.repaired.len(),
        inaccessible = resolution.inaccessible.len(),
        "Inconsistent MIDs resolved"
    );

    let per_node = resolution
        .nodes
        .into_iter()
        .map(|(address, check)| (address, NodeOutcome::Mid(check)))
        .collect();
    Ok(OperationReport::new(OperationSummary::InconsistentMids {
        nodes_nr: bonded.len(),
        inconsistent_nodes: resolution.inconsistent,
        repaired_nodes: resolution.repaired,
        failed_nodes: failed,
        inaccessible_nodes: resolution.inaccessible,
    })
    .with_nodes(per_node))
}

/// Broadcast every bonded node's recorded MID. A node that holds an
/// address with a different MID drops its bond.
pub(crate) async fn resolve_duplicated_addresses(
    access: &ExclusiveAccess,
    bonded: &[DeviceAddress],
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    let resolver = MidConsistencyResolver::new(access, repeat);
    let recorded = resolver.read_coordinator_mid_table(bonded, trail).await?;
    let pairs: Vec<(DeviceAddress, u32)> = recorded.iter().map(|(a, m)| (*a, *m)).collect();

    let mut requests = 0;
    for chunk in pairs.chunks(MAX_VALIDATE_BONDS_PAIRS) {
        let request = DpaRequest::broadcast(pnum::NODE, cmd::node::VALIDATE_BONDS)
            .with_pdata(validate_bonds_payload(chunk));
        access.execute_repeat(&request, repeat, None, trail).await?;
        requests += 1;
    }
    info!(nodes = pairs.len(), requests, "Bonds validated");

    let per_node: BTreeMap<_, _> = recorded
        .into_iter()
        .map(|(address, mid)| (address, NodeOutcome::BondValidated { mid }))
        .collect();
    Ok(OperationReport::new(OperationSummary::DuplicatedAddresses {
        nodes_nr: bonded.len(),
        validation_requests: requests,
    })
    .with_nodes(per_node))
}

/// Make any node still sitting on the temporary address drop its bond.
pub(crate) async fn unbond_temporary_address(
    access: &ExclusiveAccess,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    let request = DpaRequest::broadcast(pnum::NODE, cmd::node::VALIDATE_BONDS)
        .with_pdata(validate_bonds_payload(&[(TEMPORARY_ADDRESS, 0)]));
    access.execute_repeat(&request, repeat, None, trail).await?;
    info!("Temporary address unbonded");
    Ok(OperationReport::new(OperationSummary::UnbondTemporaryAddress))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_bonds_payload() {
        assert_eq!(
            validate_bonds_payload(&[(TEMPORARY_ADDRESS, 0)]),
            vec![0xFE, 0, 0, 0, 0]
        );
        let pdata = validate_bonds_payload(&[(1, 0x8110_0001), (2, 0x0A0B_0C0D)]);
        assert_eq!(pdata, vec![1, 0x01, 0x00, 0x10, 0x81, 2, 0x0D, 0x0C, 0x0B, 0x0A]);
    }

    #[test]
    fn test_pairs_fit_one_request() {
        let pairs: Vec<(DeviceAddress, u32)> = (1..=11).map(|a| (a, u32::from(a))).collect();
        assert!(validate_bonds_payload(&pairs).len() <= iqmesh_dpa::message::MAX_PDATA_LEN);
    }
}
