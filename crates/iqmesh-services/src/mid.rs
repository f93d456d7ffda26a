//! MID consistency between the coordinator and its nodes.
//!
//! The coordinator keeps each bonded node's Module ID in external EEPROM,
//! 8 bytes per address starting at 0x4000. When a node is replaced or the
//! table gets corrupted the recorded MID no longer matches the device.
//! The resolver reads both sides and rewrites the coordinator's record.

use std::collections::BTreeMap;

use iqmesh_dpa::frc::command as frc_command;
use iqmesh_dpa::{
    cmd, pnum, DeviceAddress, DpaError, DpaRequest, ExclusiveAccess, TransactionTrail,
    HWPID_DO_NOT_CHECK,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::frc::{answered_value, run_selective, ResultWidth, SelectiveFrc};

/// Start of the MID table in coordinator external EEPROM.
pub const MID_TABLE_ADDRESS: u16 = 0x4000;

/// Bytes per address slot.
pub const MID_SLOT_LEN: usize = 8;

/// Largest `CMD_EEEPROM_XREAD` payload.
pub const MAX_XREAD_LEN: usize = 54;

/// Address of the MID in a node's OS RAM.
const OS_MID_ADDRESS: u16 = 0x04A0;

/// What happened to one node's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "error")]
pub enum MidRepair {
    Consistent,
    Inaccessible,
    Repaired,
    Failed(String),
}

/// Comparison result for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MidCheck {
    pub coordinator_mid: u32,
    /// `None` when the node did not answer
    pub device_mid: Option<u32>,
    pub repair: MidRepair,
}

/// Outcome of a resolve pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MidResolution {
    /// Nodes whose device MID differed from the record
    pub inconsistent: Vec<DeviceAddress>,
    /// Inconsistent nodes whose record was rewritten
    pub repaired: Vec<DeviceAddress>,
    pub inaccessible: Vec<DeviceAddress>,
    pub nodes: BTreeMap<DeviceAddress, MidCheck>,
}

pub struct MidConsistencyResolver<'a> {
    access: &'a ExclusiveAccess,
    repeat: u8,
}

impl<'a> MidConsistencyResolver<'a> {
    pub fn new(access: &'a ExclusiveAccess, repeat: u8) -> Self {
        Self { access, repeat }
    }

    /// Read the recorded MID of every address in `addresses`.
    ///
    /// Pages through the table up to the highest requested slot.
    pub async fn read_coordinator_mid_table(
        &self,
        addresses: &[DeviceAddress],
        trail: &mut TransactionTrail,
    ) -> Result<BTreeMap<DeviceAddress, u32>> {
        let Some(&max_address) = addresses.iter().max() else {
            return Ok(BTreeMap::new());
        };
        let total = (usize::from(max_address) + 1) * MID_SLOT_LEN;
        let mut table = Vec::with_capacity(total);

        while table.len() < total {
            let len = (total - table.len()).min(MAX_XREAD_LEN);
            let address = MID_TABLE_ADDRESS + table.len() as u16;
            let [lo, hi] = address.to_le_bytes();
            let request = DpaRequest::coordinator(pnum::EEEPROM, cmd::eeeprom::XREAD)
                .with_pdata(vec![lo, hi, len as u8]);
            let response = self
                .access
                .execute_repeat(&request, self.repeat, None, trail)
                .await?;
            table.extend_from_slice(response.pdata_range(0, len, "MID table page")?);
        }

        Ok(addresses
            .iter()
            .map(|&address| {
                let slot = usize::from(address) * MID_SLOT_LEN;
                let bytes = &table[slot..slot + 4];
                (address, u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            })
            .collect())
    }

    /// Read the MID each node really has. `None` marks nodes that did not
    /// answer.
    pub async fn read_device_real_mids(
        &self,
        addresses: &[DeviceAddress],
        trail: &mut TransactionTrail,
    ) -> Result<BTreeMap<DeviceAddress, Option<u32>>> {
        if addresses.is_empty() {
            return Ok(BTreeMap::new());
        }
        let [lo, hi] = OS_MID_ADDRESS.to_le_bytes();
        let frc = SelectiveFrc {
            command: frc_command::MEMORY_READ_4B,
            // increment 1 keeps a zero MID distinguishable from no answer
            user_data: vec![0x01, 0x00, lo, hi, pnum::OS, cmd::os::READ, 0x00],
            width: ResultWidth::FourBytes,
            hwpid: HWPID_DO_NOT_CHECK,
        };
        run_selective(self.access, addresses, &frc, self.repeat, trail, answered_value).await
    }

    /// Rewrite the coordinator's record for one node.
    pub async fn set_mid(
        &self,
        address: DeviceAddress,
        mid: u32,
        trail: &mut TransactionTrail,
    ) -> std::result::Result<(), DpaError> {
        let mut pdata = vec![address];
        pdata.extend_from_slice(&mid.to_le_bytes());
        let request =
            DpaRequest::coordinator(pnum::COORDINATOR, cmd::coordinator::SET_MID).with_pdata(pdata);
        self.access
            .execute_repeat(&request, self.repeat, None, trail)
            .await
            .map(|_| ())
    }

    /// Compare both sides for `bonded` and repair every mismatch.
    ///
    /// Reading either side fails the pass; a failed repair is recorded on
    /// that node and the pass continues.
    pub async fn resolve(
        &self,
        bonded: &[DeviceAddress],
        trail: &mut TransactionTrail,
    ) -> Result<MidResolution> {
        let recorded = self.read_coordinator_mid_table(bonded, trail).await?;
        let real = self.read_device_real_mids(bonded, trail).await?;
        let mut resolution = MidResolution::default();

        for (&address, &coordinator_mid) in &recorded {
            let device_mid = real.get(&address).copied().flatten();
            let repair = match device_mid {
                None => {
                    resolution.inaccessible.push(address);
                    MidRepair::Inaccessible
                }
                Some(mid) if mid == coordinator_mid => MidRepair::Consistent,
                Some(mid) => {
                    resolution.inconsistent.push(address);
                    match self.set_mid(address, mid, trail).await {
                        Ok(()) => {
                            info!(
                                address,
                                recorded = %format!("{:08x}", coordinator_mid),
                                device = %format!("{:08x}", mid),
                                "Coordinator MID record repaired"
                            );
                            resolution.repaired.push(address);
                            MidRepair::Repaired
                        }
                        Err(e) => {
                            warn!(address, error = %e, "Coordinator MID repair failed");
                            MidRepair::Failed(e.to_string())
                        }
                    }
                }
            };
            resolution.nodes.insert(
                address,
                MidCheck {
                    coordinator_mid,
                    device_mid,
                    repair,
                },
            );
        }
        Ok(resolution)
    }
}
