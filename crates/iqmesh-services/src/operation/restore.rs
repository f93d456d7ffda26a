//! Coordinator restore from a backup.

use iqmesh_dpa::{
    cmd, pnum, DpaRequest, ExclusiveAccess, TransactionTrail, COORDINATOR_ADDRESS,
    MAX_DEVICE_ADDRESS,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ServiceError};
use crate::result::{OperationReport, OperationSummary};

/// Payload of one `CMD_COORDINATOR_RESTORE`.
pub const RESTORE_BLOCK_LEN: usize = 49;

/// Offset of the DPA version in a `CMD_OS_READ` response.
const OS_READ_DPA_VERSION_OFFSET: usize = 28;

fn default_restart() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreParams {
    pub device_addr: u16,
    /// Hex-encoded backup, a whole number of 49-byte blocks
    pub backup: String,
    /// DPA version the backup was taken from
    pub dpa_version: u16,
    #[serde(default = "default_restart")]
    pub restart_coordinator: bool,
}

impl RestoreParams {
    pub fn validate(&self) -> Result<()> {
        if self.device_addr > u16::from(MAX_DEVICE_ADDRESS) {
            return Err(ServiceError::parsing(format!(
                "deviceAddr must be at most {}, got {}",
                MAX_DEVICE_ADDRESS, self.device_addr
            )));
        }
        self.blocks()?;
        if self.device_addr != u16::from(COORDINATOR_ADDRESS) {
            return Err(ServiceError::service(
                "Restore function of [N] device is currently not supported.",
            ));
        }
        Ok(())
    }

    /// Backup split into restore blocks.
    pub fn blocks(&self) -> Result<Vec<Vec<u8>>> {
        let data = hex::decode(self.backup.trim())
            .map_err(|e| ServiceError::parsing(format!("backup is not valid hex: {}", e)))?;
        if data.is_empty() || data.len() % RESTORE_BLOCK_LEN != 0 {
            return Err(ServiceError::parsing(format!(
                "backup of {} bytes is not a whole number of {} byte blocks",
                data.len(),
                RESTORE_BLOCK_LEN
            )));
        }
        Ok(data.chunks(RESTORE_BLOCK_LEN).map(<[u8]>::to_vec).collect())
    }
}

pub(crate) async fn run(
    access: &ExclusiveAccess,
    params: &RestoreParams,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    let blocks = params.blocks()?;

    check_peripherals(access, repeat, trail).await?;
    let dpa_version = read_dpa_version(access, repeat, trail).await?;
    if dpa_version != params.dpa_version {
        return Err(ServiceError::service("DPA version doesn't match."));
    }

    for block in &blocks {
        let request = DpaRequest::coordinator(pnum::COORDINATOR, cmd::coordinator::RESTORE)
            .with_pdata(block.clone());
        access.execute_repeat(&request, repeat, None, trail).await?;
    }

    if params.restart_coordinator {
        let request = DpaRequest::coordinator(pnum::OS, cmd::os::RESET);
        access.execute_repeat(&request, repeat, None, trail).await?;
    }
    info!(
        blocks = blocks.len(),
        restarted = params.restart_coordinator,
        "Coordinator restored"
    );

    Ok(OperationReport::new(OperationSummary::Restore {
        device_addr: COORDINATOR_ADDRESS,
        blocks_written: blocks.len(),
        restarted: params.restart_coordinator,
    }))
}

/// The coordinator must expose the coordinator and OS peripherals.
async fn check_peripherals(
    access: &ExclusiveAccess,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<()> {
    let request = DpaRequest::coordinator(pnum::ENUMERATION, cmd::enumeration::GET_PER_INFO);
    let response = access.execute_repeat(&request, repeat, None, trail).await?;
    let embedded = response.pdata_range(3, 1, "embedded peripherals")?[0];
    if embedded & (1 << pnum::COORDINATOR) == 0 {
        return Err(ServiceError::service("Coordinator peripheral NOT found."));
    }
    if embedded & (1 << pnum::OS) == 0 {
        return Err(ServiceError::service("OS peripheral NOT found."));
    }
    Ok(())
}

async fn read_dpa_version(
    access: &ExclusiveAccess,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<u16> {
    let request = DpaRequest::coordinator(pnum::OS, cmd::os::READ);
    let response = access.execute_repeat(&request, repeat, None, trail).await?;
    let bytes = response.pdata_range(OS_READ_DPA_VERSION_OFFSET, 2, "DPA version")?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}
