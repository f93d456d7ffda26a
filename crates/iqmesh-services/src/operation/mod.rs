//! Network operations.
//!
//! Every operation runs the same skeleton inside one exclusive session:
//! validate parameters, acquire the channel, read the bonded nodes when the
//! operation needs them, run the operation's own transaction sequence and
//! release the channel on every exit path.

pub mod frc_response_time;
pub mod maintenance;
pub mod ping;
pub mod read_config;
pub mod restart;
pub mod restore;
pub mod test_rf;

use std::fmt;
use std::sync::Arc;

use iqmesh_dpa::frc::{
    params_with_response_time, previous_params, set_params_request, set_raw_params_request,
    RESPONSE_TIME_MASK,
};
use iqmesh_dpa::{
    cmd, pnum, DeviceAddress, DpaRequest, DpaService, ExclusiveAccess, FrcResponseTime,
    NodeBitmap, TransactionTrail, COORDINATOR_ADDRESS, HWPID_DO_NOT_CHECK,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::result::{OperationReport, OperationResult};

pub use frc_response_time::FrcResponseTimeParams;
pub use restore::RestoreParams;
pub use test_rf::TestRfParams;

fn default_hwpid() -> u16 {
    HWPID_DO_NOT_CHECK
}

/// The operations this engine runs, each with its own parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum NetworkOperation {
    /// FRC ping of every bonded node
    Ping {
        #[serde(default = "default_hwpid")]
        hwpid: u16,
    },
    /// Restart every bonded node through an acknowledged broadcast
    Restart {
        #[serde(default = "default_hwpid")]
        hwpid: u16,
    },
    TestRfSignal(TestRfParams),
    #[serde(rename_all = "camelCase")]
    ReadConfig {
        device_addr: u16,
        #[serde(default = "default_hwpid")]
        hwpid: u16,
    },
    ResolveInconsistentMids,
    ResolveDuplicatedAddresses,
    UnbondTemporaryAddress,
    /// Ask every bonded node for its FRC handler time
    MeasureFrcResponseTime(FrcResponseTimeParams),
    Restore(RestoreParams),
}

/// Operation name without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Ping,
    Restart,
    TestRfSignal,
    ReadConfig,
    ResolveInconsistentMids,
    ResolveDuplicatedAddresses,
    UnbondTemporaryAddress,
    MeasureFrcResponseTime,
    Restore,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Ping => "ping",
            OperationKind::Restart => "restart",
            OperationKind::TestRfSignal => "testRfSignal",
            OperationKind::ReadConfig => "readConfig",
            OperationKind::ResolveInconsistentMids => "resolveInconsistentMids",
            OperationKind::ResolveDuplicatedAddresses => "resolveDuplicatedAddresses",
            OperationKind::UnbondTemporaryAddress => "unbondTemporaryAddress",
            OperationKind::MeasureFrcResponseTime => "measureFrcResponseTime",
            OperationKind::Restore => "restore",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an operation depends on the bonded node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondedNodes {
    /// Not read
    Skip,
    /// Read, may be empty
    Read,
    /// Read, empty fails the operation
    Require,
}

impl NetworkOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            NetworkOperation::Ping { .. } => OperationKind::Ping,
            NetworkOperation::Restart { .. } => OperationKind::Restart,
            NetworkOperation::TestRfSignal(_) => OperationKind::TestRfSignal,
            NetworkOperation::ReadConfig { .. } => OperationKind::ReadConfig,
            NetworkOperation::ResolveInconsistentMids => OperationKind::ResolveInconsistentMids,
            NetworkOperation::ResolveDuplicatedAddresses => {
                OperationKind::ResolveDuplicatedAddresses
            }
            NetworkOperation::UnbondTemporaryAddress => OperationKind::UnbondTemporaryAddress,
            NetworkOperation::MeasureFrcResponseTime(_) => OperationKind::MeasureFrcResponseTime,
            NetworkOperation::Restore(_) => OperationKind::Restore,
        }
    }

    /// Reject bad parameters before any traffic.
    pub fn validate(&self) -> Result<()> {
        match self {
            NetworkOperation::TestRfSignal(params) => params.validate(),
            NetworkOperation::ReadConfig { device_addr, .. } => {
                read_config::validate_address(*device_addr).map(|_| ())
            }
            NetworkOperation::MeasureFrcResponseTime(params) => params.validate(),
            NetworkOperation::Restore(params) => params.validate(),
            _ => Ok(()),
        }
    }

    pub fn bonded_nodes(&self) -> BondedNodes {
        match self {
            NetworkOperation::Ping { .. }
            | NetworkOperation::Restart { .. }
            | NetworkOperation::ResolveInconsistentMids
            | NetworkOperation::ResolveDuplicatedAddresses
            | NetworkOperation::UnbondTemporaryAddress
            | NetworkOperation::MeasureFrcResponseTime(_) => BondedNodes::Require,
            NetworkOperation::TestRfSignal(params) if params.targets_nodes() => {
                BondedNodes::Require
            }
            NetworkOperation::ReadConfig { device_addr, .. }
                if *device_addr != u16::from(COORDINATOR_ADDRESS) =>
            {
                BondedNodes::Read
            }
            _ => BondedNodes::Skip,
        }
    }
}

/// An operation plus its execution options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub operation: NetworkOperation,

    /// Echoed in the result
    #[serde(default)]
    pub msg_id: Option<String>,

    /// Extra attempts per transaction; the service default when absent
    #[serde(default)]
    pub repeat: Option<u8>,

    /// Attach the transaction trail to the result
    #[serde(default)]
    pub verbose: bool,
}

impl OperationRequest {
    pub fn new(operation: NetworkOperation) -> Self {
        Self {
            operation,
            msg_id: None,
            repeat: None,
            verbose: false,
        }
    }

    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }

    pub fn with_repeat(mut self, repeat: u8) -> Self {
        self.repeat = Some(repeat);
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }
}

/// Runs network operations against one DPA service.
pub struct NetworkService {
    dpa: Arc<DpaService>,
    config: ServiceConfig,
}

impl NetworkService {
    pub fn new(dpa: Arc<DpaService>, config: ServiceConfig) -> Self {
        Self { dpa, config }
    }

    pub fn dpa(&self) -> &Arc<DpaService> {
        &self.dpa
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Run `request` to completion. Failures are reported in the result.
    pub async fn execute(&self, request: OperationRequest) -> OperationResult {
        let kind = request.operation.kind();
        let repeat = request.repeat.unwrap_or(self.config.default_repeat);
        let mut trail = TransactionTrail::new();

        let outcome = self.run(&request.operation, repeat, &mut trail).await;
        match &outcome {
            Ok(_) => info!(
                operation = %kind,
                transactions = trail.len(),
                "Network operation completed"
            ),
            Err(e) => warn!(
                operation = %kind,
                status = e.status(),
                transactions = trail.len(),
                error = %e,
                "Network operation failed"
            ),
        }

        OperationResult::from_outcome(kind, request.msg_id, outcome, trail, request.verbose)
    }

    async fn run(
        &self,
        operation: &NetworkOperation,
        repeat: u8,
        trail: &mut TransactionTrail,
    ) -> Result<OperationReport> {
        operation.validate()?;

        let kind = operation.kind();
        let mut access = self
            .dpa
            .get_exclusive_access(kind.as_str())
            .map_err(|e| ServiceError::ExclusiveAccess(e.to_string()))?;

        let outcome = orchestrate(operation, &access, repeat, trail).await;
        access.release();
        outcome
    }
}

async fn orchestrate(
    operation: &NetworkOperation,
    access: &ExclusiveAccess,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<OperationReport> {
    let bonded = match operation.bonded_nodes() {
        BondedNodes::Skip => Vec::new(),
        BondedNodes::Read => read_bonded_nodes(access, repeat, trail).await?,
        BondedNodes::Require => {
            let nodes = read_bonded_nodes(access, repeat, trail).await?;
            if nodes.is_empty() {
                return Err(ServiceError::NoBondedNodes);
            }
            nodes
        }
    };

    match operation {
        NetworkOperation::Ping { hwpid } => ping::run(access, &bonded, *hwpid, repeat, trail).await,
        NetworkOperation::Restart { hwpid } => {
            restart::run(access, &bonded, *hwpid, repeat, trail).await
        }
        NetworkOperation::TestRfSignal(params) => {
            test_rf::run(access, &bonded, params, repeat, trail).await
        }
        NetworkOperation::ReadConfig { device_addr, hwpid } => {
            let device_addr = read_config::validate_address(*device_addr)?;
            read_config::run(access, &bonded, device_addr, *hwpid, repeat, trail).await
        }
        NetworkOperation::ResolveInconsistentMids => {
            maintenance::resolve_inconsistent_mids(access, &bonded, repeat, trail).await
        }
        NetworkOperation::ResolveDuplicatedAddresses => {
            maintenance::resolve_duplicated_addresses(access, &bonded, repeat, trail).await
        }
        NetworkOperation::UnbondTemporaryAddress => {
            maintenance::unbond_temporary_address(access, repeat, trail).await
        }
        NetworkOperation::MeasureFrcResponseTime(params) => {
            frc_response_time::run(access, &bonded, params, repeat, trail).await
        }
        NetworkOperation::Restore(params) => restore::run(access, params, repeat, trail).await,
    }
}

/// Bonded node addresses, ascending, coordinator excluded.
pub async fn read_bonded_nodes(
    access: &ExclusiveAccess,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<Vec<DeviceAddress>> {
    let request = DpaRequest::coordinator(pnum::COORDINATOR, cmd::coordinator::BONDED_DEVICES);
    let response = access.execute_repeat(&request, repeat, None, trail).await?;
    let bonded = NodeBitmap::from_slice(&response.pdata)?;
    let nodes: Vec<DeviceAddress> = bonded
        .addresses()
        .into_iter()
        .filter(|a| *a != COORDINATOR_ADDRESS)
        .collect();
    debug!(count = nodes.len(), "Bonded nodes read");
    Ok(nodes)
}

/// FRC settings in force before an operation changed the response time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedFrcTiming {
    /// Device-global parameters byte reported by `CMD_FRC_SET_PARAMS`,
    /// flags included
    pub device_params: u8,
    /// Host-side value used for FRC timeouts
    pub host: FrcResponseTime,
}

impl SavedFrcTiming {
    pub fn device_response_time(&self) -> FrcResponseTime {
        FrcResponseTime::from_byte(self.device_params)
    }
}

/// Set the FRC response time on the device and the host.
///
/// Flags outside the response time bits stay as the device had them.
/// Callers must hand the returned value to [`restore_frc_response_time`]
/// inside the same exclusive session.
pub async fn set_frc_response_time(
    access: &ExclusiveAccess,
    time: FrcResponseTime,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<SavedFrcTiming> {
    let response = access
        .execute_repeat(&set_params_request(time), repeat, None, trail)
        .await?;
    let device_params = previous_params(&response)?;
    let host = access.set_frc_response_time(time);
    let saved = SavedFrcTiming {
        device_params,
        host,
    };

    if device_params & !RESPONSE_TIME_MASK != 0 {
        let params = params_with_response_time(device_params, time);
        let reapplied = access
            .execute_repeat(&set_raw_params_request(params), repeat, None, trail)
            .await;
        if let Err(e) = reapplied {
            return restore_frc_response_time(access, saved, repeat, trail, Err(e.into())).await;
        }
    }

    debug!(
        previous_params = device_params,
        current_ms = time.as_millis(),
        "FRC response time set"
    );
    Ok(saved)
}

/// Put back saved FRC settings, then return `outcome`.
///
/// Runs whether `outcome` failed or not. The fan-out error wins over a
/// failed restore.
pub async fn restore_frc_response_time<T>(
    access: &ExclusiveAccess,
    saved: SavedFrcTiming,
    repeat: u8,
    trail: &mut TransactionTrail,
    outcome: Result<T>,
) -> Result<T> {
    let restored = access
        .execute_repeat(
            &set_raw_params_request(saved.device_params),
            repeat,
            None,
            trail,
        )
        .await;
    access.set_frc_response_time(saved.host);

    match (outcome, restored) {
        (Err(e), Err(restore_error)) => {
            warn!(error = %restore_error, "FRC response time not restored after failure");
            Err(e)
        }
        (Err(e), Ok(_)) => Err(e),
        (Ok(_), Err(restore_error)) => Err(restore_error.into()),
        (Ok(value), Ok(_)) => {
            debug!(
                restored_params = saved.device_params,
                restored_ms = saved.device_response_time().as_millis(),
                "FRC response time restored"
            );
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_json() {
        let request: OperationRequest = serde_json::from_str(
            r#"{"operation": {"operation": "readConfig", "deviceAddr": 3}, "repeat": 2}"#,
        )
        .unwrap();
        assert_eq!(
            request.operation,
            NetworkOperation::ReadConfig {
                device_addr: 3,
                hwpid: HWPID_DO_NOT_CHECK
            }
        );
        assert_eq!(request.repeat, Some(2));
        assert!(!request.verbose);
    }

    #[test]
    fn test_bonded_node_requirements() {
        assert_eq!(
            NetworkOperation::Ping { hwpid: 0xFFFF }.bonded_nodes(),
            BondedNodes::Require
        );
        assert_eq!(
            NetworkOperation::ReadConfig {
                device_addr: 0,
                hwpid: 0xFFFF
            }
            .bonded_nodes(),
            BondedNodes::Skip
        );
        assert_eq!(
            NetworkOperation::ReadConfig {
                device_addr: 4,
                hwpid: 0xFFFF
            }
            .bonded_nodes(),
            BondedNodes::Read
        );
        assert_eq!(
            NetworkOperation::UnbondTemporaryAddress.bonded_nodes(),
            BondedNodes::Require
        );
        assert_eq!(
            NetworkOperation::TestRfSignal(TestRfParams {
                device_addr: 0,
                rf_channel: 52,
                rx_filter: 5,
                measurement_time_ms: 360,
            })
            .bonded_nodes(),
            BondedNodes::Skip
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(
            NetworkOperation::ResolveInconsistentMids.kind().to_string(),
            "resolveInconsistentMids"
        );
        assert_eq!(
            serde_json::to_value(OperationKind::TestRfSignal).unwrap(),
            serde_json::json!("testRfSignal")
        );
    }
}
