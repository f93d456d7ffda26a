//! Transport seam to the coordinator.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::DpaRequest;
use crate::transaction::DpaTransactionResult;

/// Identity of the coordinator behind a channel, learned at enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorParameters {
    /// DPA version as `major << 8 | minor`, e.g. `0x0414`
    pub dpa_version: u16,
    /// OS version byte
    pub os_version: u8,
    pub os_build: u16,
}

impl CoordinatorParameters {
    /// Version formatted the way it is printed on modules, e.g. `4.14`.
    pub fn dpa_version_string(&self) -> String {
        format!("{:x}.{:02x}", self.dpa_version >> 8, self.dpa_version & 0xFF)
    }
}

/// One physical path to the RF transceiver.
///
/// Implementations perform a single attempt per call and report transport
/// failures through the result's error code. Retry, classification and
/// arbitration live above this trait.
#[async_trait]
pub trait DpaChannel: Send + Sync {
    /// Channel name for logs.
    fn name(&self) -> &str;

    /// Send `request` and wait up to `timeout` for its response.
    async fn execute(&self, request: &DpaRequest, timeout: Duration) -> DpaTransactionResult;

    /// Parameters of the attached coordinator.
    fn coordinator_parameters(&self) -> CoordinatorParameters;
}
