//! Operation results and their JSON encoding.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use iqmesh_dpa::{DeviceAddress, DpaTransactionResult, TransactionTrail};
use serde::Serialize;

use crate::error::{status, Result};
use crate::mid::MidCheck;
use crate::operation::OperationKind;
use crate::operation::read_config::TrConfiguration;

/// Result for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeOutcome {
    /// Answered a ping or acknowledged a restart
    Responded(bool),
    /// RF test counter; `None` when the node did not answer
    RfSignal { counter: Option<u8> },
    /// Coordinator and device MID comparison
    Mid(MidCheck),
    /// Recorded MID broadcast for bond validation
    BondValidated { mid: u32 },
    /// FRC response time reported by the node's application
    #[serde(rename_all = "camelCase")]
    FrcResponseTime {
        responded: bool,
        handled: bool,
        response_time_ms: Option<u32>,
    },
}

/// Operation-specific totals and payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationSummary {
    #[serde(rename_all = "camelCase")]
    Ping {
        hwpid: u16,
        nodes_nr: usize,
        inaccessible_nodes_nr: usize,
    },
    #[serde(rename_all = "camelCase")]
    Restart {
        hwpid: u16,
        nodes_nr: usize,
        inaccessible_nodes_nr: usize,
    },
    #[serde(rename_all = "camelCase")]
    TestRfSignal {
        device_addr: u8,
        nodes_nr: usize,
        inaccessible_nodes_nr: usize,
    },
    ReadConfig(Box<TrConfiguration>),
    #[serde(rename_all = "camelCase")]
    InconsistentMids {
        nodes_nr: usize,
        inconsistent_nodes: Vec<DeviceAddress>,
        repaired_nodes: Vec<DeviceAddress>,
        failed_nodes: Vec<DeviceAddress>,
        inaccessible_nodes: Vec<DeviceAddress>,
    },
    #[serde(rename_all = "camelCase")]
    DuplicatedAddresses {
        nodes_nr: usize,
        validation_requests: usize,
    },
    UnbondTemporaryAddress,
    #[serde(rename_all = "camelCase")]
    FrcResponseTime {
        command: u8,
        nodes_nr: usize,
        inaccessible_nodes_nr: usize,
        unhandled_nodes_nr: usize,
        current_response_time_ms: u32,
        recommended_response_time_ms: u32,
    },
    #[serde(rename_all = "camelCase")]
    Restore {
        device_addr: u8,
        blocks_written: usize,
        restarted: bool,
    },
}

/// What a successful orchestration hands back before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReport {
    pub per_node: BTreeMap<DeviceAddress, NodeOutcome>,
    pub summary: OperationSummary,
}

impl OperationReport {
    pub fn new(summary: OperationSummary) -> Self {
        Self {
            per_node: BTreeMap::new(),
            summary,
        }
    }

    pub fn with_nodes(mut self, per_node: BTreeMap<DeviceAddress, NodeOutcome>) -> Self {
        self.per_node = per_node;
        self
    }
}

/// One trail entry as emitted in verbose output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub request: String,
    pub request_ts: String,
    pub confirmation: String,
    pub confirmation_ts: String,
    pub response: String,
    pub response_ts: String,
}

impl From<&DpaTransactionResult> for RawTransaction {
    fn from(result: &DpaTransactionResult) -> Self {
        Self {
            request: encode_binary(&result.request),
            request_ts: encode_timestamp(Some(result.request_ts)),
            confirmation: encode_binary(&result.confirmation),
            confirmation_ts: encode_timestamp(result.confirmation_ts),
            response: encode_binary(&result.response),
            response_ts: encode_timestamp(result.response_ts),
        }
    }
}

/// Dotted lowercase hex, e.g. `00.00.02.00.ff.ff`.
pub fn encode_binary(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(".")
}

/// RFC 3339 with milliseconds; empty when the event never happened.
pub fn encode_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Final result of a network operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub operation: OperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    pub status: i32,
    pub status_str: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub per_node_results: BTreeMap<DeviceAddress, NodeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<OperationSummary>,
    /// Every attempt, in order, whether or not verbose output was asked for
    #[serde(skip)]
    pub trail: Vec<DpaTransactionResult>,
    /// Trail as emitted in verbose output
    #[serde(rename = "trail", skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<RawTransaction>>,
}

impl OperationResult {
    pub fn from_outcome(
        operation: OperationKind,
        msg_id: Option<String>,
        outcome: Result<OperationReport>,
        trail: TransactionTrail,
        verbose: bool,
    ) -> Self {
        let trail = trail.into_entries();
        let raw = verbose.then(|| trail.iter().map(RawTransaction::from).collect());
        let (status, status_str, per_node_results, summary) = match outcome {
            Ok(report) => (
                status::OK,
                "ok".to_string(),
                report.per_node,
                Some(report.summary),
            ),
            Err(e) => (e.status(), e.to_string(), BTreeMap::new(), None),
        };
        Self {
            operation,
            msg_id,
            status,
            status_str,
            per_node_results,
            summary,
            trail,
            raw,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == status::OK
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iqmesh_dpa::{cmd, pnum, DpaRequest};

    #[test]
    fn test_encode_binary() {
        assert_eq!(encode_binary(&[0x00, 0x0A, 0xFF]), "00.0a.ff");
        assert_eq!(encode_binary(&[]), "");
    }

    #[test]
    fn test_raw_entry_for_unanswered_request() {
        let request = DpaRequest::coordinator(pnum::COORDINATOR, cmd::coordinator::BONDED_DEVICES);
        let result = DpaTransactionResult::started(&request);
        let raw = RawTransaction::from(&result);
        assert_eq!(raw.request, "00.00.00.02.ff.ff");
        assert!(raw.request_ts.ends_with('Z'));
        assert!(raw.response.is_empty());
        assert!(raw.response_ts.is_empty());
    }
}
