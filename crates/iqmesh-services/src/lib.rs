//! IQMESH network operations
//!
//! Turns one logical network-wide operation into a sequenced, retried and
//! aggregated set of DPA transactions:
//! - FRC batch planning and result aggregation over the 63-node limit
//! - Coordinator MID table reconciliation
//! - Ping, restart, RF signal test, configuration read, maintenance, FRC
//!   response time measurement and coordinator restore
//! - Operation results with status codes and an optional transaction trail

pub mod config;
pub mod error;
pub mod frc;
pub mod mid;
pub mod operation;
pub mod result;

pub use config::ServiceConfig;
pub use error::{status, Result, ServiceError};
pub use frc::{FrcBatch, FrcBatchPlanner, FrcResultAggregator, ResultWidth};
pub use mid::{MidCheck, MidConsistencyResolver, MidRepair, MidResolution};
pub use operation::read_config::TrConfiguration;
pub use operation::{
    FrcResponseTimeParams, NetworkOperation, NetworkService, OperationKind, OperationRequest,
    RestoreParams, TestRfParams,
};
pub use result::{NodeOutcome, OperationReport, OperationResult, OperationSummary, RawTransaction};
