//! IQMESH DPA protocol layer
//!
//! This crate provides the pieces every network operation is built from:
//! - Device addresses and the 240-bit node bitmap codec
//! - DPA request/response frames and FRC frames
//! - The transport trait for the coordinator channel
//! - A retrying transaction executor that records every attempt
//! - Fail-fast exclusive arbitration of the shared RF channel

pub mod address;
pub mod arbiter;
pub mod bitmap;
pub mod config;
pub mod error;
pub mod executor;
pub mod frc;
pub mod message;
pub mod service;
pub mod transaction;
pub mod transport;

pub use address::{
    DeviceAddress, BROADCAST_ADDRESS, COORDINATOR_ADDRESS, MAX_DEVICE_ADDRESS, TEMPORARY_ADDRESS,
};
pub use arbiter::{AccessMode, AccessToken, ChannelArbiter};
pub use bitmap::{NodeBitmap, BITMAP_LEN};
pub use config::DpaConfig;
pub use error::{DpaError, Result};
pub use executor::DpaTransactionExecutor;
pub use frc::{FrcRequest, FrcResponse, FrcResponseTime};
pub use message::{cmd, pnum, DpaRequest, DpaResponse, HWPID_DO_NOT_CHECK};
pub use service::{DpaService, ExclusiveAccess};
pub use transaction::{DpaTransactionResult, ErrorCode, TransactionFailure, TransactionTrail};
pub use transport::{CoordinatorParameters, DpaChannel};
