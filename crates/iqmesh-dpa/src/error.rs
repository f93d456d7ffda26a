//! Error types for the DPA protocol layer.

use thiserror::Error;

use crate::transaction::{dpa_error_message, TransactionFailure};

/// Result type alias for DPA operations.
pub type Result<T> = std::result::Result<T, DpaError>;

/// Errors raised while building frames, arbitrating the channel or
/// running transactions.
#[derive(Debug, Error)]
pub enum DpaError {
    /// The RF channel is held by another orchestration or a service-mode holder.
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    /// Transport-level failure, reported with a negative code.
    #[error("Transaction error: {0}")]
    Transaction(TransactionFailure),

    /// Device-reported nonzero response code.
    #[error("DPA error {code}: {message}")]
    Dpa { code: u8, message: &'static str },

    /// FRC status byte above the success range.
    #[error("Bad FRC status: {0}")]
    FrcStatus(u8),

    /// Address outside the valid device range.
    #[error("Invalid device address: {0}")]
    InvalidAddress(u16),

    /// Response frame could not be decoded.
    #[error("Bad response: {0}")]
    BadResponse(String),

    /// Request rejected before any traffic was issued.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DpaError {
    /// Device error for a response code.
    pub fn dpa(code: u8) -> Self {
        DpaError::Dpa {
            code,
            message: dpa_error_message(code),
        }
    }

    /// Numeric code carried into operation results.
    ///
    /// Transport failures are negative, device errors positive. Everything
    /// else has no protocol code and reports `None`.
    pub fn protocol_code(&self) -> Option<i32> {
        match self {
            DpaError::Transaction(failure) => Some(failure.code()),
            DpaError::Dpa { code, .. } => Some(i32::from(*code)),
            _ => None,
        }
    }

    /// Only transport failures are worth another attempt. A request the
    /// interface rejected as malformed fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DpaError::Transaction(failure) if *failure != TransactionFailure::BadRequest
        )
    }
}
