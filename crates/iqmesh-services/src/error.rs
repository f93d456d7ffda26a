//! Service error types and result status codes.

use iqmesh_dpa::DpaError;
use thiserror::Error;

/// Result type alias for network operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Status codes reported in operation results.
pub mod status {
    pub const OK: i32 = 0;
    pub const SERVICE_ERROR: i32 = 1000;
    pub const PARSING_REQUEST_ERROR: i32 = 1001;
    pub const EXCLUSIVE_ACCESS_ERROR: i32 = 1002;
    pub const NO_BONDED_NODES_ERROR: i32 = 1003;
    pub const NO_RESPONDED_NODES_ERROR: i32 = 1004;
    pub const NO_HANDLED_NODES_ERROR: i32 = 1005;
}

/// Errors that end a network operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Request parameters rejected before any traffic.
    #[error("{0}")]
    Parsing(String),

    /// Channel held by another orchestration or a service-mode holder.
    #[error("Exclusive access error: {0}")]
    ExclusiveAccess(String),

    /// Operation needs at least one bonded node.
    #[error("There are no bonded nodes in network.")]
    NoBondedNodes,

    /// No selected node answered the FRC.
    #[error("No node in network responded.")]
    NoRespondedNodes,

    /// Nodes answered but none handles the FRC response time event.
    #[error("No node in network handled FRC response time event.")]
    NoHandledNodes,

    /// Transaction, device or FRC failure.
    #[error(transparent)]
    Dpa(#[from] DpaError),

    /// Operation-level failure.
    #[error("{0}")]
    Service(String),

    /// Other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// Status code for the operation result.
    ///
    /// Transaction failures keep their negative code and device errors their
    /// positive code; everything else maps to a service status.
    pub fn status(&self) -> i32 {
        match self {
            ServiceError::Parsing(_) => status::PARSING_REQUEST_ERROR,
            ServiceError::ExclusiveAccess(_) => status::EXCLUSIVE_ACCESS_ERROR,
            ServiceError::NoBondedNodes => status::NO_BONDED_NODES_ERROR,
            ServiceError::NoRespondedNodes => status::NO_RESPONDED_NODES_ERROR,
            ServiceError::NoHandledNodes => status::NO_HANDLED_NODES_ERROR,
            ServiceError::Dpa(DpaError::ResourceBusy(_)) => status::EXCLUSIVE_ACCESS_ERROR,
            ServiceError::Dpa(e) => e.protocol_code().unwrap_or(status::SERVICE_ERROR),
            ServiceError::Service(_) | ServiceError::Other(_) => status::SERVICE_ERROR,
        }
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        ServiceError::Parsing(message.into())
    }

    pub fn service(message: impl Into<String>) -> Self {
        ServiceError::Service(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iqmesh_dpa::TransactionFailure;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServiceError::NoBondedNodes.status(), 1003);
        assert_eq!(ServiceError::parsing("bad").status(), 1001);
        assert_eq!(ServiceError::NoRespondedNodes.status(), 1004);
        assert_eq!(ServiceError::NoHandledNodes.status(), 1005);
        assert_eq!(
            ServiceError::from(DpaError::Transaction(TransactionFailure::Timeout)).status(),
            -1
        );
        assert_eq!(ServiceError::from(DpaError::dpa(7)).status(), 7);
        assert_eq!(ServiceError::from(DpaError::FrcStatus(0xF0)).status(), 1000);
        assert_eq!(
            ServiceError::from(DpaError::FrcStatus(0xF0)).to_string(),
            "Bad FRC status: 240"
        );
    }
}
