//! Transaction results and the diagnostic trail.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::DpaRequest;

/// Transport-level failure of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionFailure {
    Timeout,
    QueueFull,
    Aborted,
    Interface,
    InterfaceBusy,
    ExclusiveAccess,
    BadRequest,
    BadResponse,
}

impl TransactionFailure {
    pub fn code(self) -> i32 {
        match self {
            TransactionFailure::Timeout => -1,
            TransactionFailure::QueueFull => -2,
            TransactionFailure::Aborted => -3,
            TransactionFailure::Interface => -4,
            TransactionFailure::InterfaceBusy => -5,
            TransactionFailure::ExclusiveAccess => -6,
            TransactionFailure::BadRequest => -7,
            TransactionFailure::BadResponse => -8,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => TransactionFailure::Timeout,
            -2 => TransactionFailure::QueueFull,
            -3 => TransactionFailure::Aborted,
            -4 => TransactionFailure::Interface,
            -5 => TransactionFailure::InterfaceBusy,
            -6 => TransactionFailure::ExclusiveAccess,
            -7 => TransactionFailure::BadRequest,
            -8 => TransactionFailure::BadResponse,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionFailure::Timeout => "ERROR_TIMEOUT",
            TransactionFailure::QueueFull => "ERROR_IFACE_QUEUE_FULL",
            TransactionFailure::Aborted => "ERROR_ABORTED",
            TransactionFailure::Interface => "ERROR_IFACE",
            TransactionFailure::InterfaceBusy => "ERROR_IFACE_BUSY",
            TransactionFailure::ExclusiveAccess => "ERROR_IFACE_EXCLUSIVE_ACCESS",
            TransactionFailure::BadRequest => "BAD_REQUEST",
            TransactionFailure::BadResponse => "BAD_RESPONSE",
        }
    }
}

impl fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

/// Name of a device-reported response code.
pub fn dpa_error_message(code: u8) -> &'static str {
    match code {
        0 => "STATUS_NO_ERROR",
        1 => "ERROR_FAIL",
        2 => "ERROR_PCMD",
        3 => "ERROR_PNUM",
        4 => "ERROR_ADDR",
        5 => "ERROR_DATA_LEN",
        6 => "ERROR_DATA",
        7 => "ERROR_HWPID",
        8 => "ERROR_NADR",
        9 => "ERROR_IFACE_CUSTOM_HANDLER",
        10 => "ERROR_MISSING_CUSTOM_DPA_HANDLER",
        0x20..=0x3F => "ERROR_USER",
        0xFF => "STATUS_CONFIRMATION",
        _ => "ERROR_UNKNOWN",
    }
}

/// Classified outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Ok,
    Transaction(TransactionFailure),
    Dpa(u8),
}

impl ErrorCode {
    /// 0 for success, negative for transport failures, positive for device errors.
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::Transaction(failure) => failure.code(),
            ErrorCode::Dpa(code) => i32::from(code),
        }
    }

    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::Ok => "ok",
            ErrorCode::Transaction(failure) => failure.as_str(),
            ErrorCode::Dpa(code) => dpa_error_message(code),
        }
    }
}

/// Record of one transaction attempt. Immutable once it is in a trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpaTransactionResult {
    pub request: Vec<u8>,
    pub request_ts: DateTime<Utc>,
    /// Empty when the coordinator handled the request itself
    pub confirmation: Vec<u8>,
    pub confirmation_ts: Option<DateTime<Utc>>,
    pub response: Vec<u8>,
    pub response_ts: Option<DateTime<Utc>>,
    pub error_code: ErrorCode,
}

impl DpaTransactionResult {
    /// Attempt started now for `request`, not answered yet.
    pub fn started(request: &DpaRequest) -> Self {
        Self {
            request: request.to_bytes(),
            request_ts: Utc::now(),
            confirmation: Vec::new(),
            confirmation_ts: None,
            response: Vec::new(),
            response_ts: None,
            error_code: ErrorCode::Ok,
        }
    }

    pub fn with_confirmation(mut self, confirmation: Vec<u8>) -> Self {
        self.confirmation = confirmation;
        self.confirmation_ts = Some(Utc::now());
        self
    }

    pub fn with_response(mut self, response: Vec<u8>) -> Self {
        self.response = response;
        self.response_ts = Some(Utc::now());
        self
    }

    pub fn failed(mut self, failure: TransactionFailure) -> Self {
        self.error_code = ErrorCode::Transaction(failure);
        self
    }
}

/// Ordered attempts of one orchestration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionTrail {
    entries: Vec<DpaTransactionResult>,
}

impl TransactionTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: DpaTransactionResult) {
        self.entries.push(result);
    }

    pub fn entries(&self) -> &[DpaTransactionResult] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&DpaTransactionResult> {
        self.entries.last()
    }

    pub fn into_entries(self) -> Vec<DpaTransactionResult> {
        self.entries
    }
}
