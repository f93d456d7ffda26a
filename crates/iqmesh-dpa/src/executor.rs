//! Retrying transaction executor.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::DpaConfig;
use crate::error::{DpaError, Result};
use crate::frc::FrcResponseTime;
use crate::message::{DpaRequest, DpaResponse};
use crate::transaction::{ErrorCode, TransactionFailure, TransactionTrail};
use crate::transport::DpaChannel;

/// Sends requests over a [`DpaChannel`] with bounded retry.
///
/// Also tracks the host-side expectation of the FRC response time, which
/// stretches the timeout of FRC sends.
pub struct DpaTransactionExecutor {
    channel: Arc<dyn DpaChannel>,
    config: DpaConfig,
    frc_response_time: Mutex<FrcResponseTime>,
}

impl DpaTransactionExecutor {
    pub fn new(channel: Arc<dyn DpaChannel>, config: DpaConfig) -> Self {
        Self {
            channel,
            config,
            frc_response_time: Mutex::new(FrcResponseTime::default()),
        }
    }

    pub fn channel(&self) -> &Arc<dyn DpaChannel> {
        &self.channel
    }

    pub fn config(&self) -> &DpaConfig {
        &self.config
    }

    pub fn frc_response_time(&self) -> FrcResponseTime {
        *self.frc_response_time.lock()
    }

    /// Set the host-side FRC response time, returning the previous value.
    pub fn set_frc_response_time(&self, time: FrcResponseTime) -> FrcResponseTime {
        std::mem::replace(&mut *self.frc_response_time.lock(), time)
    }

    /// Timeout used when the caller gives no override.
    pub fn default_timeout(&self, request: &DpaRequest) -> Duration {
        let ms = if request.is_frc_send() {
            self.config.frc_timeout_ms + u64::from(self.frc_response_time().as_millis())
        } else if request.is_coordinator() {
            self.config.default_timeout_ms
        } else {
            self.config.node_timeout_ms
        };
        Duration::from_millis(ms)
    }

    /// Send `request` once, then up to `repeat` more times on transport
    /// failure.
    ///
    /// Every attempt lands in `trail` before this returns, whatever the
    /// outcome. Device errors are terminal.
    pub async fn execute_repeat(
        &self,
        request: &DpaRequest,
        repeat: u8,
        timeout_override: Option<Duration>,
        trail: &mut TransactionTrail,
    ) -> Result<DpaResponse> {
        request.validate()?;
        let timeout = timeout_override.unwrap_or_else(|| self.default_timeout(request));
        let attempts = u16::from(repeat) + 1;
        let mut attempt = 0u16;

        loop {
            attempt += 1;
            let mut result = self.channel.execute(request, timeout).await;

            let outcome = match result.error_code {
                ErrorCode::Ok => match DpaResponse::from_bytes(&result.response) {
                    Ok(response) if response.is_ok() => Ok(response),
                    Ok(response) => {
                        result.error_code = ErrorCode::Dpa(response.response_code);
                        Err(DpaError::dpa(response.response_code))
                    }
                    Err(_) => {
                        result.error_code = ErrorCode::Transaction(TransactionFailure::BadResponse);
                        Err(DpaError::Transaction(TransactionFailure::BadResponse))
                    }
                },
                ErrorCode::Transaction(failure) => Err(DpaError::Transaction(failure)),
                ErrorCode::Dpa(code) => Err(DpaError::dpa(code)),
            };
            trail.record(result);

            match outcome {
                Ok(response) => {
                    debug!(
                        channel = self.channel.name(),
                        nadr = request.nadr,
                        pnum = request.pnum,
                        pcmd = request.pcmd,
                        attempt,
                        "DPA transaction succeeded"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        nadr = request.nadr,
                        pnum = request.pnum,
                        pcmd = request.pcmd,
                        attempt,
                        error = %e,
                        "DPA transaction failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                Err(e) => {
                    warn!(
                        nadr = request.nadr,
                        pnum = request.pnum,
                        pcmd = request.pcmd,
                        attempt,
                        error = %e,
                        "DPA transaction failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}
