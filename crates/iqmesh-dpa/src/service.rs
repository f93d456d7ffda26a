//! DPA service facade.
//!
//! Bundles the channel, the arbiter and the executor. Orchestrations take an
//! [`ExclusiveAccess`] session and send all of their traffic through it;
//! shared traffic outside a session is refused while someone holds the
//! channel exclusively.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::arbiter::{AccessToken, ChannelArbiter};
use crate::config::DpaConfig;
use crate::error::{DpaError, Result};
use crate::executor::DpaTransactionExecutor;
use crate::frc::FrcResponseTime;
use crate::message::{DpaRequest, DpaResponse};
use crate::transaction::{TransactionFailure, TransactionTrail};
use crate::transport::{CoordinatorParameters, DpaChannel};

pub struct DpaService {
    arbiter: ChannelArbiter,
    executor: Arc<DpaTransactionExecutor>,
}

impl DpaService {
    pub fn new(channel: Arc<dyn DpaChannel>, config: DpaConfig) -> Self {
        Self {
            arbiter: ChannelArbiter::new(),
            executor: Arc::new(DpaTransactionExecutor::new(channel, config)),
        }
    }

    pub fn arbiter(&self) -> &ChannelArbiter {
        &self.arbiter
    }

    pub fn coordinator_parameters(&self) -> CoordinatorParameters {
        self.executor.channel().coordinator_parameters()
    }

    /// Open an exclusive session for `holder`. Fails immediately when busy.
    pub fn get_exclusive_access(&self, holder: impl Into<String>) -> Result<ExclusiveAccess> {
        let token = self.arbiter.acquire_exclusive(holder)?;
        Ok(ExclusiveAccess {
            token,
            executor: Arc::clone(&self.executor),
        })
    }

    /// Passive listener access.
    pub fn get_sniffer_access(&self, holder: impl Into<String>) -> Result<AccessToken> {
        self.arbiter.acquire_sniffer(holder)
    }

    /// Hand the channel to an external holder such as a debugging tool.
    /// Orchestrations fail with `ResourceBusy` until the token is dropped.
    pub fn enter_service_mode(&self, holder: impl Into<String>) -> Result<AccessToken> {
        let token = self.arbiter.acquire_exclusive(holder)?;
        info!(holder = token.holder(), "Service mode entered");
        Ok(token)
    }

    /// Shared transaction outside any session.
    pub async fn execute_repeat(
        &self,
        request: &DpaRequest,
        repeat: u8,
        timeout_override: Option<Duration>,
        trail: &mut TransactionTrail,
    ) -> Result<DpaResponse> {
        if self.arbiter.exclusive_holder().is_some() {
            return Err(DpaError::Transaction(TransactionFailure::ExclusiveAccess));
        }
        self.executor
            .execute_repeat(request, repeat, timeout_override, trail)
            .await
    }
}

/// Exclusive session on the channel. Dropping it releases the channel.
pub struct ExclusiveAccess {
    token: AccessToken,
    executor: Arc<DpaTransactionExecutor>,
}

impl ExclusiveAccess {
    pub fn holder(&self) -> &str {
        self.token.holder()
    }

    pub fn is_active(&self) -> bool {
        self.token.is_active()
    }

    pub fn coordinator_parameters(&self) -> CoordinatorParameters {
        self.executor.channel().coordinator_parameters()
    }

    pub fn frc_response_time(&self) -> FrcResponseTime {
        self.executor.frc_response_time()
    }

    /// Host-side FRC response time; returns the previous value.
    pub fn set_frc_response_time(&self, time: FrcResponseTime) -> FrcResponseTime {
        self.executor.set_frc_response_time(time)
    }

    pub async fn execute_repeat(
        &self,
        request: &DpaRequest,
        repeat: u8,
        timeout_override: Option<Duration>,
        trail: &mut TransactionTrail,
    ) -> Result<DpaResponse> {
        if !self.token.is_active() {
            return Err(DpaError::ResourceBusy(format!(
                "exclusive access of {} is no longer held",
                self.token.holder()
            )));
        }
        self.executor
            .execute_repeat(request, repeat, timeout_override, trail)
            .await
    }

    /// Release before drop. Idempotent.
    pub fn release(&mut self) {
        self.token.release();
    }
}
