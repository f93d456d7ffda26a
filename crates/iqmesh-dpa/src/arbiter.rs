//! Exclusive channel arbitration.
//!
//! The RF transceiver cannot multiplex, so every orchestration takes the
//! channel for its whole duration:
//! - one exclusive holder at a time, either an orchestration or an external
//!   service-mode holder
//! - a sniffer grant is passive and is revoked when exclusive access is taken
//! - acquisition never waits; a busy channel fails with `ResourceBusy`
//!
//! Grants are returned as [`AccessToken`] guards that release on drop.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{DpaError, Result};

/// Kind of grant held by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Exclusive,
    Sniffer,
}

#[derive(Debug, Clone)]
struct Grant {
    id: u64,
    holder: String,
}

#[derive(Debug, Default)]
struct ArbiterState {
    next_id: u64,
    exclusive: Option<Grant>,
    sniffer: Option<Grant>,
}

impl ArbiterState {
    fn grant(&mut self, holder: String) -> Grant {
        self.next_id += 1;
        Grant {
            id: self.next_id,
            holder,
        }
    }
}

/// Fail-fast arbiter for the shared RF channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelArbiter {
    state: Arc<Mutex<ArbiterState>>,
}

impl ChannelArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive ownership. Revokes a sniffer grant if one is active.
    pub fn acquire_exclusive(&self, holder: impl Into<String>) -> Result<AccessToken> {
        let holder = holder.into();
        let mut state = self.state.lock();
        if let Some(current) = &state.exclusive {
            debug!(holder = %holder, current = %current.holder, "Exclusive access refused");
            return Err(DpaError::ResourceBusy(format!(
                "Exclusive access already assigned to {}",
                current.holder
            )));
        }
        if let Some(sniffer) = state.sniffer.take() {
            info!(sniffer = %sniffer.holder, "Sniffer access revoked by exclusive access");
        }
        let grant = state.grant(holder);
        let token = self.token(&grant, AccessMode::Exclusive);
        debug!(holder = %grant.holder, "Exclusive access granted");
        state.exclusive = Some(grant);
        Ok(token)
    }

    /// Take passive sniffer access. Fails while any exclusive grant exists.
    pub fn acquire_sniffer(&self, holder: impl Into<String>) -> Result<AccessToken> {
        let holder = holder.into();
        let mut state = self.state.lock();
        if let Some(current) = &state.exclusive {
            return Err(DpaError::ResourceBusy(format!(
                "Exclusive access already assigned to {}",
                current.holder
            )));
        }
        if let Some(current) = &state.sniffer {
            return Err(DpaError::ResourceBusy(format!(
                "Sniffer access already assigned to {}",
                current.holder
            )));
        }
        let grant = state.grant(holder);
        let token = self.token(&grant, AccessMode::Sniffer);
        state.sniffer = Some(grant);
        Ok(token)
    }

    /// Release a token. Repeated or stale releases are no-ops.
    pub fn release(&self, token: &mut AccessToken) {
        token.release();
    }

    /// Current exclusive holder, if any.
    pub fn exclusive_holder(&self) -> Option<String> {
        self.state.lock().exclusive.as_ref().map(|g| g.holder.clone())
    }

    pub fn sniffer_holder(&self) -> Option<String> {
        self.state.lock().sniffer.as_ref().map(|g| g.holder.clone())
    }

    fn token(&self, grant: &Grant, mode: AccessMode) -> AccessToken {
        AccessToken {
            state: Arc::clone(&self.state),
            id: grant.id,
            mode,
            holder: grant.holder.clone(),
            released: false,
        }
    }

    fn is_current(state: &ArbiterState, id: u64, mode: AccessMode) -> bool {
        let slot = match mode {
            AccessMode::Exclusive => &state.exclusive,
            AccessMode::Sniffer => &state.sniffer,
        };
        slot.as_ref().is_some_and(|g| g.id == id)
    }
}

/// Owned grant on the channel. Dropping it releases the grant.
#[derive(Debug)]
pub struct AccessToken {
    state: Arc<Mutex<ArbiterState>>,
    id: u64,
    mode: AccessMode,
    holder: String,
    released: bool,
}

impl AccessToken {
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// False once released or revoked.
    pub fn is_active(&self) -> bool {
        !self.released && ChannelArbiter::is_current(&self.state.lock(), self.id, self.mode)
    }

    /// Give the grant back. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.state.lock();
        if ChannelArbiter::is_current(&state, self.id, self.mode) {
            match self.mode {
                AccessMode::Exclusive => state.exclusive = None,
                AccessMode::Sniffer => state.sniffer = None,
            }
            debug!(holder = %self.holder, mode = ?self.mode, "Channel access released");
        }
    }
}

impl Drop for AccessToken {
    fn drop(&mut self) {
        self.release();
    }
}
