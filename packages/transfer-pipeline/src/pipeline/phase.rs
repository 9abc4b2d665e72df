//! Phase machine shared by every topology
//!
//! Holds the three phase states in watch channels. Guards are check-and-set
//! inside `send_if_modified`, so two concurrent `prepare()` calls cannot both
//! move the phase to `pending`.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::SkipReason;
use crate::aggregator::{EventBus, PipelineEvent};
use crate::error::{ErrorReporter, PipelineError};
use crate::registry::PipelineKey;
use crate::types::{PhaseStatus, PrepareState, ReleaseState, TransferState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Transfer,
    Prepare,
    Release,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Transfer => "transfer",
            Phase::Prepare => "prepare",
            Phase::Release => "release",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay event as seen on chain during one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareObservation {
    pub status: PhaseStatus,
    pub is_deployed: bool,
    pub is_outdated: bool,
}

pub struct PhaseMachine {
    key: PipelineKey,
    transfer: watch::Sender<TransferState>,
    prepare: watch::Sender<PrepareState>,
    release: watch::Sender<ReleaseState>,
    halted: Mutex<Option<String>>,
    /// When the pending token wallet deploy was submitted
    token_deploy_started: Mutex<Option<Instant>>,
    bus: EventBus,
    reporter: Arc<dyn ErrorReporter>,
}

impl PhaseMachine {
    pub fn new(key: PipelineKey, bus: EventBus, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            key,
            transfer: watch::channel(TransferState::default()).0,
            prepare: watch::channel(PrepareState::default()).0,
            release: watch::channel(ReleaseState::default()).0,
            halted: Mutex::new(None),
            token_deploy_started: Mutex::new(None),
            bus,
            reporter,
        }
    }

    pub fn key(&self) -> &PipelineKey {
        &self.key
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn transfer(&self) -> TransferState {
        *self.transfer.borrow()
    }

    pub fn prepare(&self) -> PrepareState {
        *self.prepare.borrow()
    }

    pub fn release(&self) -> ReleaseState {
        *self.release.borrow()
    }

    pub fn subscribe_transfer(&self) -> watch::Receiver<TransferState> {
        self.transfer.subscribe()
    }

    pub fn subscribe_prepare(&self) -> watch::Receiver<PrepareState> {
        self.prepare.subscribe()
    }

    pub fn subscribe_release(&self) -> watch::Receiver<ReleaseState> {
        self.release.subscribe()
    }

    // ------------------------------------------------------------------
    // Observations
    // ------------------------------------------------------------------

    /// Record source confirmation depth; confirmed once depth reaches the requirement
    pub fn observe_transfer(&self, confirmations: u64, blocks_to_confirm: u64) {
        let mut moved = None;
        self.transfer.send_if_modified(|state| {
            let mut changed = state.observe_confirmations(confirmations);
            if state.event_blocks_to_confirm != Some(blocks_to_confirm) {
                state.event_blocks_to_confirm = Some(blocks_to_confirm);
                changed = true;
            }
            let next = if state.has_enough_confirmations() {
                PhaseStatus::Confirmed
            } else {
                PhaseStatus::Pending
            };
            if state.status.advance(next) {
                moved = Some(next);
                changed = true;
            }
            changed
        });
        if let Some(status) = moved {
            self.emit(Phase::Transfer, status);
        }
    }

    pub fn observe_prepare(&self, observation: PrepareObservation) {
        let mut moved = None;
        self.prepare.send_if_modified(|state| {
            let before = *state;
            if state.status.advance(observation.status) {
                moved = Some(observation.status);
            }
            state.is_deployed |= observation.is_deployed;
            state.is_outdated = observation.is_outdated;
            if state.is_deployed || state.status.is_terminal() {
                state.is_deploying = false;
            }
            if state.status.is_terminal() {
                state.is_broadcasting = false;
            }
            *state != before
        });
        if let Some(status) = moved {
            self.emit(Phase::Prepare, status);
        }
    }

    /// Token wallet deploy submitted and still inside `timeout`
    pub fn token_deploy_in_flight(&self, timeout: Duration) -> bool {
        self.prepare().is_token_deploying && !self.token_deploy_expired(timeout)
    }

    fn token_deploy_expired(&self, timeout: Duration) -> bool {
        self.token_deploy_started
            .lock()
            .ok()
            .and_then(|started| *started)
            .map_or(true, |started| started.elapsed() >= timeout)
    }

    /// Atomically claim the token wallet deploy; an expired claim may be retaken
    pub fn try_begin_token_deploy(&self, timeout: Duration) -> Result<(), SkipReason> {
        let mut result = Ok(());
        self.prepare.send_if_modified(|state| {
            if state.is_token_deploying && !self.token_deploy_expired(timeout) {
                result = Err(SkipReason::AlreadyInProgress);
                return false;
            }
            if let Ok(mut started) = self.token_deploy_started.lock() {
                *started = Some(Instant::now());
            }
            let changed = !state.is_token_deploying;
            state.is_token_deploying = true;
            changed
        });
        result
    }

    /// Clear the token wallet deploy flag once the wallet exists or the deploy failed
    pub fn end_token_deploy(&self) {
        if let Ok(mut started) = self.token_deploy_started.lock() {
            *started = None;
        }
        self.prepare.send_if_modified(|state| {
            std::mem::replace(&mut state.is_token_deploying, false)
        });
    }

    /// Drop a deploy that never produced a wallet within `timeout`
    pub fn expire_token_deploy(&self, timeout: Duration) -> bool {
        if !self.prepare().is_token_deploying || !self.token_deploy_expired(timeout) {
            return false;
        }
        self.end_token_deploy();
        true
    }

    pub fn observe_release(&self, status: PhaseStatus, is_released: bool) {
        let mut moved = None;
        self.release.send_if_modified(|state| {
            let before = *state;
            if state.status.advance(status) {
                moved = Some(status);
            }
            state.is_released |= is_released;
            *state != before
        });
        if let Some(status) = moved {
            self.emit(Phase::Release, status);
        }
    }

    // ------------------------------------------------------------------
    // Prepare guards
    // ------------------------------------------------------------------

    /// Read-only prepare precondition
    pub fn check_prepare(&self) -> Result<(), SkipReason> {
        if self.halted().is_some() {
            return Err(SkipReason::Halted);
        }
        blocked_by(self.prepare().status)?;
        if self.transfer().status != PhaseStatus::Confirmed {
            return Err(SkipReason::SourceNotConfirmed);
        }
        Ok(())
    }

    /// Atomically move prepare `disabled → pending`
    pub fn try_begin_prepare(&self) -> Result<(), SkipReason> {
        self.check_prepare()?;
        let mut result = Ok(());
        self.prepare.send_if_modified(|state| match blocked_by(state.status) {
            Err(reason) => {
                result = Err(reason);
                false
            }
            Ok(()) => {
                state.status = PhaseStatus::Pending;
                state.is_deploying = true;
                true
            }
        });
        if result.is_ok() {
            self.emit(Phase::Prepare, PhaseStatus::Pending);
        }
        result
    }

    pub fn rollback_prepare(&self) {
        let mut rolled_back = false;
        self.prepare.send_if_modified(|state| {
            rolled_back = state.status.rollback();
            let was_deploying = std::mem::replace(&mut state.is_deploying, false);
            rolled_back || was_deploying
        });
        if rolled_back {
            self.emit(Phase::Prepare, PhaseStatus::Disabled);
        }
    }

    // ------------------------------------------------------------------
    // Broadcast guards
    // ------------------------------------------------------------------

    /// Broadcast is offered only for a pending, outdated event whose source is
    /// past `event_blocks_to_confirm * multiplier` confirmations
    pub fn check_broadcast(&self, multiplier: u64) -> Result<(), SkipReason> {
        if self.halted().is_some() {
            return Err(SkipReason::Halted);
        }
        let prepare = self.prepare();
        if prepare.status != PhaseStatus::Pending
            || !prepare.is_outdated
            || !self.transfer().is_stuck(multiplier)
        {
            return Err(SkipReason::NotStuck);
        }
        if prepare.is_broadcasting {
            return Err(SkipReason::AlreadyInProgress);
        }
        Ok(())
    }

    pub fn try_begin_broadcast(&self, multiplier: u64) -> Result<(), SkipReason> {
        self.check_broadcast(multiplier)?;
        let mut result = Ok(());
        self.prepare.send_if_modified(|state| {
            if state.status != PhaseStatus::Pending || !state.is_outdated {
                result = Err(SkipReason::NotStuck);
                false
            } else if state.is_broadcasting {
                result = Err(SkipReason::AlreadyInProgress);
                false
            } else {
                state.is_broadcasting = true;
                true
            }
        });
        result
    }

    pub fn end_broadcast(&self) {
        self.prepare.send_if_modified(|state| {
            std::mem::replace(&mut state.is_broadcasting, false)
        });
    }

    // ------------------------------------------------------------------
    // Release guards
    // ------------------------------------------------------------------

    pub fn check_release(&self) -> Result<(), SkipReason> {
        if self.halted().is_some() {
            return Err(SkipReason::Halted);
        }
        blocked_by(self.release().status)?;
        if self.prepare().status != PhaseStatus::Confirmed {
            return Err(SkipReason::EventNotConfirmed);
        }
        Ok(())
    }

    pub fn try_begin_release(&self) -> Result<(), SkipReason> {
        self.check_release()?;
        let mut result = Ok(());
        self.release.send_if_modified(|state| match blocked_by(state.status) {
            Err(reason) => {
                result = Err(reason);
                false
            }
            Ok(()) => {
                state.status = PhaseStatus::Pending;
                true
            }
        });
        if result.is_ok() {
            self.emit(Phase::Release, PhaseStatus::Pending);
        }
        result
    }

    pub fn rollback_release(&self) {
        let mut rolled_back = false;
        self.release.send_if_modified(|state| {
            rolled_back = state.status.rollback();
            rolled_back
        });
        if rolled_back {
            self.emit(Phase::Release, PhaseStatus::Disabled);
        }
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    pub fn halted(&self) -> Option<String> {
        self.halted.lock().ok().and_then(|h| h.clone())
    }

    pub fn halt(&self, message: impl Into<String>) {
        if let Ok(mut halted) = self.halted.lock() {
            if halted.is_none() {
                *halted = Some(message.into());
            }
        }
    }

    /// Report through the central reporter; fatal errors halt the pipeline
    pub fn fail(&self, operation: &str, error: &PipelineError) {
        self.reporter.report(&self.key.to_string(), operation, error);
        if error.is_fatal() {
            self.halt(error.to_string());
        }
    }

    fn emit(&self, phase: Phase, status: PhaseStatus) {
        debug!(
            pipeline = %self.key,
            phase = %phase,
            status = %status,
            "Phase changed"
        );
        self.bus.publish(PipelineEvent::PhaseChanged {
            key: self.key.clone(),
            phase,
            status,
        });
    }
}

/// Statuses that block starting an action on a phase
fn blocked_by(status: PhaseStatus) -> Result<(), SkipReason> {
    match status {
        PhaseStatus::Disabled => Ok(()),
        PhaseStatus::Pending => Err(SkipReason::AlreadyInProgress),
        PhaseStatus::Confirmed => Err(SkipReason::AlreadyConfirmed),
        PhaseStatus::Rejected => Err(SkipReason::Rejected),
    }
}
