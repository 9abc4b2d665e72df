//! Shared pipeline contract
//!
//! Every topology exposes the same observable phases and four actions:
//!
//! - `init()` - start observing; returns the disposer of the running set
//! - `prepare()` - deploy the relay event for a confirmed deposit
//! - `broadcast()` - re-submit a relay event stuck in an old round
//! - `dispose()` - stop observing; idempotent
//!
//! Outbound and double-hop topologies add `release()`, `set_bounty()` and the
//! second-hop actions; elsewhere they are skipped as not applicable.
//!
//! State is only mutated from inside the pipeline, through [`PhaseMachine`].

mod phase;
mod polling;

#[cfg(test)]
mod tests;

pub use phase::{Phase, PhaseMachine, PrepareObservation};
pub use polling::{spawn_polling, Disposer, PollingSlot};

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::aggregator::{EventBus, TransferSummary};
use crate::capability::{AssetRegistry, Gateways, TxId, Wallets};
use crate::config::PipelineSettings;
use crate::error::{ErrorReporter, PipelineError};
use crate::fees::Fees;
use crate::registry::PipelineKey;
use crate::types::{CreditProcessorState, PendingWithdrawal, PrepareState, ReleaseState, TransferState};
use crate::withdrawals::BountyRejection;

/// Why an action did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyInProgress,
    AlreadyConfirmed,
    /// The phase was rejected on chain
    Rejected,
    SourceNotConfirmed,
    EventNotConfirmed,
    WalletNotConnected,
    NotStuck,
    /// The topology does not offer this action right now
    NotApplicable,
    Halted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyInProgress => "already_in_progress",
            SkipReason::AlreadyConfirmed => "already_confirmed",
            SkipReason::Rejected => "rejected",
            SkipReason::SourceNotConfirmed => "source_not_confirmed",
            SkipReason::EventNotConfirmed => "event_not_confirmed",
            SkipReason::WalletNotConnected => "wallet_not_connected",
            SkipReason::NotStuck => "not_stuck",
            SkipReason::NotApplicable => "not_applicable",
            SkipReason::Halted => "halted",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a user-triggered action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ActionOutcome {
    Submitted(TxId),
    Skipped(SkipReason),
    /// Submission failed; state was rolled back
    Failed(String),
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOutcome::Submitted(_) => "submitted",
            ActionOutcome::Skipped(_) => "skipped",
            ActionOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, ActionOutcome::Submitted(_))
    }
}

impl From<SkipReason> for ActionOutcome {
    fn from(reason: SkipReason) -> Self {
        ActionOutcome::Skipped(reason)
    }
}

/// Collaborators handed to every pipeline
#[derive(Clone)]
pub struct PipelineDeps {
    pub gateways: Gateways,
    pub registry: Arc<dyn AssetRegistry>,
    pub wallets: Wallets,
    pub settings: PipelineSettings,
    pub reporter: Arc<dyn ErrorReporter>,
    pub bus: EventBus,
}

impl fmt::Debug for PipelineDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineDeps")
            .field("gateways", &self.gateways)
            .field("wallets", &self.wallets)
            .field("settings", &self.settings)
            .finish()
    }
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    fn key(&self) -> &PipelineKey;

    fn transfer_state(&self) -> TransferState;
    fn prepare_state(&self) -> PrepareState;
    fn release_state(&self) -> ReleaseState;
    fn fees(&self) -> Fees;
    fn summary(&self) -> TransferSummary;

    /// Start polling; while running, returns the existing disposer
    fn init(self: Arc<Self>) -> Disposer;

    /// One observation tick
    async fn refresh(&self) -> Result<(), PipelineError>;

    async fn prepare(&self) -> ActionOutcome;
    async fn broadcast(&self) -> ActionOutcome;

    /// Stop polling and drop subscriptions; safe to call repeatedly
    fn dispose(&self);

    /// Report an error caught at an action or polling boundary
    fn on_error(&self, operation: &str, error: &PipelineError);

    /// Set once the transfer cannot proceed
    fn halted(&self) -> Option<String>;

    /// Submit the release on the destination (outbound topologies)
    async fn release(&self) -> ActionOutcome {
        SkipReason::NotApplicable.into()
    }

    /// Attach or change the pending withdrawal bounty (EVM destinations)
    async fn set_bounty(&self, _input: &str) -> Result<TxId, BountyRejection> {
        Err(BountyRejection::NotReady)
    }

    /// Second-hop prepare (double hop)
    async fn prepare_second(&self) -> ActionOutcome {
        SkipReason::NotApplicable.into()
    }

    async fn broadcast_second(&self) -> ActionOutcome {
        SkipReason::NotApplicable.into()
    }

    fn pending_withdrawals(&self) -> Vec<PendingWithdrawal> {
        Vec::new()
    }

    fn credit_processor_state(&self) -> Option<CreditProcessorState> {
        None
    }

    fn second_pipeline(&self) -> Option<Arc<dyn Pipeline>> {
        None
    }
}
