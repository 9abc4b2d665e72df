//! Inbound leg: EVM or Solana deposit → relay event → release on the hub

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{FeeKind, LegCore};
use crate::aggregator::{PipelineEvent, TransferSummary};
use crate::capability::{ReleaseQuery, TokenWalletRequest};
use crate::error::PipelineError;
use crate::fees::Fees;
use crate::pipeline::{
    spawn_polling, ActionOutcome, Disposer, Pipeline, PipelineDeps, PollingSlot, SkipReason,
};
use crate::registry::PipelineKey;
use crate::types::{NetworkId, NetworkKind, PhaseStatus, PrepareState, ReleaseState, Side, TransferState};

pub struct InboundLeg {
    pub core: LegCore,
    /// Deploy the recipient's hub token wallet before the event
    provision_token_wallet: bool,
}

impl InboundLeg {
    pub fn new(key: PipelineKey, left: NetworkId, right: NetworkId, deps: PipelineDeps) -> Self {
        let source = left.clone();
        Self {
            core: LegCore::new(key, left, right, source, Side::Left, deps),
            provision_token_wallet: false,
        }
    }

    pub fn with_token_wallet_provisioning(mut self) -> Self {
        self.provision_token_wallet = true;
        self
    }

    /// One observation pass over every stage of the leg
    pub async fn observe(&self) -> Result<(), PipelineError> {
        self.core.observe_transfer().await?;
        self.core.observe_fee(Side::Left, FeeKind::Deposit).await?;
        if self.provision_token_wallet {
            self.observe_token_wallet().await?;
        }
        let hub = self.core.deps.gateways.hub()?;
        self.core.observe_event(&hub).await?;
        self.observe_release().await
    }

    async fn observe_token_wallet(&self) -> Result<(), PipelineError> {
        let (owner, token) = self.token_wallet_target().await?;
        let hub = self.core.deps.gateways.hub()?;
        let timeout = self.core.deps.settings.token_deploy_timeout;
        if hub.token_wallet_deployed(&owner, &token).await? {
            self.core.machine.end_token_deploy();
        } else if self.core.machine.expire_token_deploy(timeout) {
            warn!(pipeline = %self.core.key, owner = %owner, "Token wallet deploy timed out");
        }
        Ok(())
    }

    async fn token_wallet_target(&self) -> Result<(String, String), PipelineError> {
        let deposit = self.core.deposit().await?;
        let config = self.core.config().await?;
        Ok((deposit.recipient.clone(), config.token_root.to_string()))
    }

    async fn observe_release(&self) -> Result<(), PipelineError> {
        let prepare = self.core.machine.prepare().status;
        if prepare == PhaseStatus::Rejected {
            self.core.machine.observe_release(PhaseStatus::Rejected, false);
            return Ok(());
        }

        let event = self.core.event_address().await?;
        let hub = self.core.deps.gateways.hub()?;
        let receipt = hub.release(&ReleaseQuery::Hub { event }).await?;
        match receipt {
            Some(receipt) if receipt.is_released => {
                self.core.machine.observe_release(PhaseStatus::Confirmed, true);
            }
            _ if prepare == PhaseStatus::Confirmed => {
                self.core.machine.observe_release(PhaseStatus::Pending, false);
            }
            _ => debug!(pipeline = %self.core.key, "Release not started"),
        }
        Ok(())
    }

    /// Deploy the relay event, provisioning the token wallet first when needed
    pub async fn prepare(&self) -> ActionOutcome {
        if self.provision_token_wallet {
            if let Err(reason) = self.core.machine.check_prepare() {
                return reason.into();
            }
            match self.provision().await {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => {}
                Err(e) => {
                    self.core.machine.end_token_deploy();
                    self.core.machine.fail("deploy_token_wallet", &e);
                    return ActionOutcome::Failed(e.to_string());
                }
            }
        }
        self.core.prepare().await
    }

    /// `Some` when provisioning took the action slot
    async fn provision(&self) -> Result<Option<ActionOutcome>, PipelineError> {
        let timeout = self.core.deps.settings.token_deploy_timeout;
        if self.core.machine.token_deploy_in_flight(timeout) {
            return Ok(Some(SkipReason::AlreadyInProgress.into()));
        }
        let (owner, token) = self.token_wallet_target().await?;
        let hub = self.core.deps.gateways.hub()?;
        if hub.token_wallet_deployed(&owner, &token).await? {
            self.core.machine.end_token_deploy();
            return Ok(None);
        }
        let Some(sender) = self.core.deps.wallets.connected_address(NetworkKind::Tvm) else {
            return Ok(Some(SkipReason::WalletNotConnected.into()));
        };

        if let Err(reason) = self.core.machine.try_begin_token_deploy(timeout) {
            return Ok(Some(reason.into()));
        }
        let tx = hub
            .deploy_token_wallet(&TokenWalletRequest {
                owner: owner.clone(),
                token,
                sender,
            })
            .await?;
        info!(pipeline = %self.core.key, owner = %owner, tx = %tx, "Token wallet deploy submitted");
        Ok(Some(ActionOutcome::Submitted(tx)))
    }

    pub async fn broadcast(&self) -> ActionOutcome {
        self.core.broadcast().await
    }
}

// ============================================================================
// Direct pipeline
// ============================================================================

/// EVM→TVM and Solana→TVM transfers
pub struct InboundPipeline {
    leg: InboundLeg,
    slot: PollingSlot,
}

impl InboundPipeline {
    pub fn evm_tvm(key: PipelineKey, left: NetworkId, right: NetworkId, deps: PipelineDeps) -> Self {
        Self::from_leg(InboundLeg::new(key, left, right, deps))
    }

    /// Solana deposits also provision the recipient's hub token wallet
    pub fn solana_tvm(key: PipelineKey, left: NetworkId, right: NetworkId, deps: PipelineDeps) -> Self {
        Self::from_leg(InboundLeg::new(key, left, right, deps).with_token_wallet_provisioning())
    }

    fn from_leg(leg: InboundLeg) -> Self {
        Self {
            leg,
            slot: PollingSlot::default(),
        }
    }
}

#[async_trait]
impl Pipeline for InboundPipeline {
    fn key(&self) -> &PipelineKey {
        &self.leg.core.key
    }

    fn transfer_state(&self) -> TransferState {
        self.leg.core.machine.transfer()
    }

    fn prepare_state(&self) -> PrepareState {
        self.leg.core.machine.prepare()
    }

    fn release_state(&self) -> ReleaseState {
        self.leg.core.machine.release()
    }

    fn fees(&self) -> Fees {
        Fees {
            deposit_fee: self.leg.core.fee(),
            ..Fees::default()
        }
    }

    fn summary(&self) -> TransferSummary {
        TransferSummary {
            fees: self.fees(),
            ..self.leg.core.summary()
        }
    }

    fn init(self: Arc<Self>) -> Disposer {
        let scopes = self.leg.core.scopes();
        let settings = self.leg.core.deps.settings.clone();
        self.slot.get_or_start(|| spawn_polling(&self, scopes, &settings))
    }

    async fn refresh(&self) -> Result<(), PipelineError> {
        let result = self.leg.observe().await;
        self.slot
            .publish(&self.leg.core.deps.bus, PipelineEvent::Updated(self.summary()));
        result
    }

    async fn prepare(&self) -> ActionOutcome {
        self.leg.prepare().await
    }

    async fn broadcast(&self) -> ActionOutcome {
        self.leg.broadcast().await
    }

    fn dispose(&self) {
        self.slot.dispose();
    }

    fn on_error(&self, operation: &str, error: &PipelineError) {
        self.leg.core.machine.fail(operation, error);
    }

    fn halted(&self) -> Option<String> {
        self.leg.core.machine.halted()
    }
}
