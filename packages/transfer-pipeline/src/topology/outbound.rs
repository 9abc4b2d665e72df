//! Outbound leg: hub deposit → relay event → release on EVM or Solana
//!
//! The release target is derived from the confirmed event:
//!
//! - EVM: ABI payload hashed into the vault withdrawal id
//! - Solana: program-derived proposal address for `(round, event)`

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::{FeeKind, LegCore};
use crate::address::parse_evm_address;
use crate::aggregator::{PipelineEvent, TransferSummary};
use crate::amount::format_units;
use crate::capability::{
    ChainGateway, EventDetails, ReleaseQuery, ReleaseRequest, TokenWalletRequest, TxId,
};
use crate::error::PipelineError;
use crate::fees::{FeeCalculator, Fees};
use crate::hash::{encode_release_payload, solana_proposal_address, withdrawal_id};
use crate::pipeline::{
    spawn_polling, ActionOutcome, Disposer, Pipeline, PipelineDeps, PollingSlot, SkipReason,
};
use crate::registry::PipelineKey;
use crate::types::{
    NetworkId, NetworkKind, PendingWithdrawal, PhaseStatus, PrepareState, ReleaseState, Side,
    TransferState,
};
use crate::withdrawals::{BountyRejection, PendingWithdrawalRegistry};

/// Resolved release location and the payload relays signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTarget {
    pub query: ReleaseQuery,
    pub payload: Bytes,
}

impl ReleaseTarget {
    pub fn withdrawal_id(&self) -> Option<B256> {
        match self.query {
            ReleaseQuery::Evm { withdrawal_id } => Some(withdrawal_id),
            _ => None,
        }
    }
}

pub struct OutboundLeg {
    pub core: LegCore,
    provision_token_account: bool,
    target: Mutex<Option<ReleaseTarget>>,
    withdrawal: Mutex<Option<PendingWithdrawal>>,
    vault_balance: Mutex<Option<u128>>,
}

impl OutboundLeg {
    pub fn new(key: PipelineKey, left: NetworkId, right: NetworkId, deps: PipelineDeps) -> Self {
        let source = left.clone();
        Self {
            core: LegCore::new(key, left, right, source, Side::Right, deps),
            provision_token_account: false,
            target: Mutex::new(None),
            withdrawal: Mutex::new(None),
            vault_balance: Mutex::new(None),
        }
    }

    /// Create the recipient's destination token account before releasing
    pub fn with_token_account_provisioning(mut self) -> Self {
        self.provision_token_account = true;
        self
    }

    fn destination(&self) -> Result<Arc<dyn ChainGateway>, PipelineError> {
        self.core.deps.gateways.get(&self.core.right)
    }

    pub async fn observe(&self) -> Result<(), PipelineError> {
        self.core.observe_transfer().await?;
        self.core.observe_fee(Side::Right, FeeKind::Withdraw).await?;

        let destination = self.destination()?;
        let details = self.core.observe_event(&destination).await?;
        if self.provision_token_account {
            self.observe_token_account().await?;
        }
        self.observe_vault_balance().await?;

        if let Some(details) = details.filter(|d| d.status == PhaseStatus::Confirmed) {
            let target = self.release_target(&details).await?;
            if let Ok(mut cached) = self.target.lock() {
                *cached = Some(target);
            }
        }
        self.observe_release().await
    }

    async fn observe_token_account(&self) -> Result<(), PipelineError> {
        let (owner, token) = self.token_account_target().await?;
        let timeout = self.core.deps.settings.token_deploy_timeout;
        if self.destination()?.token_wallet_deployed(&owner, &token).await? {
            self.core.machine.end_token_deploy();
        } else if self.core.machine.expire_token_deploy(timeout) {
            warn!(pipeline = %self.core.key, owner = %owner, "Token account create timed out");
        }
        Ok(())
    }

    async fn token_account_target(&self) -> Result<(String, String), PipelineError> {
        let deposit = self.core.deposit().await?;
        let config = self.core.config().await?;
        Ok((deposit.recipient.clone(), config.right_route.token.clone()))
    }

    async fn observe_vault_balance(&self) -> Result<(), PipelineError> {
        let config = self.core.config().await?;
        if !FeeCalculator::vault_balance_visible(config, Side::Right) {
            return Ok(());
        }
        let Some(vault) = config.right_route.vault.as_deref() else {
            return Ok(());
        };
        let balance = self.destination()?.vault_balance(vault).await?;
        if let Ok(mut cached) = self.vault_balance.lock() {
            *cached = Some(balance);
        }
        Ok(())
    }

    /// Where the destination records the release of this event
    pub async fn release_target(&self, details: &EventDetails) -> Result<ReleaseTarget, PipelineError> {
        let config = self.core.config().await?;
        let configuration = self.core.configuration().await?;
        let event = self.core.event_address().await?;
        let deposit = self.core.deposit().await?;
        let proxy = config.right_route.proxy.as_deref().ok_or_else(|| {
            PipelineError::Configuration(format!("no proxy for {} on {}", config.token_root, config.right))
        })?;

        match config.right.kind {
            NetworkKind::Evm => {
                let proxy = parse_evm_address(proxy)?;
                let payload = encode_release_payload(
                    &deposit.vote,
                    &configuration,
                    &event,
                    proxy,
                    details.round_number,
                )
                .ok_or_else(|| {
                    PipelineError::Configuration("release payload needs a hub event vote".into())
                })?;
                Ok(ReleaseTarget {
                    query: ReleaseQuery::Evm {
                        withdrawal_id: withdrawal_id(&payload),
                    },
                    payload,
                })
            }
            NetworkKind::Solana => {
                let program = Pubkey::from_str(proxy).map_err(|e| {
                    PipelineError::Configuration(format!("invalid release program {}: {}", proxy, e))
                })?;
                let proposal = solana_proposal_address(&program, details.round_number, &event);
                Ok(ReleaseTarget {
                    query: ReleaseQuery::Solana {
                        proposal: proposal.to_string(),
                    },
                    payload: Bytes::from(deposit.vote.encode()),
                })
            }
            NetworkKind::Tvm => Err(PipelineError::Configuration(format!(
                "outbound leg cannot release on {}",
                config.right
            ))),
        }
    }

    async fn observe_release(&self) -> Result<(), PipelineError> {
        let prepare = self.core.machine.prepare().status;
        if prepare == PhaseStatus::Rejected {
            self.core.machine.observe_release(PhaseStatus::Rejected, false);
            return Ok(());
        }
        let Some(target) = self.target() else {
            return Ok(());
        };

        let destination = self.destination()?;
        if let Some(id) = target.withdrawal_id() {
            let withdrawal = destination.pending_withdrawal(&id).await?;
            if let Ok(mut cached) = self.withdrawal.lock() {
                *cached = withdrawal;
            }
        }

        match destination.release(&target.query).await? {
            Some(receipt) if receipt.is_released => {
                self.core.machine.observe_release(PhaseStatus::Confirmed, true);
            }
            Some(_) => self.core.machine.observe_release(PhaseStatus::Pending, false),
            None if self.pending_withdrawal().is_some_and(|w| !w.is_closed()) => {
                self.core.machine.observe_release(PhaseStatus::Pending, false);
            }
            None => {}
        }
        Ok(())
    }

    pub fn target(&self) -> Option<ReleaseTarget> {
        self.target.lock().ok().and_then(|t| t.clone())
    }

    pub fn pending_withdrawal(&self) -> Option<PendingWithdrawal> {
        self.withdrawal.lock().ok().and_then(|w| w.clone())
    }

    /// Destination vault liquidity in destination token units
    pub fn vault_balance(&self) -> Option<String> {
        let balance = self.vault_balance.lock().ok().and_then(|b| *b)?;
        let decimals = self.core.cached_config()?.right_route.decimals;
        Some(format_units(balance, decimals))
    }

    pub async fn prepare(&self) -> ActionOutcome {
        self.core.prepare().await
    }

    pub async fn broadcast(&self) -> ActionOutcome {
        self.core.broadcast().await
    }

    /// Submit the signed payload with the destination wallet
    pub async fn release(&self) -> ActionOutcome {
        let machine = &self.core.machine;
        if let Err(reason) = machine.check_release() {
            return reason.into();
        }
        let kind = self.core.right.kind;
        let Some(sender) = self.core.deps.wallets.connected_address(kind) else {
            return SkipReason::WalletNotConnected.into();
        };
        let (Some(target), Some(details)) = (self.target(), self.core.details()) else {
            return SkipReason::EventNotConfirmed.into();
        };

        if self.provision_token_account {
            match self.provision(&sender).await {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => {}
                Err(e) => {
                    machine.end_token_deploy();
                    machine.fail("deploy_token_account", &e);
                    return ActionOutcome::Failed(e.to_string());
                }
            }
        }

        if let Err(reason) = machine.try_begin_release() {
            return reason.into();
        }
        let request = ReleaseRequest {
            target: target.query,
            payload: target.payload,
            signatures: details.signatures,
            sender,
        };
        let result = match self.destination() {
            Ok(destination) => destination.submit_release(&request).await.map_err(PipelineError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(tx) => {
                info!(pipeline = %self.core.key, tx = %tx, "Release submitted");
                ActionOutcome::Submitted(tx)
            }
            Err(e) => {
                machine.rollback_release();
                machine.fail("release", &e);
                ActionOutcome::Failed(e.to_string())
            }
        }
    }

    async fn provision(&self, sender: &str) -> Result<Option<ActionOutcome>, PipelineError> {
        let timeout = self.core.deps.settings.token_deploy_timeout;
        if self.core.machine.token_deploy_in_flight(timeout) {
            return Ok(Some(SkipReason::AlreadyInProgress.into()));
        }
        let (owner, token) = self.token_account_target().await?;
        let destination = self.destination()?;
        if destination.token_wallet_deployed(&owner, &token).await? {
            self.core.machine.end_token_deploy();
            return Ok(None);
        }
        if let Err(reason) = self.core.machine.try_begin_token_deploy(timeout) {
            return Ok(Some(reason.into()));
        }
        let tx = destination
            .deploy_token_wallet(&TokenWalletRequest {
                owner: owner.clone(),
                token,
                sender: sender.to_string(),
            })
            .await?;
        info!(pipeline = %self.core.key, owner = %owner, tx = %tx, "Token account create submitted");
        Ok(Some(ActionOutcome::Submitted(tx)))
    }
}

// ============================================================================
// Direct pipeline
// ============================================================================

/// TVM→EVM and TVM→Solana transfers, also the second hop of EVM→EVM
pub struct OutboundPipeline {
    leg: OutboundLeg,
    /// Double hop this leg continues
    parent: Option<PipelineKey>,
    withdrawals: Option<PendingWithdrawalRegistry>,
    slot: PollingSlot,
}

impl OutboundPipeline {
    /// EVM destinations track pending withdrawals and bounties
    pub fn tvm_evm(
        key: PipelineKey,
        left: NetworkId,
        right: NetworkId,
        deps: PipelineDeps,
    ) -> Result<Self, PipelineError> {
        let withdrawals = PendingWithdrawalRegistry::new(deps.wallets.clone(), deps.gateways.hub()?);
        Ok(Self {
            leg: OutboundLeg::new(key, left, right, deps),
            parent: None,
            withdrawals: Some(withdrawals),
            slot: PollingSlot::default(),
        })
    }

    pub fn tvm_solana(key: PipelineKey, left: NetworkId, right: NetworkId, deps: PipelineDeps) -> Self {
        Self {
            leg: OutboundLeg::new(key, left, right, deps).with_token_account_provisioning(),
            parent: None,
            withdrawals: None,
            slot: PollingSlot::default(),
        }
    }

    pub fn with_parent(mut self, parent: PipelineKey) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn leg(&self) -> &OutboundLeg {
        &self.leg
    }

    pub fn withdrawal_registry(&self) -> Option<&PendingWithdrawalRegistry> {
        self.withdrawals.as_ref()
    }

    async fn observe(&self) -> Result<(), PipelineError> {
        self.leg.observe().await?;
        if let Some(withdrawals) = &self.withdrawals {
            let deposit = self.leg.core.deposit().await?;
            let config = self.leg.core.config().await?;
            let amount = self
                .leg
                .core
                .amount_in(Side::Right)
                .await?
                .saturating_sub(self.leg.core.fee().unwrap_or(0));
            withdrawals.update(
                &deposit.sender,
                config.right_route.decimals,
                amount,
                self.leg.target().and_then(|t| t.withdrawal_id()),
                self.leg.pending_withdrawal(),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Pipeline for OutboundPipeline {
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
            withdraw_fee: self.leg.core.fee(),
            ..Fees::default()
        }
    }

    fn summary(&self) -> TransferSummary {
        TransferSummary {
            fees: self.fees(),
            vault_balance: self.leg.vault_balance(),
            pending_withdrawals: self.pending_withdrawals(),
            parent: self.parent.as_ref().map(ToString::to_string),
            ..self.leg.core.summary()
        }
    }

    fn init(self: Arc<Self>) -> Disposer {
        let scopes = self.leg.core.scopes();
        let settings = self.leg.core.deps.settings.clone();
        self.slot.get_or_start(|| spawn_polling(&self, scopes, &settings))
    }

    async fn refresh(&self) -> Result<(), PipelineError> {
        let result = self.observe().await;
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

    async fn release(&self) -> ActionOutcome {
        self.leg.release().await
    }

    async fn set_bounty(&self, input: &str) -> Result<TxId, BountyRejection> {
        match &self.withdrawals {
            Some(withdrawals) => withdrawals.set_bounty(input).await,
            None => Err(BountyRejection::NotReady),
        }
    }

    fn pending_withdrawals(&self) -> Vec<PendingWithdrawal> {
        match &self.withdrawals {
            Some(withdrawals) => withdrawals.withdrawals(),
            None => self.leg.pending_withdrawal().into_iter().collect(),
        }
    }
}
