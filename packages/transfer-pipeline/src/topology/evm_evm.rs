//! Double hop: EVM → hub → EVM
//!
//! The first leg releases on the hub, where a swap contract forwards the
//! tokens as a new hub transfer. That transfer is tracked by a child
//! [`OutboundPipeline`] keyed by the swap's contract address. The child
//! publishes its own summary tagged with this pipeline's key; nothing in the
//! child refers back here.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::info;

use super::{InboundLeg, OutboundPipeline};
use crate::address::TransferIdentity;
use crate::aggregator::{PipelineEvent, TransferSummary};
use crate::amount::rescale;
use crate::capability::{SwapReceipt, TxId};
use crate::error::PipelineError;
use crate::fees::{format_fee, Fees};
use crate::pipeline::{
    spawn_polling, ActionOutcome, Disposer, Pipeline, PipelineDeps, PollingSlot, SkipReason,
};
use crate::registry::PipelineKey;
use crate::types::{NetworkId, PhaseStatus, PrepareState, ReleaseState, Topology, TransferState};
use crate::withdrawals::BountyRejection;

pub struct DoubleHopPipeline {
    first: InboundLeg,
    /// Final destination
    destination: NetworkId,
    swap: Mutex<Option<SwapReceipt>>,
    second: OnceCell<Arc<OutboundPipeline>>,
    slot: PollingSlot,
}

impl DoubleHopPipeline {
    pub fn new(key: PipelineKey, left: NetworkId, right: NetworkId, deps: PipelineDeps) -> Self {
        let hub = deps.gateways.hub_network().clone();
        Self {
            first: InboundLeg::new(key, left, hub, deps),
            destination: right,
            swap: Mutex::new(None),
            second: OnceCell::new(),
            slot: PollingSlot::default(),
        }
    }

    pub fn swap(&self) -> Option<SwapReceipt> {
        self.swap.lock().ok().and_then(|s| s.clone())
    }

    pub fn second(&self) -> Option<Arc<OutboundPipeline>> {
        self.second.get().cloned()
    }

    /// Second-leg actions stay closed until the first hop has fully settled
    pub fn can_prepare_second(&self) -> bool {
        let machine = &self.first.core.machine;
        machine.release().status == PhaseStatus::Confirmed
            && machine.prepare().is_outdated
            && self.second.get().is_some()
    }

    async fn observe(&self) -> Result<(), PipelineError> {
        self.first.observe().await?;
        if self.first.core.machine.release().status != PhaseStatus::Confirmed {
            return Ok(());
        }

        let event = self.first.core.event_address().await?;
        let hub = self.first.core.deps.gateways.hub()?;
        let Some(receipt) = hub.swap(&event).await? else {
            return Ok(());
        };
        let next = receipt.next;
        if let Ok(mut swap) = self.swap.lock() {
            *swap = Some(receipt);
        }
        if let Some(next) = next {
            self.attach_second(TransferIdentity::TvmContract(next));
        }
        Ok(())
    }

    fn attach_second(&self, identity: TransferIdentity) {
        if self.second.initialized() {
            return;
        }
        let core = &self.first.core;
        let key = PipelineKey::new(Topology::TvmEvm, identity);
        let second = match OutboundPipeline::tvm_evm(
            key.clone(),
            core.deps.gateways.hub_network().clone(),
            self.destination.clone(),
            core.deps.clone(),
        ) {
            Ok(second) => Arc::new(second.with_parent(core.key.clone())),
            Err(e) => {
                core.machine.fail("attach_second", &e);
                return;
            }
        };
        if self.second.set(second.clone()).is_err() {
            return;
        }
        info!(pipeline = %core.key, second = %key, "Second leg attached");
        if let Some(disposer) = self.slot.current() {
            disposer.add_child(second.init());
        }
    }

    fn second_withdraw_fee(&self) -> Option<u128> {
        let second = self.second.get()?;
        let fee = second.fees().withdraw_fee?;
        let from = second.leg().core.cached_config()?.right_route.decimals;
        let to = self.first.core.cached_config()?.left_route.decimals;
        Some(rescale(fee, from, to))
    }
}

#[async_trait]
impl Pipeline for DoubleHopPipeline {
    fn key(&self) -> &PipelineKey {
        &self.first.core.key
    }

    fn transfer_state(&self) -> TransferState {
        self.first.core.machine.transfer()
    }

    fn prepare_state(&self) -> PrepareState {
        self.first.core.machine.prepare()
    }

    fn release_state(&self) -> ReleaseState {
        self.first.core.machine.release()
    }

    /// Second-leg fee rescaled to the source token's decimals
    fn fees(&self) -> Fees {
        let second = self.second.get().map(|s| s.fees()).unwrap_or_default();
        Fees {
            deposit_fee: self.first.core.fee(),
            withdraw_fee: None,
            second_deposit_fee: second.deposit_fee,
            second_withdraw_fee: self.second_withdraw_fee(),
        }
    }

    fn summary(&self) -> TransferSummary {
        let fees = self.fees();
        let bridge_fee = self
            .first
            .core
            .cached_config()
            .map(|config| format_fee(fees.bridge_fee(), config.left_route.decimals));
        TransferSummary {
            fees,
            bridge_fee,
            right: self.destination.clone(),
            ..self.first.core.summary()
        }
    }

    fn init(self: Arc<Self>) -> Disposer {
        let scopes = self.first.core.scopes();
        let settings = self.first.core.deps.settings.clone();
        let disposer = self.slot.get_or_start(|| spawn_polling(&self, scopes, &settings));
        if let Some(second) = self.second.get() {
            disposer.add_child(second.clone().init());
        }
        disposer
    }

    async fn refresh(&self) -> Result<(), PipelineError> {
        let result = self.observe().await;
        self.slot
            .publish(&self.first.core.deps.bus, PipelineEvent::Updated(self.summary()));
        result
    }

    async fn prepare(&self) -> ActionOutcome {
        self.first.prepare().await
    }

    async fn broadcast(&self) -> ActionOutcome {
        self.first.broadcast().await
    }

    fn dispose(&self) {
        self.slot.dispose();
        if let Some(second) = self.second.get() {
            second.dispose();
        }
    }

    fn on_error(&self, operation: &str, error: &PipelineError) {
        self.first.core.machine.fail(operation, error);
    }

    fn halted(&self) -> Option<String> {
        self.first.core.machine.halted()
    }

    async fn release(&self) -> ActionOutcome {
        match self.second.get() {
            Some(second) => second.release().await,
            None => SkipReason::NotApplicable.into(),
        }
    }

    async fn set_bounty(&self, input: &str) -> Result<TxId, BountyRejection> {
        match self.second.get() {
            Some(second) => second.set_bounty(input).await,
            None => Err(BountyRejection::NotReady),
        }
    }

    async fn prepare_second(&self) -> ActionOutcome {
        match self.second.get() {
            Some(second) if self.can_prepare_second() => second.prepare().await,
            _ => SkipReason::NotApplicable.into(),
        }
    }

    async fn broadcast_second(&self) -> ActionOutcome {
        match self.second.get() {
            Some(second) if self.can_prepare_second() => second.broadcast().await,
            _ => SkipReason::NotApplicable.into(),
        }
    }

    fn second_pipeline(&self) -> Option<Arc<dyn Pipeline>> {
        self.second
            .get()
            .map(|second| second.clone() as Arc<dyn Pipeline>)
    }
}
