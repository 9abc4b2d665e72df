//! Credit transfers: EVM deposit served by a hub credit processor
//!
//! The processor deploys the relay event and swaps part of the tokens for
//! gas on the recipient's behalf. Prepare and release are both read from
//! its state.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::{FeeKind, LegCore};
use crate::aggregator::{PipelineEvent, TransferSummary};
use crate::error::PipelineError;
use crate::fees::Fees;
use crate::hash::derive_credit_processor_address;
use crate::pipeline::{
    spawn_polling, ActionOutcome, Disposer, Pipeline, PipelineDeps, PollingSlot, PrepareObservation,
};
use crate::registry::PipelineKey;
use crate::types::{
    CreditProcessorState, NetworkId, PrepareState, ReleaseState, Side, TransferState,
};

pub struct CreditPipeline {
    core: LegCore,
    processor: Mutex<Option<CreditProcessorState>>,
    slot: PollingSlot,
}

impl CreditPipeline {
    pub fn new(key: PipelineKey, left: NetworkId, right: NetworkId, deps: PipelineDeps) -> Self {
        let source = left.clone();
        Self {
            core: LegCore::new(key, left, right, source, Side::Left, deps),
            processor: Mutex::new(None),
            slot: PollingSlot::default(),
        }
    }

    async fn observe(&self) -> Result<(), PipelineError> {
        self.core.observe_transfer().await?;
        self.core.observe_fee(Side::Left, FeeKind::Deposit).await?;

        let event = self.core.event_address().await?;
        let hub = self.core.deps.gateways.hub()?;
        let processor = derive_credit_processor_address(&event);
        let Some(state) = hub.credit_processor(&processor).await? else {
            debug!(pipeline = %self.core.key, processor = %processor, "Credit processor not deployed");
            return Ok(());
        };
        if let Ok(mut cached) = self.processor.lock() {
            *cached = Some(state);
        }

        let is_outdated = if state == CreditProcessorState::EventDeployInProgress {
            match hub.event_details(&event).await? {
                Some(details) => details.round_number < hub.current_round().await?,
                None => false,
            }
        } else {
            false
        };
        self.core.machine.observe_prepare(PrepareObservation {
            status: state.prepare_status(),
            is_deployed: state >= CreditProcessorState::EventDeployInProgress,
            is_outdated,
        });
        self.core
            .machine
            .observe_release(state.release_status(), state == CreditProcessorState::Processed);
        Ok(())
    }
}

#[async_trait]
impl Pipeline for CreditPipeline {
    fn key(&self) -> &PipelineKey {
        &self.core.key
    }

    fn transfer_state(&self) -> TransferState {
        self.core.machine.transfer()
    }

    fn prepare_state(&self) -> PrepareState {
        self.core.machine.prepare()
    }

    fn release_state(&self) -> ReleaseState {
        self.core.machine.release()
    }

    fn fees(&self) -> Fees {
        Fees {
            deposit_fee: self.core.fee(),
            ..Fees::default()
        }
    }

    fn summary(&self) -> TransferSummary {
        TransferSummary {
            fees: self.fees(),
            credit_processor: self.credit_processor_state(),
            ..self.core.summary()
        }
    }

    fn init(self: Arc<Self>) -> Disposer {
        let scopes = self.core.scopes();
        let settings = self.core.deps.settings.clone();
        self.slot.get_or_start(|| spawn_polling(&self, scopes, &settings))
    }

    async fn refresh(&self) -> Result<(), PipelineError> {
        let result = self.observe().await;
        self.slot
            .publish(&self.core.deps.bus, PipelineEvent::Updated(self.summary()));
        result
    }

    async fn prepare(&self) -> ActionOutcome {
        self.core.prepare().await
    }

    async fn broadcast(&self) -> ActionOutcome {
        self.core.broadcast().await
    }

    fn dispose(&self) {
        self.slot.dispose();
    }

    fn on_error(&self, operation: &str, error: &PipelineError) {
        self.core.machine.fail(operation, error);
    }

    fn halted(&self) -> Option<String> {
        self.core.machine.halted()
    }

    fn credit_processor_state(&self) -> Option<CreditProcessorState> {
        self.processor.lock().ok().and_then(|p| *p)
    }
}
