//! Topology variants
//!
//! | Variant | Stages |
//! |---|---|
//! | EVM→TVM | deposit → relay event → hub release |
//! | TVM→EVM | hub deposit → relay event → pending withdrawal → EVM release |
//! | EVM→EVM | inbound leg → hub swap → outbound leg |
//! | Solana→TVM | as EVM→TVM, provisions the recipient token wallet |
//! | TVM→Solana | as TVM→EVM, provisions the recipient token account |
//! | Credit | as EVM→TVM, phases read from the credit processor |
//!
//! Every variant is built from [`InboundLeg`] (any → hub) and
//! [`OutboundLeg`] (hub → EVM/Solana), which share [`LegCore`].

mod credit;
mod evm_evm;
mod inbound;
mod outbound;

pub use credit::CreditPipeline;
pub use evm_evm::DoubleHopPipeline;
pub use inbound::{InboundLeg, InboundPipeline};
pub use outbound::{OutboundLeg, OutboundPipeline, ReleaseTarget};

use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::info;

use crate::address::TvmAddress;
use crate::aggregator::TransferSummary;
use crate::amount::format_units;
use crate::capability::{ChainGateway, DeployEventRequest, DepositReceipt, EventDetails, TxId};
use crate::error::{GatewayError, PipelineError};
use crate::fees::{FeeCalculator, Fees};
use crate::hash::{derive_event_address, EventAddress};
use crate::pipeline::{ActionOutcome, PhaseMachine, Pipeline, PipelineDeps, PrepareObservation, SkipReason};
use crate::registry::PipelineKey;
use crate::route::TransferRoute;
use crate::types::{NetworkId, NetworkKind, PhaseStatus, PipelineConfig, Side, Topology};

/// Build the pipeline for `key`; missing gateways are configuration errors
pub fn build(
    key: PipelineKey,
    route: &TransferRoute,
    deps: &PipelineDeps,
) -> Result<Arc<dyn Pipeline>, PipelineError> {
    deps.gateways.get(&route.from)?;
    deps.gateways.get(&route.to)?;
    deps.gateways.hub()?;

    let deps = deps.clone();
    let (left, right) = (route.from.clone(), route.to.clone());
    let pipeline: Arc<dyn Pipeline> = match key.topology {
        Topology::EvmTvm => Arc::new(InboundPipeline::evm_tvm(key, left, right, deps)),
        Topology::SolanaTvm => Arc::new(InboundPipeline::solana_tvm(key, left, right, deps)),
        Topology::TvmEvm => Arc::new(OutboundPipeline::tvm_evm(key, left, right, deps)?),
        Topology::TvmSolana => Arc::new(OutboundPipeline::tvm_solana(key, left, right, deps)),
        Topology::EvmEvm => Arc::new(DoubleHopPipeline::new(key, left, right, deps)),
        Topology::Credit => Arc::new(CreditPipeline::new(key, left, right, deps)),
    };
    Ok(pipeline)
}

/// Which vault rate a leg charges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeKind {
    Deposit,
    Withdraw,
}

/// State and chain reads shared by inbound and outbound legs
///
/// Deposit, route config and event address are resolved once and cached;
/// they are pure functions of the identity and chain data.
pub struct LegCore {
    pub key: PipelineKey,
    pub left: NetworkId,
    pub right: NetworkId,
    /// Network holding the deposit
    pub source: NetworkId,
    /// Route carrying the event configuration
    pub config_side: Side,
    pub deps: PipelineDeps,
    pub machine: PhaseMachine,
    deposit: OnceCell<DepositReceipt>,
    config: OnceCell<PipelineConfig>,
    blocks_to_confirm: OnceCell<u64>,
    event: OnceCell<EventAddress>,
    fee: OnceCell<Option<u128>>,
    details: Mutex<Option<EventDetails>>,
}

impl LegCore {
    pub fn new(
        key: PipelineKey,
        left: NetworkId,
        right: NetworkId,
        source: NetworkId,
        config_side: Side,
        deps: PipelineDeps,
    ) -> Self {
        let machine = PhaseMachine::new(key.clone(), deps.bus.clone(), deps.reporter.clone());
        Self {
            key,
            left,
            right,
            source,
            config_side,
            deps,
            machine,
            deposit: OnceCell::new(),
            config: OnceCell::new(),
            blocks_to_confirm: OnceCell::new(),
            event: OnceCell::new(),
            fee: OnceCell::new(),
            details: Mutex::new(None),
        }
    }

    pub async fn deposit(&self) -> Result<&DepositReceipt, PipelineError> {
        self.deposit.get_or_try_init(|| self.fetch_deposit()).await
    }

    async fn fetch_deposit(&self) -> Result<DepositReceipt, PipelineError> {
        let gateway = self.deps.gateways.get(&self.source)?;
        let identity = &self.key.identity;
        let deposit = gateway.deposit(identity).await?.ok_or_else(|| {
            GatewayError::MissingState(format!("deposit {} not indexed yet", identity))
        })?;
        Ok(deposit)
    }

    pub async fn config(&self) -> Result<&PipelineConfig, PipelineError> {
        let deposit = self.deposit().await?;
        self.config
            .get_or_try_init(|| {
                std::future::ready(self.deps.registry.pipeline_config(
                    &deposit.token_root,
                    &self.left,
                    &self.right,
                    self.deps.gateways.hub_network(),
                ))
            })
            .await
    }

    /// Hub event configuration the relay event is deployed under
    pub async fn configuration(&self) -> Result<TvmAddress, PipelineError> {
        let config = self.config().await?;
        config
            .route(self.config_side)
            .event_configuration
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "no event configuration for {} on {}",
                    config.token_root,
                    config.network(self.config_side)
                ))
            })
    }

    pub async fn event_address(&self) -> Result<EventAddress, PipelineError> {
        let configuration = self.configuration().await?;
        let deposit = self.deposit().await?;
        let event = self
            .event
            .get_or_init(|| std::future::ready(derive_event_address(&configuration, &deposit.vote)))
            .await;
        Ok(*event)
    }

    async fn blocks_to_confirm(&self) -> Result<u64, PipelineError> {
        let configuration = self.configuration().await?;
        self.blocks_to_confirm
            .get_or_try_init(|| self.fetch_blocks_to_confirm(configuration))
            .await
            .copied()
    }

    async fn fetch_blocks_to_confirm(&self, configuration: TvmAddress) -> Result<u64, PipelineError> {
        let hub = self.deps.gateways.hub()?;
        Ok(hub.event_blocks_to_confirm(&configuration).await?)
    }

    /// Source confirmation depth
    pub async fn observe_transfer(&self) -> Result<(), PipelineError> {
        let deposit = self.deposit().await?;
        let required = self.blocks_to_confirm().await?;
        let latest = self.deps.gateways.get(&self.source)?.latest_block().await?;
        self.machine
            .observe_transfer(latest.saturating_sub(deposit.block_number), required);
        Ok(())
    }

    /// Relay event state; outdated once its round trails `round_gateway`'s
    pub async fn observe_event(
        &self,
        round_gateway: &Arc<dyn ChainGateway>,
    ) -> Result<Option<EventDetails>, PipelineError> {
        let event = self.event_address().await?;
        let hub = self.deps.gateways.hub()?;
        let Some(details) = hub.event_details(&event).await? else {
            return Ok(None);
        };

        // A deployed event is at least pending
        let status = match details.status {
            PhaseStatus::Disabled => PhaseStatus::Pending,
            status => status,
        };
        // Event signed in a round the relays have since left
        let is_outdated = details.round_number < round_gateway.current_round().await?;
        self.machine.observe_prepare(PrepareObservation {
            status,
            is_deployed: true,
            is_outdated,
        });

        if let Ok(mut cached) = self.details.lock() {
            *cached = Some(details.clone());
        }
        Ok(Some(details))
    }

    pub fn details(&self) -> Option<EventDetails> {
        self.details.lock().ok().and_then(|d| d.clone())
    }

    /// Vault fee charged on `side`; `None` when no vault is involved
    pub async fn observe_fee(&self, side: Side, kind: FeeKind) -> Result<Option<u128>, PipelineError> {
        self.fee
            .get_or_try_init(|| self.fetch_fee(side, kind))
            .await
            .copied()
    }

    async fn fetch_fee(&self, side: Side, kind: FeeKind) -> Result<Option<u128>, PipelineError> {
        let config = self.config().await?;
        let route = config.route(side);
        let Some(vault) = route.vault.as_deref().filter(|_| !route.is_native) else {
            return Ok(None);
        };
        let amount = self.amount_in(side).await?;
        let rates = self
            .deps
            .gateways
            .get(config.network(side))?
            .vault_fees(vault)
            .await?;
        Ok(Some(match kind {
            FeeKind::Deposit => FeeCalculator::deposit_fee(amount, &rates),
            FeeKind::Withdraw => FeeCalculator::withdraw_fee(amount, &rates),
        }))
    }

    /// Deposit amount expressed in the token decimals of `side`
    pub async fn amount_in(&self, side: Side) -> Result<u128, PipelineError> {
        let deposit = self.deposit().await?;
        let config = self.config().await?;
        let source_decimals = if self.source == self.left {
            config.left_route.decimals
        } else {
            config.right_route.decimals
        };
        Ok(crate::amount::rescale(
            deposit.amount,
            source_decimals,
            config.route(side).decimals,
        ))
    }

    pub fn fee(&self) -> Option<u128> {
        self.fee.get().copied().flatten()
    }

    pub fn cached_config(&self) -> Option<&PipelineConfig> {
        self.config.get()
    }

    pub fn cached_deposit(&self) -> Option<&DepositReceipt> {
        self.deposit.get()
    }

    /// Deploy the relay event from the hub wallet
    pub async fn prepare(&self) -> ActionOutcome {
        if let Err(reason) = self.machine.check_prepare() {
            return reason.into();
        }
        let Some(sender) = self.deps.wallets.connected_address(NetworkKind::Tvm) else {
            return SkipReason::WalletNotConnected.into();
        };
        if let Err(reason) = self.machine.try_begin_prepare() {
            return reason.into();
        }

        match self.submit_event(sender).await {
            Ok(tx) => {
                info!(pipeline = %self.key, tx = %tx, "Relay event submitted");
                ActionOutcome::Submitted(tx)
            }
            Err(e) => {
                self.machine.rollback_prepare();
                self.machine.fail("prepare", &e);
                ActionOutcome::Failed(e.to_string())
            }
        }
    }

    /// Re-submit a relay event stuck in an old round
    pub async fn broadcast(&self) -> ActionOutcome {
        let multiplier = self.deps.settings.stuck_multiplier;
        if let Err(reason) = self.machine.check_broadcast(multiplier) {
            return reason.into();
        }
        let Some(sender) = self.deps.wallets.connected_address(NetworkKind::Tvm) else {
            return SkipReason::WalletNotConnected.into();
        };
        if let Err(reason) = self.machine.try_begin_broadcast(multiplier) {
            return reason.into();
        }

        let result = self.submit_event(sender).await;
        self.machine.end_broadcast();
        match result {
            Ok(tx) => {
                info!(pipeline = %self.key, tx = %tx, "Relay event re-broadcast");
                ActionOutcome::Submitted(tx)
            }
            Err(e) => {
                self.machine.fail("broadcast", &e);
                ActionOutcome::Failed(e.to_string())
            }
        }
    }

    async fn submit_event(&self, sender: String) -> Result<TxId, PipelineError> {
        let configuration = self.configuration().await?;
        let deposit = self.deposit().await?;
        let hub = self.deps.gateways.hub()?;
        let request = DeployEventRequest {
            configuration,
            vote: deposit.vote.clone(),
            sender,
        };
        Ok(hub.deploy_event(&request).await?)
    }

    /// Transaction streams a leg listens to
    pub fn scopes(&self) -> Vec<(Arc<dyn ChainGateway>, String)> {
        let scope = self.key.identity.to_string();
        let mut scopes = Vec::new();
        if let Ok(source) = self.deps.gateways.get(&self.source) {
            scopes.push((source, scope.clone()));
        }
        let destination = if self.source == self.left {
            &self.right
        } else {
            &self.left
        };
        if let Ok(gateway) = self.deps.gateways.get(destination) {
            scopes.push((gateway, scope));
        }
        scopes
    }

    /// Summary fields every leg shares
    pub fn summary(&self) -> TransferSummary {
        let amount = self.deposit.get().zip(self.config.get()).map(|(deposit, config)| {
            let decimals = if self.source == self.left {
                config.left_route.decimals
            } else {
                config.right_route.decimals
            };
            format_units(deposit.amount, decimals)
        });
        TransferSummary {
            key: self.key.to_string(),
            topology: self.key.topology,
            identity: self.key.identity.to_string(),
            left: self.left.clone(),
            right: self.right.clone(),
            amount,
            transfer: self.machine.transfer(),
            prepare: self.machine.prepare(),
            release: self.machine.release(),
            fees: Fees::default(),
            bridge_fee: None,
            event_address: self.event.get().copied(),
            vault_balance: None,
            credit_processor: None,
            pending_withdrawals: Vec::new(),
            parent: None,
            second: None,
            error: self.machine.halted(),
            updated_at: Utc::now(),
        }
    }
}
