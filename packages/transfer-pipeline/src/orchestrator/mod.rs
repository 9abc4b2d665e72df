//! Route orchestrator
//!
//! Owns the steps before a transfer exists:
//!
//! 1. `SelectRoute` - left/right networks and the credit flag pick a topology
//! 2. `SelectAsset` - token and amount, truncated to the token's decimals
//! 3. `SelectApprovalStrategy` - EVM vault routes only; approves when the
//!    allowance is short
//! 4. `Transfer`
//!
//! Steps only move forward, except through [`RouteOrchestrator::back`].
//! Gas-token amounts for credit routes are re-quoted through a debouncer.

mod debounce;

pub use debounce::Debouncer;

use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::address::TvmAddress;
use crate::amount::{format_units, parse_amount, to_units, AmountError};
use crate::capability::{ApproveRequest, AssetRegistry, AssetRoute, Gateways, TxId, Wallets};
use crate::config::PipelineSettings;
use crate::error::{GatewayError, PipelineError};
use crate::types::{NetworkId, NetworkKind, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStep {
    SelectRoute,
    SelectAsset,
    SelectApprovalStrategy,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStrategy {
    /// Approve the maximum once
    #[default]
    Infinity,
    /// Approve exactly the transfer amount
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    StepChanged { step: TransferStep },
    RouteSelected { topology: Topology },
    AmountChanged { amount: String },
    ApprovalSubmitted { tx_id: TxId },
    CreditQuoted { gas_amount: u128, token_amount: String },
    QuoteFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("no route from {left} to {right}")]
    NoTopology { left: NetworkId, right: NetworkId },
    #[error("token {token} has no route on {network}")]
    NoAsset { token: TvmAddress, network: NetworkId },
    #[error("expected step {expected:?}, at {actual:?}")]
    WrongStep {
        expected: TransferStep,
        actual: TransferStep,
    },
    #[error("{0} wallet not connected")]
    WalletNotConnected(NetworkKind),
    #[error("amount not set")]
    MissingAmount,
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("credit quotes need a running tokio runtime")]
    NoRuntime,
}

#[derive(Debug, Clone)]
struct Selection {
    step: TransferStep,
    left: Option<NetworkId>,
    right: Option<NetworkId>,
    topology: Option<Topology>,
    token_root: Option<TvmAddress>,
    asset: Option<AssetRoute>,
    amount: Option<BigDecimal>,
    strategy: ApprovalStrategy,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            step: TransferStep::SelectRoute,
            left: None,
            right: None,
            topology: None,
            token_root: None,
            asset: None,
            amount: None,
            strategy: ApprovalStrategy::default(),
        }
    }
}

impl Selection {
    /// EVM vault routes need an ERC-20 allowance before the deposit
    fn needs_approval(&self) -> bool {
        let evm_source = self.left.as_ref().is_some_and(|l| l.kind == NetworkKind::Evm);
        let vault_asset = self
            .asset
            .as_ref()
            .is_some_and(|a| a.vault.is_some() && !a.is_native);
        evm_source && vault_asset
    }
}

pub struct RouteOrchestrator {
    gateways: Gateways,
    registry: Arc<dyn AssetRegistry>,
    wallets: Wallets,
    settings: PipelineSettings,
    events: broadcast::Sender<OrchestratorEvent>,
    selection: Mutex<Selection>,
    quoter: Mutex<Option<Debouncer<u128>>>,
}

impl RouteOrchestrator {
    pub fn new(
        gateways: Gateways,
        registry: Arc<dyn AssetRegistry>,
        wallets: Wallets,
        settings: PipelineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            gateways,
            registry,
            wallets,
            settings,
            events,
            selection: Mutex::new(Selection::default()),
            quoter: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn step(&self) -> TransferStep {
        self.read(|s| s.step)
    }

    pub fn topology(&self) -> Option<Topology> {
        self.read(|s| s.topology)
    }

    pub fn amount(&self) -> Option<BigDecimal> {
        self.read(|s| s.amount.clone())
    }

    pub fn strategy(&self) -> ApprovalStrategy {
        self.read(|s| s.strategy)
    }

    fn read<R>(&self, f: impl FnOnce(&Selection) -> R) -> R {
        match self.selection.lock() {
            Ok(selection) => f(&selection),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut Selection) -> R) -> R {
        match self.selection.lock() {
            Ok(mut selection) => f(&mut selection),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn publish(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }

    fn expect_step(selection: &Selection, expected: TransferStep) -> Result<(), OrchestratorError> {
        if selection.step != expected {
            return Err(OrchestratorError::WrongStep {
                expected,
                actual: selection.step,
            });
        }
        Ok(())
    }

    fn move_to(&self, selection: &mut Selection, step: TransferStep) {
        if selection.step != step {
            debug!(from = ?selection.step, to = ?step, "Transfer step changed");
            selection.step = step;
            self.publish(OrchestratorEvent::StepChanged { step });
        }
    }

    /// Resolve the topology; direct, credit-swap or double hop
    pub fn select_route(
        &self,
        left: NetworkId,
        right: NetworkId,
        credit: bool,
    ) -> Result<Topology, OrchestratorError> {
        let topology = Topology::resolve(left.kind, right.kind, credit).ok_or_else(|| {
            OrchestratorError::NoTopology {
                left: left.clone(),
                right: right.clone(),
            }
        })?;
        self.gateways.get(&left)?;
        self.gateways.get(&right)?;

        self.write(|s| {
            Self::expect_step(s, TransferStep::SelectRoute)?;
            s.left = Some(left);
            s.right = Some(right);
            s.topology = Some(topology);
            self.move_to(s, TransferStep::SelectAsset);
            Ok::<_, OrchestratorError>(())
        })?;
        info!(topology = %topology, "Route selected");
        self.publish(OrchestratorEvent::RouteSelected { topology });
        Ok(topology)
    }

    /// Pick the token; EVM vault routes continue to approval, others to transfer.
    ///
    /// Credit routes start the gas quoter here, which must happen inside a
    /// tokio runtime.
    pub fn select_asset(&self, token_root: TvmAddress) -> Result<TransferStep, OrchestratorError> {
        let quoter = match self.topology() {
            Some(Topology::Credit) => Some(self.build_quoter(token_root)?),
            _ => None,
        };
        let step = self.write(|s| {
            Self::expect_step(s, TransferStep::SelectAsset)?;
            let left = s.left.clone().ok_or(OrchestratorError::WrongStep {
                expected: TransferStep::SelectRoute,
                actual: s.step,
            })?;
            let asset = self
                .registry
                .resolve(&token_root, &left)
                .ok_or(OrchestratorError::NoAsset {
                    token: token_root,
                    network: left,
                })?;
            s.token_root = Some(token_root);
            s.asset = Some(asset);
            let next = if s.needs_approval() {
                TransferStep::SelectApprovalStrategy
            } else {
                TransferStep::Transfer
            };
            self.move_to(s, next);
            Ok::<_, OrchestratorError>(next)
        })?;

        if let Some(quoter) = quoter {
            if let Ok(mut current) = self.quoter.lock() {
                *current = Some(quoter);
            }
        }
        Ok(step)
    }

    /// Amount in token units, truncated to the selected token's decimals
    pub fn set_amount(&self, input: &str) -> Result<BigDecimal, OrchestratorError> {
        let amount = self.write(|s| {
            let decimals = s
                .asset
                .as_ref()
                .map(|a| a.decimals)
                .ok_or(OrchestratorError::WrongStep {
                    expected: TransferStep::SelectAsset,
                    actual: s.step,
                })?;
            let amount = parse_amount(input, decimals)?;
            s.amount = Some(amount.clone());
            Ok::<_, OrchestratorError>(amount)
        })?;
        self.publish(OrchestratorEvent::AmountChanged {
            amount: amount.to_string(),
        });
        Ok(amount)
    }

    /// Approve the vault when the allowance is short; `None` when it already suffices
    pub async fn approve(&self, strategy: ApprovalStrategy) -> Result<Option<TxId>, OrchestratorError> {
        let selection = self.read(Selection::clone);
        Self::expect_step(&selection, TransferStep::SelectApprovalStrategy)?;
        let (Some(left), Some(asset)) = (selection.left.clone(), selection.asset.clone()) else {
            return Err(OrchestratorError::WrongStep {
                expected: TransferStep::SelectAsset,
                actual: selection.step,
            });
        };
        let amount = selection.amount.ok_or(OrchestratorError::MissingAmount)?;
        let needed = to_units(&amount, asset.decimals)?;
        let owner = self
            .wallets
            .connected_address(NetworkKind::Evm)
            .ok_or(OrchestratorError::WalletNotConnected(NetworkKind::Evm))?;
        let spender = asset.vault.clone().unwrap_or_default();

        let gateway = self.gateways.get(&left)?;
        let allowance = gateway.allowance(&asset.token, &owner, &spender).await?;
        let tx = if allowance >= needed {
            debug!(allowance, needed, "Allowance sufficient");
            None
        } else {
            let request = ApproveRequest {
                token: asset.token.clone(),
                owner,
                spender,
                amount: match strategy {
                    ApprovalStrategy::Infinity => None,
                    ApprovalStrategy::Fixed => Some(needed),
                },
            };
            let tx = gateway.approve(&request).await?;
            info!(tx = %tx, strategy = ?strategy, "Approval submitted");
            self.publish(OrchestratorEvent::ApprovalSubmitted { tx_id: tx.clone() });
            Some(tx)
        };

        self.write(|s| {
            s.strategy = strategy;
            self.move_to(s, TransferStep::Transfer);
        });
        Ok(tx)
    }

    /// Step back once; route changes clear the later selections
    pub fn back(&self) -> TransferStep {
        let step = self.write(|s| {
            let previous = match s.step {
                TransferStep::SelectRoute => TransferStep::SelectRoute,
                TransferStep::SelectAsset => {
                    s.left = None;
                    s.right = None;
                    s.topology = None;
                    TransferStep::SelectRoute
                }
                TransferStep::SelectApprovalStrategy => TransferStep::SelectAsset,
                TransferStep::Transfer if s.needs_approval() => {
                    TransferStep::SelectApprovalStrategy
                }
                TransferStep::Transfer => TransferStep::SelectAsset,
            };
            if previous == TransferStep::SelectAsset || previous == TransferStep::SelectRoute {
                s.token_root = None;
                s.asset = None;
                s.amount = None;
            }
            self.move_to(s, previous);
            previous
        });
        if step <= TransferStep::SelectAsset {
            if let Ok(mut quoter) = self.quoter.lock() {
                *quoter = None;
            }
        }
        step
    }

    /// Requested gas-token amount for a credit route; quoted after the debounce
    pub fn set_gas_amount(&self, gas_amount: u128) {
        match self.quoter.lock() {
            Ok(quoter) => match quoter.as_ref() {
                Some(quoter) => quoter.push(gas_amount),
                None => debug!(gas_amount, "No credit route selected, gas amount ignored"),
            },
            Err(_) => warn!("Credit quoter lock poisoned"),
        }
    }

    fn build_quoter(&self, token_root: TvmAddress) -> Result<Debouncer<u128>, OrchestratorError> {
        let hub = self.gateways.hub()?;
        let decimals = self
            .registry
            .resolve(&token_root, self.gateways.hub_network())
            .map(|route| route.decimals)
            .unwrap_or(0);
        let events = self.events.clone();
        Debouncer::new(self.settings.debounce, move |gas_amount: u128| {
            let hub = hub.clone();
            let events = events.clone();
            async move {
                let event = match hub.quote_credit(&token_root, gas_amount).await {
                    Ok(units) => OrchestratorEvent::CreditQuoted {
                        gas_amount,
                        token_amount: format_units(units, decimals),
                    },
                    Err(e) => {
                        warn!(error = %e, gas_amount, "Credit quote failed");
                        OrchestratorEvent::QuoteFailed {
                            message: e.to_string(),
                        }
                    }
                };
                let _ = events.send(event);
            }
        })
        .map_err(|_| OrchestratorError::NoRuntime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockGateway, MockWallet};
    use std::time::Duration;

    struct Setup {
        orchestrator: RouteOrchestrator,
        evm: Arc<MockGateway>,
        hub: Arc<MockGateway>,
    }

    fn setup() -> Setup {
        let evm = Arc::new(MockGateway::new(fixtures::evm_network()));
        let hub = Arc::new(MockGateway::new(fixtures::hub_network()));
        let solana = Arc::new(MockGateway::new(fixtures::solana_network()));
        let gateways = Gateways::new(fixtures::hub_network())
            .with(hub.clone())
            .with(evm.clone())
            .with(solana);
        let wallets = Wallets {
            evm: Some(Arc::new(MockWallet::connected(fixtures::EVM_OWNER, "1"))),
            ..Wallets::default()
        };
        let orchestrator = RouteOrchestrator::new(
            gateways,
            Arc::new(fixtures::asset_registry()),
            wallets,
            PipelineSettings::default(),
        );
        Setup {
            orchestrator,
            evm,
            hub,
        }
    }

    #[test]
    fn test_steps_move_forward_and_back() {
        let Setup { orchestrator, .. } = setup();
        let topology = orchestrator
            .select_route(fixtures::evm_network(), fixtures::hub_network(), false)
            .unwrap();
        assert_eq!(topology, Topology::EvmTvm);

        let err = orchestrator
            .select_route(fixtures::evm_network(), fixtures::hub_network(), false)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::WrongStep { .. }));

        let step = orchestrator.select_asset(fixtures::token_root()).unwrap();
        assert_eq!(step, TransferStep::SelectApprovalStrategy);
        assert_eq!(orchestrator.back(), TransferStep::SelectAsset);
        assert_eq!(orchestrator.back(), TransferStep::SelectRoute);
        assert_eq!(orchestrator.topology(), None);
    }

    #[test]
    fn test_non_evm_source_skips_approval() {
        let Setup { orchestrator, .. } = setup();
        orchestrator
            .select_route(fixtures::solana_network(), fixtures::hub_network(), false)
            .unwrap();
        let step = orchestrator.select_asset(fixtures::token_root()).unwrap();
        assert_eq!(step, TransferStep::Transfer);
        assert_eq!(orchestrator.back(), TransferStep::SelectAsset);
    }

    #[test]
    fn test_amount_truncated_to_decimals() {
        let Setup { orchestrator, .. } = setup();
        orchestrator
            .select_route(fixtures::evm_network(), fixtures::hub_network(), false)
            .unwrap();
        orchestrator.select_asset(fixtures::token_root()).unwrap();
        let amount = orchestrator.set_amount("1.1234567891").unwrap();
        assert_eq!(amount.to_string(), "1.123456");
    }

    #[tokio::test]
    async fn test_fixed_approval_when_allowance_short() {
        let Setup { orchestrator, evm, .. } = setup();
        orchestrator
            .select_route(fixtures::evm_network(), fixtures::hub_network(), false)
            .unwrap();
        orchestrator.select_asset(fixtures::token_root()).unwrap();
        orchestrator.set_amount("2.5").unwrap();
        evm.set_allowance(1_000_000);

        let tx = orchestrator.approve(ApprovalStrategy::Fixed).await.unwrap();
        assert!(tx.is_some());
        assert_eq!(evm.approve_requests()[0].amount, Some(2_500_000));
        assert_eq!(orchestrator.step(), TransferStep::Transfer);
        assert_eq!(orchestrator.back(), TransferStep::SelectApprovalStrategy);
    }

    #[tokio::test]
    async fn test_sufficient_allowance_skips_approve_call() {
        let Setup { orchestrator, evm, .. } = setup();
        orchestrator
            .select_route(fixtures::evm_network(), fixtures::hub_network(), false)
            .unwrap();
        orchestrator.select_asset(fixtures::token_root()).unwrap();
        orchestrator.set_amount("1").unwrap();
        evm.set_allowance(u128::MAX);

        let tx = orchestrator.approve(ApprovalStrategy::Infinity).await.unwrap();
        assert!(tx.is_none());
        assert_eq!(evm.calls("approve"), 0);
    }

    #[test]
    fn test_credit_asset_outside_runtime_is_an_error() {
        let Setup { orchestrator, .. } = setup();
        orchestrator
            .select_route(fixtures::evm_network(), fixtures::hub_network(), true)
            .unwrap();
        let err = orchestrator.select_asset(fixtures::token_root()).unwrap_err();
        assert!(matches!(err, OrchestratorError::NoRuntime));
        assert_eq!(orchestrator.step(), TransferStep::SelectAsset);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gas_amount_quoted_once_per_burst() {
        let Setup { orchestrator, hub, .. } = setup();
        let mut events = orchestrator.subscribe();
        orchestrator
            .select_route(fixtures::evm_network(), fixtures::hub_network(), true)
            .unwrap();
        orchestrator.select_asset(fixtures::token_root()).unwrap();

        for gas in [1, 10, 100, 1_000, 10_000] {
            orchestrator.set_gas_amount(gas);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hub.calls("quote_credit"), 1);

        let mut quoted = None;
        while let Ok(event) = events.try_recv() {
            if let OrchestratorEvent::CreditQuoted { gas_amount, .. } = event {
                quoted = Some(gas_amount);
            }
        }
        assert_eq!(quoted, Some(10_000));
    }
}
