//! Capability interfaces consumed by pipelines
//!
//! Pipelines never talk to chain clients directly. They go through three
//! narrow seams:
//!
//! - [`WalletCapability`] - one connected wallet per network family
//! - [`AssetRegistry`] - token root + network to vault/proxy/decimals
//! - [`ChainGateway`] - contract reads, transaction submission and
//!   transaction streams scoped to an address

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::address::{TransferIdentity, TvmAddress};
use crate::error::{GatewayError, PipelineError};
use crate::fees::VaultFees;
use crate::hash::{EventAddress, EventVoteData};
use crate::types::{
    CreditProcessorState, NetworkId, NetworkKind, PendingWithdrawal, PendingWithdrawalId,
    PhaseStatus, PipelineConfig,
};

/// Transaction id as reported by the chain that accepted it
pub type TxId = String;

pub type GatewayResult<T> = Result<T, GatewayError>;

// ============================================================================
// Wallets
// ============================================================================

#[async_trait]
pub trait WalletCapability: Send + Sync {
    fn address(&self) -> Option<String>;
    fn chain_id(&self) -> Option<String>;
    fn is_ready(&self) -> bool;
    fn is_connecting(&self) -> bool;
    fn is_connected(&self) -> bool;
    async fn connect(&self) -> GatewayResult<()>;
    async fn disconnect(&self) -> GatewayResult<()>;
}

/// Wallets per network family; any may be absent
#[derive(Clone, Default)]
pub struct Wallets {
    pub evm: Option<Arc<dyn WalletCapability>>,
    pub tvm: Option<Arc<dyn WalletCapability>>,
    pub solana: Option<Arc<dyn WalletCapability>>,
}

impl Wallets {
    pub fn for_kind(&self, kind: NetworkKind) -> Option<&Arc<dyn WalletCapability>> {
        match kind {
            NetworkKind::Evm => self.evm.as_ref(),
            NetworkKind::Tvm => self.tvm.as_ref(),
            NetworkKind::Solana => self.solana.as_ref(),
        }
    }

    /// Address of the wallet for `kind` if it is connected
    pub fn connected_address(&self, kind: NetworkKind) -> Option<String> {
        self.for_kind(kind)
            .filter(|w| w.is_connected())
            .and_then(|w| w.address())
    }
}

impl fmt::Debug for Wallets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallets")
            .field("evm", &self.evm.as_ref().and_then(|w| w.address()))
            .field("tvm", &self.tvm.as_ref().and_then(|w| w.address()))
            .field("solana", &self.solana.as_ref().and_then(|w| w.address()))
            .finish()
    }
}

// ============================================================================
// Asset Registry
// ============================================================================

/// How a token travels on one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRoute {
    pub network: NetworkId,
    /// Token address on this network
    pub token: String,
    #[serde(default)]
    pub vault: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    pub decimals: u8,
    /// Native currency route; bypasses the vault
    #[serde(default)]
    pub is_native: bool,
    /// Hub event configuration for transfers between this network and the hub
    #[serde(default)]
    pub event_configuration: Option<TvmAddress>,
}

pub trait AssetRegistry: Send + Sync {
    fn resolve(&self, token_root: &TvmAddress, network: &NetworkId) -> Option<AssetRoute>;

    fn is_tvm_native(&self, _token_root: &TvmAddress) -> bool {
        false
    }

    /// Build the full route config for a transfer of `token_root`
    fn pipeline_config(
        &self,
        token_root: &TvmAddress,
        left: &NetworkId,
        right: &NetworkId,
        hub: &NetworkId,
    ) -> Result<PipelineConfig, PipelineError> {
        let missing = |network: &NetworkId| {
            PipelineError::Configuration(format!("no route for {} on {}", token_root, network))
        };
        Ok(PipelineConfig {
            left: left.clone(),
            right: right.clone(),
            hub: hub.clone(),
            token_root: *token_root,
            tvm_native: self.is_tvm_native(token_root),
            left_route: self.resolve(token_root, left).ok_or_else(|| missing(left))?,
            right_route: self.resolve(token_root, right).ok_or_else(|| missing(right))?,
        })
    }
}

/// One token as listed in an asset file
#[derive(Debug, Clone, Deserialize)]
pub struct AssetEntry {
    pub token_root: TvmAddress,
    #[serde(default)]
    pub tvm_native: bool,
    pub routes: Vec<AssetRoute>,
}

/// Map-backed registry
#[derive(Debug, Clone, Default)]
pub struct StaticAssetRegistry {
    routes: HashMap<(TvmAddress, NetworkId), AssetRoute>,
    tvm_native: HashSet<TvmAddress>,
}

impl StaticAssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = AssetEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            if entry.tvm_native {
                registry.tvm_native.insert(entry.token_root);
            }
            for route in entry.routes {
                registry.insert(entry.token_root, route);
            }
        }
        registry
    }

    pub fn insert(&mut self, token_root: TvmAddress, route: AssetRoute) {
        self.routes.insert((token_root, route.network.clone()), route);
    }

    pub fn mark_tvm_native(&mut self, token_root: TvmAddress) {
        self.tvm_native.insert(token_root);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl AssetRegistry for StaticAssetRegistry {
    fn resolve(&self, token_root: &TvmAddress, network: &NetworkId) -> Option<AssetRoute> {
        self.routes.get(&(*token_root, network.clone())).cloned()
    }

    fn is_tvm_native(&self, token_root: &TvmAddress) -> bool {
        self.tvm_native.contains(token_root)
    }
}

// ============================================================================
// Chain Gateway
// ============================================================================

/// Source deposit as observed on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub block_number: u64,
    pub token_root: TvmAddress,
    /// Base units of the source token
    pub amount: u128,
    pub sender: String,
    pub recipient: String,
    pub vote: EventVoteData,
}

/// Relay event contract state on the hub
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventDetails {
    pub status: PhaseStatus,
    pub round_number: u32,
    pub confirms: u32,
    pub rejects: u32,
    pub required_votes: u32,
    #[serde(default)]
    pub signatures: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployEventRequest {
    pub configuration: TvmAddress,
    pub vote: EventVoteData,
    pub sender: String,
}

/// Where a release is recorded on the destination chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReleaseQuery {
    /// Tokens minted or unlocked on the hub for an event
    Hub { event: EventAddress },
    /// EVM vault withdrawal keyed by payload hash
    Evm { withdrawal_id: B256 },
    /// Solana release proposal account
    Solana { proposal: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReleaseReceipt {
    pub is_released: bool,
    #[serde(default)]
    pub tx_id: Option<TxId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub target: ReleaseQuery,
    pub payload: Bytes,
    pub signatures: Vec<Bytes>,
    pub sender: String,
}

/// Hub swap that continues a double-hop transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub status: PhaseStatus,
    /// Hub transfer contract created for the second hop
    #[serde(default)]
    pub next: Option<TvmAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BountyRequest {
    /// `None` until the vault has queued the withdrawal
    pub withdrawal: Option<PendingWithdrawalId>,
    pub withdrawal_hash: B256,
    pub bounty: u128,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenWalletRequest {
    pub owner: String,
    pub token: String,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub token: String,
    pub owner: String,
    pub spender: String,
    /// `None` approves the maximum amount
    pub amount: Option<u128>,
}

/// A new transaction touched a subscribed address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionNotice {
    pub scope: String,
    pub tx_id: TxId,
}

/// Guard for a transaction stream; dropping it unsubscribes
pub struct Subscription {
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(on_drop: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.on_drop.is_some())
            .finish()
    }
}

/// Per-network contract client
///
/// Chain-specific operations default to `Unsupported` so a gateway only
/// implements what its network offers.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    fn network(&self) -> &NetworkId;

    async fn latest_block(&self) -> GatewayResult<u64>;

    /// Source deposit for an identity; `None` while not yet indexed
    async fn deposit(&self, identity: &TransferIdentity) -> GatewayResult<Option<DepositReceipt>>;

    /// Confirmations the hub requires before voting on events of `configuration`
    async fn event_blocks_to_confirm(&self, _configuration: &TvmAddress) -> GatewayResult<u64> {
        Err(self.unsupported("event_blocks_to_confirm"))
    }

    /// Current relay round
    async fn current_round(&self) -> GatewayResult<u32> {
        Err(self.unsupported("current_round"))
    }

    async fn event_details(&self, _event: &EventAddress) -> GatewayResult<Option<EventDetails>> {
        Err(self.unsupported("event_details"))
    }

    async fn deploy_event(&self, _request: &DeployEventRequest) -> GatewayResult<TxId> {
        Err(self.unsupported("deploy_event"))
    }

    async fn release(&self, query: &ReleaseQuery) -> GatewayResult<Option<ReleaseReceipt>>;

    async fn submit_release(&self, _request: &ReleaseRequest) -> GatewayResult<TxId> {
        Err(self.unsupported("submit_release"))
    }

    async fn swap(&self, _event: &EventAddress) -> GatewayResult<Option<SwapReceipt>> {
        Err(self.unsupported("swap"))
    }

    async fn pending_withdrawal(
        &self,
        _withdrawal_id: &B256,
    ) -> GatewayResult<Option<PendingWithdrawal>> {
        Err(self.unsupported("pending_withdrawal"))
    }

    async fn set_bounty(&self, _request: &BountyRequest) -> GatewayResult<TxId> {
        Err(self.unsupported("set_bounty"))
    }

    async fn credit_processor(
        &self,
        _processor: &TvmAddress,
    ) -> GatewayResult<Option<CreditProcessorState>> {
        Err(self.unsupported("credit_processor"))
    }

    async fn token_wallet_deployed(&self, _owner: &str, _token: &str) -> GatewayResult<bool> {
        Err(self.unsupported("token_wallet_deployed"))
    }

    async fn deploy_token_wallet(&self, _request: &TokenWalletRequest) -> GatewayResult<TxId> {
        Err(self.unsupported("deploy_token_wallet"))
    }

    async fn vault_fees(&self, _vault: &str) -> GatewayResult<VaultFees> {
        Err(self.unsupported("vault_fees"))
    }

    async fn vault_balance(&self, _vault: &str) -> GatewayResult<u128> {
        Err(self.unsupported("vault_balance"))
    }

    async fn allowance(&self, _token: &str, _owner: &str, _spender: &str) -> GatewayResult<u128> {
        Err(self.unsupported("allowance"))
    }

    async fn approve(&self, _request: &ApproveRequest) -> GatewayResult<TxId> {
        Err(self.unsupported("approve"))
    }

    /// Token amount a credit processor yields for `gas_amount` of gas token
    async fn quote_credit(&self, _token_root: &TvmAddress, _gas_amount: u128) -> GatewayResult<u128> {
        Err(self.unsupported("quote_credit"))
    }

    /// Stream notices for transactions touching `scope` into `sink`
    async fn subscribe(
        &self,
        scope: &str,
        sink: mpsc::Sender<TransactionNotice>,
    ) -> GatewayResult<Subscription>;

    fn unsupported(&self, operation: &str) -> GatewayError {
        GatewayError::Unsupported(format!("{} on {}", operation, self.network()))
    }
}

/// Gateways by network, with the hub singled out
#[derive(Clone)]
pub struct Gateways {
    hub: NetworkId,
    gateways: HashMap<NetworkId, Arc<dyn ChainGateway>>,
}

impl Gateways {
    pub fn new(hub: NetworkId) -> Self {
        Self {
            hub,
            gateways: HashMap::new(),
        }
    }

    pub fn with(mut self, gateway: Arc<dyn ChainGateway>) -> Self {
        self.insert(gateway);
        self
    }

    pub fn insert(&mut self, gateway: Arc<dyn ChainGateway>) {
        self.gateways.insert(gateway.network().clone(), gateway);
    }

    pub fn hub_network(&self) -> &NetworkId {
        &self.hub
    }

    pub fn hub(&self) -> Result<Arc<dyn ChainGateway>, PipelineError> {
        self.get(&self.hub)
    }

    pub fn get(&self, network: &NetworkId) -> Result<Arc<dyn ChainGateway>, PipelineError> {
        self.gateways
            .get(network)
            .cloned()
            .ok_or_else(|| PipelineError::NoGateway(network.to_string()))
    }

    pub fn networks(&self) -> impl Iterator<Item = &NetworkId> {
        self.gateways.keys()
    }
}

impl fmt::Debug for Gateways {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateways")
            .field("hub", &self.hub)
            .field("networks", &self.gateways.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn route(network: NetworkId) -> AssetRoute {
        AssetRoute {
            network,
            token: "0x00000000000000000000000000000000000000aa".into(),
            vault: Some("0x00000000000000000000000000000000000000bb".into()),
            proxy: None,
            decimals: 6,
            is_native: false,
            event_configuration: Some(TvmAddress::new(0, [3; 32])),
        }
    }

    #[test]
    fn test_pipeline_config_requires_both_routes() {
        let root = TvmAddress::new(0, [1; 32]);
        let mut registry = StaticAssetRegistry::new();
        registry.insert(root, route(NetworkId::evm("1")));

        let err = registry
            .pipeline_config(&root, &NetworkId::evm("1"), &NetworkId::tvm("42"), &NetworkId::tvm("42"))
            .unwrap_err();
        assert!(err.is_fatal());

        registry.insert(root, route(NetworkId::tvm("42")));
        registry.mark_tvm_native(root);
        let config = registry
            .pipeline_config(&root, &NetworkId::evm("1"), &NetworkId::tvm("42"), &NetworkId::tvm("42"))
            .unwrap();
        assert!(config.tvm_native);
        assert_eq!(config.left_route.decimals, 6);
    }

    #[test]
    fn test_subscription_runs_on_drop_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let counter = hits.clone();
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_asset_entries_deserialize() {
        let json = serde_json::json!([{
            "token_root": "0:0101010101010101010101010101010101010101010101010101010101010101",
            "routes": [{"network": "evm-1", "token": "0xaa", "decimals": 18}]
        }]);
        let entries: Vec<AssetEntry> = serde_json::from_value(json).unwrap();
        let registry = StaticAssetRegistry::from_entries(entries);
        assert_eq!(registry.len(), 1);
        let route = registry
            .resolve(&TvmAddress::new(0, [1; 32]), &NetworkId::evm("1"))
            .unwrap();
        assert!(!route.is_native);
        assert!(route.vault.is_none());
    }
}
