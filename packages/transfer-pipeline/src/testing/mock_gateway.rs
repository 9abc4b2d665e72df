//! In-memory chain gateway
//!
//! Holds whatever chain state a test seeds, records every call and request,
//! and fails any operation on demand.

use alloy::primitives::B256;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::address::{TransferIdentity, TvmAddress};
use crate::capability::{
    ApproveRequest, BountyRequest, ChainGateway, DeployEventRequest, DepositReceipt, EventDetails,
    GatewayResult, ReleaseQuery, ReleaseReceipt, ReleaseRequest, Subscription, SwapReceipt,
    TokenWalletRequest, TransactionNotice, TxId,
};
use crate::error::GatewayError;
use crate::fees::VaultFees;
use crate::hash::EventAddress;
use crate::types::{CreditProcessorState, NetworkId, PendingWithdrawal};

#[derive(Default)]
struct MockState {
    latest_block: u64,
    blocks_to_confirm: u64,
    round: u32,
    deposits: HashMap<TransferIdentity, DepositReceipt>,
    events: HashMap<EventAddress, EventDetails>,
    releases: HashMap<ReleaseQuery, ReleaseReceipt>,
    swaps: HashMap<EventAddress, SwapReceipt>,
    pending_withdrawals: HashMap<B256, PendingWithdrawal>,
    credit_processors: HashMap<TvmAddress, CreditProcessorState>,
    token_wallets: HashSet<(String, String)>,
    vault_fees: VaultFees,
    vault_balance: u128,
    allowance: u128,
    /// Token units per gas unit returned by `quote_credit`
    quote_rate: u128,
    failures: HashMap<String, GatewayError>,
    latency: Option<Duration>,
    calls: Vec<String>,
    deploy_requests: Vec<DeployEventRequest>,
    release_requests: Vec<ReleaseRequest>,
    bounty_requests: Vec<BountyRequest>,
    approve_requests: Vec<ApproveRequest>,
    token_wallet_requests: Vec<TokenWalletRequest>,
    sinks: Vec<(String, mpsc::Sender<TransactionNotice>)>,
    tx_counter: u64,
}

pub struct MockGateway {
    network: NetworkId,
    state: Mutex<MockState>,
    active_subscriptions: Arc<AtomicUsize>,
}

impl MockGateway {
    pub fn new(network: NetworkId) -> Self {
        Self {
            network,
            state: Mutex::new(MockState {
                blocks_to_confirm: 12,
                round: 1,
                quote_rate: 2,
                ..MockState::default()
            }),
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record the call and return an injected failure, if any
    async fn enter(&self, operation: &str) -> GatewayResult<()> {
        let latency = {
            let mut state = self.state();
            state.calls.push(operation.to_string());
            if let Some(error) = state.failures.get(operation) {
                return Err(error.clone());
            }
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }

    fn next_tx(&self, operation: &str) -> TxId {
        let mut state = self.state();
        state.tx_counter += 1;
        format!("{}-{}-{}", self.network, operation, state.tx_counter)
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    pub fn set_latest_block(&self, block: u64) {
        self.state().latest_block = block;
    }

    pub fn set_blocks_to_confirm(&self, blocks: u64) {
        self.state().blocks_to_confirm = blocks;
    }

    pub fn set_round(&self, round: u32) {
        self.state().round = round;
    }

    pub fn add_deposit(&self, identity: TransferIdentity, receipt: DepositReceipt) {
        self.state().deposits.insert(identity, receipt);
    }

    pub fn set_event(&self, event: EventAddress, details: EventDetails) {
        self.state().events.insert(event, details);
    }

    pub fn set_release(&self, query: ReleaseQuery, receipt: ReleaseReceipt) {
        self.state().releases.insert(query, receipt);
    }

    pub fn set_swap(&self, event: EventAddress, receipt: SwapReceipt) {
        self.state().swaps.insert(event, receipt);
    }

    pub fn set_pending_withdrawal(&self, id: B256, withdrawal: PendingWithdrawal) {
        self.state().pending_withdrawals.insert(id, withdrawal);
    }

    pub fn set_credit_processor(&self, processor: TvmAddress, state: CreditProcessorState) {
        self.state().credit_processors.insert(processor, state);
    }

    pub fn add_token_wallet(&self, owner: &str, token: &str) {
        self.state()
            .token_wallets
            .insert((owner.to_string(), token.to_string()));
    }

    pub fn set_vault_fees(&self, fees: VaultFees) {
        self.state().vault_fees = fees;
    }

    pub fn set_vault_balance(&self, balance: u128) {
        self.state().vault_balance = balance;
    }

    pub fn set_allowance(&self, allowance: u128) {
        self.state().allowance = allowance;
    }

    /// Fail every later call of `operation` with `error`
    pub fn fail(&self, operation: &str, error: GatewayError) {
        self.state().failures.insert(operation.to_string(), error);
    }

    pub fn clear_failure(&self, operation: &str) {
        self.state().failures.remove(operation);
    }

    /// Delay every call, to widen race windows
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Push a transaction notice to every subscriber of `scope`
    pub async fn notify(&self, scope: &str, tx_id: &str) {
        let sinks: Vec<_> = self
            .state()
            .sinks
            .iter()
            .filter(|(s, _)| s == scope)
            .map(|(_, sink)| sink.clone())
            .collect();
        for sink in sinks {
            let _ = sink
                .send(TransactionNotice {
                    scope: scope.to_string(),
                    tx_id: tx_id.to_string(),
                })
                .await;
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn calls(&self, operation: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == operation).count()
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.len()
    }

    pub fn deploy_requests(&self) -> Vec<DeployEventRequest> {
        self.state().deploy_requests.clone()
    }

    pub fn release_requests(&self) -> Vec<ReleaseRequest> {
        self.state().release_requests.clone()
    }

    pub fn bounty_requests(&self) -> Vec<BountyRequest> {
        self.state().bounty_requests.clone()
    }

    pub fn approve_requests(&self) -> Vec<ApproveRequest> {
        self.state().approve_requests.clone()
    }

    pub fn token_wallet_requests(&self) -> Vec<TokenWalletRequest> {
        self.state().token_wallet_requests.clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    fn network(&self) -> &NetworkId {
        &self.network
    }

    async fn latest_block(&self) -> GatewayResult<u64> {
        self.enter("latest_block").await?;
        Ok(self.state().latest_block)
    }

    async fn deposit(&self, identity: &TransferIdentity) -> GatewayResult<Option<DepositReceipt>> {
        self.enter("deposit").await?;
        Ok(self.state().deposits.get(identity).cloned())
    }

    async fn event_blocks_to_confirm(&self, _configuration: &TvmAddress) -> GatewayResult<u64> {
        self.enter("event_blocks_to_confirm").await?;
        Ok(self.state().blocks_to_confirm)
    }

    async fn current_round(&self) -> GatewayResult<u32> {
        self.enter("current_round").await?;
        Ok(self.state().round)
    }

    async fn event_details(&self, event: &EventAddress) -> GatewayResult<Option<EventDetails>> {
        self.enter("event_details").await?;
        Ok(self.state().events.get(event).cloned())
    }

    async fn deploy_event(&self, request: &DeployEventRequest) -> GatewayResult<TxId> {
        self.enter("deploy_event").await?;
        self.state().deploy_requests.push(request.clone());
        Ok(self.next_tx("deploy_event"))
    }

    async fn release(&self, query: &ReleaseQuery) -> GatewayResult<Option<ReleaseReceipt>> {
        self.enter("release").await?;
        Ok(self.state().releases.get(query).cloned())
    }

    async fn submit_release(&self, request: &ReleaseRequest) -> GatewayResult<TxId> {
        self.enter("submit_release").await?;
        self.state().release_requests.push(request.clone());
        Ok(self.next_tx("submit_release"))
    }

    async fn swap(&self, event: &EventAddress) -> GatewayResult<Option<SwapReceipt>> {
        self.enter("swap").await?;
        Ok(self.state().swaps.get(event).cloned())
    }

    async fn pending_withdrawal(&self, id: &B256) -> GatewayResult<Option<PendingWithdrawal>> {
        self.enter("pending_withdrawal").await?;
        Ok(self.state().pending_withdrawals.get(id).cloned())
    }

    async fn set_bounty(&self, request: &BountyRequest) -> GatewayResult<TxId> {
        self.enter("set_bounty").await?;
        self.state().bounty_requests.push(request.clone());
        Ok(self.next_tx("set_bounty"))
    }

    async fn credit_processor(
        &self,
        processor: &TvmAddress,
    ) -> GatewayResult<Option<CreditProcessorState>> {
        self.enter("credit_processor").await?;
        Ok(self.state().credit_processors.get(processor).copied())
    }

    async fn token_wallet_deployed(&self, owner: &str, token: &str) -> GatewayResult<bool> {
        self.enter("token_wallet_deployed").await?;
        Ok(self
            .state()
            .token_wallets
            .contains(&(owner.to_string(), token.to_string())))
    }

    async fn deploy_token_wallet(&self, request: &TokenWalletRequest) -> GatewayResult<TxId> {
        self.enter("deploy_token_wallet").await?;
        self.state().token_wallet_requests.push(request.clone());
        Ok(self.next_tx("deploy_token_wallet"))
    }

    async fn vault_fees(&self, _vault: &str) -> GatewayResult<VaultFees> {
        self.enter("vault_fees").await?;
        Ok(self.state().vault_fees)
    }

    async fn vault_balance(&self, _vault: &str) -> GatewayResult<u128> {
        self.enter("vault_balance").await?;
        Ok(self.state().vault_balance)
    }

    async fn allowance(&self, _token: &str, _owner: &str, _spender: &str) -> GatewayResult<u128> {
        self.enter("allowance").await?;
        Ok(self.state().allowance)
    }

    async fn approve(&self, request: &ApproveRequest) -> GatewayResult<TxId> {
        self.enter("approve").await?;
        self.state().approve_requests.push(request.clone());
        Ok(self.next_tx("approve"))
    }

    async fn quote_credit(&self, _token_root: &TvmAddress, gas_amount: u128) -> GatewayResult<u128> {
        self.enter("quote_credit").await?;
        Ok(gas_amount.saturating_mul(self.state().quote_rate))
    }

    async fn subscribe(
        &self,
        scope: &str,
        sink: mpsc::Sender<TransactionNotice>,
    ) -> GatewayResult<Subscription> {
        self.enter("subscribe").await?;
        self.state().sinks.push((scope.to_string(), sink));
        self.active_subscriptions.fetch_add(1, Ordering::SeqCst);
        let active = self.active_subscriptions.clone();
        Ok(Subscription::new(move || {
            active.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}
