//! Chain gateway over a bridge node's JSON-RPC API
//!
//! Every operation maps to one `bridge_<operation>` method taking a named
//! parameter object. Token amounts cross the wire as decimal strings.
//! Transaction streams are emulated by polling `bridge_transactions`.

use alloy::primitives::B256;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};
use transfer_pipeline::capability::{
    ApproveRequest, BountyRequest, DeployEventRequest, DepositReceipt, EventDetails, GatewayResult,
    ReleaseQuery, ReleaseReceipt, ReleaseRequest, Subscription, SwapReceipt, TokenWalletRequest,
    TransactionNotice, TxId,
};
use transfer_pipeline::{
    ChainGateway, CreditProcessorState, EventAddress, GatewayError, NetworkId, PendingWithdrawal,
    TransferIdentity, TvmAddress, VaultFees,
};

use crate::bounded_cache::SeenTransactions;
use crate::metrics;
use crate::rpc::RpcClient;

pub struct RpcGateway {
    network: NetworkId,
    rpc: RpcClient,
    poll_interval: Duration,
}

impl RpcGateway {
    pub fn new(network: NetworkId, rpc: RpcClient, poll_interval: Duration) -> Self {
        Self {
            network,
            rpc,
            poll_interval,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        params: Value,
    ) -> GatewayResult<Option<T>> {
        let method = format!("bridge_{}", operation);
        self.rpc
            .call(&method, params)
            .await
            .inspect_err(|e| metrics::record_gateway_error(&self.network, e))
    }

    async fn call_required<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        params: Value,
    ) -> GatewayResult<T> {
        self.call(operation, params).await?.ok_or_else(|| {
            GatewayError::MissingState(format!("{} returned nothing on {}", operation, self.network))
        })
    }

    async fn submit<R: Serialize>(&self, operation: &str, request: &R) -> GatewayResult<TxId> {
        self.call_required(operation, encode(request)?).await
    }

    async fn units(&self, operation: &str, params: Value) -> GatewayResult<u128> {
        let value: Value = self.call_required(operation, params).await?;
        parse_units(&value)
    }
}

fn encode<R: Serialize>(request: &R) -> GatewayResult<Value> {
    serde_json::to_value(request).map_err(|e| GatewayError::Rejected(format!("cannot encode request: {}", e)))
}

/// Base units from a decimal string or a JSON integer
pub fn parse_units(value: &Value) -> GatewayResult<u128> {
    let parsed = match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64().map(u128::from),
        _ => None,
    };
    parsed.ok_or_else(|| GatewayError::Rpc {
        code: -32000,
        message: format!("invalid token amount {}", value),
    })
}

#[async_trait]
impl ChainGateway for RpcGateway {
    fn network(&self) -> &NetworkId {
        &self.network
    }

    async fn latest_block(&self) -> GatewayResult<u64> {
        self.call_required("latest_block", json!({})).await
    }

    async fn deposit(&self, identity: &TransferIdentity) -> GatewayResult<Option<DepositReceipt>> {
        self.call("deposit", json!({ "identity": identity })).await
    }

    async fn event_blocks_to_confirm(&self, configuration: &TvmAddress) -> GatewayResult<u64> {
        self.call_required("event_blocks_to_confirm", json!({ "configuration": configuration }))
            .await
    }

    async fn current_round(&self) -> GatewayResult<u32> {
        self.call_required("current_round", json!({})).await
    }

    async fn event_details(&self, event: &EventAddress) -> GatewayResult<Option<EventDetails>> {
        self.call("event_details", json!({ "event": event })).await
    }

    async fn deploy_event(&self, request: &DeployEventRequest) -> GatewayResult<TxId> {
        self.submit("deploy_event", request).await
    }

    async fn release(&self, query: &ReleaseQuery) -> GatewayResult<Option<ReleaseReceipt>> {
        self.call("release", encode(query)?).await
    }

    async fn submit_release(&self, request: &ReleaseRequest) -> GatewayResult<TxId> {
        self.submit("submit_release", request).await
    }

    async fn swap(&self, event: &EventAddress) -> GatewayResult<Option<SwapReceipt>> {
        self.call("swap", json!({ "event": event })).await
    }

    async fn pending_withdrawal(&self, withdrawal_id: &B256) -> GatewayResult<Option<PendingWithdrawal>> {
        self.call("pending_withdrawal", json!({ "withdrawal_id": withdrawal_id }))
            .await
    }

    async fn set_bounty(&self, request: &BountyRequest) -> GatewayResult<TxId> {
        let params = json!({
            "withdrawal": request.withdrawal,
            "withdrawal_hash": request.withdrawal_hash,
            "bounty": request.bounty.to_string(),
            "sender": request.sender,
        });
        self.call_required("set_bounty", params).await
    }

    async fn credit_processor(
        &self,
        processor: &TvmAddress,
    ) -> GatewayResult<Option<CreditProcessorState>> {
        self.call("credit_processor", json!({ "processor": processor }))
            .await
    }

    async fn token_wallet_deployed(&self, owner: &str, token: &str) -> GatewayResult<bool> {
        self.call_required("token_wallet_deployed", json!({ "owner": owner, "token": token }))
            .await
    }

    async fn deploy_token_wallet(&self, request: &TokenWalletRequest) -> GatewayResult<TxId> {
        self.submit("deploy_token_wallet", request).await
    }

    async fn vault_fees(&self, vault: &str) -> GatewayResult<VaultFees> {
        self.call_required("vault_fees", json!({ "vault": vault })).await
    }

    async fn vault_balance(&self, vault: &str) -> GatewayResult<u128> {
        self.units("vault_balance", json!({ "vault": vault })).await
    }

    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> GatewayResult<u128> {
        self.units(
            "allowance",
            json!({ "token": token, "owner": owner, "spender": spender }),
        )
        .await
    }

    async fn approve(&self, request: &ApproveRequest) -> GatewayResult<TxId> {
        let params = json!({
            "token": request.token,
            "owner": request.owner,
            "spender": request.spender,
            "amount": request.amount.map(|a| a.to_string()),
        });
        self.call_required("approve", params).await
    }

    async fn quote_credit(&self, token_root: &TvmAddress, gas_amount: u128) -> GatewayResult<u128> {
        self.units(
            "quote_credit",
            json!({ "token_root": token_root, "gas_amount": gas_amount.to_string() }),
        )
        .await
    }

    /// Poll `bridge_transactions` and forward ids not seen before
    async fn subscribe(
        &self,
        scope: &str,
        sink: mpsc::Sender<TransactionNotice>,
    ) -> GatewayResult<Subscription> {
        let mut seen = SeenTransactions::default();
        for tx_id in self
            .call::<Vec<TxId>>("transactions", json!({ "scope": scope }))
            .await?
            .unwrap_or_default()
        {
            seen.insert(tx_id);
        }

        let rpc = RpcClient::new(self.rpc.urls().to_vec(), self.poll_interval.max(Duration::from_secs(1)))?;
        let network = self.network.clone();
        let scope = scope.to_string();
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let txs = match rpc
                    .call::<Vec<TxId>>("bridge_transactions", json!({ "scope": &scope }))
                    .await
                {
                    Ok(txs) => txs.unwrap_or_default(),
                    Err(e) => {
                        warn!(network = %network, scope = %scope, error = %e, "Transaction poll failed");
                        continue;
                    }
                };
                for tx_id in txs {
                    if !seen.insert(tx_id.clone()) {
                        continue;
                    }
                    debug!(network = %network, scope = %scope, tx = %tx_id, "New transaction");
                    let notice = TransactionNotice {
                        scope: scope.clone(),
                        tx_id,
                    };
                    if sink.send(notice).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Subscription::new(move || handle.abort()))
    }
}
