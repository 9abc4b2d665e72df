//! Read-only summary projection
//!
//! Pipelines publish [`PipelineEvent`]s on the [`EventBus`]; the
//! [`SummaryAggregator`] folds them into summaries for display. Nothing here
//! calls back into a pipeline. The second leg of a double hop publishes its
//! own summary tagged with the parent key and is merged in on read.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::fees::Fees;
use crate::hash::EventAddress;
use crate::pipeline::Phase;
use crate::registry::PipelineKey;
use crate::types::{
    CreditProcessorState, NetworkId, PendingWithdrawal, PhaseStatus, PrepareState, ReleaseState,
    Topology, TransferState,
};

/// Snapshot of one pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferSummary {
    pub key: String,
    pub topology: Topology,
    pub identity: String,
    pub left: NetworkId,
    pub right: NetworkId,
    /// Deposit amount in source token units, once known
    pub amount: Option<String>,
    pub transfer: TransferState,
    pub prepare: PrepareState,
    pub release: ReleaseState,
    pub fees: Fees,
    /// Rendered double-hop fee, `-` when undefined
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_fee: Option<String>,
    pub event_address: Option<EventAddress>,
    /// Destination vault liquidity, when a vault backs the route
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_processor: Option<CreditProcessorState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending_withdrawals: Vec<PendingWithdrawal>,
    /// Key of the double hop this leg belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<Box<TransferSummary>>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    PhaseChanged {
        key: PipelineKey,
        phase: Phase,
        status: PhaseStatus,
    },
    Updated(TransferSummary),
    Disposed(PipelineKey),
}

/// Broadcast channel from pipelines to observers
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish; events are dropped when nobody listens
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SummaryAggregator {
    summaries: Arc<RwLock<HashMap<String, TransferSummary>>>,
}

impl SummaryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold events from `bus` until it closes
    pub fn spawn(&self, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        let aggregator = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => aggregator.apply(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Summary aggregator lagged behind pipeline events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn apply(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::Updated(summary) => {
                self.summaries
                    .write()
                    .await
                    .insert(summary.key.clone(), summary);
            }
            PipelineEvent::Disposed(key) => {
                let key = key.to_string();
                let mut summaries = self.summaries.write().await;
                summaries.remove(&key);
                summaries.retain(|_, s| s.parent.as_deref() != Some(key.as_str()));
                debug!(pipeline = %key, "Summary removed");
            }
            PipelineEvent::PhaseChanged { .. } => {}
        }
    }

    /// Summary for `key` with its second leg merged in
    pub async fn get(&self, key: &str) -> Option<TransferSummary> {
        let summaries = self.summaries.read().await;
        let mut summary = summaries.get(key)?.clone();
        if summary.second.is_none() {
            summary.second = summaries
                .values()
                .find(|s| s.parent.as_deref() == Some(key))
                .map(|s| Box::new(s.clone()));
        }
        Some(summary)
    }

    /// Top-level summaries, second legs merged into their parents
    pub async fn list(&self) -> Vec<TransferSummary> {
        let keys: Vec<String> = {
            let summaries = self.summaries.read().await;
            let mut keys: Vec<String> = summaries
                .values()
                .filter(|s| s.parent.is_none())
                .map(|s| s.key.clone())
                .collect();
            keys.sort();
            keys
        };
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(summary) = self.get(&key).await {
                out.push(summary);
            }
        }
        out
    }

    pub async fn len(&self) -> usize {
        self.summaries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.summaries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TransferIdentity;
    use crate::address::TvmAddress;

    fn summary(key: &str, parent: Option<&str>) -> TransferSummary {
        TransferSummary {
            key: key.to_string(),
            topology: Topology::TvmEvm,
            identity: "0:00".into(),
            left: NetworkId::tvm("42"),
            right: NetworkId::evm("1"),
            amount: None,
            transfer: TransferState::default(),
            prepare: PrepareState::default(),
            release: ReleaseState::default(),
            fees: Fees::default(),
            bridge_fee: None,
            event_address: None,
            vault_balance: None,
            credit_processor: None,
            pending_withdrawals: Vec::new(),
            parent: parent.map(str::to_string),
            second: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_second_leg_merged_into_parent() {
        let aggregator = SummaryAggregator::new();
        aggregator
            .apply(PipelineEvent::Updated(summary("evm-evm:0xparent", None)))
            .await;
        aggregator
            .apply(PipelineEvent::Updated(summary(
                "tvm-evm:0:child",
                Some("evm-evm:0xparent"),
            )))
            .await;

        let listed = aggregator.list().await;
        assert_eq!(listed.len(), 1);
        let second = listed[0].second.as_ref().unwrap();
        assert_eq!(second.key, "tvm-evm:0:child");
    }

    #[tokio::test]
    async fn test_disposed_removes_parent_and_children() {
        let aggregator = SummaryAggregator::new();
        let identity = TransferIdentity::TvmContract(TvmAddress::new(0, [1; 32]));
        let key = PipelineKey::new(Topology::TvmEvm, identity);

        aggregator
            .apply(PipelineEvent::Updated(summary(&key.to_string(), None)))
            .await;
        aggregator
            .apply(PipelineEvent::Updated(summary("child", Some(&key.to_string()))))
            .await;
        assert_eq!(aggregator.len().await, 2);

        aggregator.apply(PipelineEvent::Disposed(key)).await;
        assert!(aggregator.is_empty().await);
    }

    #[tokio::test]
    async fn test_spawned_aggregator_follows_bus() {
        let bus = EventBus::new(16);
        let aggregator = SummaryAggregator::new();
        let handle = aggregator.spawn(&bus);

        bus.publish(PipelineEvent::Updated(summary("k", None)));
        for _ in 0..50 {
            if aggregator.get("k").await.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(aggregator.get("k").await.is_some());
        handle.abort();
    }
}
