//! Tracker service: owns the pipeline registry and the summary view
//!
//! Transfers enter either from `TRACK_TRANSFERS` at startup or through the
//! HTTP API. Each tracked route gets exactly one running pipeline; their
//! events feed the summary aggregator and the metrics.

use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use transfer_pipeline::capability::TxId;
use transfer_pipeline::{
    resolve_path, ActionOutcome, BountyRejection, EventBus, Gateways, Pipeline, PipelineDeps,
    PipelineError, PipelineKey, PipelineRegistry, RouteMode, RouteResolution, SummaryAggregator,
    TransferSummary,
};

use crate::assets::load_asset_registry;
use crate::config::{Config, TrackedTransfer};
use crate::gateway::RpcGateway;
use crate::metrics::{self, MetricsReporter};
use crate::rpc::RpcClient;
use crate::wallet::build_wallets;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("not a transfer route: {path} (redirect to {redirect})")]
    NotTransfer { path: String, redirect: &'static str },
    #[error("no tracked transfer {0}")]
    UnknownPipeline(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Bounty(#[from] BountyRejection),
}

/// Tracker statistics shared with the HTTP server
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    pub tracker_id: String,
    pub started_at: DateTime<Utc>,
    pub active_pipelines: usize,
    pub track_failures: u64,
    pub last_poll: Option<DateTime<Utc>>,
}

pub type SharedStats = Arc<RwLock<TrackerStats>>;

pub struct TrackerService {
    registry: Arc<PipelineRegistry>,
    aggregator: SummaryAggregator,
    bus: EventBus,
    tracked: Vec<TrackedTransfer>,
    /// Configured transfers whose pipeline could not be built yet
    retry: Mutex<Vec<TrackedTransfer>>,
    poll_interval: Duration,
    stats: SharedStats,
}

impl TrackerService {
    /// Build gateways, wallets and the asset registry from configuration
    pub fn new(config: &Config) -> Result<Self> {
        let mut gateways = Gateways::new(config.hub_network.clone());
        for endpoint in &config.gateways {
            let rpc = RpcClient::new(endpoint.urls.clone(), config.rpc_timeout)
                .map_err(|e| eyre!("Failed to create RPC client for {}: {}", endpoint.network, e))?;
            info!(
                network = %endpoint.network,
                endpoints = endpoint.urls.len(),
                "Gateway configured"
            );
            gateways.insert(Arc::new(RpcGateway::new(
                endpoint.network.clone(),
                rpc,
                config.settings.poll_interval,
            )));
        }

        let deps = PipelineDeps {
            gateways,
            registry: Arc::new(load_asset_registry(&config.asset_registry_file)?),
            wallets: build_wallets(&config.wallets),
            settings: config.settings.clone(),
            reporter: Arc::new(MetricsReporter::default()),
            bus: EventBus::default(),
        };

        Ok(Self::from_parts(
            deps,
            config.tracker_id.clone(),
            config.track_transfers.clone(),
        ))
    }

    pub fn from_parts(deps: PipelineDeps, tracker_id: String, tracked: Vec<TrackedTransfer>) -> Self {
        let bus = deps.bus.clone();
        let poll_interval = deps.settings.poll_interval;
        Self {
            registry: Arc::new(PipelineRegistry::new(deps)),
            aggregator: SummaryAggregator::new(),
            bus,
            tracked,
            retry: Mutex::new(Vec::new()),
            poll_interval,
            stats: Arc::new(RwLock::new(TrackerStats {
                tracker_id,
                started_at: Utc::now(),
                active_pipelines: 0,
                track_failures: 0,
                last_poll: None,
            })),
        }
    }

    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    pub fn aggregator(&self) -> &SummaryAggregator {
        &self.aggregator
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Start following the transfer at `path`; returns its pipeline key
    pub async fn track(&self, path: &str, mode: RouteMode) -> Result<PipelineKey, TrackError> {
        let route = match resolve_path(path) {
            RouteResolution::Transfer(route) => route,
            RouteResolution::Redirect(redirect) => {
                return Err(TrackError::NotTransfer {
                    path: path.to_string(),
                    redirect,
                })
            }
        };

        match self.registry.enter(&route, mode) {
            Ok(pipeline) => {
                self.update_active().await;
                Ok(pipeline.key().clone())
            }
            Err(e) => {
                metrics::TRACK_FAILURES.inc();
                self.stats.write().await.track_failures += 1;
                Err(e.into())
            }
        }
    }

    /// Stop following a transfer
    pub async fn untrack(&self, key: &str) -> Result<(), TrackError> {
        let key = parse_key(key)?;
        if !self.registry.leave(&key) {
            return Err(TrackError::UnknownPipeline(key.to_string()));
        }
        self.update_active().await;
        Ok(())
    }

    pub fn pipeline(&self, key: &str) -> Result<Arc<dyn Pipeline>, TrackError> {
        let parsed = parse_key(key)?;
        self.registry
            .get(&parsed)
            .ok_or_else(|| TrackError::UnknownPipeline(key.to_string()))
    }

    /// Latest summary, falling back to the pipeline itself before its first event
    pub async fn summary(&self, key: &str) -> Result<TransferSummary, TrackError> {
        let pipeline = self.pipeline(key)?;
        let canonical = pipeline.key().to_string();
        Ok(match self.aggregator.get(&canonical).await {
            Some(summary) => summary,
            None => pipeline.summary(),
        })
    }

    pub async fn prepare(&self, key: &str) -> Result<ActionOutcome, TrackError> {
        let outcome = self.pipeline(key)?.prepare().await;
        metrics::record_action("prepare", &outcome);
        Ok(outcome)
    }

    pub async fn broadcast(&self, key: &str) -> Result<ActionOutcome, TrackError> {
        let outcome = self.pipeline(key)?.broadcast().await;
        metrics::record_action("broadcast", &outcome);
        Ok(outcome)
    }

    pub async fn release(&self, key: &str) -> Result<ActionOutcome, TrackError> {
        let outcome = self.pipeline(key)?.release().await;
        metrics::record_action("release", &outcome);
        Ok(outcome)
    }

    pub async fn prepare_second(&self, key: &str) -> Result<ActionOutcome, TrackError> {
        let outcome = self.pipeline(key)?.prepare_second().await;
        metrics::record_action("prepare_second", &outcome);
        Ok(outcome)
    }

    pub async fn broadcast_second(&self, key: &str) -> Result<ActionOutcome, TrackError> {
        let outcome = self.pipeline(key)?.broadcast_second().await;
        metrics::record_action("broadcast_second", &outcome);
        Ok(outcome)
    }

    /// Attach or change the pending withdrawal bounty, `input` in display units
    pub async fn set_bounty(&self, key: &str, input: &str) -> Result<TxId, TrackError> {
        match self.pipeline(key)?.set_bounty(input).await {
            Ok(tx_id) => {
                metrics::record_action("bounty", &ActionOutcome::Submitted(tx_id.clone()));
                Ok(tx_id)
            }
            Err(e) => {
                metrics::record_action_error("bounty");
                Err(e.into())
            }
        }
    }

    /// Run until shutdown; pipelines are disposed on the way out
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!(tracked = self.tracked.len(), "Transfer tracker starting...");

        let aggregator_task = self.aggregator.spawn(&self.bus);
        let metrics_task = metrics::spawn_event_metrics(&self.bus);
        metrics::set_up(true);

        let failed = self.enter_all(&self.tracked).await;
        *self.retry.lock().await = failed;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.poll().await;
                }
            }
        }

        self.registry.dispose_all();
        self.update_active().await;
        metrics::set_up(false);
        aggregator_task.abort();
        metrics_task.abort();
        Ok(())
    }

    /// Enter each transfer; returns those worth retrying
    async fn enter_all(&self, transfers: &[TrackedTransfer]) -> Vec<TrackedTransfer> {
        let mut failed = Vec::new();
        for tracked in transfers {
            match self.track(&tracked.path, tracked.mode).await {
                Ok(key) => info!(pipeline = %key, "Tracking transfer"),
                Err(e @ TrackError::NotTransfer { .. }) => {
                    error!(path = %tracked.path, error = %e, "Skipping transfer")
                }
                Err(e) => {
                    warn!(path = %tracked.path, error = %e, "Cannot track transfer yet");
                    failed.push(tracked.clone());
                }
            }
        }
        failed
    }

    async fn poll(&self) {
        let pending = std::mem::take(&mut *self.retry.lock().await);
        if !pending.is_empty() {
            let failed = self.enter_all(&pending).await;
            self.retry.lock().await.extend(failed);
        }

        for key in self.registry.keys() {
            let Some(pipeline) = self.registry.get(&key) else {
                continue;
            };
            if let Some(reason) = pipeline.halted() {
                debug!(pipeline = %key, reason = %reason, "Pipeline halted");
            }
        }
        self.stats.write().await.last_poll = Some(Utc::now());
        self.update_active().await;
    }

    async fn update_active(&self) {
        let active = self.registry.len();
        metrics::ACTIVE_PIPELINES.set(active as i64);
        self.stats.write().await.active_pipelines = active;
    }
}

fn parse_key(key: &str) -> Result<PipelineKey, TrackError> {
    PipelineKey::from_str(key).map_err(|_| TrackError::UnknownPipeline(key.to_string()))
}
