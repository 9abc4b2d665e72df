//! Pipeline registry
//!
//! One pipeline per `(topology, identity)`. Entering a route builds and
//! starts the pipeline (or returns the running one); leaving disposes it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::address::TransferIdentity;
use crate::aggregator::PipelineEvent;
use crate::error::PipelineError;
use crate::pipeline::{Pipeline, PipelineDeps};
use crate::route::{RouteError, TransferRoute};
use crate::topology;
use crate::types::Topology;

/// Identity of a running pipeline, rendered `topology:identity`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub topology: Topology,
    pub identity: TransferIdentity,
}

impl PipelineKey {
    pub fn new(topology: Topology, identity: TransferIdentity) -> Self {
        Self { topology, identity }
    }
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topology, self.identity)
    }
}

impl FromStr for PipelineKey {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (topology, identity) = s
            .split_once(':')
            .ok_or_else(|| RouteError::NotTransfer(s.to_string()))?;
        let topology = [
            Topology::EvmTvm,
            Topology::TvmEvm,
            Topology::EvmEvm,
            Topology::SolanaTvm,
            Topology::TvmSolana,
            Topology::Credit,
        ]
        .into_iter()
        .find(|t| t.as_str() == topology)
        .ok_or_else(|| RouteError::NotTransfer(s.to_string()))?;
        let identity = TransferIdentity::parse(topology.source_kind(), identity)?;
        Ok(Self { topology, identity })
    }
}

/// How the EVM→TVM leg of a route is served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteMode {
    #[default]
    Direct,
    /// Credit processor provides liquidity ahead of the relay event
    Credit,
}

pub struct PipelineRegistry {
    deps: PipelineDeps,
    active: Mutex<HashMap<PipelineKey, Arc<dyn Pipeline>>>,
}

impl PipelineRegistry {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            deps,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    /// Build and start the pipeline for `route`, or return the running one
    pub fn enter(
        &self,
        route: &TransferRoute,
        mode: RouteMode,
    ) -> Result<Arc<dyn Pipeline>, PipelineError> {
        let topology = Topology::resolve(route.from.kind, route.to.kind, mode == RouteMode::Credit)
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "no topology from {} to {}",
                    route.from, route.to
                ))
            })?;
        let key = PipelineKey::new(topology, route.identity);

        let mut active = self
            .active
            .lock()
            .map_err(|_| PipelineError::Configuration("pipeline registry poisoned".into()))?;
        if let Some(existing) = active.get(&key) {
            return Ok(existing.clone());
        }

        let pipeline = topology::build(key.clone(), route, &self.deps)?;
        pipeline.clone().init();
        info!(pipeline = %key, route = %route, "Pipeline started");
        active.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Dispose and forget the pipeline for `key`
    pub fn leave(&self, key: &PipelineKey) -> bool {
        let removed = self.active.lock().ok().and_then(|mut a| a.remove(key));
        match removed {
            Some(pipeline) => {
                pipeline.dispose();
                self.deps.bus.publish(PipelineEvent::Disposed(key.clone()));
                info!(pipeline = %key, "Pipeline disposed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &PipelineKey) -> Option<Arc<dyn Pipeline>> {
        self.active.lock().ok().and_then(|a| a.get(key).cloned())
    }

    pub fn keys(&self) -> Vec<PipelineKey> {
        self.active
            .lock()
            .map(|a| a.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispose_all(&self) {
        for key in self.keys() {
            self.leave(&key);
        }
    }
}
