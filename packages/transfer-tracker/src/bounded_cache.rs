//! Bounded set of seen transaction ids with TTL and max-size eviction
//!
//! Subscriptions live as long as their pipeline; this keeps the dedupe set
//! from growing with every transaction a busy vault ever sees.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use transfer_pipeline::capability::TxId;

/// Default number of transaction ids remembered per subscription
pub const DEFAULT_SEEN_CAPACITY: usize = 4096;

/// Default lifetime of an id that stopped showing up in polls
pub const DEFAULT_SEEN_TTL: Duration = Duration::from_secs(3600);

/// Seen transaction ids, oldest sighting evicted first.
///
/// An id that keeps appearing in polls has its timestamp refreshed, so only
/// ids the node no longer reports can age out.
pub struct SeenTransactions {
    /// Tx id -> last sighting
    map: HashMap<TxId, Instant>,
    max_size: usize,
    ttl: Duration,
}

impl SeenTransactions {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            max_size: max_size.max(1),
            ttl,
        }
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.map.get(tx_id).is_some_and(|t| t.elapsed() < self.ttl)
    }

    /// Record a sighting; returns true when the id was not already known
    pub fn insert(&mut self, tx_id: TxId) -> bool {
        let now = Instant::now();
        if let Some(seen) = self.map.get_mut(&tx_id) {
            if now.duration_since(*seen) < self.ttl {
                *seen = now;
                return false;
            }
        }

        self.map.retain(|_, t| now.duration_since(*t) < self.ttl);
        while self.map.len() >= self.max_size {
            let Some(oldest) = self.map.iter().min_by_key(|(_, t)| **t).map(|(id, _)| id.clone()) else {
                break;
            };
            self.map.remove(&oldest);
        }

        self.map.insert(tx_id, now);
        true
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for SeenTransactions {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CAPACITY, DEFAULT_SEEN_TTL)
    }
}
