//! Polling task and disposal
//!
//! Each running pipeline owns one task: an interval ticker plus transaction
//! notices from its gateway subscriptions, both of which trigger `refresh()`.
//! The task holds only a weak reference, so dropping the pipeline stops it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::Pipeline;
use crate::aggregator::{EventBus, PipelineEvent};
use crate::capability::{ChainGateway, Subscription};
use crate::config::PipelineSettings;
use crate::error::PipelineError;

/// Handle that tears down a running pipeline; clones share state
#[derive(Clone, Default)]
pub struct Disposer {
    inner: Arc<DisposerInner>,
}

#[derive(Default)]
struct DisposerInner {
    disposed: AtomicBool,
    task: Mutex<Option<AbortHandle>>,
    subscriptions: Mutex<Vec<Subscription>>,
    children: Mutex<Vec<Disposer>>,
}

impl Disposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Abort the task, drop every subscription, dispose children
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut task) = self.inner.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        let subscriptions = self
            .inner
            .subscriptions
            .lock()
            .map(|mut subs| std::mem::take(&mut *subs))
            .unwrap_or_default();
        drop(subscriptions);

        let children = self
            .inner
            .children
            .lock()
            .map(|mut c| std::mem::take(&mut *c))
            .unwrap_or_default();
        for child in children {
            child.dispose();
        }
    }

    fn set_task(&self, handle: AbortHandle) {
        if let Ok(mut task) = self.inner.task.lock() {
            if self.is_disposed() {
                handle.abort();
            } else {
                *task = Some(handle);
            }
        }
    }

    /// Keep a subscription alive until disposal; dropped at once if already disposed
    pub fn add_subscription(&self, subscription: Subscription) {
        if let Ok(mut subs) = self.inner.subscriptions.lock() {
            if !self.is_disposed() {
                subs.push(subscription);
            }
        }
    }

    /// Dispose `child` together with this disposer
    pub fn add_child(&self, child: Disposer) {
        if let Ok(mut children) = self.inner.children.lock() {
            if !self.is_disposed() {
                children.push(child);
                return;
            }
        }
        child.dispose();
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscriptions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[derive(Default)]
struct SlotState {
    current: Option<Disposer>,
    disposed: bool,
}

/// Holds the disposer of a pipeline's running polling set
#[derive(Default)]
pub struct PollingSlot {
    state: Mutex<SlotState>,
}

impl PollingSlot {
    /// Return the running disposer, or start a new set with `start`
    pub fn get_or_start(&self, start: impl FnOnce() -> Disposer) -> Disposer {
        let Ok(mut state) = self.state.lock() else {
            return start();
        };
        if let Some(existing) = state.current.as_ref().filter(|d| !d.is_disposed()) {
            return existing.clone();
        }
        let disposer = start();
        state.current = Some(disposer.clone());
        state.disposed = false;
        disposer
    }

    pub fn current(&self) -> Option<Disposer> {
        self.state.lock().ok().and_then(|s| s.current.clone())
    }

    pub fn dispose(&self) {
        let current = self.state.lock().ok().and_then(|mut s| {
            s.disposed = true;
            s.current.take()
        });
        if let Some(disposer) = current {
            disposer.dispose();
        }
    }

    /// Publish `event` unless the slot was disposed; serialized with `dispose`
    /// so nothing from this pipeline follows its `Disposed` event
    pub fn publish(&self, bus: &EventBus, event: PipelineEvent) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        if state.disposed {
            debug!("Dropping event from disposed pipeline");
            return false;
        }
        bus.publish(event);
        true
    }
}

/// Spawn the polling task for `pipeline`, subscribing to each `(gateway, scope)`
pub fn spawn_polling<P>(
    pipeline: &Arc<P>,
    scopes: Vec<(Arc<dyn ChainGateway>, String)>,
    settings: &PipelineSettings,
) -> Disposer
where
    P: Pipeline + 'static,
{
    let disposer = Disposer::new();
    let weak = Arc::downgrade(pipeline);
    let key = pipeline.key().clone();
    let (tx, mut rx) = mpsc::channel(settings.subscription_buffer);
    let poll_interval = settings.poll_interval;
    let task_disposer = disposer.clone();

    let handle = tokio::spawn(async move {
        for (gateway, scope) in scopes {
            match gateway.subscribe(&scope, tx.clone()).await {
                Ok(subscription) => task_disposer.add_subscription(subscription),
                Err(e) => {
                    if let Some(pipeline) = weak.upgrade() {
                        pipeline.on_error("subscribe", &PipelineError::from(e));
                    }
                }
            }
        }
        // Keep the channel open even if every subscription failed
        let _keep_open = tx;

        info!(pipeline = %key, "Polling started");
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Some(notice) = rx.recv() => {
                    debug!(pipeline = %key, tx = %notice.tx_id, scope = %notice.scope, "Transaction notice");
                }
            }

            let Some(pipeline) = weak.upgrade() else {
                break;
            };
            if pipeline.halted().is_some() {
                info!(pipeline = %key, "Pipeline halted, polling stopped");
                break;
            }
            if let Err(e) = pipeline.refresh().await {
                pipeline.on_error("refresh", &e);
            }
        }
    });

    disposer.set_task(handle.abort_handle());
    disposer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispose_is_idempotent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let disposer = Disposer::new();
        let counter = hits.clone();
        disposer.add_subscription(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(disposer.active_subscriptions(), 1);

        disposer.dispose();
        disposer.clone().dispose();
        assert!(disposer.is_disposed());
        assert_eq!(disposer.active_subscriptions(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_after_dispose_is_dropped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let disposer = Disposer::new();
        disposer.dispose();

        let counter = hits.clone();
        disposer.add_subscription(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(disposer.active_subscriptions(), 0);
    }

    #[test]
    fn test_children_disposed_with_parent() {
        let parent = Disposer::new();
        let child = Disposer::new();
        parent.add_child(child.clone());
        parent.dispose();
        assert!(child.is_disposed());

        let late = Disposer::new();
        parent.add_child(late.clone());
        assert!(late.is_disposed());
    }

    #[test]
    fn test_slot_reuses_running_disposer() {
        let slot = PollingSlot::default();
        let starts = AtomicUsize::new(0);
        let start = || {
            starts.fetch_add(1, Ordering::SeqCst);
            Disposer::new()
        };
        let first = slot.get_or_start(start);
        let second = slot.get_or_start(|| {
            starts.fetch_add(1, Ordering::SeqCst);
            Disposer::new()
        });
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        second.dispose();
        assert!(first.is_disposed());

        slot.get_or_start(|| {
            starts.fetch_add(1, Ordering::SeqCst);
            Disposer::new()
        });
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disposed_slot_drops_events_until_restarted() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let slot = PollingSlot::default();
        let key = crate::registry::PipelineKey::new(
            crate::types::Topology::EvmTvm,
            crate::testing::fixtures::evm_identity(),
        );

        // Never started: refresh-only pipelines still publish
        assert!(slot.publish(&bus, PipelineEvent::Disposed(key.clone())));
        slot.get_or_start(Disposer::new);
        slot.dispose();
        assert!(!slot.publish(&bus, PipelineEvent::Disposed(key.clone())));

        slot.get_or_start(Disposer::new);
        assert!(slot.publish(&bus, PipelineEvent::Disposed(key)));

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
    }
}
