use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Timer-reset debouncer: the handler runs with the latest value once no new
/// value arrived for `delay`
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawn the debounce task on the current runtime; fails outside one
    pub fn new<F, Fut>(delay: Duration, handler: F) -> Result<Self, TryCurrentError>
    where
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        let task = runtime.spawn(async move {
            while let Some(mut latest) = rx.recv().await {
                loop {
                    tokio::select! {
                        next = rx.recv() => match next {
                            Some(value) => latest = value,
                            None => return,
                        },
                        _ = sleep(delay) => break,
                    }
                }
                handler(latest).await;
            }
        });
        Ok(Self { tx, task })
    }

    pub fn push(&self, value: T) {
        let _ = self.tx.send(value);
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
