//! Tracking of background certificate orders.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

struct Order {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Join handles of the certificate orders still running, one per secret.
///
/// An order removes its own entry when it finishes, so the map only ever
/// holds orders that are in flight or were just joined.
pub struct IssuanceTracker {
    timeout: Duration,
    generation: AtomicU64,
    tasks: Mutex<HashMap<Uuid, Order>>,
}

impl IssuanceTracker {
    /// Creates a tracker whose orders are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            generation: AtomicU64::new(0),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Upper bound applied to every order.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Spawns the order task of `secret_id`, aborting a stale one.
    ///
    /// `order` receives the generation it must hand to
    /// [`IssuanceTracker::finish`] once done. The task is registered before
    /// it can run to completion.
    pub async fn start<F, Fut>(&self, secret_id: Uuid, order: F)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(order(generation));
        if let Some(stale) = tasks.insert(secret_id, Order { generation, handle }) {
            stale.handle.abort();
        }
    }

    /// Drops the entry of a finished order, unless a newer order replaced it.
    pub async fn finish(&self, secret_id: Uuid, generation: u64) {
        let mut tasks = self.tasks.lock().await;
        if tasks
            .get(&secret_id)
            .is_some_and(|o| o.generation == generation)
        {
            tasks.remove(&secret_id);
        }
    }

    #[cfg(test)]
    pub(crate) async fn in_flight(&self, secret_id: Uuid) -> bool {
        self.tasks
            .lock()
            .await
            .get(&secret_id)
            .is_some_and(|o| !o.handle.is_finished())
    }

    #[cfg(test)]
    pub(crate) async fn tracked(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Waits for the order of `secret_id`. Returns `false` when none was
    /// tracked, including when it already finished.
    pub async fn wait(&self, secret_id: Uuid) -> bool {
        let order = self.tasks.lock().await.remove(&secret_id);
        match order {
            Some(order) => {
                if let Err(e) = order.handle.await {
                    warn!(secret_id = %secret_id, error = %e, "Issuance task ended abnormally");
                }
                true
            }
            None => false,
        }
    }

    /// Cancels the order of `secret_id`, if any.
    pub async fn cancel(&self, secret_id: Uuid) {
        if let Some(order) = self.tasks.lock().await.remove(&secret_id) {
            order.handle.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_joins_task() {
        let tracker = IssuanceTracker::new(Duration::from_secs(5));
        let id = Uuid::new_v4();
        let done = Arc::new(AtomicBool::new(false));

        let flag = done.clone();
        tracker
            .start(id, |_| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .await;

        assert!(tracker.wait(id).await);
        assert!(done.load(Ordering::SeqCst));
        assert!(!tracker.wait(id).await);
        assert!(!tracker.in_flight(id).await);
    }

    #[tokio::test]
    async fn test_finished_order_removes_itself() {
        let tracker = Arc::new(IssuanceTracker::new(Duration::from_secs(5)));
        let id = Uuid::new_v4();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let own = tracker.clone();
        tracker
            .start(id, move |generation| async move {
                own.finish(id, generation).await;
                let _ = tx.send(());
            })
            .await;

        rx.await.unwrap();
        assert_eq!(tracker.tracked().await, 0);
        assert!(!tracker.wait(id).await);
    }

    #[tokio::test]
    async fn test_stale_finish_keeps_newer_order() {
        let tracker = IssuanceTracker::new(Duration::from_secs(5));
        let id = Uuid::new_v4();

        tracker.start(id, |_| std::future::pending::<()>()).await;
        tracker.start(id, |_| std::future::pending::<()>()).await;
        tracker.finish(id, 0).await;
        assert!(tracker.in_flight(id).await);

        tracker.finish(id, 1).await;
        assert_eq!(tracker.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_aborts() {
        let tracker = IssuanceTracker::new(Duration::from_secs(5));
        let id = Uuid::new_v4();
        tracker.start(id, |_| std::future::pending::<()>()).await;
        assert!(tracker.in_flight(id).await);

        tracker.cancel(id).await;
        assert!(!tracker.in_flight(id).await);
    }
}
