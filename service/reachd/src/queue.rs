//! Named serialized task queues.
//!
//! The broker's concurrency model is a small set of single-consumer queues:
//! one for state mutation, one for event delivery, one per ability
//! connection for command dispatch. Work posted to a queue runs in
//! submission order on that queue's worker task, so state owned by a queue
//! needs no locking from within it.

use reach_protocol::{BrokerResult, ErrorKind};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A named, single-consumer, in-order task queue backed by a tokio task.
///
/// Dropping every clone of the queue shuts the worker down after it drains.
#[derive(Clone)]
pub struct SerialQueue {
    name: String,
    tx: mpsc::UnboundedSender<(String, Job)>,
}

impl SerialQueue {
    /// Spawns the worker task. Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Job)>();
        let worker_name = name.clone();
        tokio::spawn(async move {
            while let Some((label, job)) = rx.recv().await {
                trace!(queue = %worker_name, task = %label, "running queued task");
                job();
            }
            debug!(queue = %worker_name, "queue worker exiting");
        });
        SerialQueue { name, tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Posts fire-and-forget work. Returns `false` when the worker is gone.
    pub fn post(&self, label: &str, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send((label.to_string(), Box::new(job))).is_ok()
    }

    /// Posts `f` and awaits its return value. Fails with
    /// [`ErrorKind::Unavailable`] when the worker is gone.
    pub async fn call<T>(
        &self,
        label: &str,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> BrokerResult<T>
    where
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let posted = self.post(label, move || {
            // The caller may have stopped waiting; a refused send is fine.
            let _ = tx.send(f());
        });
        if !posted {
            return Err(ErrorKind::Unavailable);
        }
        rx.await.map_err(|_| ErrorKind::Unavailable)
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let queue = SerialQueue::new("test");
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..32 {
            let seen = seen.clone();
            queue.post("ordered", move || seen.lock().unwrap().push(i));
        }
        // A call() after the posts observes all of them.
        queue.call("barrier", || ()).await.unwrap();
        let order: Vec<_> = seen.lock().unwrap().clone();
        assert_eq!(order, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_call_returns_value() {
        let queue = SerialQueue::new("test");
        let value = queue.call("compute", || 40 + 2).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_post_counts_even_when_caller_gone() {
        let queue = SerialQueue::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        queue.post("count", move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        queue.call("barrier", || ()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
