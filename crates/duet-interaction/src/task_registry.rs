//! Tracking of in-flight sequence tasks for shutdown cancellation.
//!
//! The registry holds join handles only so sequences can be cancelled and
//! drained together; tasks own their work and self-remove on completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::task::JoinHandle;

#[derive(Debug, Default)]
/// Registry of spawned sequence tasks keyed by an internal task id.
pub struct SequenceTaskRegistry {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl SequenceTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Tracks a spawned task. A task that already completed (and called
    /// `complete`) before registration is swept by the next `prune_finished`.
    pub fn register(&self, task_id: u64, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks.insert(task_id, handle);
    }

    /// Completion callback invoked by the task itself as its last step.
    pub fn complete(&self, task_id: u64) {
        let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks.remove(&task_id);
    }

    /// Drops handles whose tasks have already finished.
    pub fn prune_finished(&self) {
        let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks.retain(|_, handle| !handle.is_finished());
    }

    pub fn len(&self) -> usize {
        let tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every tracked task and waits for each to unwind.
    pub async fn close(&self) {
        let drained = {
            let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
            tasks.drain().map(|(_, handle)| handle).collect::<Vec<_>>()
        };
        for handle in &drained {
            handle.abort();
        }
        for handle in drained {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::SequenceTaskRegistry;

    #[tokio::test]
    async fn unit_completed_tasks_self_remove() {
        let registry = Arc::new(SequenceTaskRegistry::new());
        let task_id = registry.allocate_id();
        let task_registry = Arc::clone(&registry);
        let handle = tokio::spawn(async move {
            task_registry.complete(task_id);
        });
        registry.register(task_id, handle);

        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.prune_finished();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn functional_close_cancels_pending_tasks() {
        let registry = SequenceTaskRegistry::new();
        for _ in 0..2 {
            let task_id = registry.allocate_id();
            let handle = tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
            });
            registry.register(task_id, handle);
        }
        assert_eq!(registry.len(), 2);

        registry.close().await;
        assert!(registry.is_empty());
    }
}
