use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

/// Pending rebuild requests.
///
/// Requests arriving while a build runs merge into a single pending batch,
/// so at most one rebuild waits at any time.
#[derive(Debug, Default)]
pub struct RebuildQueue {
    pending: Mutex<Option<BTreeSet<PathBuf>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl RebuildQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add changed paths to the pending batch.
    pub fn push(&self, paths: impl IntoIterator<Item = PathBuf>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.get_or_insert_with(BTreeSet::new).extend(paths);
        drop(pending);
        self.notify.notify_one();
    }

    /// Whether a batch is waiting.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn take(&self) -> Option<Vec<PathBuf>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|set| set.into_iter().collect())
    }

    /// Wait for the next batch; `None` once closed and drained.
    pub async fn next(&self) -> Option<Vec<PathBuf>> {
        loop {
            if let Some(batch) = self.take() {
                return Some(batch);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requests_coalesce_into_one_batch() {
        let queue = RebuildQueue::new();
        queue.push([PathBuf::from("src/App.scss")]);
        queue.push([PathBuf::from("src/App.js"), PathBuf::from("src/App.scss")]);
        assert!(queue.has_pending());

        let batch = queue.next().await.unwrap();
        assert_eq!(batch, vec![PathBuf::from("src/App.js"), PathBuf::from("src/App.scss")]);
        assert!(!queue.has_pending());
    }

    #[tokio::test]
    async fn test_close_ends_the_stream_after_draining() {
        let queue = RebuildQueue::new();
        queue.push([PathBuf::from("a")]);
        queue.close();
        assert!(queue.next().await.is_some());
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_push() {
        let queue = std::sync::Arc::new(RebuildQueue::new());
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.push([PathBuf::from("src/index.js")]);
        let batch = waiter.await.unwrap().unwrap();
        assert_eq!(batch, vec![PathBuf::from("src/index.js")]);
    }
}
