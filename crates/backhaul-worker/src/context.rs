//! Cooperative stop signal shared between the caller and the session
//!
//! Combines a cancellation token with a join counter: either side can request
//! shutdown once (signaling again is a no-op), and `wait_idle` blocks until
//! every registered task has confirmed completion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct StopContext {
    token: CancellationToken,
    outstanding: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl StopContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n` in-flight tasks
    pub fn add(&self, n: usize) {
        self.outstanding.fetch_add(n, Ordering::SeqCst);
    }

    /// Mark one in-flight task as complete
    pub fn finish(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Request shutdown. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until shutdown has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Wait until all registered tasks have finished
    pub async fn wait_idle(&self) {
        loop {
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.idle.notified();
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let ctx = StopContext::new();
        assert!(!ctx.is_cancelled());

        ctx.cancel();
        ctx.cancel();
        assert!(ctx.is_cancelled());

        // Waiters observe a signal that already fired
        ctx.cancelled().await;
    }

    #[tokio::test]
    async fn test_wait_idle_blocks_until_finish() {
        let ctx = StopContext::new();
        ctx.add(1);

        let waiter = ctx.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_idle().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        ctx.finish();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait_idle did not unblock")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_idle_with_no_tasks() {
        let ctx = StopContext::new();
        tokio::time::timeout(Duration::from_millis(100), ctx.wait_idle())
            .await
            .expect("wait_idle should return immediately");
    }

    #[tokio::test]
    async fn test_cancel_unblocks_all_waiters() {
        let ctx = StopContext::new();
        let mut handles = Vec::new();

        for _ in 0..4 {
            let waiter = ctx.clone();
            handles.push(tokio::spawn(async move { waiter.cancelled().await }));
        }

        ctx.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("waiter did not observe cancellation")
                .unwrap();
        }
    }
}
