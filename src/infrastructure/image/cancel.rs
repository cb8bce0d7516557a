//! Cancellation bookkeeping for in-flight requests.
//!
//! All registry mutations flow through one worker task fed by an unbounded
//! command channel, which gives mutual exclusion and FIFO ordering without
//! a lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;

/// Cancellable handle for one in-flight request.
///
/// The owning fetch races its I/O against [`cancelled`](Self::cancelled);
/// calling [`cancel`](Self::cancel) from anywhere resolves that race.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    id: u64,
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    fn new(id: u64) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { id, tx }
    }

    /// Flips the handle to cancelled. Idempotent, never fails.
    ///
    /// Uses `send_replace` so the flag is stored even while nothing is
    /// parked in `cancelled`; a plain `send` drops the value when no
    /// receiver exists and the cancel would be lost.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called; otherwise pends forever.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender kept alive by self, so this arm is unreachable
                // while the handle exists.
                std::future::pending::<()>().await;
            }
        }
    }
}

enum RegistryCommand {
    Register {
        key: CacheKey,
        handle: CancelHandle,
    },
    Complete {
        key: CacheKey,
        id: u64,
    },
    Cancel {
        key: CacheKey,
    },
    CancelAll,
    PendingCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Registry of cancellable handles keyed by normalized URL.
///
/// A key maps to every outstanding handle for it: concurrent requests for
/// one URL fan out rather than overwrite, so `cancel` reaches all of them.
pub struct CancelRegistry {
    tx: mpsc::UnboundedSender<RegistryCommand>,
    next_id: AtomicU64,
}

/// Live registration for one request. Deregisters itself on drop, so
/// completion, failure, and caller-side future drops all release the entry.
pub struct Registration {
    key: CacheKey,
    handle: CancelHandle,
    tx: mpsc::UnboundedSender<RegistryCommand>,
}

impl Registration {
    /// The handle this registration tracks.
    #[must_use]
    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let _ = self.tx.send(RegistryCommand::Complete {
            key: self.key.clone(),
            id: self.handle.id,
        });
    }
}

impl CancelRegistry {
    /// Creates a registry and spawns its worker task. The worker exits
    /// once the registry and all registrations are gone.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_worker_loop(rx));
        Self {
            tx,
            next_id: AtomicU64::new(0),
        }
    }

    async fn run_worker_loop(mut rx: mpsc::UnboundedReceiver<RegistryCommand>) {
        let mut entries: HashMap<CacheKey, Vec<CancelHandle>> = HashMap::new();

        while let Some(cmd) = rx.recv().await {
            match cmd {
                RegistryCommand::Register { key, handle } => {
                    trace!(key = %key, "registered cancellable");
                    entries.entry(key).or_default().push(handle);
                }
                RegistryCommand::Complete { key, id } => {
                    if let Some(handles) = entries.get_mut(&key) {
                        handles.retain(|h| h.id != id);
                        if handles.is_empty() {
                            entries.remove(&key);
                        }
                    }
                }
                RegistryCommand::Cancel { key } => {
                    // remove before invoking cancel to avoid double-cancel races
                    if let Some(handles) = entries.remove(&key) {
                        debug!(key = %key, count = handles.len(), "cancelling fetches");
                        for handle in handles {
                            handle.cancel();
                        }
                    }
                }
                RegistryCommand::CancelAll => {
                    let snapshot: Vec<CancelHandle> =
                        entries.drain().flat_map(|(_, handles)| handles).collect();
                    if !snapshot.is_empty() {
                        debug!(count = snapshot.len(), "cancelling all fetches");
                        // fire cancels off the worker so new registrations
                        // are not blocked behind them
                        tokio::spawn(async move {
                            for handle in snapshot {
                                handle.cancel();
                            }
                        });
                    }
                }
                RegistryCommand::PendingCount { reply } => {
                    let _ = reply.send(entries.values().map(Vec::len).sum());
                }
            }
        }
    }

    /// Registers a new handle for `key` and returns its registration.
    #[must_use]
    pub fn register(&self, key: &CacheKey) -> Registration {
        let handle = CancelHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let _ = self.tx.send(RegistryCommand::Register {
            key: key.clone(),
            handle: handle.clone(),
        });
        Registration {
            key: key.clone(),
            handle,
            tx: self.tx.clone(),
        }
    }

    /// Cancels every outstanding handle for `key`. No-op when absent.
    pub fn cancel(&self, key: &CacheKey) {
        let _ = self.tx.send(RegistryCommand::Cancel { key: key.clone() });
    }

    /// Cancels every outstanding handle and clears the registry.
    pub fn cancel_all(&self) {
        let _ = self.tx.send(RegistryCommand::CancelAll);
    }

    /// Number of outstanding handles, observed in FIFO order with the
    /// mutations that precede the call.
    pub async fn pending_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RegistryCommand::PendingCount { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_resolves_the_cancelled_future() {
        let registry = CancelRegistry::new();
        let key = CacheKey::from_url("https://example.com/a.png");
        let registration = registry.register(&key);
        let handle = registration.handle().clone();

        assert!(!handle.is_cancelled());
        registry.cancel(&key);

        tokio::time::timeout(Duration::from_secs(1), handle.cancelled())
            .await
            .expect("cancel should resolve the future");
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_removes_the_entry() {
        let registry = CancelRegistry::new();
        let key = CacheKey::from_url("https://example.com/a.png");
        let _registration = registry.register(&key);

        assert_eq!(registry.pending_count().await, 1);
        registry.cancel(&key);
        assert_eq!(registry.pending_count().await, 0);
    }

    #[tokio::test]
    async fn cancel_of_absent_key_is_a_noop() {
        let registry = CancelRegistry::new();
        registry.cancel(&CacheKey::from_url("https://example.com/absent.png"));
        assert_eq!(registry.pending_count().await, 0);
    }

    #[tokio::test]
    async fn completion_deregisters() {
        let registry = CancelRegistry::new();
        let key = CacheKey::from_url("https://example.com/a.png");

        {
            let _registration = registry.register(&key);
            assert_eq!(registry.pending_count().await, 1);
        }

        assert_eq!(registry.pending_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_registrations_all_get_cancelled() {
        let registry = CancelRegistry::new();
        let key = CacheKey::from_url("https://example.com/a.png");

        let first = registry.register(&key);
        let second = registry.register(&key);
        assert_eq!(registry.pending_count().await, 2);

        registry.cancel(&key);
        assert_eq!(registry.pending_count().await, 0);
        assert!(first.handle().is_cancelled());
        assert!(second.handle().is_cancelled());
    }

    #[tokio::test]
    async fn completing_one_duplicate_keeps_the_other() {
        let registry = CancelRegistry::new();
        let key = CacheKey::from_url("https://example.com/a.png");

        let first = registry.register(&key);
        let second = registry.register(&key);
        drop(first);

        assert_eq!(registry.pending_count().await, 1);
        assert!(!second.handle().is_cancelled());
    }

    #[tokio::test]
    async fn cancel_all_clears_every_key() {
        let registry = CancelRegistry::new();
        let a = registry.register(&CacheKey::from_url("https://example.com/a.png"));
        let b = registry.register(&CacheKey::from_url("https://example.com/b.png"));

        registry.cancel_all();
        assert_eq!(registry.pending_count().await, 0);

        tokio::time::timeout(Duration::from_secs(1), async {
            a.handle().cancelled().await;
            b.handle().cancelled().await;
        })
        .await
        .expect("cancel_all should cancel every handle");
    }

    #[tokio::test]
    async fn cancel_with_no_waiter_still_flips_the_handle() {
        let registry = CancelRegistry::new();
        let key = CacheKey::from_url("https://example.com/a.png");
        let registration = registry.register(&key);
        let handle = registration.handle().clone();

        // cancel while nothing is parked in `cancelled()`
        registry.cancel(&key);
        // pending_count is FIFO behind the cancel, so the worker has run it
        assert_eq!(registry.pending_count().await, 0);

        assert!(handle.is_cancelled());
        tokio::time::timeout(Duration::from_millis(100), handle.cancelled())
            .await
            .expect("a waiter arriving after the cancel must still resolve");
    }

    #[tokio::test]
    async fn handle_cancelled_after_the_fact_still_resolves() {
        let registry = CancelRegistry::new();
        let key = CacheKey::from_url("https://example.com/a.png");
        let registration = registry.register(&key);

        registration.handle().cancel();
        // already-cancelled handles resolve immediately
        tokio::time::timeout(Duration::from_millis(100), registration.handle().cancelled())
            .await
            .expect("pre-cancelled handle should resolve at once");
    }
}
