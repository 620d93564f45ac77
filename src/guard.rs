//! Two-mode exclusion guard shared by every stateful resource.
//!
//! Lifecycle mutators (connect, commit, dispose, close, ...) take the slot
//! exclusively with [`ResourceGuard::acquire`] or [`ResourceGuard::run_exclusive`].
//! Data operations hold a [`SharedPermit`] from [`ResourceGuard::share`] for their
//! whole run, so any number of them may proceed together while a teardown waits
//! for them to drain and none of them can start once a teardown holds the slot.

use std::future::Future;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Exclusive + shared guard bound to one resource.
#[derive(Debug, Default)]
pub struct ResourceGuard {
    slot: RwLock<()>,
}

/// Proof of exclusive access. The slot is released when the permit is dropped.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct GuardPermit<'a> {
    _slot: RwLockWriteGuard<'a, ()>,
}

impl GuardPermit<'_> {
    /// Release the slot and wake the next waiter.
    pub fn release(self) {}
}

/// Held by a data operation while it checks state, reserves children and calls
/// into the library.
#[derive(Debug)]
#[must_use = "the data operation is unguarded once the permit is dropped"]
pub struct SharedPermit<'a> {
    _slot: RwLockReadGuard<'a, ()>,
}

impl ResourceGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until every holder is gone and take the slot. Waiters are served in
    /// FIFO order; a queued acquire holds back later shared permits.
    pub async fn acquire(&self) -> GuardPermit<'_> {
        GuardPermit {
            _slot: self.slot.write().await,
        }
    }

    /// Wait until no exclusive holder is active and join the shared holders.
    pub async fn share(&self) -> SharedPermit<'_> {
        SharedPermit {
            _slot: self.slot.read().await,
        }
    }

    /// Non-blocking check: true while an exclusive holder is active or queued.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.slot.try_read().is_err()
    }

    /// Run `op` while holding the slot. The slot is released on every exit path,
    /// including when `op` fails or the future is dropped.
    pub async fn run_exclusive<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        op().await
    }

    /// Barrier: returns once no exclusive holder is active, without leaving the
    /// caller holding anything.
    pub async fn wait_until_free(&self) {
        drop(self.slot.read().await);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_and_release() {
        let guard = ResourceGuard::new();
        assert!(!guard.is_held());
        let permit = guard.acquire().await;
        assert!(guard.is_held());
        permit.release();
        assert!(!guard.is_held());
    }

    #[tokio::test]
    async fn run_exclusive_releases_on_error() {
        let guard = ResourceGuard::new();
        let res: Result<(), &str> = guard.run_exclusive(|| async { Err("boom") }).await;
        assert_eq!(res, Err("boom"));
        assert!(!guard.is_held());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exclusive_sections_never_overlap() {
        let guard = Arc::new(ResourceGuard::new());
        let active = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = Arc::clone(&guard);
            let active = Arc::clone(&active);
            handles.push(tokio::spawn(async move {
                guard
                    .run_exclusive(|| async {
                        assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn wait_until_free_blocks_while_held() {
        let guard = Arc::new(ResourceGuard::new());
        let permit = guard.acquire().await;

        let waiter = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                guard.wait_until_free().await;
                guard.is_held()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        permit.release();
        let held_after = waiter.await.unwrap();
        assert!(!held_after, "waiter must not keep the slot");
    }

    #[tokio::test]
    async fn shared_permits_coexist_and_hold_off_acquire() {
        let guard = Arc::new(ResourceGuard::new());
        let first = guard.share().await;
        let second = guard.share().await;
        assert!(!guard.is_held());

        let teardown = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                let _permit = guard.acquire().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!teardown.is_finished());

        drop(first);
        drop(second);
        teardown.await.unwrap();
        assert!(!guard.is_held());
    }

    #[tokio::test]
    async fn wait_until_free_is_immediate_when_free() {
        let guard = ResourceGuard::new();
        guard.wait_until_free().await;
        guard.wait_until_free().await;
        assert!(!guard.is_held());
    }
}
