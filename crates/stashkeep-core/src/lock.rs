//! Per-key serialization of asynchronous operations.
//!
//! Each key owns a chain: a shared future that completes once everything
//! queued for that key so far has finished. A new caller swaps itself in as
//! the tail, waits for the previous tail and then runs. Its own link completes
//! when the caller finishes, fails, or is dropped.
//!
//! A link is chained behind its predecessor, so a caller dropped while still
//! queued (timeout, aborted task) never lets the next caller overtake an
//! operation that is still running.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::trace;

type Link = Shared<BoxFuture<'static, ()>>;

struct Chain {
    /// Completes when the most recently queued caller has finished.
    tail: Link,
    /// Callers queued or running for this key.
    pending: usize,
}

type Chains = Arc<Mutex<HashMap<String, Chain>>>;

/// Serializes operations that share a key.
///
/// Guarantees, per key: at most one operation runs at a time, and operations
/// run in the order `run_exclusive` was called. Distinct keys do not wait on
/// each other. Cloning yields a handle to the same set of chains.
#[derive(Clone, Default)]
pub struct KeyedMutex {
    chains: Chains,
}

impl std::fmt::Debug for KeyedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedMutex")
            .field("keys", &self.tracked_keys())
            .finish()
    }
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` once every operation queued earlier for `key` is done.
    ///
    /// The place in line is taken when this method is called, before the
    /// returned future is polled. Whatever `operation` yields (including an
    /// `Err`) goes only to this caller; the next queued operation proceeds
    /// either way.
    pub fn run_exclusive<F, Fut, T>(
        &self,
        key: &str,
        operation: F,
    ) -> impl Future<Output = T> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let key = key.to_string();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let previous = {
            let mut chains = lock_chains(&self.chains);
            let chain = chains.entry(key.clone()).or_insert_with(|| Chain {
                tail: futures::future::ready(()).boxed().shared(),
                pending: 0,
            });

            let previous = chain.tail.clone();
            let behind = previous.clone();
            chain.tail = async move {
                behind.await;
                // Err means the holder was dropped; that also ends its turn.
                let _ = done_rx.await;
            }
            .boxed()
            .shared();
            chain.pending += 1;
            trace!(key = %key, pending = chain.pending, "queued exclusive operation");
            previous
        };

        let ticket = Ticket {
            chains: Arc::clone(&self.chains),
            key,
            done: Some(done_tx),
        };

        async move {
            previous.await;
            let output = operation().await;
            drop(ticket);
            output
        }
    }

    /// Whether any operation is queued or running for `key`.
    pub fn is_busy(&self, key: &str) -> bool {
        lock_chains(&self.chains).contains_key(key)
    }

    /// Number of operations queued or running for `key`.
    pub fn pending(&self, key: &str) -> usize {
        lock_chains(&self.chains)
            .get(key)
            .map(|chain| chain.pending)
            .unwrap_or(0)
    }

    /// Keys that currently have bookkeeping.
    pub fn tracked_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock_chains(&self.chains).keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn lock_chains(chains: &Chains) -> MutexGuard<'_, HashMap<String, Chain>> {
    // The map is only touched in short non-panicking sections.
    chains.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A caller's place in a key's chain. Dropping it ends the caller's turn.
struct Ticket {
    chains: Chains,
    key: String,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }

        let mut chains = lock_chains(&self.chains);
        if let Some(chain) = chains.get_mut(&self.key) {
            chain.pending -= 1;
            if chain.pending == 0 {
                chains.remove(&self.key);
                trace!(key = %self.key, "released last exclusive operation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_returns_operation_output() {
        let mutex = KeyedMutex::new();
        let value = mutex.run_exclusive("a", || async { 42 }).await;
        assert_eq!(value, 42);
        assert!(!mutex.is_busy("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_never_overlaps() {
        let mutex = KeyedMutex::new();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(mutex.run_exclusive("chest", move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(mutex.tracked_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_in_call_order() {
        let mutex = KeyedMutex::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let futures: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                mutex.run_exclusive("k", move || async move {
                    tokio::time::sleep(Duration::from_millis(5 - i as u64)).await;
                    order.lock().unwrap().push(i);
                })
            })
            .collect();

        // Spawn in reverse: the call order above still decides who goes first.
        let handles: Vec<_> = futures.into_iter().rev().map(tokio::spawn).collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_overlap() {
        let mutex = KeyedMutex::new();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|key| {
                let running = Arc::clone(&running);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(mutex.run_exclusive(key, move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }))
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_does_not_stall_chain() {
        let mutex = KeyedMutex::new();

        let first = mutex.run_exclusive("k", || async { Err::<(), &str>("boom") });
        let second = mutex.run_exclusive("k", || async { Ok::<_, &str>("after") });

        assert_eq!(first.await, Err("boom"));
        assert_eq!(second.await, Ok("after"));
        assert!(!mutex.is_busy("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_does_not_let_successor_overtake() {
        let mutex = KeyedMutex::new();
        let running = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));

        let holder = {
            let running = Arc::clone(&running);
            tokio::spawn(mutex.run_exclusive("k", move || async move {
                running.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }))
        };

        // Queued behind the holder, then abandoned by a timeout.
        let abandoned = mutex.run_exclusive("k", || async {});
        assert!(tokio::time::timeout(Duration::from_millis(5), abandoned)
            .await
            .is_err());

        let successor = {
            let running = Arc::clone(&running);
            let overlapped = Arc::clone(&overlapped);
            tokio::spawn(mutex.run_exclusive("k", move || async move {
                if running.load(Ordering::SeqCst) > 0 {
                    overlapped.fetch_add(1, Ordering::SeqCst);
                }
            }))
        };

        holder.await.unwrap();
        successor.await.unwrap();
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
        assert!(mutex.tracked_keys().is_empty());
    }

    #[tokio::test]
    async fn test_unpolled_future_releases_bookkeeping() {
        let mutex = KeyedMutex::new();
        let queued = mutex.run_exclusive("k", || async {});
        assert_eq!(mutex.pending("k"), 1);
        drop(queued);
        assert!(!mutex.is_busy("k"));
    }
}
