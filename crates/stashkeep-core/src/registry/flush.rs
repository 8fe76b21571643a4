//! Debounced persistence of the registry document.
//!
//! The first `schedule()` arms a timer; further calls while it is armed are
//! absorbed. When the timer fires, the writer snapshots the state as it is at
//! that moment, so every mutation made before the write is included.

use super::atomic::write_json;
use super::types::RootRegistry;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Counters of completed and failed registry writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub writes: u64,
    pub failures: u64,
}

struct WriterInner {
    path: PathBuf,
    state: Arc<RwLock<RootRegistry>>,
    pending: Mutex<Option<JoinHandle<()>>>,
    writes: AtomicU64,
    failures: AtomicU64,
}

impl WriterInner {
    fn write_now(&self) -> Result<()> {
        let snapshot = self
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        match write_json(&self.path, &snapshot) {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn take_pending(&self) -> Option<JoinHandle<()>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Owns the pending-write handle for one registry file.
pub(crate) struct DebouncedWriter {
    inner: Arc<WriterInner>,
    debounce: Duration,
}

impl DebouncedWriter {
    pub(crate) fn new(
        path: PathBuf,
        state: Arc<RwLock<RootRegistry>>,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                path,
                state,
                pending: Mutex::new(None),
                writes: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            debounce,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Request a write. Failures are logged, never returned.
    ///
    /// Outside a tokio runtime the write happens immediately.
    pub(crate) fn schedule(&self) {
        let Ok(runtime) = Handle::try_current() else {
            if let Err(e) = self.inner.write_now() {
                warn!("Failed to save registry {}: {}", self.inner.path.display(), e);
            }
            return;
        };

        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if pending.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let debounce = self.debounce;
        *pending = Some(runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            // Disarm before snapshotting so later mutations schedule a new write.
            drop(inner.take_pending());
            match inner.write_now() {
                Ok(()) => debug!("Saved registry {}", inner.path.display()),
                Err(e) => warn!("Failed to save registry {}: {}", inner.path.display(), e),
            }
        }));
    }

    /// Cancel any pending timer and write immediately.
    pub(crate) fn flush(&self) -> Result<()> {
        if let Some(task) = self.inner.take_pending() {
            task.abort();
        }
        self.inner.write_now()
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self) -> bool {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub(crate) fn stats(&self) -> PersistStats {
        PersistStats {
            writes: self.inner.writes.load(Ordering::SeqCst),
            failures: self.inner.failures.load(Ordering::SeqCst),
        }
    }
}

impl Drop for DebouncedWriter {
    fn drop(&mut self) {
        // Pending changes are written now instead of by an orphaned timer.
        if let Some(task) = self.inner.take_pending() {
            task.abort();
            if let Err(e) = self.inner.write_now() {
                warn!("Failed to save registry {} on drop: {}", self.inner.path.display(), e);
            }
        }
    }
}
