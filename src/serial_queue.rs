use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as SlotLock;

static PROCESS_QUEUE: Lazy<PathQueue> = Lazy::new(PathQueue::new);

struct Slot {
    lock: Arc<SlotLock<()>>,
    pending: usize,
}

/// Runs operations one at a time per path, in the order they were submitted.
///
/// Different paths never wait on each other. A path's entry exists only while
/// at least one operation for it is queued or running.
#[derive(Clone, Default)]
pub struct PathQueue {
    slots: Arc<Mutex<HashMap<PathBuf, Slot>>>,
}

impl PathQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the queue shared by everything in this process.
    pub fn process_wide() -> Self {
        PROCESS_QUEUE.clone()
    }

    /// Waits for every earlier operation on `path`, then runs `operation`.
    ///
    /// The operation's own output (including any error) is handed back; the
    /// slot is released whether it succeeded, failed, panicked or was dropped.
    pub async fn run<F, Fut, T>(&self, path: &Path, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = self.enter(path);
        let _turn = ticket.lock.lock().await;
        operation().await
    }

    /// Number of paths with queued or running operations.
    pub fn tracked_paths(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Queued plus running operations for one path.
    pub fn pending(&self, path: &Path) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|slot| slot.pending)
            .unwrap_or(0)
    }

    fn enter(&self, path: &Path) -> Ticket<'_> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(path.to_path_buf()).or_insert_with(|| Slot {
            lock: Arc::new(SlotLock::new(())),
            pending: 0,
        });
        slot.pending += 1;
        Ticket {
            queue: self,
            path: path.to_path_buf(),
            lock: slot.lock.clone(),
        }
    }
}

struct Ticket<'a> {
    queue: &'a PathQueue,
    path: PathBuf,
    lock: Arc<SlotLock<()>>,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        let mut slots = self
            .queue
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let drained = match slots.get_mut(&self.path) {
            Some(slot) => {
                slot.pending = slot.pending.saturating_sub(1);
                slot.pending == 0
            }
            None => false,
        };
        if drained {
            slots.remove(&self.path);
        }
    }
}
