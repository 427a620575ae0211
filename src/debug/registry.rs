//! Session-scoped registries
//!
//! The frame registry maps frame ids to their scenario context and the
//! history of variable snapshots taken after each completed step. The
//! thread registry holds the controllers currently running a top-level
//! scenario. Each registry has its own lock, held only for the duration of
//! a single operation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::common::{Error, Result};
use crate::engine::{ContextRef, Variables};

use super::thread::DebugThread;

/// Frame identifier, unique and increasing for the lifetime of a session
pub type FrameId = u64;

struct FrameEntry {
    context: ContextRef,
    snapshots: Vec<Variables>,
}

/// Frame id → context and snapshot history
#[derive(Default)]
pub struct FrameRegistry {
    frames: Mutex<HashMap<FrameId, FrameEntry>>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a frame with an empty snapshot history
    pub fn insert(&self, frame_id: FrameId, context: ContextRef) {
        self.lock().insert(
            frame_id,
            FrameEntry {
                context,
                snapshots: Vec::new(),
            },
        );
    }

    pub fn remove(&self, frame_id: FrameId) -> bool {
        self.lock().remove(&frame_id).is_some()
    }

    pub fn contains(&self, frame_id: FrameId) -> bool {
        self.lock().contains_key(&frame_id)
    }

    pub fn context(&self, frame_id: FrameId) -> Option<ContextRef> {
        self.lock().get(&frame_id).map(|entry| entry.context.clone())
    }

    /// Record the variables after a completed step; `false` if the frame is gone
    pub fn push_snapshot(&self, frame_id: FrameId, variables: Variables) -> bool {
        match self.lock().get_mut(&frame_id) {
            Some(entry) => {
                entry.snapshots.push(variables);
                true
            }
            None => false,
        }
    }

    /// Discard the most recent snapshot of a frame
    ///
    /// Fails without touching the history when there is nothing to discard.
    pub fn pop_snapshot(&self, frame_id: FrameId) -> Result<()> {
        let mut frames = self.lock();
        let entry = frames
            .get_mut(&frame_id)
            .ok_or(Error::FrameNotFound(frame_id))?;
        entry
            .snapshots
            .pop()
            .map(|_| ())
            .ok_or(Error::StepBackUnavailable { frame_id })
    }

    /// Snapshot describing the frame's current state
    pub fn latest_snapshot(&self, frame_id: FrameId) -> Option<Variables> {
        self.lock()
            .get(&frame_id)
            .and_then(|entry| entry.snapshots.last().cloned())
    }

    pub fn snapshot_count(&self, frame_id: FrameId) -> Option<usize> {
        self.lock().get(&frame_id).map(|entry| entry.snapshots.len())
    }

    /// Full snapshot history of a frame, oldest first
    pub fn history(&self, frame_id: FrameId) -> Option<Vec<Variables>> {
        self.lock().get(&frame_id).map(|entry| entry.snapshots.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FrameId, FrameEntry>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Thread id → controller, for controllers running a top-level scenario
#[derive(Default)]
pub struct ThreadRegistry {
    threads: Mutex<BTreeMap<i64, Arc<DebugThread>>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, thread: Arc<DebugThread>) {
        self.lock().insert(thread.id(), thread);
    }

    pub fn unregister(&self, thread_id: i64) -> Option<Arc<DebugThread>> {
        self.lock().remove(&thread_id)
    }

    pub fn get(&self, thread_id: i64) -> Option<Arc<DebugThread>> {
        self.lock().get(&thread_id).cloned()
    }

    /// Copy of the registered controllers, ordered by thread id
    ///
    /// Callers iterate the copy so the registry lock is never held while a
    /// controller is being notified.
    pub fn snapshot(&self) -> Vec<Arc<DebugThread>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every controller, returning them
    pub fn drain(&self) -> Vec<Arc<DebugThread>> {
        std::mem::take(&mut *self.lock()).into_values().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<i64, Arc<DebugThread>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
