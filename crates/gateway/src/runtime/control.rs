//! Per-worker control flags.
//!
//! Each running worker samples a pause flag at the top of every iteration
//! and a cancel flag before starting the next one. Flags are plain
//! atomics; the master flips them, the worker only reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Shared pause/cancel state for one worker.
#[derive(Clone, Default)]
pub struct ControlFlags {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Control flags for every worker of a session, keyed by worker id.
#[derive(Default)]
pub struct WorkerControls {
    flags: Mutex<HashMap<String, ControlFlags>>,
}

impl WorkerControls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register flags for a worker. Re-registering an id hands
    /// out fresh flags, orphaning the old ones.
    pub fn register(&self, worker_id: &str) -> ControlFlags {
        let flags = ControlFlags::new();
        self.flags
            .lock()
            .insert(worker_id.to_owned(), flags.clone());
        flags
    }

    pub fn get(&self, worker_id: &str) -> Option<ControlFlags> {
        self.flags.lock().get(worker_id).cloned()
    }

    pub fn remove(&self, worker_id: &str) {
        self.flags.lock().remove(worker_id);
    }

    pub fn ids(&self) -> Vec<String> {
        self.flags.lock().keys().cloned().collect()
    }

    pub fn cancel_all(&self) {
        for flags in self.flags.lock().values() {
            flags.cancel();
        }
    }

    pub fn clear(&self) {
        self.flags.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_lifecycle() {
        let flags = ControlFlags::new();
        assert!(!flags.is_paused());
        assert!(!flags.is_cancelled());

        flags.pause();
        assert!(flags.is_paused());
        flags.resume();
        assert!(!flags.is_paused());

        flags.cancel();
        assert!(flags.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let flags = ControlFlags::new();
        let clone = flags.clone();
        flags.pause();
        assert!(clone.is_paused());
    }

    #[test]
    fn register_replaces_previous_flags() {
        let controls = WorkerControls::new();
        let old = controls.register("w1");
        let new = controls.register("w1");

        controls.get("w1").unwrap().cancel();
        assert!(new.is_cancelled());
        assert!(!old.is_cancelled());
    }

    #[test]
    fn cancel_all_hits_every_worker() {
        let controls = WorkerControls::new();
        let a = controls.register("a");
        let b = controls.register("b");
        controls.cancel_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn remove_unknown_is_noop() {
        let controls = WorkerControls::new();
        controls.remove("ghost");
        assert!(controls.get("ghost").is_none());
    }
}
