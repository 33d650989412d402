//! Per-file locks shared by every item of a pool

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Lock guarding one entry file
pub(crate) type FileLock = Arc<Mutex<()>>;

/// Dead registry slots are swept once the map grows past this many entries
const SWEEP_THRESHOLD: usize = 256;

/// Registry of per-file locks, keyed by entry file name.
///
/// The registry only holds weak references: a lock lives as long as some
/// [`crate::Item`] (or an in-flight pool operation) holds it, so the map does
/// not grow with every key ever touched.
#[derive(Debug, Default)]
pub(crate) struct LockRegistry {
    locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl LockRegistry {
    /// The lock for `file_name`, shared with every other live holder
    pub(crate) fn lock_for(&self, file_name: &str) -> FileLock {
        let mut locks = self.locks.lock();

        if let Some(lock) = locks.get(file_name).and_then(Weak::upgrade) {
            return lock;
        }

        if locks.len() >= SWEEP_THRESHOLD {
            locks.retain(|_, lock| lock.strong_count() > 0);
        }

        let lock = Arc::new(Mutex::new(()));
        locks.insert(file_name.to_string(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}
