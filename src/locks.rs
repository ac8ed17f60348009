use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use parking_lot::{ArcMutexGuard, RawMutex};

/// per-path mutex registry serializing COW promotions and whiteout writes
///
/// the dispatcher takes a lock on a union path before promoting or deleting
/// it so two concurrent writers to the same RO-resident entity cannot both
/// observe it as unpromoted and race to copy it up. entries are created
/// lazily and never removed; the table stays small because it only grows
/// with distinct paths actually mutated during the mount's lifetime.
#[derive(Default)]
pub struct PathLocks {
    table: Mutex<HashMap<PathBuf, Arc<parking_lot::Mutex<()>>>>,
}

pub struct PathLockGuard(ArcMutexGuard<RawMutex, ()>);

impl PathLocks {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// acquire the lock for `path`, blocking until available
    pub fn lock(&self, path: &Path) -> PathLockGuard {
        let entry = {
            let mut table = self.table.lock().unwrap();
            table
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(parking_lot::Mutex::new(())))
                .clone()
        };
        PathLockGuard(parking_lot::Mutex::lock_arc(&entry))
    }
}
