use crate::InodeId;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    Read,
    Write,
}

impl LockMode {
    pub fn conflicts_with(self, other: Self) -> bool {
        self == LockMode::Write || other == LockMode::Write
    }

    /// Whether holding `self` is enough for an access needing `wanted`.
    pub fn covers(self, wanted: Self) -> bool {
        self >= wanted
    }
}

/// Per-inode reader/writer locks.
///
/// Locks of a single request are taken in ascending inode id order, which is
/// what keeps two requests from ever waiting on each other in a cycle.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<HashMap<InodeId, LockEntry>>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct LockEntry {
    readers: usize,
    writer: bool,
}

impl LockEntry {
    fn held(&self) -> Option<LockMode> {
        if self.writer {
            Some(LockMode::Write)
        } else if self.readers > 0 {
            Some(LockMode::Read)
        } else {
            None
        }
    }

    fn try_take(&mut self, mode: LockMode) -> bool {
        if self.held().is_some_and(|held| held.conflicts_with(mode)) {
            return false;
        }

        match mode {
            LockMode::Read => self.readers += 1,
            LockMode::Write => self.writer = true,
        }

        true
    }

    fn give_back(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers = self.readers.saturating_sub(1),
            LockMode::Write => self.writer = false,
        }
    }

    fn is_free(&self) -> bool {
        self.held().is_none()
    }
}

impl LockManager {
    /// Blocks until every requested lock is held.
    pub fn acquire(&self, wanted: BTreeMap<InodeId, LockMode>) -> LockGuard<'_> {
        let mut table = self.table.lock();

        for (&iid, &mode) in &wanted {
            loop {
                if table.entry(iid).or_default().try_take(mode) {
                    break;
                }

                trace!("waiting for {:?} lock on {:?}", mode, iid);

                self.released.wait(&mut table);
            }
        }

        LockGuard {
            manager: self,
            held: wanted,
        }
    }

    fn release(&self, held: &BTreeMap<InodeId, LockMode>) {
        let mut table = self.table.lock();

        for (iid, &mode) in held {
            if let Some(entry) = table.get_mut(iid) {
                entry.give_back(mode);

                if entry.is_free() {
                    table.remove(iid);
                }
            }
        }

        drop(table);

        self.released.notify_all();
    }

    /// Number of inodes somebody currently holds a lock on.
    pub fn locked_inodes(&self) -> usize {
        self.table.lock().len()
    }
}

/// Lock set of a single request; dropping it releases everything.
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    held: BTreeMap<InodeId, LockMode>,
}

impl LockGuard<'_> {
    pub fn mode_of(&self, iid: InodeId) -> Option<LockMode> {
        self.held.get(&iid).copied()
    }

    pub fn holds(&self, iid: InodeId, wanted: LockMode) -> bool {
        self.mode_of(iid).is_some_and(|mode| mode.covers(wanted))
    }

    pub fn covers(&self, plan: &BTreeMap<InodeId, LockMode>) -> bool {
        plan.iter().all(|(&iid, &mode)| self.holds(iid, mode))
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.held);
    }
}
