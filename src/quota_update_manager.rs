use crate::{InodeId, Namespace, QuotaCounts};
use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// A not-yet-merged change of usage below `inode_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaUpdate {
    pub id: u64,
    pub inode_id: InodeId,
    pub delta: QuotaCounts,
}

/// Ledger of pending quota updates.
///
/// Mutations only append here; the cached usage of quota directories gets
/// corrected later, when [`Namespace::merge_quota_updates()`] drains the
/// ledger. At any point in time, a quota directory's cached usage plus every
/// update pending at or below it equals its true usage.
#[derive(Debug, Default)]
pub struct QuotaUpdateManager {
    ledger: Mutex<Ledger>,
}

#[derive(Debug, Default)]
struct Ledger {
    next_id: u64,
    updates: BTreeMap<u64, QuotaUpdate>,
    by_inode: HashMap<InodeId, BTreeSet<u64>>,
}

impl Ledger {
    fn push(&mut self, inode_id: InodeId, delta: QuotaCounts) -> u64 {
        let id = self.next_id;

        self.next_id += 1;
        self.updates.insert(id, QuotaUpdate { id, inode_id, delta });
        self.by_inode.entry(inode_id).or_default().insert(id);

        id
    }

    fn take(&mut self, inode_id: InodeId) -> Vec<QuotaUpdate> {
        self.by_inode
            .remove(&inode_id)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| self.updates.remove(&id))
            .collect()
    }
}

impl QuotaUpdateManager {
    pub fn submit_delta(&self, inode_id: InodeId, delta: QuotaCounts) -> u64 {
        let id = self.ledger.lock().push(inode_id, delta);

        trace!("queued quota update #{} for {:?}: {:?}", id, inode_id, delta);

        id
    }

    /// Appends a batch atomically, so a concurrent drain sees all or none of
    /// it.
    pub fn submit_all(&self, updates: impl IntoIterator<Item = (InodeId, QuotaCounts)>) {
        let mut ledger = self.ledger.lock();

        for (inode_id, delta) in updates {
            if !delta.is_zero() {
                ledger.push(inode_id, delta);
            }
        }
    }

    /// Sum of everything pending for any of `inodes`.
    pub fn outstanding(&self, inodes: &[InodeId]) -> QuotaCounts {
        let ledger = self.ledger.lock();

        inodes
            .iter()
            .filter_map(|iid| ledger.by_inode.get(iid))
            .flatten()
            .filter_map(|id| ledger.updates.get(id))
            .map(|update| update.delta)
            .sum()
    }

    pub fn outstanding_updates(&self, inode_id: InodeId) -> Vec<QuotaUpdate> {
        let ledger = self.ledger.lock();

        ledger
            .by_inode
            .get(&inode_id)
            .into_iter()
            .flatten()
            .filter_map(|id| ledger.updates.get(id).cloned())
            .collect()
    }

    /// Inodes with pending updates, oldest first.
    pub fn targets(&self) -> Vec<InodeId> {
        let ledger = self.ledger.lock();
        let mut seen = BTreeSet::new();

        ledger
            .updates
            .values()
            .map(|update| update.inode_id)
            .filter(|iid| seen.insert(*iid))
            .collect()
    }

    /// Removes and returns everything pending for `inode_id`.
    pub(crate) fn take(&self, inode_id: InodeId) -> Vec<QuotaUpdate> {
        self.ledger.lock().take(inode_id)
    }

    /// Forgets updates that got merged.
    pub(crate) fn remove(&self, ids: &[u64]) {
        let mut ledger = self.ledger.lock();

        for id in ids {
            let Some(update) = ledger.updates.remove(id) else {
                continue;
            };

            if let Some(pending) = ledger.by_inode.get_mut(&update.inode_id) {
                pending.remove(id);

                if pending.is_empty() {
                    ledger.by_inode.remove(&update.inode_id);
                }
            }
        }
    }

    /// Drops pending updates of inodes that went away together with their
    /// usage.
    pub(crate) fn retract(&self, inodes: &BTreeSet<InodeId>) -> usize {
        let mut ledger = self.ledger.lock();

        inodes.iter().map(|&iid| ledger.take(iid).len()).sum()
    }

    pub(crate) fn clear(&self) -> usize {
        let mut ledger = self.ledger.lock();
        let count = ledger.updates.len();

        ledger.updates.clear();
        ledger.by_inode.clear();

        count
    }

    pub fn len(&self) -> usize {
        self.ledger.lock().updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.lock().updates.is_empty()
    }
}

/// Background thread merging pending quota updates every
/// `quota_update_interval_ms`; stops when dropped.
#[derive(Debug)]
pub struct QuotaUpdateMonitor {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl QuotaUpdateMonitor {
    pub fn spawn(ns: &Arc<Namespace>) -> Result<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let interval = ns.config().quota_update_interval();
        let ns: Weak<Namespace> = Arc::downgrade(ns);

        let handle = thread::Builder::new()
            .name("quota-update-monitor".into())
            .spawn({
                let stop = Arc::clone(&stop);

                move || {
                    debug!("quota update monitor started");

                    loop {
                        {
                            let (stopped, wakeup) = &*stop;
                            let mut stopped = stopped.lock();

                            if !*stopped {
                                wakeup.wait_for(&mut stopped, interval);
                            }

                            if *stopped {
                                break;
                            }
                        }

                        let Some(ns) = ns.upgrade() else {
                            break;
                        };

                        if let Err(err) = ns.merge_quota_updates() {
                            warn!("couldn't merge quota updates: {}", err);
                        }
                    }

                    debug!("quota update monitor stopped");
                }
            })
            .context("couldn't spawn quota update monitor")?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for QuotaUpdateMonitor {
    fn drop(&mut self) {
        let (stopped, wakeup) = &*self.stop;

        *stopped.lock() = true;
        wakeup.notify_all();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("quota update monitor panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> InodeId {
        InodeId::new(n)
    }

    #[test]
    fn sums_outstanding_updates_per_inode() {
        let qum = QuotaUpdateManager::default();

        qum.submit_delta(id(2), QuotaCounts::new(1, 0));
        qum.submit_delta(id(3), QuotaCounts::new(0, 100));
        qum.submit_delta(id(2), QuotaCounts::new(1, 10));

        assert_eq!(QuotaCounts::new(2, 10), qum.outstanding(&[id(2)]));
        assert_eq!(QuotaCounts::new(2, 110), qum.outstanding(&[id(2), id(3)]));
        assert_eq!(2, qum.outstanding_updates(id(2)).len());
        assert_eq!(vec![id(2), id(3)], qum.targets());
    }

    #[test]
    fn take_drains_a_single_inode() {
        let qum = QuotaUpdateManager::default();

        qum.submit_all([
            (id(2), QuotaCounts::new(1, 0)),
            (id(3), QuotaCounts::new(1, 0)),
            (id(4), QuotaCounts::default()),
        ]);

        assert_eq!(2, qum.len());
        assert_eq!(1, qum.take(id(2)).len());
        assert!(qum.take(id(2)).is_empty());
        assert_eq!(vec![id(3)], qum.targets());
    }

    #[test]
    fn remove_forgets_merged_updates_only() {
        let qum = QuotaUpdateManager::default();

        let first = qum.submit_delta(id(2), QuotaCounts::new(1, 0));
        qum.submit_delta(id(2), QuotaCounts::new(0, 5));

        qum.remove(&[first]);

        assert_eq!(QuotaCounts::new(0, 5), qum.outstanding(&[id(2)]));
        assert_eq!(1, qum.len());
    }

    #[test]
    fn retract_and_clear() {
        let qum = QuotaUpdateManager::default();

        qum.submit_delta(id(2), QuotaCounts::new(1, 0));
        qum.submit_delta(id(3), QuotaCounts::new(1, 0));
        qum.submit_delta(id(3), QuotaCounts::new(1, 0));

        assert_eq!(2, qum.retract(&BTreeSet::from([id(3)])));
        assert_eq!(1, qum.clear());
        assert!(qum.is_empty());
    }
}
