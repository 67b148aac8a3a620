use crate::{
    EditOp, FsError, FsResult, Inode, InodeId, InodeLookup, LockGuard, LockMode, Namespace,
    QuotaCounts, QuotaUpdate,
};
use anyhow::{anyhow, Context};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Mkdirs,
    Create,
    CreateSymlink,
    AddBlock,
    AbandonBlock,
    Complete,
    Append,
    WriteInline,
    Truncate,
    Delete,
    Rename,
    SetQuota,
    SetStoragePolicy,
    SetReplication,
    GetFileInfo,
    GetListing,
    GetQuotaUsage,
    ComputeQuotaUsage,
    ContentSummary,
    MergeQuotaUpdates,
    RecomputeQuota,
}

/// Unit of work of a single request.
///
/// Writes are buffered and become visible only on commit, together with the
/// quota updates and edits they produced; dropping a transaction without
/// committing it throws everything away. Only inodes covered by the
/// request's locks (or created by it) can be touched.
#[derive(Debug)]
pub struct Transaction<'a> {
    ns: &'a Namespace,
    kind: OperationKind,
    locks: LockGuard<'a>,
    state: Option<TransactionState>,
}

#[derive(Debug, Default)]
pub struct TransactionState {
    pub dirty: bool,

    /// `None` marks a removed inode.
    pub inodes: BTreeMap<InodeId, Option<Inode>>,

    pub created: BTreeSet<InodeId>,
    pub quota_updates: Vec<(InodeId, QuotaCounts)>,
    pub merged_updates: Vec<u64>,
    pub retracted: BTreeSet<InodeId>,
    pub clear_pending: bool,
    pub edits: Vec<EditOp>,
}

impl<'a> Transaction<'a> {
    pub fn begin(ns: &'a Namespace, kind: OperationKind, locks: LockGuard<'a>) -> Self {
        Self {
            ns,
            kind,
            locks,
            state: Some(Default::default()),
        }
    }

    fn state(&self) -> FsResult<&TransactionState> {
        Ok(self
            .state
            .as_ref()
            .context("tried to use a closed transaction")?)
    }

    fn get_mut(&mut self) -> FsResult<&mut TransactionState> {
        Ok(self
            .state
            .as_mut()
            .context("tried to modify a closed transaction")?)
    }

    fn ensure_locked(&self, iid: InodeId, mode: LockMode) -> FsResult<()> {
        if self.locks.holds(iid, mode) || self.state()?.created.contains(&iid) {
            Ok(())
        } else {
            Err(FsError::Other(anyhow!(
                "{:?} transaction touched {:?} without holding a {:?} lock on it",
                self.kind,
                iid,
                mode
            )))
        }
    }

    pub fn get(&self, iid: InodeId) -> FsResult<Inode> {
        self.inode(iid)
    }

    /// Allocates an id for an inode this transaction is about to create.
    pub fn alloc_inode_id(&mut self) -> FsResult<InodeId> {
        let iid = self.ns.inodes.write().alloc_id()?;

        self.get_mut()?.created.insert(iid);

        Ok(iid)
    }

    /// Schedules given inode to be stored.
    pub fn put(&mut self, inode: Inode) -> FsResult<()> {
        self.ensure_locked(inode.id, LockMode::Write)?;

        let tx = self.get_mut()?;

        tx.dirty = true;
        tx.inodes.insert(inode.id, Some(inode));

        Ok(())
    }

    /// Schedules given inode to be freed.
    pub fn remove(&mut self, iid: InodeId) -> FsResult<()> {
        if iid.is_root() {
            return Err(anyhow!("tried to remove the root inode").into());
        }

        self.ensure_locked(iid, LockMode::Write)?;

        let tx = self.get_mut()?;

        tx.dirty = true;
        tx.inodes.insert(iid, None);

        Ok(())
    }

    pub fn submit_quota_update(&mut self, iid: InodeId, delta: QuotaCounts) -> FsResult<()> {
        let tx = self.get_mut()?;

        tx.dirty = true;
        tx.quota_updates.push((iid, delta));

        Ok(())
    }

    /// Usage still waiting to be merged for any of `inodes`, including what
    /// this transaction has produced so far.
    pub fn pending_for(&self, inodes: &[InodeId]) -> FsResult<QuotaCounts> {
        let tx = self.state()?;

        let unretracted: Vec<_> = inodes
            .iter()
            .copied()
            .filter(|iid| !tx.retracted.contains(iid))
            .collect();

        let buffered: QuotaCounts = tx
            .quota_updates
            .iter()
            .filter(|(iid, _)| inodes.contains(iid))
            .map(|(_, delta)| *delta)
            .sum();

        Ok(self.ns.quota_updates.outstanding(&unretracted) + buffered)
    }

    /// Throws away pending updates of inodes whose usage went away.
    pub fn retract_pending(&mut self, inodes: &[InodeId]) -> FsResult<()> {
        let tx = self.get_mut()?;

        tx.dirty = true;
        tx.retracted.extend(inodes.iter().copied());
        tx.quota_updates.retain(|(iid, _)| !inodes.contains(iid));

        Ok(())
    }

    /// Pending updates of given inode; they get removed from the ledger once
    /// this transaction commits.
    pub fn consume_pending(&mut self, iid: InodeId) -> FsResult<Vec<QuotaUpdate>> {
        self.ensure_locked(iid, LockMode::Read)?;

        let updates = self.ns.quota_updates.outstanding_updates(iid);
        let tx = self.get_mut()?;

        tx.dirty = true;
        tx.merged_updates.extend(updates.iter().map(|update| update.id));

        Ok(updates)
    }

    /// Empties the whole ledger on commit.
    pub fn clear_pending(&mut self) -> FsResult<()> {
        let tx = self.get_mut()?;

        tx.dirty = true;
        tx.clear_pending = true;

        Ok(())
    }

    pub fn journal(&mut self, op: EditOp) -> FsResult<()> {
        let tx = self.get_mut()?;

        tx.dirty = true;
        tx.edits.push(op);

        Ok(())
    }

    /// Applies scheduled changes atomically and returns whether anything got
    /// changed.
    ///
    /// (i.e. false = transaction was a no-op)
    pub fn commit(mut self) -> FsResult<bool> {
        let tx = self
            .state
            .take()
            .context("tried to commit a closed transaction")?;

        if !tx.dirty {
            return Ok(false);
        }

        {
            let mut inodes = self.ns.inodes.write();

            for (iid, inode) in tx.inodes {
                match inode {
                    Some(inode) => inodes.insert(inode),

                    None => {
                        if inodes.contains(iid) {
                            inodes.remove(iid)?;
                        }
                    }
                }
            }
        }

        let updates = &self.ns.quota_updates;

        updates.remove(&tx.merged_updates);

        if tx.clear_pending {
            updates.clear();
        } else {
            updates.retract(&tx.retracted);
        }

        updates.submit_all(tx.quota_updates);

        self.ns.journal(tx.edits);

        debug!("committed {:?} transaction", self.kind);

        Ok(true)
    }

    pub fn rollback(mut self) {
        if let Some(tx) = self.state.take() {
            if tx.dirty {
                debug!(
                    "rolled back {:?} transaction ({} buffered inode(s))",
                    self.kind,
                    tx.inodes.len()
                );
            }
        }
    }
}

impl InodeLookup for Transaction<'_> {
    fn find_inode<R>(&self, iid: InodeId, f: impl FnOnce(&Inode) -> R) -> FsResult<Option<R>> {
        self.ensure_locked(iid, LockMode::Read)?;

        match self.state()?.inodes.get(&iid) {
            Some(inode) => Ok(inode.as_ref().map(f)),
            None => Ok(self.ns.inodes.read().get(iid).map(f)),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            if state.dirty {
                warn!("{:?} transaction got aborted", self.kind);
            }
        }
    }
}
