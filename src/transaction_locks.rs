use crate::{
    FsError, FsResult, INodesInPath, InodeId, InodeKind, InodeLookup, Inodes, LockGuard,
    LockManager, LockMode,
};
use anyhow::anyhow;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{instrument, trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum INodeLockType {
    Read,
    Write,

    /// Write on the target and on its parent, for operations that add or
    /// remove children.
    WriteOnTargetAndParent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum INodeResolveType {
    Path,
    PathAndImmediateChildren,
    PathAndAllChildrenRecursively,
}

/// Locks required on a path.
///
/// Every ancestor gets read-locked; the target (or the deepest existing
/// component, if the target doesn't exist yet) gets the lock type's mode.
#[derive(Clone, Debug)]
pub struct InodeLock {
    path: String,
    lock_type: INodeLockType,
    resolve_type: INodeResolveType,
    children_mode: LockMode,
    follow_symlink: bool,
}

impl InodeLock {
    pub fn new(path: impl Into<String>, lock_type: INodeLockType) -> Self {
        let children_mode = match lock_type {
            INodeLockType::Read => LockMode::Read,
            INodeLockType::Write | INodeLockType::WriteOnTargetAndParent => LockMode::Write,
        };

        Self {
            path: path.into(),
            lock_type,
            resolve_type: INodeResolveType::Path,
            children_mode,
            follow_symlink: false,
        }
    }

    pub fn resolve_type(mut self, resolve_type: INodeResolveType) -> Self {
        self.resolve_type = resolve_type;
        self
    }

    /// Overrides the mode descendants are locked with.
    pub fn children_mode(mut self, mode: LockMode) -> Self {
        self.children_mode = mode;
        self
    }

    pub fn follow_symlink(mut self) -> Self {
        self.follow_symlink = true;
        self
    }

    fn plan(&self, src: &impl InodeLookup, plan: &mut LockPlan) -> FsResult<()> {
        if self.follow_symlink {
            // the link itself, so it can't be swapped under our feet
            let (link_chain, _) = INodesInPath::resolve_existing(src, &self.path, false)?;

            for &iid in link_chain.inodes() {
                plan.add(iid, LockMode::Read);
            }
        }

        let (chain, remaining) =
            INodesInPath::resolve_existing(src, &self.path, self.follow_symlink)?;

        let target_mode = match self.lock_type {
            INodeLockType::Read => LockMode::Read,
            INodeLockType::Write | INodeLockType::WriteOnTargetAndParent => LockMode::Write,
        };

        for &iid in chain.inodes() {
            plan.add(iid, LockMode::Read);
        }

        plan.add(chain.last(), target_mode);

        if !remaining.is_empty() {
            return Ok(());
        }

        if self.lock_type == INodeLockType::WriteOnTargetAndParent {
            if let Some(parent) = chain.parent() {
                plan.add(parent.last(), LockMode::Write);
            }
        }

        match self.resolve_type {
            INodeResolveType::Path => {}

            INodeResolveType::PathAndImmediateChildren => {
                for iid in src.children_of(chain.last())? {
                    plan.add(iid, self.children_mode);
                }
            }

            INodeResolveType::PathAndAllChildrenRecursively => {
                for iid in src.subtree_of(chain.last())?.into_iter().skip(1) {
                    plan.add(iid, self.children_mode);
                }
            }
        }

        Ok(())
    }
}

/// Everything a transaction wants locked, declared before it runs.
#[derive(Clone, Debug, Default)]
pub struct TransactionLocks {
    paths: Vec<InodeLock>,
    ids: Vec<(InodeId, LockMode)>,
    quota_chains: Vec<InodeId>,
}

impl TransactionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inode(mut self, lock: InodeLock) -> Self {
        self.paths.push(lock);
        self
    }

    pub fn inode_id(mut self, iid: InodeId, mode: LockMode) -> Self {
        self.ids.push((iid, mode));
        self
    }

    /// The inode and all its ancestors: read, except for directories
    /// carrying a quota, which get written to when pending updates are
    /// merged.
    pub fn quota_chain(mut self, iid: InodeId) -> Self {
        self.quota_chains.push(iid);
        self
    }

    pub fn plan(&self, src: &impl InodeLookup) -> FsResult<BTreeMap<InodeId, LockMode>> {
        let mut plan = LockPlan::default();

        for lock in &self.paths {
            lock.plan(src, &mut plan)?;
        }

        for &(iid, mode) in &self.ids {
            plan.add(iid, mode);
        }

        for &iid in &self.quota_chains {
            let mut cursor = Some(iid);

            while let Some(current) = cursor {
                let (parent, has_quota) = src
                    .with_inode(current, |inode| {
                        let has_quota = matches!(
                            &inode.kind,
                            InodeKind::Directory(dir) if dir.quota.is_some()
                        );

                        (inode.parent, has_quota)
                    })
                    .map_err(|_| FsError::not_found(format!("{:?}", current)))?;

                plan.add(current, if has_quota { LockMode::Write } else { LockMode::Read });

                cursor = parent;
            }
        }

        Ok(plan.0)
    }

    /// Takes the planned locks, then plans again while holding them; if the
    /// tree moved in between (say, a concurrent rename), the locks are dropped
    /// and the whole thing is retried.
    #[instrument(skip(self, manager, inodes))]
    pub fn acquire<'a>(
        &self,
        manager: &'a LockManager,
        inodes: &RwLock<Inodes>,
        retries: usize,
    ) -> FsResult<LockGuard<'a>> {
        let mut plan = self.plan(&*inodes.read())?;

        for attempt in 0..=retries {
            let guard = manager.acquire(plan);
            let replanned = self.plan(&*inodes.read())?;

            if guard.covers(&replanned) {
                return Ok(guard);
            }

            trace!(attempt, "lock set moved while acquiring, retrying");

            drop(guard);
            plan = replanned;
        }

        Err(anyhow!("couldn't obtain a stable lock set after {} attempts", retries + 1).into())
    }
}

#[derive(Default)]
struct LockPlan(BTreeMap<InodeId, LockMode>);

impl LockPlan {
    fn add(&mut self, iid: InodeId, mode: LockMode) {
        let entry = self.0.entry(iid).or_insert(mode);

        if mode > *entry {
            *entry = mode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DirectoryWithQuotaFeature, Inode, QuotaCounts};

    /// /a/b/c with a quota on /a
    fn tree() -> Inodes {
        let mut inodes = Inodes::new(Default::default());
        let mut parent = InodeId::ROOT;

        for name in [b"a", b"b", b"c"] {
            let iid = inodes.alloc_id().unwrap();
            let mut dir = Inode::new_directory(iid, name, Default::default());
            dir.parent = Some(parent);

            if name == b"a" {
                dir.as_directory_mut().unwrap().quota = Some(DirectoryWithQuotaFeature::new(
                    QuotaCounts::new(10, -1),
                    QuotaCounts::new(3, 0),
                ));
            }

            let mut p = inodes.resolve(parent).unwrap().clone();
            p.as_directory_mut().unwrap().children.insert(name.to_vec(), iid);
            inodes.insert(p);
            inodes.insert(dir);

            parent = iid;
        }

        inodes
    }

    fn id(n: u64) -> InodeId {
        InodeId::new(n)
    }

    #[test]
    fn ancestors_are_read_locked() {
        let inodes = tree();
        let plan = TransactionLocks::new()
            .inode(InodeLock::new("/a/b", INodeLockType::Write))
            .plan(&inodes)
            .unwrap();

        assert_eq!(
            BTreeMap::from_iter([
                (id(1), LockMode::Read),
                (id(2), LockMode::Read),
                (id(3), LockMode::Write),
            ]),
            plan
        );
    }

    #[test]
    fn missing_targets_lock_their_deepest_existing_ancestor() {
        let inodes = tree();
        let plan = TransactionLocks::new()
            .inode(InodeLock::new("/a/b/x/y", INodeLockType::WriteOnTargetAndParent))
            .plan(&inodes)
            .unwrap();

        assert_eq!(Some(&LockMode::Write), plan.get(&id(3)));
        assert_eq!(Some(&LockMode::Read), plan.get(&id(2)));
        assert!(!plan.contains_key(&id(4)));
    }

    #[test]
    fn subtrees_get_the_children_mode() {
        let inodes = tree();
        let plan = TransactionLocks::new()
            .inode(
                InodeLock::new("/a", INodeLockType::WriteOnTargetAndParent)
                    .resolve_type(INodeResolveType::PathAndAllChildrenRecursively)
                    .children_mode(LockMode::Read),
            )
            .plan(&inodes)
            .unwrap();

        assert_eq!(Some(&LockMode::Write), plan.get(&id(1)));
        assert_eq!(Some(&LockMode::Write), plan.get(&id(2)));
        assert_eq!(Some(&LockMode::Read), plan.get(&id(3)));
        assert_eq!(Some(&LockMode::Read), plan.get(&id(4)));
    }

    #[test]
    fn quota_chains_write_lock_quota_directories() {
        let inodes = tree();
        let plan = TransactionLocks::new()
            .quota_chain(id(4))
            .plan(&inodes)
            .unwrap();

        // the root always carries a quota
        assert_eq!(Some(&LockMode::Write), plan.get(&id(1)));
        assert_eq!(Some(&LockMode::Write), plan.get(&id(2)));
        assert_eq!(Some(&LockMode::Read), plan.get(&id(3)));
        assert_eq!(Some(&LockMode::Read), plan.get(&id(4)));
        assert!(TransactionLocks::new().quota_chain(id(99)).plan(&inodes).is_err());
    }

    #[test]
    fn acquires_and_releases() {
        let inodes = RwLock::new(tree());
        let manager = LockManager::default();
        let locks = TransactionLocks::new().inode(InodeLock::new("/a/b/c", INodeLockType::Read));

        let guard = locks.acquire(&manager, &inodes, 3).unwrap();

        assert_eq!(4, guard.len());

        drop(guard);

        assert_eq!(0, manager.locked_inodes());
    }
}
