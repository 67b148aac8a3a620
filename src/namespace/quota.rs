use super::{FsError, FsResult};
use crate::{
    DirectoryWithQuotaFeature, EditOp, INodeLockType, INodeResolveType, INodesInPath, Inode,
    InodeId, InodeLock, InodeLookup, LockMode, Namespace, OperationKind, QuotaCounts, StorageType,
    Transaction, TransactionLocks,
};
use tracing::{debug, instrument, trace, warn};

/// Limits of a quota directory next to its cached usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaUsage {
    pub quota: QuotaCounts,
    pub consumed: QuotaCounts,
}

impl Namespace {
    /// Accounts for `delta` happening below the chain's `num_of_inodes`-th
    /// inode, checking the quota of every ancestor first when asked to.
    ///
    /// The delta is not applied right away; it's queued as a pending update
    /// of the inode at `num_of_inodes - 1` and merged later.
    pub fn update_count(
        &self,
        tx: &mut Transaction<'_>,
        chain: &INodesInPath,
        num_of_inodes: usize,
        delta: QuotaCounts,
        check_quota: bool,
    ) -> FsResult<()> {
        if !self.is_quota_enabled() || !self.is_image_loaded() || delta.is_zero() {
            return Ok(());
        }

        let num_of_inodes = num_of_inodes.min(chain.len());

        if num_of_inodes == 0 {
            return Ok(());
        }

        if check_quota {
            Self::verify_quota(tx, chain, num_of_inodes, delta, None)?;
        }

        self.unprotected_update_count(tx, chain, num_of_inodes, delta)
    }

    /// Like [`Self::update_count()`], for callers that have already verified
    /// the quota (or only ever free space).
    pub fn update_count_no_quota_check(
        &self,
        tx: &mut Transaction<'_>,
        chain: &INodesInPath,
        num_of_inodes: usize,
        delta: QuotaCounts,
    ) -> FsResult<()> {
        match self.update_count(tx, chain, num_of_inodes, delta, false) {
            Err(FsError::QuotaExceeded(err)) => {
                warn!("unexpected quota failure in a no-check update: {}", err);
                Ok(())
            }

            result => result,
        }
    }

    pub fn unprotected_update_count(
        &self,
        tx: &mut Transaction<'_>,
        chain: &INodesInPath,
        num_of_inodes: usize,
        delta: QuotaCounts,
    ) -> FsResult<()> {
        let target = chain.inode(num_of_inodes - 1);

        trace!("pending quota update for {:?}: {:?}", target, delta);

        tx.submit_quota_update(target, delta)
    }

    /// Checks `delta` against the quota of every ancestor at positions
    /// `pos - 1` down to the root, stopping at `common_ancestor` (which has
    /// already accounted for the usage, e.g. when renaming inside of it).
    pub fn verify_quota(
        src: &impl InodeLookup,
        chain: &INodesInPath,
        pos: usize,
        delta: QuotaCounts,
        common_ancestor: Option<InodeId>,
    ) -> FsResult<()> {
        if !delta.any_positive() {
            return Ok(());
        }

        for nth in (0..pos.min(chain.len())).rev() {
            let iid = chain.inode(nth);

            if Some(iid) == common_ancestor {
                break;
            }

            let verdict = src.with_inode(iid, |inode| {
                inode.quota_feature().map(|quota| quota.verify_quota(delta))
            })?;

            if let Some(Err(err)) = verdict {
                return Err(err.with_path(chain.path_of(nth)).into());
            }
        }

        Ok(())
    }

    /// True usage of the subtree rooted at `iid`, straight from the tree.
    pub fn space_consumed_in_tree(src: &impl InodeLookup, iid: InodeId) -> FsResult<QuotaCounts> {
        let mut usage = QuotaCounts::default();

        for iid in src.subtree_of(iid)? {
            usage += src.with_inode(iid, Inode::own_usage)?;
        }

        Ok(usage)
    }

    /// Applies every pending quota update to the cached usage of its inode's
    /// quota-carrying ancestors; returns the number of merged updates.
    #[instrument(skip(self))]
    pub fn merge_quota_updates(&self) -> FsResult<usize> {
        debug!("op: merge_quota_updates()");

        let mut attempt = 0;

        loop {
            match self.try_merge_quota_updates() {
                // a target got deleted while we were planning locks
                Err(FsError::NotFound { .. }) if attempt < self.config().lock_retries => {
                    attempt += 1;
                }

                result => return result,
            }
        }
    }

    fn try_merge_quota_updates(&self) -> FsResult<usize> {
        let mut targets = self.quota_updates.targets();

        if targets.is_empty() {
            return Ok(0);
        }

        {
            let inodes = self.inodes.read();

            targets.retain(|&iid| {
                if inodes.contains(iid) {
                    return true;
                }

                let discarded = self.quota_updates.take(iid);

                debug!("discarding {} update(s) of vanished {:?}", discarded.len(), iid);

                false
            });
        }

        let locks = targets
            .iter()
            .fold(TransactionLocks::new(), |locks, &iid| locks.quota_chain(iid));

        self.handle(OperationKind::MergeQuotaUpdates, &locks, |tx| {
            let mut merged = 0;

            for &iid in &targets {
                let updates = tx.consume_pending(iid)?;
                let delta: QuotaCounts = updates.iter().map(|update| update.delta).sum();

                merged += updates.len();

                if delta.is_zero() {
                    continue;
                }

                let mut cursor = Some(iid);

                while let Some(current) = cursor {
                    let mut inode = tx.get(current)?;

                    cursor = inode.parent;

                    let quota = inode.as_directory_mut().and_then(|dir| dir.quota.as_mut());

                    if let Some(quota) = quota {
                        quota.add_space_consumed(delta);
                        tx.put(inode)?;
                    }
                }
            }

            trace!("merged {} quota update(s)", merged);

            Ok(merged)
        })
    }

    #[instrument(skip(self))]
    pub fn set_quota(&self, path: &str, namespace: i64, diskspace: i64) -> FsResult<()> {
        debug!("op: set_quota()");

        for value in [namespace, diskspace] {
            if value < 0 && value != QuotaCounts::UNLIMITED {
                return Err(FsError::InvalidArgument(format!(
                    "Illegal value for quota: {}",
                    value
                )));
            }
        }

        if namespace == 0 {
            return Err(FsError::InvalidArgument(
                "Namespace quota must be greater than zero".into(),
            ));
        }

        let op = EditOp::SetQuota {
            path: path.into(),
            namespace,
            diskspace,
        };

        let clears_namespace = namespace == QuotaCounts::UNLIMITED;

        self.update_quota(path, op, clears_namespace, |quota| {
            if namespace != QuotaCounts::DONT_SET {
                quota.namespace = namespace;
            }

            if diskspace != QuotaCounts::DONT_SET {
                quota.diskspace = diskspace;
            }
        })
    }

    #[instrument(skip(self))]
    pub fn set_quota_by_storage_type(
        &self,
        path: &str,
        ty: StorageType,
        limit: i64,
    ) -> FsResult<()> {
        debug!("op: set_quota_by_storage_type()");

        if ty == StorageType::RamDisk {
            return Err(FsError::InvalidArgument(format!(
                "Quota by storage type is not supported for {}",
                ty
            )));
        }

        if limit < 0 && limit != QuotaCounts::UNLIMITED {
            return Err(FsError::InvalidArgument(format!(
                "Illegal value for quota: {}",
                limit
            )));
        }

        let op = EditOp::SetQuotaByStorageType {
            path: path.into(),
            storage_type: ty,
            limit,
        };

        self.update_quota(path, op, false, |quota| {
            if limit != QuotaCounts::DONT_SET {
                quota.types.set(ty, limit);
            }
        })
    }

    fn update_quota(
        &self,
        path: &str,
        op: EditOp,
        clears_namespace: bool,
        apply: impl FnOnce(&mut QuotaCounts),
    ) -> FsResult<()> {
        let path = self.resolve_path(path)?;

        let locks = TransactionLocks::new().inode(
            InodeLock::new(path.as_str(), INodeLockType::Write)
                .resolve_type(INodeResolveType::PathAndAllChildrenRecursively)
                .children_mode(LockMode::Read),
        );

        self.handle(OperationKind::SetQuota, &locks, |tx| {
            let chain = INodesInPath::resolve(tx, &path, false)?;
            let iid = chain.last();
            if iid.is_root() && clears_namespace {
                return Err(FsError::InvalidArgument(
                    "Cannot clear namespace quota on root".into(),
                ));
            }

            let subtree = tx.subtree_of(iid)?;
            let seed = Self::space_consumed_in_tree(tx, iid)? - tx.pending_for(&subtree)?;
            let mut inode = tx.get(iid)?;

            let Some(dir) = inode.as_directory_mut() else {
                return Err(FsError::NotDirectory(path.clone()));
            };

            let mut quota = dir
                .quota
                .as_ref()
                .map(|feature| feature.quota())
                .unwrap_or_else(QuotaCounts::unlimited);

            apply(&mut quota);

            match dir.quota.as_mut() {
                Some(feature) if quota.any_limited() || iid.is_root() => {
                    feature.set_quota(quota);
                }

                Some(_) => {
                    debug!("dropping quota of {}", path);
                    dir.quota = None;
                }

                None if quota.any_limited() => {
                    dir.quota = Some(DirectoryWithQuotaFeature::new(quota, seed));
                }

                None => {}
            }

            tx.put(inode)?;
            tx.journal(op)?;

            Ok(())
        })
    }

    /// Limits and cached usage of a quota directory; `None` for anything
    /// without a quota.
    #[instrument(skip(self))]
    pub fn get_quota_usage(&self, path: &str) -> FsResult<Option<QuotaUsage>> {
        debug!("op: get_quota_usage()");

        let path = self.resolve_path(path)?;
        let locks =
            TransactionLocks::new().inode(InodeLock::new(path.as_str(), INodeLockType::Read));

        self.handle(OperationKind::GetQuotaUsage, &locks, |tx| {
            let chain = INodesInPath::resolve(tx, &path, false)?;

            tx.with_inode(chain.last(), |inode| {
                inode.quota_feature().map(|feature| QuotaUsage {
                    quota: feature.quota(),
                    consumed: feature.space_consumed(),
                })
            })
        })
    }

    /// True usage of the subtree at `path`, computed by walking it.
    #[instrument(skip(self))]
    pub fn compute_quota_usage(&self, path: &str) -> FsResult<QuotaCounts> {
        debug!("op: compute_quota_usage()");

        let path = self.resolve_path(path)?;

        let locks = TransactionLocks::new().inode(
            InodeLock::new(path.as_str(), INodeLockType::Read)
                .resolve_type(INodeResolveType::PathAndAllChildrenRecursively),
        );

        self.handle(OperationKind::ComputeQuotaUsage, &locks, |tx| {
            let chain = INodesInPath::resolve(tx, &path, false)?;

            Self::space_consumed_in_tree(tx, chain.last())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{CreateOptions, FsError, Namespace, PermissionStatus, QuotaCounts, QuotaKind};

    fn ns() -> Namespace {
        Namespace::default()
    }

    fn touch(ns: &Namespace, path: &str) {
        ns.create(path, &CreateOptions::new("client")).unwrap();
        ns.complete(path, "client", 0).unwrap();
    }

    #[test]
    fn updates_stay_pending_until_merged() {
        let ns = ns();

        ns.mkdirs("/q", PermissionStatus::default()).unwrap();
        ns.set_quota("/q", 100, QuotaCounts::UNLIMITED).unwrap();
        touch(&ns, "/q/a");
        touch(&ns, "/q/b");

        let cached = ns.get_quota_usage("/q").unwrap().unwrap().consumed;

        assert_eq!(1, cached.namespace);
        assert!(!ns.quota_update_manager().is_empty());

        ns.merge_quota_updates().unwrap();

        let cached = ns.get_quota_usage("/q").unwrap().unwrap().consumed;

        assert_eq!(3, cached.namespace);
        assert!(ns.quota_update_manager().is_empty());
    }

    #[test]
    fn quota_is_seeded_from_the_subtree() {
        let ns = ns();

        ns.mkdirs("/q/x/y", PermissionStatus::default()).unwrap();
        touch(&ns, "/q/x/f");
        ns.set_quota("/q", 100, QuotaCounts::UNLIMITED).unwrap();

        // /q itself; the rest is still pending below it
        assert_eq!(1, ns.get_quota_usage("/q").unwrap().unwrap().consumed.namespace);

        ns.merge_quota_updates().unwrap();

        assert_eq!(4, ns.get_quota_usage("/q").unwrap().unwrap().consumed.namespace);
        assert_eq!(QuotaCounts::new(4, 0), ns.compute_quota_usage("/q").unwrap());
    }

    #[test]
    fn namespace_quota_rejects_the_extra_file() {
        let ns = ns();

        ns.mkdirs("/q", PermissionStatus::default()).unwrap();
        ns.set_quota("/q", 3, QuotaCounts::UNLIMITED).unwrap();
        touch(&ns, "/q/a");
        ns.merge_quota_updates().unwrap();
        touch(&ns, "/q/b");
        ns.merge_quota_updates().unwrap();

        let err = ns.create("/q/c", &CreateOptions::new("client")).unwrap_err();

        match err {
            FsError::QuotaExceeded(err) => {
                assert_eq!(QuotaKind::Namespace, err.kind);
                assert_eq!(Some("/q".to_string()), err.path);
            }

            err => panic!("unexpected: {:?}", err),
        }

        assert!(ns.get_file_info("/q/c").is_err());
    }

    #[test]
    fn clearing_every_limit_drops_the_quota() {
        let ns = ns();

        ns.mkdirs("/q", PermissionStatus::default()).unwrap();
        ns.set_quota("/q", 10, 1024).unwrap();
        ns.set_quota("/q", QuotaCounts::DONT_SET, QuotaCounts::UNLIMITED)
            .unwrap();

        let usage = ns.get_quota_usage("/q").unwrap().unwrap();

        assert_eq!(10, usage.quota.namespace);
        assert_eq!(QuotaCounts::UNLIMITED, usage.quota.diskspace);

        ns.set_quota("/q", QuotaCounts::UNLIMITED, QuotaCounts::DONT_SET)
            .unwrap();

        assert_eq!(None, ns.get_quota_usage("/q").unwrap());
    }

    #[test]
    fn rejects_bogus_quotas() {
        let ns = ns();

        ns.mkdirs("/q", PermissionStatus::default()).unwrap();
        touch(&ns, "/f");

        assert!(ns.set_quota("/q", 0, 10).is_err());
        assert!(ns.set_quota("/q", -2, 10).is_err());
        assert!(ns.set_quota("/", QuotaCounts::UNLIMITED, 10).is_err());
        assert!(matches!(ns.set_quota("/f", 10, 10), Err(FsError::NotDirectory(_))));
        assert!(ns
            .set_quota_by_storage_type("/q", crate::StorageType::RamDisk, 10)
            .is_err());
    }
}
