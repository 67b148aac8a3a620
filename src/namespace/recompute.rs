use super::FsResult;
use crate::{
    INodeLockType, INodeResolveType, INodesInPath, InodeId, InodeKind, InodeLock, InodeLookup,
    LockMode, Namespace, OperationKind, QuotaCounts, Transaction, TransactionLocks, TypeSpaces,
};
use tracing::{debug, info, instrument, warn};

/// Outcome of [`Namespace::update_count_for_quota()`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecomputeReport {
    /// Quota directories visited.
    pub directories: usize,

    /// Quota directories whose cached usage (plus what was pending) didn't
    /// match the tree.
    pub inconsistencies: usize,

    /// Quota directories using more than their limits allow.
    pub violations: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContentSummary {
    pub length: u64,
    pub file_count: u64,
    pub directory_count: u64,
    pub symlink_count: u64,
    pub space_consumed: i64,
    pub type_consumed: TypeSpaces,

    /// Limits of the summarized directory; unlimited without a quota.
    pub quota: QuotaCounts,
}

impl Namespace {
    /// Recomputes the usage of every quota directory from the tree itself,
    /// replacing whatever was cached and dropping everything pending.
    #[instrument(skip(self))]
    pub fn update_count_for_quota(&self) -> FsResult<RecomputeReport> {
        debug!("op: update_count_for_quota()");

        if !self.is_quota_enabled() {
            debug!("quota is disabled, nothing to recompute");
            return Ok(Default::default());
        }

        let locks = TransactionLocks::new().inode(
            InodeLock::new("/", INodeLockType::Write)
                .resolve_type(INodeResolveType::PathAndAllChildrenRecursively)
                .children_mode(LockMode::Write),
        );

        let report = self.handle(OperationKind::RecomputeQuota, &locks, |tx| {
            let mut report = RecomputeReport::default();

            self.recompute(tx, InodeId::ROOT, &mut report)?;
            tx.clear_pending()?;

            Ok(report)
        })?;

        info!(
            "recomputed quota of {} director(ies): {} inconsistent, {} in violation",
            report.directories, report.inconsistencies, report.violations
        );

        Ok(report)
    }

    /// Returns the true usage of the subtree at `iid` together with what's
    /// pending within it.
    fn recompute(
        &self,
        tx: &mut Transaction<'_>,
        iid: InodeId,
        report: &mut RecomputeReport,
    ) -> FsResult<(QuotaCounts, QuotaCounts)> {
        let mut inode = tx.get(iid)?;
        let mut usage = inode.own_usage();
        let mut pending = tx.pending_for(&[iid])?;

        for child in tx.children_of(iid)? {
            let (child_usage, child_pending) = self.recompute(tx, child, report)?;

            usage += child_usage;
            pending += child_pending;
        }

        let Some(feature) = inode.as_directory_mut().and_then(|dir| dir.quota.as_mut()) else {
            return Ok((usage, pending));
        };

        report.directories += 1;

        let cached = feature.space_consumed();

        if cached + pending != usage {
            warn!(
                "cached usage of {} is off: cached {:?} + pending {:?} != actual {:?}",
                tx.full_path(iid)?,
                cached,
                pending,
                usage
            );

            report.inconsistencies += 1;
        }

        feature.set_space_consumed(usage);

        if !feature.violations().is_empty() {
            warn!("Quota violation in image for {}", tx.full_path(iid)?);
            report.violations += 1;
        }

        tx.put(inode)?;

        Ok((usage, pending))
    }

    /// Walks the subtree at `path` in batches of `content_count_limit`
    /// inodes, letting go of the locks between batches; concurrent changes
    /// may therefore be partially reflected.
    #[instrument(skip(self))]
    pub fn get_content_summary(&self, path: &str) -> FsResult<ContentSummary> {
        debug!("op: get_content_summary()");

        let path = self.resolve_path(path)?;

        let locks = TransactionLocks::new()
            .inode(InodeLock::new(path.as_str(), INodeLockType::Read).follow_symlink());

        let (root, quota) = self.handle(OperationKind::ContentSummary, &locks, |tx| {
            let chain = INodesInPath::resolve(tx, &path, true)?;
            let iid = chain.last();
            let quota = tx.with_inode(iid, |inode| {
                inode.quota_feature().map(|feature| feature.quota())
            })?;

            Ok((iid, quota.unwrap_or_else(QuotaCounts::unlimited)))
        })?;

        let mut summary = ContentSummary {
            quota,
            ..Default::default()
        };

        let batch_size = self.config().content_count_limit.max(1);
        let mut queue = vec![root];

        while !queue.is_empty() {
            let batch: Vec<_> = queue.drain(..queue.len().min(batch_size)).collect();

            let locks = batch
                .iter()
                .fold(TransactionLocks::new(), |locks, &iid| locks.inode_id(iid, LockMode::Read));

            let found = self.handle(OperationKind::ContentSummary, &locks, |tx| {
                let mut found = Vec::new();

                for &iid in &batch {
                    let children = tx.find_inode(iid, |inode| {
                        summary.account(&inode.kind);

                        inode
                            .as_directory()
                            .map(|dir| dir.children.values().copied().collect())
                            .unwrap_or_else(Vec::new)
                    })?;

                    // gone since we saw its parent
                    found.extend(children.into_iter().flatten());
                }

                Ok(found)
            })?;

            queue.extend(found);

            if !queue.is_empty() {
                self.yielded();
            }
        }

        Ok(summary)
    }
}

impl ContentSummary {
    fn account(&mut self, kind: &InodeKind) {
        match kind {
            InodeKind::Directory(_) => {
                self.directory_count += 1;
            }

            InodeKind::File(file) => {
                let usage = file.usage();

                self.file_count += 1;
                self.length += file.size();
                self.space_consumed += usage.diskspace;

                for (ty, bytes) in usage.types.iter() {
                    self.type_consumed.add(ty, bytes);
                }
            }

            InodeKind::Symlink(_) => {
                self.symlink_count += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        CreateOptions, Namespace, NamespaceConfig, PermissionStatus, QuotaCounts, StorageType,
    };

    fn file(ns: &Namespace, path: &str, len: u64) {
        ns.create(path, &CreateOptions::new("client")).unwrap();

        if len > 0 {
            ns.add_block(path, "client", &[]).unwrap();
        }

        ns.complete(path, "client", len).unwrap();
    }

    #[test]
    fn recompute_fixes_the_cache_and_drains_the_ledger() {
        let ns = Namespace::default();

        ns.mkdirs("/q/a", PermissionStatus::default()).unwrap();
        ns.set_quota("/q", 100, QuotaCounts::UNLIMITED).unwrap();
        file(&ns, "/q/a/f", 10);

        let report = ns.update_count_for_quota().unwrap();

        assert_eq!(2, report.directories);
        assert_eq!(0, report.inconsistencies);
        assert!(ns.quota_update_manager().is_empty());

        let usage = ns.get_quota_usage("/q").unwrap().unwrap().consumed;

        assert_eq!(ns.compute_quota_usage("/q").unwrap(), usage);
        assert_eq!(3, usage.namespace);
        assert_eq!(30, usage.diskspace);

        assert_eq!(report, ns.update_count_for_quota().unwrap());
    }

    #[test]
    fn recompute_reports_violations() {
        let ns = Namespace::default();

        ns.mkdirs("/q", PermissionStatus::default()).unwrap();
        ns.set_quota("/q", 2, QuotaCounts::UNLIMITED).unwrap();

        ns.set_image_loaded(false);
        file(&ns, "/q/f", 0);
        file(&ns, "/q/g", 0);
        ns.set_image_loaded(true);

        let report = ns.update_count_for_quota().unwrap();

        // both /q and the root missed the files
        assert_eq!(1, report.violations);
        assert_eq!(2, report.inconsistencies);
    }

    #[test]
    fn recompute_is_a_no_op_without_quota() {
        let ns = Namespace::new(NamespaceConfig {
            quota_enabled: false,
            ..Default::default()
        });

        assert_eq!(0, ns.update_count_for_quota().unwrap().directories);
    }

    #[test]
    fn content_summary_walks_in_batches() {
        let ns = Namespace::new(NamespaceConfig {
            content_count_limit: 2,
            ..Default::default()
        });

        ns.mkdirs("/d/e", PermissionStatus::default()).unwrap();
        file(&ns, "/d/f", 10);
        file(&ns, "/d/e/g", 20);
        ns.create_symlink("/d/f", "/d/l", PermissionStatus::default(), false)
            .unwrap();

        let summary = ns.get_content_summary("/d").unwrap();

        assert_eq!(2, summary.directory_count);
        assert_eq!(2, summary.file_count);
        assert_eq!(1, summary.symlink_count);
        assert_eq!(30, summary.length);
        assert_eq!(90, summary.space_consumed);
        assert_eq!(90, summary.type_consumed.get(StorageType::Disk));
        assert_eq!(QuotaCounts::unlimited(), summary.quota);
        assert!(ns.yield_count() >= 2);
    }
}
