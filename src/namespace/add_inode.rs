use super::{FsError, FsResult};
use crate::{INodesInPath, Inode, InodeLookup, Namespace, QuotaCounts, Transaction, DOT_RESERVED};
use anyhow::Context;
use tracing::{trace, warn};

impl Namespace {
    /// Links a fresh `inode` below the last inode of `existing`, accounting
    /// for its own usage; returns the extended chain.
    pub fn add_last_inode(
        &self,
        tx: &mut Transaction<'_>,
        existing: &INodesInPath,
        inode: Inode,
        check_quota: bool,
    ) -> FsResult<INodesInPath> {
        let counts = inode.own_usage();

        self.add_last_inode_with_counts(tx, existing, inode, counts, check_quota)
    }

    /// Like [`Self::add_last_inode()`], with the usage brought along by the
    /// inode given explicitly (e.g. a whole subtree being moved).
    pub fn add_last_inode_with_counts(
        &self,
        tx: &mut Transaction<'_>,
        existing: &INodesInPath,
        mut inode: Inode,
        counts: QuotaCounts,
        check_quota: bool,
    ) -> FsResult<INodesInPath> {
        let pos = existing.len();
        let parent_iid = existing.last();
        let name = inode.name.clone();

        if pos == 1 && name == DOT_RESERVED.as_bytes() {
            return Err(FsError::ReservedName(DOT_RESERVED.into()));
        }

        let mut parent = tx.get(parent_iid)?;

        if !parent.is_directory() {
            return Err(FsError::ParentNotDirectory(existing.path()));
        }

        if check_quota {
            self.verify_fs_limits(tx, existing, &name)?;
        }

        self.update_count(tx, existing, pos, counts, check_quota)?;

        let dir = parent
            .as_directory_mut()
            .context("parent stopped being a directory")?;

        if dir.child(&name).is_some() {
            self.update_count_no_quota_check(tx, existing, pos, -counts)?;

            return Err(FsError::FileAlreadyExists(
                existing.append(inode.id, &name).path(),
            ));
        }

        dir.children.insert(name.clone(), inode.id);
        inode.parent = Some(parent_iid);

        let iid = inode.id;

        trace!("linking {:?} below {:?}", iid, parent_iid);

        tx.put(parent)?;
        tx.put(inode)?;

        Ok(existing.append(iid, &name))
    }

    /// Enforces the configured name length and directory size limits; while
    /// edits are replayed, breaches are only reported.
    pub fn verify_fs_limits(
        &self,
        tx: &Transaction<'_>,
        parent: &INodesInPath,
        name: &[u8],
    ) -> FsResult<()> {
        let result = self.check_fs_limits(tx, parent, name);

        match result {
            Err(err) if !self.is_image_loaded() => {
                warn!("{}", err);
                Ok(())
            }

            result => result,
        }
    }

    fn check_fs_limits(
        &self,
        tx: &Transaction<'_>,
        parent: &INodesInPath,
        name: &[u8],
    ) -> FsResult<()> {
        let config = self.config();

        if config.max_component_length != 0 && name.len() > config.max_component_length {
            return Err(FsError::PathComponentTooLong {
                name: String::from_utf8_lossy(name).into_owned(),
                parent: parent.path(),
                limit: config.max_component_length,
                length: name.len(),
            });
        }

        if config.max_dir_items != 0 {
            let count = tx.with_inode(parent.last(), |inode| {
                inode.as_directory().map_or(0, |dir| dir.children.len())
            })?;

            if count >= config.max_dir_items {
                return Err(FsError::MaxDirectoryItemsExceeded {
                    path: parent.path(),
                    limit: config.max_dir_items,
                    count,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{FsError, Namespace, NamespaceConfig, PermissionStatus};

    fn ns(config: NamespaceConfig) -> Namespace {
        Namespace::new(config)
    }

    #[test]
    fn rejects_overly_long_names() {
        let ns = ns(NamespaceConfig {
            max_component_length: 4,
            ..Default::default()
        });

        ns.mkdirs("/abcd", PermissionStatus::default()).unwrap();

        let err = ns.mkdirs("/abcde", PermissionStatus::default()).unwrap_err();

        assert!(matches!(
            err,
            FsError::PathComponentTooLong {
                limit: 4,
                length: 5,
                ..
            }
        ));
    }

    #[test]
    fn rejects_crowded_directories() {
        let ns = ns(NamespaceConfig {
            max_dir_items: 2,
            ..Default::default()
        });

        ns.mkdirs("/d/a", PermissionStatus::default()).unwrap();
        ns.mkdirs("/d/b", PermissionStatus::default()).unwrap();

        let err = ns.mkdirs("/d/c", PermissionStatus::default()).unwrap_err();

        assert!(matches!(
            err,
            FsError::MaxDirectoryItemsExceeded { limit: 2, count: 2, .. }
        ));
    }

    #[test]
    fn limits_are_only_logged_while_replaying() {
        let ns = ns(NamespaceConfig {
            max_dir_items: 1,
            ..Default::default()
        });

        ns.set_image_loaded(false);
        ns.mkdirs("/a", PermissionStatus::default()).unwrap();
        ns.mkdirs("/b", PermissionStatus::default()).unwrap();
        ns.set_image_loaded(true);

        assert_eq!(2, ns.get_listing("/").unwrap().len());
    }

    #[test]
    fn reserved_name_is_off_limits_at_the_root() {
        let ns = ns(Default::default());

        assert!(matches!(
            ns.mkdirs("/.reserved", PermissionStatus::default()),
            Err(FsError::ReservedName(_))
        ));

        ns.mkdirs("/a/.reserved", PermissionStatus::default()).unwrap();
    }

    #[test]
    fn parent_must_be_a_directory() {
        let ns = ns(Default::default());

        ns.create("/f", &crate::CreateOptions::new("client")).unwrap();

        assert!(matches!(
            ns.mkdirs("/f/d", PermissionStatus::default()),
            Err(FsError::ParentNotDirectory(_))
        ));
    }
}
