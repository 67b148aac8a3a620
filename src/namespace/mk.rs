use super::{FsError, FsResult};
use crate::{
    Block, EditOp, FileInode, FileUnderConstruction, INodeLockType, INodesInPath, Inode, InodeId,
    InodeLock, InodeLookup, Namespace, OperationKind, PermissionStatus, Transaction,
    TransactionLocks,
};
use anyhow::Context;
use tracing::{debug, instrument, warn};

#[derive(Clone, Debug)]
pub struct CreateOptions {
    pub permission: PermissionStatus,

    /// Falls back to the configured default when unset.
    pub replication: Option<u16>,

    /// Falls back to the configured default when unset.
    pub block_size: Option<u64>,

    pub client_name: String,
    pub client_machine: String,
    pub overwrite: bool,
    pub create_parent: bool,
}

impl CreateOptions {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            permission: PermissionStatus::default(),
            replication: None,
            block_size: None,
            client_name: client_name.into(),
            client_machine: String::new(),
            overwrite: false,
            create_parent: true,
        }
    }
}

impl Namespace {
    /// Creates the directory together with any missing parents; succeeds
    /// without doing anything if it already exists.
    #[instrument(skip(self))]
    pub fn mkdirs(&self, path: &str, permission: PermissionStatus) -> FsResult<()> {
        debug!("op: mkdirs()");

        let path = self.resolve_path(path)?;
        let locks = TransactionLocks::new().inode(InodeLock::new(
            path.as_str(),
            INodeLockType::WriteOnTargetAndParent,
        ));

        self.handle(OperationKind::Mkdirs, &locks, |tx| {
            let (chain, remaining) = INodesInPath::resolve_existing(tx, &path, false)?;

            if remaining.is_empty() {
                return if tx.with_inode(chain.last(), Inode::is_directory)? {
                    Ok(())
                } else {
                    Err(FsError::FileAlreadyExists(path.clone()))
                };
            }

            self.mk_parents(tx, chain, &remaining, &permission)?;

            tx.journal(EditOp::Mkdirs {
                path: path.clone(),
                permission: permission.clone(),
            })
        })
    }

    /// Creates a new, under-construction file leased to the client.
    #[instrument(skip(self))]
    pub fn create(&self, path: &str, opts: &CreateOptions) -> FsResult<InodeId> {
        debug!("op: create()");

        let path = self.resolve_path(path)?;
        let replication = opts.replication.unwrap_or(self.config().default_replication);
        let block_size = opts.block_size.unwrap_or(self.config().default_block_size);

        if replication == 0 {
            return Err(FsError::InvalidArgument(format!(
                "Requested replication factor of 0 for {}",
                path
            )));
        }

        if block_size == 0 {
            return Err(FsError::InvalidArgument(format!(
                "Requested block size of 0 for {}",
                path
            )));
        }

        let locks = TransactionLocks::new().inode(InodeLock::new(
            path.as_str(),
            INodeLockType::WriteOnTargetAndParent,
        ));

        let (iid, overwritten) = self.handle(OperationKind::Create, &locks, |tx| {
            let (mut chain, mut remaining) = INodesInPath::resolve_existing(tx, &path, false)?;
            let mut overwritten = Vec::new();

            if remaining.is_empty() {
                let existing = tx.get(chain.last())?;

                let Some(file) = existing.as_file() else {
                    return Err(FsError::FileAlreadyExists(path.clone()));
                };

                if let Some(holder) = file.writer() {
                    return Err(FsError::BeingWritten {
                        op: "create",
                        path: path.clone(),
                        holder: holder.into(),
                    });
                }

                if !opts.overwrite {
                    return Err(FsError::FileAlreadyExists(path.clone()));
                }

                overwritten.extend(file.blocks.iter().map(|info| info.block));

                self.remove_last_inode(tx, &chain, false, None)?;

                remaining = vec![chain.last_name().to_vec()];
                chain = chain.parent().context("root is a directory")?;
            }

            if remaining.len() > 1 && !opts.create_parent {
                return Err(FsError::not_found(Self::child_path(&chain, &remaining[0])));
            }

            let (name, parents) = remaining
                .split_last()
                .context("path has nothing left to create")?;

            let parent = self.mk_parents(tx, chain, parents, &opts.permission)?;

            let file = self.add_file(
                tx,
                &parent,
                name,
                opts.permission.clone(),
                replication,
                block_size,
                &opts.client_name,
                &opts.client_machine,
            )?;

            tx.journal(EditOp::Create {
                path: path.clone(),
                permission: opts.permission.clone(),
                replication,
                block_size,
                client_name: opts.client_name.clone(),
                client_machine: opts.client_machine.clone(),
                overwrite: opts.overwrite,
            })?;

            Ok((file.last(), overwritten))
        })?;

        self.release_blocks(&overwritten);

        Ok(iid)
    }

    /// Links a new under-construction file below `parent`; the file pins the
    /// storage policy in effect at its parent.
    #[allow(clippy::too_many_arguments)]
    pub fn add_file(
        &self,
        tx: &mut Transaction<'_>,
        parent: &INodesInPath,
        name: &[u8],
        permission: PermissionStatus,
        replication: u16,
        preferred_block_size: u64,
        client_name: &str,
        client_machine: &str,
    ) -> FsResult<INodesInPath> {
        // pinned for good: later renames or policy changes of ancestors
        // don't move an existing file's usage to other storage types
        let policy = self.effective_storage_policy(tx, parent)?;
        let iid = tx.alloc_inode_id()?;

        let mut file = FileInode::new(replication, preferred_block_size, policy);

        file.under_construction = Some(FileUnderConstruction {
            client_name: client_name.into(),
            client_machine: client_machine.into(),
        });

        self.add_last_inode(tx, parent, Inode::new_file(iid, name, permission, file), true)
    }

    #[instrument(skip(self))]
    pub fn create_symlink(
        &self,
        target: &str,
        link: &str,
        permission: PermissionStatus,
        create_parent: bool,
    ) -> FsResult<InodeId> {
        debug!("op: create_symlink()");

        if target.is_empty() {
            return Err(FsError::InvalidArgument("Symlink target can't be empty".into()));
        }

        let link = self.resolve_path(link)?;
        let locks = TransactionLocks::new().inode(InodeLock::new(
            link.as_str(),
            INodeLockType::WriteOnTargetAndParent,
        ));

        self.handle(OperationKind::CreateSymlink, &locks, |tx| {
            let (chain, remaining) = INodesInPath::resolve_existing(tx, &link, false)?;

            let Some((name, parents)) = remaining.split_last() else {
                return Err(FsError::FileAlreadyExists(link.clone()));
            };

            if !parents.is_empty() && !create_parent {
                return Err(FsError::not_found(Self::child_path(&chain, &parents[0])));
            }

            let parent = self.mk_parents(tx, chain, parents, &permission)?;
            let iid = tx.alloc_inode_id()?;
            let inode = Inode::new_symlink(iid, name, permission.clone(), target.into());

            self.add_last_inode(tx, &parent, inode, true)?;

            tx.journal(EditOp::Symlink {
                target: target.into(),
                link: link.clone(),
                permission: permission.clone(),
                create_parent,
            })?;

            Ok(iid)
        })
    }

    fn mk_parents(
        &self,
        tx: &mut Transaction<'_>,
        mut chain: INodesInPath,
        names: &[Vec<u8>],
        permission: &PermissionStatus,
    ) -> FsResult<INodesInPath> {
        for name in names {
            let iid = tx.alloc_inode_id()?;
            let dir = Inode::new_directory(iid, name, permission.clone());

            chain = self.add_last_inode(tx, &chain, dir, true)?;
        }

        Ok(chain)
    }

    pub(crate) fn child_path(parent: &INodesInPath, name: &[u8]) -> String {
        format!(
            "{}/{}",
            parent.path().trim_end_matches('/'),
            String::from_utf8_lossy(name)
        )
    }

    /// Hands blocks of inodes that are gone for good back to the block
    /// manager; runs after the commit, so failures can only be reported.
    pub(crate) fn release_blocks(&self, blocks: &[Block]) {
        for block in blocks {
            if let Err(err) = self.block_manager().remove_block(block) {
                warn!("couldn't release block {}: {:?}", block.id, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{CreateOptions, FileType, FsError, Namespace, PermissionStatus, StoragePolicy};

    #[test]
    fn mkdirs_creates_parents_and_is_idempotent() {
        let ns = Namespace::default();

        ns.mkdirs("/a/b/c", PermissionStatus::default()).unwrap();
        ns.mkdirs("/a/b/c", PermissionStatus::default()).unwrap();
        ns.mkdirs("/a/b", PermissionStatus::default()).unwrap();

        assert_eq!(FileType::Directory, ns.get_file_info("/a/b/c").unwrap().file_type);
        assert_eq!(4, ns.inode_count());
        assert_eq!(1, ns.edit_log().len());
    }

    #[test]
    fn mkdirs_over_a_file_fails() {
        let ns = Namespace::default();

        ns.create("/f", &CreateOptions::new("client")).unwrap();

        assert!(matches!(
            ns.mkdirs("/f", PermissionStatus::default()),
            Err(FsError::FileAlreadyExists(_))
        ));
    }

    #[test]
    fn create_respects_existing_files() {
        let ns = Namespace::default();

        ns.create("/f", &CreateOptions::new("client")).unwrap();

        assert!(matches!(
            ns.create("/f", &CreateOptions::new("other")),
            Err(FsError::BeingWritten { .. })
        ));

        ns.complete("/f", "client", 0).unwrap();

        assert!(matches!(
            ns.create("/f", &CreateOptions::new("other")),
            Err(FsError::FileAlreadyExists(_))
        ));

        let old = ns.get_file_info("/f").unwrap().file_id;

        let new = ns
            .create(
                "/f",
                &CreateOptions {
                    overwrite: true,
                    ..CreateOptions::new("other")
                },
            )
            .unwrap();

        assert_ne!(old, new);
        assert_eq!(2, ns.inode_count());
    }

    #[test]
    fn create_without_parents() {
        let ns = Namespace::default();

        let opts = CreateOptions {
            create_parent: false,
            ..CreateOptions::new("client")
        };

        assert!(matches!(ns.create("/a/b/f", &opts), Err(FsError::NotFound { .. })));

        ns.mkdirs("/a/b", PermissionStatus::default()).unwrap();
        ns.create("/a/b/f", &opts).unwrap();

        let status = ns.get_file_info("/a/b/f").unwrap();

        assert!(status.under_construction);
        assert_eq!(3, status.replication);
    }

    #[test]
    fn files_pin_the_inherited_policy() {
        let ns = Namespace::default();

        ns.mkdirs("/cold", PermissionStatus::default()).unwrap();
        ns.set_storage_policy("/cold", StoragePolicy::Cold).unwrap();
        ns.create("/cold/sub/f", &CreateOptions::new("client")).unwrap();

        assert_eq!(
            Some(StoragePolicy::Cold),
            ns.get_file_info("/cold/sub/f").unwrap().storage_policy
        );

        ns.set_storage_policy("/cold", StoragePolicy::AllSsd).unwrap();

        assert_eq!(
            Some(StoragePolicy::Cold),
            ns.get_file_info("/cold/sub/f").unwrap().storage_policy
        );
    }

    #[test]
    fn symlinks() {
        let ns = Namespace::default();

        ns.mkdirs("/a", PermissionStatus::default()).unwrap();
        ns.create_symlink("/a", "/links/a", PermissionStatus::default(), true)
            .unwrap();

        assert!(matches!(
            ns.create_symlink("/a", "/links/a", PermissionStatus::default(), true),
            Err(FsError::FileAlreadyExists(_))
        ));

        assert!(matches!(
            ns.create_symlink("/a", "/nope/l", PermissionStatus::default(), false),
            Err(FsError::NotFound { .. })
        ));

        let link = ns.get_file_link_info("/links/a").unwrap();

        assert_eq!(FileType::Symlink, link.file_type);
        assert_eq!(Some("/a".to_string()), link.symlink);
        assert_eq!(FileType::Directory, ns.get_file_info("/links/a").unwrap().file_type);
    }
}
