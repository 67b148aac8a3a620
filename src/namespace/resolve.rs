use super::{FsError, FsResult};
use crate::{
    resolve_reserved_path, INodeLockType, INodesInPath, InodeId, InodeLock, InodeLookup,
    Namespace, OperationKind, StoragePolicy, Transaction, TransactionLocks,
};
use tracing::{debug, instrument};

impl Namespace {
    /// Turns reserved inode paths into regular ones.
    ///
    /// This happens before locking, so by the time the caller locks the
    /// returned path, the inode might have moved; that's the same race as a
    /// client looking a path up and using it a moment later.
    pub fn resolve_path(&self, path: &str) -> FsResult<String> {
        resolve_reserved_path(&*self.inodes.read(), path)
    }

    #[instrument(skip(self))]
    pub fn get_inodes_in_path(&self, path: &str, follow_symlink: bool) -> FsResult<INodesInPath> {
        debug!("op: get_inodes_in_path()");

        let path = self.resolve_path(path)?;
        let mut lock = InodeLock::new(path.as_str(), INodeLockType::Read);

        if follow_symlink {
            lock = lock.follow_symlink();
        }

        self.handle(
            OperationKind::GetFileInfo,
            &TransactionLocks::new().inode(lock),
            |tx| INodesInPath::resolve(tx, &path, follow_symlink),
        )
    }

    pub fn full_path_name(&self, iid: InodeId) -> FsResult<String> {
        let inodes = self.inodes.read();

        if !inodes.contains(iid) {
            return Err(FsError::not_found(format!("{:?}", iid)));
        }

        inodes.full_path(iid)
    }

    /// Policy of the nearest inode on the chain that has one.
    pub(crate) fn effective_storage_policy(
        &self,
        tx: &Transaction<'_>,
        chain: &INodesInPath,
    ) -> FsResult<StoragePolicy> {
        for &iid in chain.inodes().iter().rev() {
            let policy = tx.with_inode(iid, |inode| {
                inode
                    .as_directory()
                    .and_then(|dir| dir.storage_policy)
                    .or_else(|| inode.as_file().map(|file| file.storage_policy))
            })?;

            if let Some(policy) = policy {
                return Ok(policy);
            }
        }

        Ok(StoragePolicy::default())
    }
}
