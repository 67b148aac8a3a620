use super::{FsError, FsResult};
use crate::{
    EditOp, FileInode, INodeLockType, INodesInPath, InodeKind, InodeLock, Namespace, OperationKind,
    StoragePolicy, TransactionLocks,
};
use tracing::{debug, instrument};

impl Namespace {
    /// Sets the policy of a directory (inherited by files created below it
    /// from now on) or of a file (whose bytes move to the new storage types
    /// right away).
    #[instrument(skip(self))]
    pub fn set_storage_policy(&self, path: &str, policy: StoragePolicy) -> FsResult<()> {
        debug!("op: set_storage_policy()");

        let path = self.resolve_path(path)?;
        let locks =
            TransactionLocks::new().inode(InodeLock::new(path.as_str(), INodeLockType::Write));

        self.handle(OperationKind::SetStoragePolicy, &locks, |tx| {
            let chain = INodesInPath::resolve(tx, &path, false)?;
            let mut inode = tx.get(chain.last())?;

            match &mut inode.kind {
                InodeKind::Directory(dir) => {
                    dir.storage_policy = Some(policy);
                }

                InodeKind::File(file) => {
                    let bytes = file.charged_bytes_per_replica() as i64;

                    let delta = FileInode::space_delta_for(policy, file.replication, bytes)
                        - file.space_delta(bytes);

                    self.update_count(tx, &chain, chain.len() - 1, delta, true)?;

                    file.storage_policy = policy;
                }

                InodeKind::Symlink(_) => {
                    return Err(FsError::InvalidArgument(format!(
                        "Cannot set storage policy on symlink {}",
                        path
                    )));
                }
            }

            tx.put(inode)?;

            tx.journal(EditOp::SetStoragePolicy {
                path: path.clone(),
                policy,
            })
        })
    }

    /// Changes how many replicas a file keeps; the quota gets charged (or
    /// refunded) for every replica of every byte.
    #[instrument(skip(self))]
    pub fn set_replication(&self, path: &str, replication: u16) -> FsResult<()> {
        debug!("op: set_replication()");

        if replication == 0 {
            return Err(FsError::InvalidArgument(format!(
                "Requested replication factor of 0 for {}",
                path
            )));
        }

        let path = self.resolve_path(path)?;
        let locks =
            TransactionLocks::new().inode(InodeLock::new(path.as_str(), INodeLockType::Write));

        self.handle(OperationKind::SetReplication, &locks, |tx| {
            let chain = INodesInPath::resolve(tx, &path, false)?;
            let mut inode = tx.get(chain.last())?;

            let file = inode
                .as_file_mut()
                .ok_or_else(|| FsError::NotFile(path.clone()))?;

            let bytes = file.charged_bytes_per_replica() as i64;

            let delta = FileInode::space_delta_for(file.storage_policy, replication, bytes)
                - file.space_delta(bytes);

            self.update_count(tx, &chain, chain.len() - 1, delta, true)?;

            file.replication = replication;
            tx.put(inode)?;

            tx.journal(EditOp::SetReplication {
                path: path.clone(),
                replication,
            })
        })
    }
}
