use super::{FsError, FsResult};
use crate::{
    Block, EditOp, INodeLockType, INodeResolveType, INodesInPath, InodeLock, InodeLookup,
    Namespace, OperationKind, Transaction, TransactionLocks,
};
use tracing::{debug, instrument};

impl Namespace {
    /// Deletes the inode at `path`; directories with children are deleted
    /// only when `recursive` is set. Returns `false` when there was nothing
    /// to delete.
    #[instrument(skip(self))]
    pub fn delete(&self, path: &str, recursive: bool) -> FsResult<bool> {
        debug!("op: delete()");

        let path = self.resolve_path(path)?;

        let locks = TransactionLocks::new().inode(
            InodeLock::new(path.as_str(), INodeLockType::WriteOnTargetAndParent)
                .resolve_type(INodeResolveType::PathAndAllChildrenRecursively),
        );

        let collected = self.handle(OperationKind::Delete, &locks, |tx| {
            let chain = match INodesInPath::resolve(tx, &path, false) {
                Ok(chain) => chain,
                Err(FsError::NotFound { .. }) => return Ok(None),
                Err(err) => return Err(err),
            };

            if chain.len() == 1 {
                return Err(FsError::InvalidArgument("Cannot delete the root directory".into()));
            }

            let inode = tx.get(chain.last())?;

            if inode.as_directory().is_some_and(|dir| !dir.is_empty()) && !recursive {
                return Err(FsError::DirectoryNotEmpty(path.clone()));
            }

            let mut blocks = Vec::new();

            self.prune(tx, &chain, &mut blocks)?;

            if let Some(file) = inode.as_file() {
                blocks.extend(file.blocks.iter().map(|info| info.block));
            }

            self.remove_last_inode(tx, &chain, false, None)?;

            tx.journal(EditOp::Delete {
                path: path.clone(),
                recursive,
            })?;

            Ok(Some(blocks))
        })?;

        let Some(blocks) = collected else {
            return Ok(false);
        };

        self.release_blocks(&blocks);

        Ok(true)
    }

    /// Removes everything below the last inode of `chain`, deepest first.
    fn prune(
        &self,
        tx: &mut Transaction<'_>,
        chain: &INodesInPath,
        blocks: &mut Vec<Block>,
    ) -> FsResult<()> {
        let children = tx.with_inode(chain.last(), |inode| {
            inode
                .as_directory()
                .map(|dir| dir.children.iter().map(|(name, iid)| (name.clone(), *iid)).collect())
                .unwrap_or_else(Vec::new)
        })?;

        for (name, iid) in children {
            let child = chain.append(iid, &name);

            self.prune(tx, &child, blocks)?;

            let removed = self.remove_child_non_recursively(tx, &child)?;

            if let Some(file) = removed.as_file() {
                blocks.extend(file.blocks.iter().map(|info| info.block));
            }
        }

        Ok(())
    }
}
