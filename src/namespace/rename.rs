use super::{FsError, FsResult};
use crate::{
    EditOp, INodeLockType, INodeResolveType, INodesInPath, InodeLock, InodeLookup, LockMode,
    Namespace, OperationKind, TransactionLocks,
};
use anyhow::Context;
use tracing::{debug, instrument, warn};

impl Namespace {
    /// Moves `src` to `dst`; when `dst` is an existing directory, `src` is
    /// moved into it.
    #[instrument(skip(self))]
    pub fn rename(&self, src: &str, dst: &str) -> FsResult<()> {
        debug!("op: rename()");

        let src = self.resolve_path(src)?;
        let dst = self.resolve_path(dst)?;

        let locks = TransactionLocks::new()
            .inode(
                InodeLock::new(src.as_str(), INodeLockType::WriteOnTargetAndParent)
                    .resolve_type(INodeResolveType::PathAndAllChildrenRecursively)
                    .children_mode(LockMode::Read),
            )
            .inode(InodeLock::new(dst.as_str(), INodeLockType::WriteOnTargetAndParent));

        self.handle(OperationKind::Rename, &locks, |tx| {
            let src_chain = INodesInPath::resolve(tx, &src, false)?;

            let src_parent = src_chain.parent().ok_or_else(|| {
                FsError::InvalidArgument("Cannot rename the root directory".into())
            })?;

            let (dst_chain, remaining) = INodesInPath::resolve_existing(tx, &dst, false)?;
            let dst_is_dir = tx.with_inode(dst_chain.last(), |inode| inode.is_directory())?;

            let (dst_parent, name) = match remaining.as_slice() {
                [] if dst_chain.last() == src_chain.last() => {
                    return Ok(());
                }

                [] if dst_is_dir => (dst_chain, src_chain.last_name().to_vec()),

                [] => {
                    return Err(FsError::FileAlreadyExists(dst.clone()));
                }

                [name] => (dst_chain, name.clone()),

                [name, ..] => {
                    return Err(FsError::not_found(Self::child_path(&dst_chain, name)));
                }
            };

            if dst_parent.contains(src_chain.last()) {
                return Err(FsError::InvalidArgument(format!(
                    "Cannot move {} into its own subtree ({})",
                    src, dst
                )));
            }

            if dst_parent.last() == src_parent.last() && name == src_chain.last_name() {
                return Ok(());
            }

            let iid = src_chain.last();
            let usage = Self::space_consumed_in_tree(tx, iid)?;
            let pending = tx.pending_for(&tx.subtree_of(iid)?)?;

            if self.is_quota_enabled() && self.is_image_loaded() {
                let common_ancestor = src_chain.common_ancestor(&dst_parent);

                Self::verify_quota(
                    tx,
                    &dst_parent,
                    dst_parent.len(),
                    usage,
                    Some(common_ancestor),
                )?;
            }

            let original = tx.get(iid)?;
            let mut parent = tx.get(src_parent.last())?;

            parent
                .as_directory_mut()
                .context("parent is not a directory")?
                .children
                .remove(src_chain.last_name());

            tx.put(parent)?;

            self.verify_fs_limits(tx, &dst_parent, &name)?;
            self.remove_last_inode(tx, &src_chain, true, Some(usage))?;

            let mut moved = original.clone();

            moved.name = name;

            let counts = usage - pending;
            let linked = self.add_last_inode_with_counts(tx, &dst_parent, moved, counts, false);

            if let Err(err) = linked {
                warn!("couldn't link {} at {}, restoring it: {}", src, dst, err);

                self.add_last_inode_with_counts(tx, &src_parent, original, counts, false)?;

                return Err(err);
            }

            tx.journal(EditOp::Rename {
                src: src.clone(),
                dst: dst.clone(),
            })
        })
    }
}
