use super::{FsError, FsResult};
use crate::{INodesInPath, Inode, InodeLookup, Namespace, QuotaCounts, Transaction};
use anyhow::Context;
use tracing::trace;

impl Namespace {
    /// Unlinks the last inode of `chain` together with its subtree and takes
    /// the subtree's usage off the ancestors; returns that usage.
    ///
    /// When `for_rename` is set, the caller has already detached the inode
    /// and is going to link it elsewhere: nothing gets deleted, and updates
    /// still pending within the subtree stay put, to be merged into the new
    /// ancestors later.
    pub fn remove_last_inode(
        &self,
        tx: &mut Transaction<'_>,
        chain: &INodesInPath,
        for_rename: bool,
        usage: Option<QuotaCounts>,
    ) -> FsResult<QuotaCounts> {
        let iid = chain.last();
        let parent = chain.parent().context("tried to remove the root inode")?;

        let subtree = tx.subtree_of(iid)?;

        let usage = match usage {
            Some(usage) => usage,
            None => Self::space_consumed_in_tree(tx, iid)?,
        };

        // the ancestors only know about what's been merged so far
        let pending = tx.pending_for(&subtree)?;

        self.update_count_no_quota_check(tx, chain, chain.len() - 1, pending - usage)?;

        if !for_rename {
            let mut parent_inode = tx.get(parent.last())?;

            if let Some(dir) = parent_inode.as_directory_mut() {
                dir.children.remove(chain.last_name());
            }

            tx.put(parent_inode)?;

            for &iid in subtree.iter().rev() {
                tx.remove(iid)?;
            }

            tx.retract_pending(&subtree)?;
        }

        trace!("removed {:?} ({} inode(s)) from {}", iid, subtree.len(), parent.path());

        Ok(usage)
    }

    /// Unlinks a single inode, which must not have any children; returns the
    /// removed inode.
    pub fn remove_child_non_recursively(
        &self,
        tx: &mut Transaction<'_>,
        chain: &INodesInPath,
    ) -> FsResult<Inode> {
        let iid = chain.last();
        let parent = chain.parent().context("tried to remove the root inode")?;
        let inode = tx.get(iid)?;

        if inode.as_directory().is_some_and(|dir| !dir.is_empty()) {
            return Err(FsError::DirectoryNotEmpty(chain.path()));
        }

        let pending = tx.pending_for(&[iid])?;

        self.update_count_no_quota_check(tx, chain, chain.len() - 1, pending - inode.own_usage())?;

        let mut parent_inode = tx.get(parent.last())?;

        if let Some(dir) = parent_inode.as_directory_mut() {
            dir.children.remove(chain.last_name());
        }

        tx.put(parent_inode)?;
        tx.remove(iid)?;
        tx.retract_pending(&[iid])?;

        Ok(inode)
    }
}
