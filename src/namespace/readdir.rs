use super::FsResult;
use crate::{
    FileStatus, INodeLockType, INodeResolveType, INodesInPath, InodeLock, InodeLookup, Namespace,
    OperationKind, TransactionLocks,
};
use tracing::{debug, instrument};

impl Namespace {
    /// Children of the directory at `path`, in name order; a file lists as
    /// itself.
    #[instrument(skip(self))]
    pub fn get_listing(&self, path: &str) -> FsResult<Vec<FileStatus>> {
        debug!("op: get_listing()");

        let path = self.resolve_path(path)?;

        let locks = TransactionLocks::new().inode(
            InodeLock::new(path.as_str(), INodeLockType::Read)
                .resolve_type(INodeResolveType::PathAndImmediateChildren)
                .follow_symlink(),
        );

        self.handle(OperationKind::GetListing, &locks, |tx| {
            let chain = INodesInPath::resolve(tx, &path, true)?;
            let iid = chain.last();

            if !tx.with_inode(iid, |inode| inode.is_directory())? {
                return Ok(vec![tx.with_inode(iid, Self::status)?]);
            }

            tx.children_of(iid)?
                .into_iter()
                .map(|child| tx.with_inode(child, Self::status))
                .collect()
        })
    }
}
