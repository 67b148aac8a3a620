use super::FsResult;
use crate::{
    FileType, INodeLockType, INodesInPath, Inode, InodeId, InodeKind, InodeLock, InodeLookup,
    Namespace, OperationKind, PermissionStatus, StoragePolicy, TransactionLocks,
};
use tracing::{debug, instrument};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStatus {
    pub file_id: InodeId,
    pub name: String,
    pub file_type: FileType,
    pub permission: PermissionStatus,
    pub length: u64,
    pub replication: u16,
    pub block_size: u64,
    pub blocks: usize,
    pub storage_policy: Option<StoragePolicy>,
    pub symlink: Option<String>,
    pub children_num: usize,
    pub under_construction: bool,
}

impl Namespace {
    /// Status of the inode at `path`, following a trailing symlink.
    #[instrument(skip(self))]
    pub fn get_file_info(&self, path: &str) -> FsResult<FileStatus> {
        debug!("op: get_file_info()");

        self.stat(path, true)
    }

    /// Status of the inode at `path`; a trailing symlink is reported as-is.
    #[instrument(skip(self))]
    pub fn get_file_link_info(&self, path: &str) -> FsResult<FileStatus> {
        debug!("op: get_file_link_info()");

        self.stat(path, false)
    }

    fn stat(&self, path: &str, follow_symlink: bool) -> FsResult<FileStatus> {
        let path = self.resolve_path(path)?;
        let mut lock = InodeLock::new(path.as_str(), INodeLockType::Read);

        if follow_symlink {
            lock = lock.follow_symlink();
        }

        self.handle(OperationKind::GetFileInfo, &TransactionLocks::new().inode(lock), |tx| {
            let chain = INodesInPath::resolve(tx, &path, follow_symlink)?;

            tx.with_inode(chain.last(), Self::status)
        })
    }

    pub(crate) fn status(inode: &Inode) -> FileStatus {
        let mut status = FileStatus {
            file_id: inode.id,
            name: inode.name_lossy(),
            file_type: inode.file_type(),
            permission: inode.permission.clone(),
            length: 0,
            replication: 0,
            block_size: 0,
            blocks: 0,
            storage_policy: None,
            symlink: None,
            children_num: 0,
            under_construction: false,
        };

        match &inode.kind {
            InodeKind::Directory(dir) => {
                status.children_num = dir.children.len();
                status.storage_policy = dir.storage_policy;
            }

            InodeKind::File(file) => {
                status.length = file.size();
                status.replication = file.replication;
                status.block_size = file.preferred_block_size;
                status.blocks = file.blocks.len();
                status.storage_policy = Some(file.storage_policy);
                status.under_construction = file.is_under_construction();
            }

            InodeKind::Symlink(link) => {
                status.symlink = Some(link.target.clone());
            }
        }

        status
    }
}
