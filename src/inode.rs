use crate::{
    BlockInfo, DirectoryWithQuotaFeature, InodeId, QuotaCounts, StoragePolicy,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStatus {
    pub user: String,
    pub group: String,
    pub mode: u16,
}

impl PermissionStatus {
    pub fn new(user: impl Into<String>, group: impl Into<String>, mode: u16) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
            mode,
        }
    }
}

impl Default for PermissionStatus {
    fn default() -> Self {
        Self::new("root", "supergroup", 0o755)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Directory,
    RegularFile,
    Symlink,
}

#[derive(Clone, Debug)]
pub struct Inode {
    pub id: InodeId,
    pub name: Vec<u8>,

    /// Non-owning; the parent's `children` is the edge that counts.
    pub parent: Option<InodeId>,

    pub permission: PermissionStatus,
    pub kind: InodeKind,
}

#[derive(Clone, Debug)]
pub enum InodeKind {
    Directory(DirectoryInode),
    File(FileInode),
    Symlink(SymlinkInode),
}

#[derive(Clone, Debug, Default)]
pub struct DirectoryInode {
    pub children: BTreeMap<Vec<u8>, InodeId>,
    pub quota: Option<DirectoryWithQuotaFeature>,
    pub storage_policy: Option<StoragePolicy>,
}

#[derive(Clone, Debug)]
pub struct FileInode {
    pub blocks: Vec<BlockInfo>,
    pub replication: u16,
    pub preferred_block_size: u64,

    /// Pinned when the file gets created, so moving the file around doesn't
    /// silently re-attribute its bytes to other storage types.
    pub storage_policy: StoragePolicy,

    pub under_construction: Option<FileUnderConstruction>,

    /// Length of data kept inside the metadata instead of in blocks.
    pub inline_size: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileUnderConstruction {
    pub client_name: String,
    pub client_machine: String,
}

#[derive(Clone, Debug)]
pub struct SymlinkInode {
    pub target: String,
}

impl Inode {
    pub fn new_directory(id: InodeId, name: &[u8], permission: PermissionStatus) -> Self {
        Self {
            id,
            name: name.to_vec(),
            parent: None,
            permission,
            kind: InodeKind::Directory(Default::default()),
        }
    }

    pub fn new_file(
        id: InodeId,
        name: &[u8],
        permission: PermissionStatus,
        file: FileInode,
    ) -> Self {
        Self {
            id,
            name: name.to_vec(),
            parent: None,
            permission,
            kind: InodeKind::File(file),
        }
    }

    pub fn new_symlink(
        id: InodeId,
        name: &[u8],
        permission: PermissionStatus,
        target: String,
    ) -> Self {
        Self {
            id,
            name: name.to_vec(),
            parent: None,
            permission,
            kind: InodeKind::Symlink(SymlinkInode { target }),
        }
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn file_type(&self) -> FileType {
        match &self.kind {
            InodeKind::Directory(_) => FileType::Directory,
            InodeKind::File(_) => FileType::RegularFile,
            InodeKind::Symlink(_) => FileType::Symlink,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, InodeKind::Directory(_))
    }

    pub fn as_directory(&self) -> Option<&DirectoryInode> {
        match &self.kind {
            InodeKind::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<&mut DirectoryInode> {
        match &mut self.kind {
            InodeKind::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileInode> {
        match &self.kind {
            InodeKind::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileInode> {
        match &mut self.kind {
            InodeKind::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn quota_feature(&self) -> Option<&DirectoryWithQuotaFeature> {
        self.as_directory().and_then(|dir| dir.quota.as_ref())
    }

    /// Usage of this inode alone, ignoring any children.
    pub fn own_usage(&self) -> QuotaCounts {
        match &self.kind {
            InodeKind::File(file) => file.usage(),
            InodeKind::Directory(_) | InodeKind::Symlink(_) => QuotaCounts::new(1, 0),
        }
    }
}

impl DirectoryInode {
    pub fn child(&self, name: &[u8]) -> Option<InodeId> {
        self.children.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl FileInode {
    pub fn new(replication: u16, preferred_block_size: u64, storage_policy: StoragePolicy) -> Self {
        Self {
            blocks: Vec::new(),
            replication,
            preferred_block_size,
            storage_policy,
            under_construction: None,
            inline_size: None,
        }
    }

    pub fn is_under_construction(&self) -> bool {
        self.under_construction.is_some()
    }

    pub fn writer(&self) -> Option<&str> {
        self.under_construction
            .as_ref()
            .map(|uc| uc.client_name.as_str())
    }

    pub fn last_block(&self) -> Option<&BlockInfo> {
        self.blocks.last()
    }

    pub fn size(&self) -> u64 {
        self.inline_size.unwrap_or(0) + self.blocks.iter().map(|b| b.block.num_bytes).sum::<u64>()
    }

    /// Bytes a single replica of this file is charged for.
    pub fn charged_bytes_per_replica(&self) -> u64 {
        let blocks: u64 = self
            .blocks
            .iter()
            .map(|b| b.charged_bytes(self.preferred_block_size))
            .sum();

        blocks + self.inline_size.unwrap_or(0)
    }

    pub fn diskspace_consumed(&self) -> u64 {
        self.charged_bytes_per_replica() * self.replication as u64
    }

    /// Usage of `bytes` stored once per replica, spread over storage types
    /// according to the file's policy; namespace stays untouched.
    pub fn space_delta(&self, bytes: i64) -> QuotaCounts {
        Self::space_delta_for(self.storage_policy, self.replication, bytes)
    }

    pub fn space_delta_for(policy: StoragePolicy, replication: u16, bytes: i64) -> QuotaCounts {
        let mut delta = QuotaCounts::new(0, bytes * replication as i64);

        for ty in policy.choose_storage_types(replication) {
            delta.types.add(ty, bytes);
        }

        delta
    }

    pub fn usage(&self) -> QuotaCounts {
        QuotaCounts {
            namespace: 1,
            ..self.space_delta(self.charged_bytes_per_replica() as i64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, BlockState, StorageType};

    fn block(id: u64, num_bytes: u64, state: BlockState) -> BlockInfo {
        BlockInfo {
            block: Block {
                id,
                num_bytes,
                generation_stamp: 1,
            },
            state,
        }
    }

    #[test]
    fn under_construction_block_is_charged_in_full() {
        let mut file = FileInode::new(3, 1024, StoragePolicy::AllSsd);

        file.blocks.push(block(1, 1024, BlockState::Complete));
        file.blocks.push(block(2, 0, BlockState::UnderConstruction));

        assert_eq!(1024, file.size());
        assert_eq!(2048 * 3, file.diskspace_consumed());
        assert_eq!(2048 * 3, file.usage().type_space(StorageType::Ssd));
    }

    #[test]
    fn usage_follows_the_pinned_policy() {
        let mut file = FileInode::new(3, 1024, StoragePolicy::OneSsd);

        file.blocks.push(block(1, 512, BlockState::Complete));

        let usage = file.usage();

        assert_eq!(1, usage.namespace);
        assert_eq!(512 * 3, usage.diskspace);
        assert_eq!(512, usage.type_space(StorageType::Ssd));
        assert_eq!(1024, usage.type_space(StorageType::Disk));
    }

    #[test]
    fn inline_data_counts_as_space() {
        let mut file = FileInode::new(2, 1024, StoragePolicy::Hot);

        file.inline_size = Some(100);

        assert_eq!(100, file.size());
        assert_eq!(200, file.diskspace_consumed());
    }
}
