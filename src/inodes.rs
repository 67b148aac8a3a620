use crate::{
    DirectoryWithQuotaFeature, FsError, FsResult, Inode, InodeId, PermissionStatus, QuotaCounts,
};
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use tracing::{instrument, trace};

/// Read access to inodes, implemented by the raw store and by transactions
/// (which layer their own uncommitted writes on top of it).
pub trait InodeLookup {
    /// Runs `f` on the inode, or returns `None` if there's no such inode.
    fn find_inode<R>(&self, iid: InodeId, f: impl FnOnce(&Inode) -> R) -> FsResult<Option<R>>;

    fn with_inode<R>(&self, iid: InodeId, f: impl FnOnce(&Inode) -> R) -> FsResult<R> {
        self.find_inode(iid, f)?
            .ok_or_else(|| FsError::Other(anyhow!("{:?} is dead", iid)))
    }

    fn inode(&self, iid: InodeId) -> FsResult<Inode> {
        self.with_inode(iid, Inode::clone)
    }

    fn child_of(&self, parent_iid: InodeId, name: &[u8]) -> FsResult<Option<InodeId>> {
        self.with_inode(parent_iid, |parent| {
            parent.as_directory().and_then(|dir| dir.child(name))
        })
    }

    fn children_of(&self, iid: InodeId) -> FsResult<Vec<InodeId>> {
        self.with_inode(iid, |inode| {
            inode
                .as_directory()
                .map(|dir| dir.children.values().copied().collect())
                .unwrap_or_default()
        })
    }

    fn parent_of(&self, iid: InodeId) -> FsResult<Option<InodeId>> {
        self.with_inode(iid, |inode| inode.parent)
    }

    fn full_path(&self, iid: InodeId) -> FsResult<String> {
        let mut names = Vec::new();
        let mut cursor = Some(iid);

        while let Some(current) = cursor {
            let (name, parent) =
                self.with_inode(current, |inode| (inode.name.clone(), inode.parent))?;

            if parent.is_some() {
                names.push(name);
            }

            cursor = parent;
        }

        if names.is_empty() {
            return Ok("/".into());
        }

        let mut path = String::new();

        for name in names.iter().rev() {
            path.push('/');
            path.push_str(&String::from_utf8_lossy(name));
        }

        Ok(path)
    }

    /// Ids of `iid` and everything below it, parents before children.
    fn subtree_of(&self, iid: InodeId) -> FsResult<Vec<InodeId>> {
        let mut ids = vec![iid];
        let mut nth = 0;

        while nth < ids.len() {
            let children = self.children_of(ids[nth])?;

            ids.extend(children);
            nth += 1;
        }

        Ok(ids)
    }
}

#[derive(Debug)]
pub struct Inodes {
    nodes: HashMap<InodeId, Inode>,
    next_iid: InodeId,
}

impl Inodes {
    pub fn new(root_permission: PermissionStatus) -> Self {
        let mut root = Inode::new_directory(InodeId::ROOT, b"", root_permission);

        if let Some(dir) = root.as_directory_mut() {
            dir.quota = Some(DirectoryWithQuotaFeature::new(
                QuotaCounts::unlimited(),
                QuotaCounts::new(1, 0),
            ));
        }

        Self {
            nodes: HashMap::from_iter([(InodeId::ROOT, root)]),
            next_iid: InodeId::FIRST_ALLOCATED,
        }
    }

    #[instrument(skip(self))]
    pub fn alloc_id(&mut self) -> Result<InodeId> {
        let iid = self.next_iid.take_next()?;

        trace!("allocated inode {:?}", iid);

        Ok(iid)
    }

    pub fn get(&self, iid: InodeId) -> Option<&Inode> {
        self.nodes.get(&iid)
    }

    pub fn resolve(&self, iid: InodeId) -> Result<&Inode> {
        self.nodes
            .get(&iid)
            .with_context(|| format!("{:?} is dead", iid))
    }

    pub fn contains(&self, iid: InodeId) -> bool {
        self.nodes.contains_key(&iid)
    }

    pub fn insert(&mut self, inode: Inode) {
        trace!("storing inode {:?}", inode.id);

        self.nodes.insert(inode.id, inode);
    }

    pub fn remove(&mut self, iid: InodeId) -> Result<Inode> {
        if iid.is_root() {
            return Err(anyhow!("tried to remove the root inode"));
        }

        trace!("freeing inode {:?}", iid);

        self.nodes
            .remove(&iid)
            .with_context(|| format!("{:?} is dead", iid))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl InodeLookup for Inodes {
    fn find_inode<R>(&self, iid: InodeId, f: impl FnOnce(&Inode) -> R) -> FsResult<Option<R>> {
        Ok(self.nodes.get(&iid).map(f))
    }
}
