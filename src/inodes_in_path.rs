use crate::{FsError, FsResult, InodeId, InodeKind, InodeLookup};

pub const DOT_RESERVED: &str = ".reserved";
pub const DOT_INODES: &str = ".inodes";

/// Chain of inodes from the root down to (the existing part of) a path.
///
/// It's a view built fresh for each operation: it owns nothing but ids and
/// names, and is only trustworthy while the locks of the operation that built
/// it are held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct INodesInPath {
    names: Vec<Vec<u8>>,
    inodes: Vec<InodeId>,
}

impl INodesInPath {
    pub const MAX_SYMLINK_DEPTH: usize = 32;

    pub fn root() -> Self {
        Self {
            names: vec![Vec::new()],
            inodes: vec![InodeId::ROOT],
        }
    }

    /// Splits an absolute path into its components, ignoring a trailing
    /// slash.
    pub fn components(path: &str) -> FsResult<Vec<Vec<u8>>> {
        if !path.starts_with('/') {
            return Err(FsError::InvalidPath(path.into()));
        }

        let trimmed = path.strip_suffix('/').unwrap_or(path);

        trimmed
            .split('/')
            .skip(1)
            .map(|name| match name {
                "" | "." | ".." => Err(FsError::InvalidPath(path.into())),
                name => Ok(name.as_bytes().to_vec()),
            })
            .collect()
    }

    /// Resolves the whole path, failing if any component is missing.
    pub fn resolve(src: &impl InodeLookup, path: &str, follow_symlink: bool) -> FsResult<Self> {
        let (chain, remaining) = Self::resolve_existing(src, path, follow_symlink)?;

        if remaining.is_empty() {
            Ok(chain)
        } else {
            let unresolved = remaining
                .iter()
                .map(|name| String::from_utf8_lossy(name))
                .collect::<Vec<_>>()
                .join("/");

            Err(FsError::NotFound {
                path: path.into(),
                unresolved,
            })
        }
    }

    /// Resolves as much of the path as exists, returning the chain together
    /// with the components that are still missing.
    pub fn resolve_existing(
        src: &impl InodeLookup,
        path: &str,
        follow_symlink: bool,
    ) -> FsResult<(Self, Vec<Vec<u8>>)> {
        Self::walk(src, path, follow_symlink, 0)
    }

    fn walk(
        src: &impl InodeLookup,
        path: &str,
        follow_symlink: bool,
        depth: usize,
    ) -> FsResult<(Self, Vec<Vec<u8>>)> {
        let components = Self::components(path)?;
        let mut chain = Self::root();

        for (nth, name) in components.iter().enumerate() {
            let cur = chain.last();

            let (is_dir, is_symlink) = src.with_inode(cur, |inode| {
                (inode.is_directory(), matches!(inode.kind, InodeKind::Symlink(_)))
            })?;

            if is_symlink {
                return Err(FsError::UnresolvedLink {
                    path: path.into(),
                    link: chain.path(),
                });
            }

            let child = if is_dir { src.child_of(cur, name)? } else { None };

            match child {
                Some(iid) => chain.push(iid, name),
                None => return Ok((chain, components[nth..].to_vec())),
            }
        }

        if follow_symlink {
            let target = src.with_inode(chain.last(), |inode| match &inode.kind {
                InodeKind::Symlink(link) => Some(link.target.clone()),
                _ => None,
            })?;

            if let Some(target) = target {
                if depth >= Self::MAX_SYMLINK_DEPTH {
                    return Err(FsError::UnresolvedLink {
                        path: path.into(),
                        link: chain.path(),
                    });
                }

                let target = if target.starts_with('/') {
                    target
                } else {
                    let parent = chain.parent().map(|p| p.path()).unwrap_or_else(|| "/".into());

                    format!("{}/{}", parent.trim_end_matches('/'), target)
                };

                return Self::walk(src, &target, true, depth + 1);
            }
        }

        Ok((chain, Vec::new()))
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    pub fn inodes(&self) -> &[InodeId] {
        &self.inodes
    }

    pub fn inode(&self, nth: usize) -> InodeId {
        self.inodes[nth]
    }

    pub fn last(&self) -> InodeId {
        self.inodes[self.inodes.len() - 1]
    }

    pub fn last_name(&self) -> &[u8] {
        &self.names[self.names.len() - 1]
    }

    pub fn contains(&self, iid: InodeId) -> bool {
        self.inodes.contains(&iid)
    }

    /// Chain of the parent, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        (self.len() > 1).then(|| self.prefix(self.len() - 1))
    }

    pub fn prefix(&self, len: usize) -> Self {
        Self {
            names: self.names[..len].to_vec(),
            inodes: self.inodes[..len].to_vec(),
        }
    }

    pub fn append(&self, iid: InodeId, name: &[u8]) -> Self {
        let mut this = self.clone();
        this.push(iid, name);
        this
    }

    fn push(&mut self, iid: InodeId, name: &[u8]) {
        self.inodes.push(iid);
        self.names.push(name.to_vec());
    }

    pub fn path(&self) -> String {
        self.path_of(self.len() - 1)
    }

    /// Path of the chain's `nth` inode.
    pub fn path_of(&self, nth: usize) -> String {
        if nth == 0 {
            return "/".into();
        }

        self.names[1..=nth]
            .iter()
            .map(|name| format!("/{}", String::from_utf8_lossy(name)))
            .collect()
    }

    /// Deepest inode shared by both chains.
    pub fn common_ancestor(&self, other: &Self) -> InodeId {
        self.inodes
            .iter()
            .zip(&other.inodes)
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| *a)
            .last()
            .unwrap_or(InodeId::ROOT)
    }
}

/// Turns `/.reserved/.inodes/<id>[/...]` into the path the inode currently
/// lives at; any other path is returned as-is.
pub fn resolve_reserved_path(src: &impl InodeLookup, path: &str) -> FsResult<String> {
    let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();

    if parts.len() < 3 || parts[0] != DOT_RESERVED || parts[1] != DOT_INODES {
        return Ok(path.into());
    }

    let iid: InodeId = parts[2]
        .parse()
        .map_err(|_| FsError::not_found(format!("Invalid inode path: {}", path)))?;

    if iid.is_root() && parts.len() == 3 {
        return Ok("/".into());
    }

    let parent = src.parent_of(iid).map_err(|_| {
        FsError::not_found(format!("File for given inode path does not exist: {}", path))
    })?;

    match &parts[3..] {
        [] => src.full_path(iid),

        [".."] => match parent {
            Some(parent) if !parent.is_root() => src.full_path(parent),
            _ => Ok("/".into()),
        },

        rest if rest.contains(&"..") => Err(FsError::InvalidPath(path.into())),

        rest => {
            let base = src.full_path(iid)?;

            Ok(format!("{}/{}", base.trim_end_matches('/'), rest.join("/")))
        }
    }
}
