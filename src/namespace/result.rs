use crate::QuotaExceeded;
use anyhow::Error;
use libc::{
    EBUSY, EDQUOT, EEXIST, EINVAL, EIO, EISDIR, ELOOP, EMLINK, ENAMETOOLONG, ENOENT, ENOTDIR,
    ENOTEMPTY, EPERM,
};
use std::ffi::c_int;
use tracing::{debug, error};

pub type FsResult<T> = Result<T, FsError>;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("File does not exist: {path}")]
    NotFound { path: String, unresolved: String },

    #[error("{0} already exists")]
    FileAlreadyExists(String),

    #[error("Parent path is not a directory: {0}")]
    ParentNotDirectory(String),

    #[error("{0} is not a directory")]
    NotDirectory(String),

    #[error("Path is not a file: {0}")]
    NotFile(String),

    #[error("{0} is non empty")]
    DirectoryNotEmpty(String),

    #[error("{0}")]
    QuotaExceeded(QuotaExceeded),

    #[error("The directory item limit of {path} is exceeded: limit={limit} items={count}")]
    MaxDirectoryItemsExceeded { path: String, limit: usize, count: usize },

    #[error(
        "The maximum path component name limit of {name} in directory {parent} is exceeded: \
         limit={limit} length={length}"
    )]
    PathComponentTooLong {
        name: String,
        parent: String,
        limit: usize,
        length: usize,
    },

    #[error("\"{0}\" is a reserved name")]
    ReservedName(String),

    #[error("{path} crosses the symlink {link}")]
    UnresolvedLink { path: String, link: String },

    #[error("Invalid path name {0}")]
    InvalidPath(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Failed to {op} {path}: file is being written by {holder}")]
    BeingWritten { op: &'static str, path: String, holder: String },

    #[error("File is not under construction: {0}")]
    NotUnderConstruction(String),

    #[error("No lease on {path}: file is held by {holder:?}, not by {client}")]
    LeaseMismatch {
        path: String,
        holder: Option<String>,
        client: String,
    },

    #[error(transparent)]
    Other(Error),
}

impl FsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound {
            path: path.into(),
            unresolved: String::new(),
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }

    pub fn log_and_convert(self) -> c_int {
        match self {
            FsError::NotFound { .. } => {
                debug!("... not found");
                ENOENT
            }

            FsError::FileAlreadyExists(_) => {
                debug!("... already exists");
                EEXIST
            }

            FsError::ParentNotDirectory(_) | FsError::NotDirectory(_) => {
                debug!("... not a directory");
                ENOTDIR
            }

            FsError::NotFile(_) => {
                debug!("... not a file");
                EISDIR
            }

            FsError::DirectoryNotEmpty(_) => {
                debug!("... not empty");
                ENOTEMPTY
            }

            FsError::QuotaExceeded(err) => {
                debug!("... {}", err);
                EDQUOT
            }

            FsError::MaxDirectoryItemsExceeded { .. } => {
                debug!("... too many directory items");
                EMLINK
            }

            FsError::PathComponentTooLong { .. } => {
                debug!("... name too long");
                ENAMETOOLONG
            }

            FsError::ReservedName(_) => {
                debug!("... reserved name");
                EPERM
            }

            FsError::UnresolvedLink { .. } => {
                debug!("... unresolved link");
                ELOOP
            }

            FsError::InvalidPath(_)
            | FsError::InvalidArgument(_)
            | FsError::NotUnderConstruction(_) => {
                debug!("... invalid argument");
                EINVAL
            }

            FsError::BeingWritten { .. } | FsError::LeaseMismatch { .. } => {
                debug!("... busy");
                EBUSY
            }

            FsError::Other(err) => {
                error!("... {:?}", err);
                EIO
            }
        }
    }
}

impl From<Error> for FsError {
    fn from(err: Error) -> Self {
        FsError::Other(err)
    }
}

impl From<QuotaExceeded> for FsError {
    fn from(err: QuotaExceeded) -> Self {
        FsError::QuotaExceeded(err)
    }
}
