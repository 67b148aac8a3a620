use crate::{Block, PermissionStatus, StoragePolicy, StorageType};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A committed namespace mutation, as journaled for replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    Mkdirs {
        path: String,
        permission: PermissionStatus,
    },

    Create {
        path: String,
        permission: PermissionStatus,
        replication: u16,
        block_size: u64,
        client_name: String,
        client_machine: String,
        overwrite: bool,
    },

    Symlink {
        target: String,
        link: String,
        permission: PermissionStatus,
        create_parent: bool,
    },

    AddBlock {
        path: String,
        client_name: String,
        block: Block,
        targets: Vec<String>,
    },

    AbandonBlock {
        path: String,
        client_name: String,
        block_id: u64,
    },

    Complete {
        path: String,
        client_name: String,
        last_block_length: u64,
    },

    Append {
        path: String,
        client_name: String,
        client_machine: String,
    },

    WriteInline {
        path: String,
        client_name: String,
        length: u64,
    },

    Truncate {
        path: String,
        new_length: i64,
    },

    Delete {
        path: String,
        recursive: bool,
    },

    Rename {
        src: String,
        dst: String,
    },

    SetQuota {
        path: String,
        namespace: i64,
        diskspace: i64,
    },

    SetQuotaByStorageType {
        path: String,
        storage_type: StorageType,
        limit: i64,
    },

    SetStoragePolicy {
        path: String,
        policy: StoragePolicy,
    },

    SetReplication {
        path: String,
        replication: u16,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditLog {
    #[serde(default)]
    pub ops: Vec<EditOp>,
}

impl EditLog {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("couldn't read edit log from {}", path.display()))?;

        toml::from_str(&raw)
            .with_context(|| format!("couldn't parse edit log from {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string(self).context("couldn't serialize edit log")?;

        std::fs::write(path, raw)
            .with_context(|| format!("couldn't write edit log to {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
