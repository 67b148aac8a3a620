use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamespaceConfig {
    /// When disabled, no quota is ever verified nor accounted for.
    pub quota_enabled: bool,

    /// Maximum length of a single path component; 0 disables the check.
    pub max_component_length: usize,

    /// Maximum number of children of a directory; 0 disables the check.
    pub max_dir_items: usize,

    pub quota_update_interval_ms: u64,

    /// Inodes visited per locked batch when summarizing a subtree.
    pub content_count_limit: usize,

    /// Largest file kept inline in the metadata; 0 disables inline files.
    pub small_file_max_size: u64,

    pub lock_retries: usize,
    pub default_replication: u16,
    pub default_block_size: u64,
}

impl NamespaceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("couldn't read config from {}", path.display()))?;

        toml::from_str(&raw)
            .with_context(|| format!("couldn't parse config from {}", path.display()))
    }

    pub fn quota_update_interval(&self) -> Duration {
        Duration::from_millis(self.quota_update_interval_ms)
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            quota_enabled: true,
            max_component_length: 255,
            max_dir_items: 1024 * 1024,
            quota_update_interval_ms: 1000,
            content_count_limit: 5000,
            small_file_max_size: 64 * 1024,
            lock_retries: 16,
            default_replication: 3,
            default_block_size: 128 * 1024 * 1024,
        }
    }
}
