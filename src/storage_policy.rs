use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Medium a block replica lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageType {
    RamDisk,
    Ssd,
    Disk,
    Archive,
}

impl StorageType {
    pub const COUNT: usize = 4;

    pub const ALL: [Self; Self::COUNT] = [Self::RamDisk, Self::Ssd, Self::Disk, Self::Archive];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageType::RamDisk => "RAM_DISK",
            StorageType::Ssd => "SSD",
            StorageType::Disk => "DISK",
            StorageType::Archive => "ARCHIVE",
        };

        f.write_str(name)
    }
}

impl FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown storage type: {}", s))
    }
}

/// Rule deciding which medium each replica of a file's blocks goes to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoragePolicy {
    #[default]
    Hot,
    Warm,
    Cold,
    OneSsd,
    AllSsd,
}

impl StoragePolicy {
    pub const ALL: [Self; 5] = [
        Self::Hot,
        Self::Warm,
        Self::Cold,
        Self::OneSsd,
        Self::AllSsd,
    ];

    /// Storage type of each of `replication` replicas, first replica first.
    pub fn choose_storage_types(self, replication: u16) -> Vec<StorageType> {
        (0..replication)
            .map(|nth| match self {
                StoragePolicy::Hot => StorageType::Disk,
                StoragePolicy::Cold => StorageType::Archive,
                StoragePolicy::AllSsd => StorageType::Ssd,
                StoragePolicy::Warm if nth == 0 => StorageType::Disk,
                StoragePolicy::Warm => StorageType::Archive,
                StoragePolicy::OneSsd if nth == 0 => StorageType::Ssd,
                StoragePolicy::OneSsd => StorageType::Disk,
            })
            .collect()
    }
}

impl fmt::Display for StoragePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoragePolicy::Hot => "HOT",
            StoragePolicy::Warm => "WARM",
            StoragePolicy::Cold => "COLD",
            StoragePolicy::OneSsd => "ONE_SSD",
            StoragePolicy::AllSsd => "ALL_SSD",
        };

        f.write_str(name)
    }
}

impl FromStr for StoragePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|policy| policy.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown storage policy: {}", s))
    }
}
