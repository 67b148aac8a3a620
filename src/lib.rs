mod block;
mod block_manager;
mod config;
mod edit_log;
mod inode;
mod inode_id;
mod inodes;
mod inodes_in_path;
mod lock_manager;
mod namespace;
mod quota_counts;
mod quota_feature;
mod quota_update_manager;
mod storage_policy;
mod transaction;
mod transaction_locks;

pub use self::block::*;
pub use self::block_manager::*;
pub use self::config::*;
pub use self::edit_log::*;
pub use self::inode::*;
pub use self::inode_id::*;
pub use self::inodes::*;
pub use self::inodes_in_path::*;
pub use self::lock_manager::*;
pub use self::namespace::*;
pub use self::quota_counts::*;
pub use self::quota_feature::*;
pub use self::quota_update_manager::*;
pub use self::storage_policy::*;
pub use self::transaction::*;
pub use self::transaction_locks::*;
