mod add_inode;
mod getattr;
mod mk;
mod quota;
mod readdir;
mod recompute;
mod remove_inode;
mod rename;
mod replay;
mod resolve;
mod result;
mod rm;
mod setattr;
mod truncate;
mod write;

pub use self::getattr::*;
pub use self::mk::*;
pub use self::quota::*;
pub use self::recompute::*;
pub use self::result::*;
use crate::{
    Block, BlockManager, BlocksMap, EditLog, EditOp, Inodes, LockManager, NamespaceConfig,
    OperationKind, PermissionStatus, QuotaUpdateManager, QuotaUpdateMonitor, Transaction,
    TransactionLocks,
};
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// The namespace tree together with everything needed to mutate it
/// concurrently: per-inode locks, the pending quota update ledger and the
/// block manager.
#[derive(Debug)]
pub struct Namespace {
    config: NamespaceConfig,
    pub(crate) inodes: RwLock<Inodes>,
    locks: LockManager,
    pub(crate) quota_updates: QuotaUpdateManager,
    blocks: Arc<dyn BlockManager>,

    /// Unset while edits get replayed; quota and limits are not enforced
    /// then, since the edits describe history that already happened.
    image_loaded: AtomicBool,

    next_block_id: AtomicU64,
    generation_stamp: AtomicU64,
    yield_count: AtomicU64,
    edits: Mutex<EditLog>,
}

impl Namespace {
    pub fn new(config: NamespaceConfig) -> Self {
        Self::with_block_manager(config, Arc::new(BlocksMap::new()))
    }

    pub fn with_block_manager(config: NamespaceConfig, blocks: Arc<dyn BlockManager>) -> Self {
        Self {
            config,
            inodes: RwLock::new(Inodes::new(PermissionStatus::default())),
            locks: LockManager::default(),
            quota_updates: QuotaUpdateManager::default(),
            blocks,
            image_loaded: AtomicBool::new(true),
            next_block_id: AtomicU64::new(1 << 30),
            generation_stamp: AtomicU64::new(1000),
            yield_count: AtomicU64::new(0),
            edits: Default::default(),
        }
    }

    /// Starts merging pending quota updates in the background.
    pub fn start_quota_update_monitor(self: &Arc<Self>) -> Result<QuotaUpdateMonitor> {
        QuotaUpdateMonitor::spawn(self)
    }

    pub fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    pub fn is_quota_enabled(&self) -> bool {
        self.config.quota_enabled
    }

    pub fn is_image_loaded(&self) -> bool {
        self.image_loaded.load(Ordering::SeqCst)
    }

    pub fn set_image_loaded(&self, loaded: bool) {
        self.image_loaded.store(loaded, Ordering::SeqCst);
    }

    pub fn quota_update_manager(&self) -> &QuotaUpdateManager {
        &self.quota_updates
    }

    pub fn block_manager(&self) -> &Arc<dyn BlockManager> {
        &self.blocks
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// How many times long-running reads let go of their locks midway.
    pub fn yield_count(&self) -> u64 {
        self.yield_count.load(Ordering::SeqCst)
    }

    pub fn inode_count(&self) -> usize {
        self.inodes.read().len()
    }

    /// Edits committed since the namespace got loaded.
    pub fn edit_log(&self) -> EditLog {
        self.edits.lock().clone()
    }

    /// Runs `task` as a single transaction: locks get planned and taken
    /// first, and released once the transaction is over, no matter how it
    /// ends.
    #[instrument(skip(self, locks, task))]
    pub fn handle<T>(
        &self,
        kind: OperationKind,
        locks: &TransactionLocks,
        task: impl FnOnce(&mut Transaction<'_>) -> FsResult<T>,
    ) -> FsResult<T> {
        let guard = locks.acquire(&self.locks, &self.inodes, self.config.lock_retries)?;
        let mut tx = Transaction::begin(self, kind, guard);

        match task(&mut tx) {
            Ok(out) => {
                tx.commit()?;
                Ok(out)
            }

            Err(err) => {
                debug!("{:?} failed: {}", kind, err);
                tx.rollback();
                Err(err)
            }
        }
    }

    pub(crate) fn journal(&self, edits: Vec<EditOp>) {
        if !edits.is_empty() && self.is_image_loaded() {
            self.edits.lock().ops.extend(edits);
        }
    }

    fn next_block(&self) -> Block {
        Block::new(
            self.next_block_id.fetch_add(1, Ordering::SeqCst),
            self.generation_stamp.fetch_add(1, Ordering::SeqCst),
        )
    }

    fn yielded(&self) {
        self.yield_count.fetch_add(1, Ordering::SeqCst);
        std::thread::yield_now();
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(NamespaceConfig::default())
    }
}
