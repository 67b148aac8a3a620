use crate::{Block, InodeId};
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use tracing::trace;

/// Keeper of physical block records.
pub trait BlockManager: Debug + Send + Sync {
    /// Called once the block got committed to `file`.
    fn add_block_collection(&self, block: &Block, file: InodeId, targets: &[String]) -> Result<()>;

    fn remove_block(&self, block: &Block) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRecord {
    pub file: InodeId,
    pub targets: Vec<String>,
    pub generation_stamp: u64,
}

/// In-memory block map.
#[derive(Debug, Default)]
pub struct BlocksMap {
    blocks: Mutex<HashMap<u64, BlockRecord>>,
}

impl BlocksMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, block_id: u64) -> Option<BlockRecord> {
        self.blocks.lock().get(&block_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }
}

impl BlockManager for BlocksMap {
    fn add_block_collection(&self, block: &Block, file: InodeId, targets: &[String]) -> Result<()> {
        let mut blocks = self.blocks.lock();

        if let Some(existing) = blocks.get(&block.id) {
            if existing.file != file {
                return Err(anyhow!(
                    "block {} already belongs to {:?}",
                    block.id,
                    existing.file
                ));
            }
        }

        trace!("tracking block {} of {:?}", block.id, file);

        blocks.insert(
            block.id,
            BlockRecord {
                file,
                targets: targets.to_vec(),
                generation_stamp: block.generation_stamp,
            },
        );

        Ok(())
    }

    fn remove_block(&self, block: &Block) -> Result<()> {
        trace!("forgetting block {}", block.id);

        self.blocks.lock().remove(&block.id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_and_forgets_blocks() {
        let map = BlocksMap::new();
        let block = Block::new(10, 1);

        map.add_block_collection(&block, InodeId::new(5), &["dn1".into()])
            .unwrap();

        assert_eq!(InodeId::new(5), map.get(10).unwrap().file);
        assert!(map
            .add_block_collection(&block, InodeId::new(6), &[])
            .is_err());

        map.remove_block(&block).unwrap();

        assert!(map.is_empty());
    }
}
