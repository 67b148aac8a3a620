use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub id: u64,
    pub num_bytes: u64,
    pub generation_stamp: u64,
}

impl Block {
    pub fn new(id: u64, generation_stamp: u64) -> Self {
        Self {
            id,
            num_bytes: 0,
            generation_stamp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    /// Being written; charged at the file's preferred block size.
    UnderConstruction,
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub block: Block,
    pub state: BlockState,
}

impl BlockInfo {
    pub fn under_construction(block: Block) -> Self {
        Self {
            block,
            state: BlockState::UnderConstruction,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == BlockState::Complete
    }

    /// Bytes one replica of this block is charged for.
    pub fn charged_bytes(&self, preferred_block_size: u64) -> u64 {
        match self.state {
            BlockState::UnderConstruction => preferred_block_size,
            BlockState::Complete => self.block.num_bytes,
        }
    }
}
