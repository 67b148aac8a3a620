use super::{FsError, FsResult};
use crate::{
    Block, BlockInfo, BlockState, EditOp, FileInode, FileUnderConstruction, INodeLockType,
    INodesInPath, InodeId, InodeLock, InodeLookup, Namespace, OperationKind, Transaction,
    TransactionLocks,
};
use anyhow::Context;
use std::sync::atomic::Ordering;
use tracing::{debug, instrument, trace, warn};

impl Namespace {
    /// Allocates a new block at the end of the file the client is writing.
    #[instrument(skip(self))]
    pub fn add_block(&self, path: &str, client_name: &str, targets: &[String]) -> FsResult<Block> {
        debug!("op: add_block()");

        let block = self.next_block();

        self.add_block_with(path, client_name, block, targets)?;

        Ok(block)
    }

    pub(crate) fn add_block_with(
        &self,
        path: &str,
        client_name: &str,
        block: Block,
        targets: &[String],
    ) -> FsResult<()> {
        self.next_block_id.fetch_max(block.id + 1, Ordering::SeqCst);
        self.generation_stamp.fetch_max(block.generation_stamp + 1, Ordering::SeqCst);

        let file = self.write_file(OperationKind::AddBlock, path, |tx, chain| {
            tx.with_inode(chain.last(), |inode| {
                Self::check_lease(chain, inode.as_file(), client_name)
            })??;

            self.append_block(tx, chain, block, targets)?;

            tx.journal(EditOp::AddBlock {
                path: chain.path(),
                client_name: client_name.into(),
                block,
                targets: targets.to_vec(),
            })?;

            Ok(chain.last())
        })?;

        self.track_block(&block, file, targets);

        Ok(())
    }

    /// Hands a committed block over to the block manager.
    pub(crate) fn track_block(&self, block: &Block, file: InodeId, targets: &[String]) {
        if let Err(err) = self.block_manager().add_block_collection(block, file, targets) {
            warn!("couldn't track block {} of {:?}: {:?}", block.id, file, err);
        }
    }

    /// Appends an under-construction block to the last inode of `chain`,
    /// charging a whole preferred block for it up front.
    ///
    /// The block manager learns about the block only once the transaction
    /// commits.
    pub fn append_block(
        &self,
        tx: &mut Transaction<'_>,
        chain: &INodesInPath,
        block: Block,
        targets: &[String],
    ) -> FsResult<BlockInfo> {
        let path = chain.path();
        let mut inode = tx.get(chain.last())?;

        let file = inode.as_file_mut().ok_or_else(|| FsError::NotFile(path.clone()))?;

        if !file.is_under_construction() {
            return Err(FsError::NotUnderConstruction(path));
        }

        // inline data moves into the block, so it's no longer charged on
        // its own
        let inline = file.inline_size.unwrap_or(0);
        let delta = file.space_delta(file.preferred_block_size as i64 - inline as i64);

        self.update_count(tx, chain, chain.len() - 1, delta, true)?;

        file.inline_size = None;

        if let Some(last) = file.blocks.last_mut() {
            if !last.is_complete() {
                last.block.num_bytes = file.preferred_block_size;
                last.state = BlockState::Complete;
            }
        }

        let info = BlockInfo::under_construction(block);

        file.blocks.push(info);

        trace!("{} now has {} block(s)", path, file.blocks.len());

        tx.put(inode)?;

        Ok(info)
    }

    /// Gives up on a block the client couldn't write.
    #[instrument(skip(self))]
    pub fn abandon_block(&self, path: &str, client_name: &str, block_id: u64) -> FsResult<bool> {
        debug!("op: abandon_block()");

        let (removed, block) = self.write_file(OperationKind::AbandonBlock, path, |tx, chain| {
            let file = tx.with_inode(chain.last(), |inode| inode.as_file().cloned())?;

            Self::check_lease(chain, file.as_ref(), client_name)?;

            let block = file
                .as_ref()
                .and_then(|file| file.blocks.iter().find(|info| info.block.id == block_id))
                .map(|info| info.block);

            let Some(block) = block else {
                return Ok((false, None));
            };

            let removed = self.remove_block(tx, chain, &block)?;

            if removed {
                tx.journal(EditOp::AbandonBlock {
                    path: chain.path(),
                    client_name: client_name.into(),
                    block_id,
                })?;
            }

            Ok((removed, removed.then_some(block)))
        })?;

        if let Some(block) = block {
            self.release_blocks(&[block]);
        }

        Ok(removed)
    }

    /// Removes `block` from an under-construction file; only its last block
    /// can go. Returns whether anything got removed.
    pub fn remove_block(
        &self,
        tx: &mut Transaction<'_>,
        chain: &INodesInPath,
        block: &Block,
    ) -> FsResult<bool> {
        let is_removable = tx.with_inode(chain.last(), |inode| {
            inode.as_file().is_some_and(|file| {
                file.is_under_construction()
                    && file.last_block().map(|info| info.block.id) == Some(block.id)
            })
        })?;

        if !is_removable {
            debug!("block {} is not the last block of an open file", block.id);
            return Ok(false);
        }

        self.unprotected_remove_block(tx, chain, block)?;

        Ok(true)
    }

    /// Pops the file's last block and refunds what it was charged; the
    /// caller has made sure that's the block to remove.
    pub fn unprotected_remove_block(
        &self,
        tx: &mut Transaction<'_>,
        chain: &INodesInPath,
        block: &Block,
    ) -> FsResult<()> {
        let mut inode = tx.get(chain.last())?;
        let file = inode.as_file_mut().context("tried to remove a block of a non-file")?;
        let info = file.blocks.pop().context("file has no blocks")?;

        if info.block.id != block.id {
            return Err(anyhow::anyhow!(
                "block {} is not the last block of {}",
                block.id,
                chain.path()
            )
            .into());
        }

        let charged = info.charged_bytes(file.preferred_block_size);

        trace!("removing block {} of {} ({} B per replica)", block.id, chain.path(), charged);

        let delta = -file.space_delta(charged as i64);

        tx.put(inode)?;

        self.update_count(tx, chain, chain.len() - 1, delta, false)
    }

    /// Closes the file: its last block gets its final length and the lease
    /// gets released.
    #[instrument(skip(self))]
    pub fn complete(&self, path: &str, client_name: &str, last_block_length: u64) -> FsResult<()> {
        debug!("op: complete()");

        self.write_file(OperationKind::Complete, path, |tx, chain| {
            let mut inode = tx.get(chain.last())?;

            Self::check_lease(chain, inode.as_file(), client_name)?;

            let file = inode.as_file_mut().context("lease checked on a non-file")?;
            let mut delta = None;

            if let Some(last) = file.blocks.last_mut().filter(|info| !info.is_complete()) {
                if last_block_length > file.preferred_block_size {
                    return Err(FsError::InvalidArgument(format!(
                        "Block of {} is {} B long, more than the preferred {} B",
                        chain.path(),
                        last_block_length,
                        file.preferred_block_size
                    )));
                }

                last.block.num_bytes = last_block_length;
                last.state = BlockState::Complete;

                let refund = last_block_length as i64 - file.preferred_block_size as i64;

                delta = Some(file.space_delta(refund));
            }

            file.under_construction = None;
            tx.put(inode)?;

            if let Some(delta) = delta {
                self.update_count(tx, chain, chain.len() - 1, delta, false)?;
            }

            tx.journal(EditOp::Complete {
                path: chain.path(),
                client_name: client_name.into(),
                last_block_length,
            })
        })
    }

    /// Reopens a closed file for writing; a partially filled last block gets
    /// charged as a whole again.
    #[instrument(skip(self))]
    pub fn append(&self, path: &str, client_name: &str, client_machine: &str) -> FsResult<()> {
        debug!("op: append()");

        self.write_file(OperationKind::Append, path, |tx, chain| {
            let mut inode = tx.get(chain.last())?;
            let path = chain.path();
            let file = inode.as_file_mut().ok_or_else(|| FsError::NotFile(path.clone()))?;

            if let Some(holder) = file.writer() {
                return Err(FsError::BeingWritten {
                    op: "append",
                    path,
                    holder: holder.into(),
                });
            }

            let partial = file
                .blocks
                .last()
                .filter(|info| info.block.num_bytes < file.preferred_block_size)
                .map(|info| info.block.num_bytes);

            if let Some(num_bytes) = partial {
                let delta = file.space_delta(file.preferred_block_size as i64 - num_bytes as i64);

                self.update_count(tx, chain, chain.len() - 1, delta, true)?;

                if let Some(last) = file.blocks.last_mut() {
                    last.state = BlockState::UnderConstruction;
                }
            }

            file.under_construction = Some(FileUnderConstruction {
                client_name: client_name.into(),
                client_machine: client_machine.into(),
            });

            tx.put(inode)?;

            tx.journal(EditOp::Append {
                path,
                client_name: client_name.into(),
                client_machine: client_machine.into(),
            })
        })
    }

    /// Sets the length of a small file whose data lives in the metadata.
    #[instrument(skip(self))]
    pub fn write_inline(&self, path: &str, client_name: &str, length: u64) -> FsResult<()> {
        debug!("op: write_inline()");

        let max = self.config().small_file_max_size;

        if max == 0 || length > max {
            return Err(FsError::InvalidArgument(format!(
                "{} B is too much to store inline (limit: {} B)",
                length, max
            )));
        }

        self.write_file(OperationKind::WriteInline, path, |tx, chain| {
            let mut inode = tx.get(chain.last())?;

            Self::check_lease(chain, inode.as_file(), client_name)?;

            let file = inode.as_file_mut().context("lease checked on a non-file")?;

            if !file.blocks.is_empty() {
                return Err(FsError::InvalidArgument(format!(
                    "{} already stores its data in blocks",
                    chain.path()
                )));
            }

            let old = file.inline_size.unwrap_or(0);
            let delta = file.space_delta(length as i64 - old as i64);

            self.update_count(tx, chain, chain.len() - 1, delta, true)?;

            file.inline_size = Some(length);
            tx.put(inode)?;

            tx.journal(EditOp::WriteInline {
                path: chain.path(),
                client_name: client_name.into(),
                length,
            })
        })
    }

    /// Makes sure the file is open for writing by `client_name`.
    pub fn check_lease(
        chain: &INodesInPath,
        file: Option<&FileInode>,
        client_name: &str,
    ) -> FsResult<()> {
        let path = chain.path();
        let file = file.ok_or_else(|| FsError::NotFile(path.clone()))?;

        match file.writer() {
            Some(holder) if holder == client_name => Ok(()),

            Some(holder) => Err(FsError::LeaseMismatch {
                path,
                holder: Some(holder.into()),
                client: client_name.into(),
            }),

            None => Err(FsError::NotUnderConstruction(path)),
        }
    }

    /// Runs `task` on the resolved file with its inode (and the chain above
    /// it) locked for writing.
    fn write_file<T>(
        &self,
        kind: OperationKind,
        path: &str,
        task: impl FnOnce(&mut Transaction<'_>, &INodesInPath) -> FsResult<T>,
    ) -> FsResult<T> {
        let path = self.resolve_path(path)?;
        let locks =
            TransactionLocks::new().inode(InodeLock::new(path.as_str(), INodeLockType::Write));

        self.handle(kind, &locks, |tx| {
            let chain = INodesInPath::resolve(tx, &path, false)?;

            task(tx, &chain)
        })
    }
}
