use super::{FsError, FsResult};
use crate::{
    EditOp, INodeLockType, INodesInPath, InodeLock, Namespace, OperationKind, TransactionLocks,
};
use tracing::{debug, instrument};

impl Namespace {
    /// Cuts the file down to `new_length` bytes; blocks past the new end are
    /// dropped and the one straddling it shrinks in place.
    #[instrument(skip(self))]
    pub fn truncate(&self, path: &str, new_length: i64) -> FsResult<()> {
        debug!("op: truncate()");

        let path = self.resolve_path(path)?;

        let locks = TransactionLocks::new()
            .inode(InodeLock::new(path.as_str(), INodeLockType::Write).follow_symlink());

        let dropped = self.handle(OperationKind::Truncate, &locks, |tx| {
            let chain = INodesInPath::resolve(tx, &path, true)?;
            let mut inode = tx.get(chain.last())?;

            let file = inode
                .as_file_mut()
                .ok_or_else(|| FsError::NotFile(path.clone()))?;

            if let Some(holder) = file.writer() {
                return Err(FsError::BeingWritten {
                    op: "truncate",
                    path: path.clone(),
                    holder: holder.into(),
                });
            }

            if new_length < 0 {
                return Err(FsError::InvalidArgument(format!(
                    "Cannot truncate to a negative file size: {}",
                    new_length
                )));
            }

            let new_length = new_length as u64;
            let old_length = file.size();

            if new_length > old_length {
                return Err(FsError::InvalidArgument(format!(
                    "Cannot truncate to a larger file size. Current size: {}, truncate size: {}",
                    old_length, new_length
                )));
            }

            if new_length == old_length {
                return Ok(Vec::new());
            }

            let old_charged = file.charged_bytes_per_replica();
            let mut dropped = Vec::new();

            if let Some(inline) = file.inline_size.as_mut() {
                *inline = new_length;
            } else {
                let mut kept = 0;
                let mut keep = 0;

                while keep < file.blocks.len() && kept < new_length {
                    let block = &mut file.blocks[keep].block;

                    block.num_bytes = block.num_bytes.min(new_length - kept);
                    kept += block.num_bytes;
                    keep += 1;
                }

                dropped = file
                    .blocks
                    .split_off(keep)
                    .into_iter()
                    .map(|info| info.block)
                    .collect();
            }

            let delta =
                file.space_delta(file.charged_bytes_per_replica() as i64 - old_charged as i64);

            tx.put(inode)?;

            self.update_count(tx, &chain, chain.len() - 1, delta, false)?;

            tx.journal(EditOp::Truncate {
                path: chain.path(),
                new_length: new_length as i64,
            })?;

            Ok(dropped)
        })?;

        self.release_blocks(&dropped);

        Ok(())
    }
}
