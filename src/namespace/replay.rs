use super::FsResult;
use crate::{CreateOptions, EditLog, EditOp, Namespace, RecomputeReport};
use tracing::{debug, info, instrument};

impl Namespace {
    /// Rebuilds the namespace by re-running journaled edits, then recomputes
    /// all quota usage from scratch.
    ///
    /// Limits are not enforced while replaying: the edits were accepted once
    /// already.
    #[instrument(skip(self, log))]
    pub fn replay(&self, log: &EditLog) -> FsResult<RecomputeReport> {
        info!("replaying {} edit(s)", log.len());

        self.set_image_loaded(false);

        let result = log.ops.iter().try_for_each(|op| self.apply(op));

        self.set_image_loaded(true);
        result?;

        self.update_count_for_quota()
    }

    pub fn apply(&self, op: &EditOp) -> FsResult<()> {
        debug!("applying {:?}", op);

        match op {
            EditOp::Mkdirs { path, permission } => self.mkdirs(path, permission.clone()),

            EditOp::Create {
                path,
                permission,
                replication,
                block_size,
                client_name,
                client_machine,
                overwrite,
            } => {
                let opts = CreateOptions {
                    permission: permission.clone(),
                    replication: Some(*replication),
                    block_size: Some(*block_size),
                    client_machine: client_machine.clone(),
                    overwrite: *overwrite,
                    ..CreateOptions::new(client_name.as_str())
                };

                self.create(path, &opts).map(drop)
            }

            EditOp::Symlink {
                target,
                link,
                permission,
                create_parent,
            } => self
                .create_symlink(target, link, permission.clone(), *create_parent)
                .map(drop),

            EditOp::AddBlock {
                path,
                client_name,
                block,
                targets,
            } => self.add_block_with(path, client_name, *block, targets),

            EditOp::AbandonBlock {
                path,
                client_name,
                block_id,
            } => self.abandon_block(path, client_name, *block_id).map(drop),

            EditOp::Complete {
                path,
                client_name,
                last_block_length,
            } => self.complete(path, client_name, *last_block_length),

            EditOp::Append {
                path,
                client_name,
                client_machine,
            } => self.append(path, client_name, client_machine),

            EditOp::WriteInline {
                path,
                client_name,
                length,
            } => self.write_inline(path, client_name, *length),

            EditOp::Truncate { path, new_length } => self.truncate(path, *new_length),

            EditOp::Delete { path, recursive } => self.delete(path, *recursive).map(drop),

            EditOp::Rename { src, dst } => self.rename(src, dst),

            EditOp::SetQuota {
                path,
                namespace,
                diskspace,
            } => self.set_quota(path, *namespace, *diskspace),

            EditOp::SetQuotaByStorageType {
                path,
                storage_type,
                limit,
            } => self.set_quota_by_storage_type(path, *storage_type, *limit),

            EditOp::SetStoragePolicy { path, policy } => self.set_storage_policy(path, *policy),

            EditOp::SetReplication { path, replication } => {
                self.set_replication(path, *replication)
            }
        }
    }
}
