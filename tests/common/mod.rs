#![allow(dead_code)]

use nsmeta::{CreateOptions, Namespace, PermissionStatus, QuotaCounts};

pub const BLOCK: u64 = 1024;
pub const CLIENT: &str = "client";

pub fn opts(replication: u16) -> CreateOptions {
    CreateOptions {
        replication: Some(replication),
        block_size: Some(BLOCK),
        ..CreateOptions::new(CLIENT)
    }
}

pub fn mkdir(ns: &Namespace, path: &str) {
    ns.mkdirs(path, PermissionStatus::default()).unwrap();
}

/// Creates a closed file of `len` bytes, written block by block.
pub fn write_file(ns: &Namespace, path: &str, replication: u16, len: u64) {
    ns.create(path, &opts(replication)).unwrap();
    fill(ns, path, len);
}

/// Writes `len` bytes into an already open file and closes it.
pub fn fill(ns: &Namespace, path: &str, len: u64) {
    let blocks = len.div_ceil(BLOCK);

    for _ in 0..blocks {
        ns.add_block(path, CLIENT, &["dn-1".into()]).unwrap();
    }

    let last = if blocks == 0 { 0 } else { len - (blocks - 1) * BLOCK };

    ns.complete(path, CLIENT, last).unwrap();
}

/// Cached usage of the quota directory at `path`, once everything pending
/// got merged.
pub fn consumed(ns: &Namespace, path: &str) -> QuotaCounts {
    ns.merge_quota_updates().unwrap();

    ns.get_quota_usage(path)
        .unwrap()
        .unwrap_or_else(|| panic!("{} has no quota", path))
        .consumed
}
