mod common;

use self::common::*;
use nsmeta::{FsError, Namespace, QuotaCounts};

#[test]
fn moving_a_subtree_moves_its_usage() {
    let ns = Namespace::default();

    mkdir(&ns, "/src/dir/sub");
    mkdir(&ns, "/dst");
    ns.set_quota("/src", 100, QuotaCounts::UNLIMITED).unwrap();
    ns.set_quota("/dst", 100, QuotaCounts::UNLIMITED).unwrap();
    write_file(&ns, "/src/dir/f", 2, 100);
    write_file(&ns, "/src/dir/sub/g", 2, 50);

    // some of the subtree's usage is still pending when it moves
    ns.rename("/src/dir", "/dst/dir").unwrap();

    let src = consumed(&ns, "/src");
    let dst = consumed(&ns, "/dst");

    assert_eq!(QuotaCounts::new(1, 0), QuotaCounts::new(src.namespace, src.diskspace));
    assert_eq!(QuotaCounts::new(5, 300), QuotaCounts::new(dst.namespace, dst.diskspace));
    assert_eq!(ns.compute_quota_usage("/dst").unwrap(), dst);
}

#[test]
fn rename_below_a_common_quota_ignores_it() {
    let ns = Namespace::default();

    mkdir(&ns, "/q/a");
    mkdir(&ns, "/q/b");
    write_file(&ns, "/q/a/f", 1, BLOCK);
    ns.set_quota("/q", 4, QuotaCounts::UNLIMITED).unwrap();

    // /q is at its limit, but the file stays within it
    assert_eq!(4, consumed(&ns, "/q").namespace);

    ns.rename("/q/a/f", "/q/b/f").unwrap();

    assert_eq!(4, consumed(&ns, "/q").namespace);
    assert!(ns.get_file_info("/q/b/f").is_ok());
}

#[test]
fn rename_into_a_full_directory_fails_cleanly() {
    let ns = Namespace::default();

    mkdir(&ns, "/a/dir/x");
    mkdir(&ns, "/b");
    ns.set_quota("/b", 2, QuotaCounts::UNLIMITED).unwrap();

    let before = ns.get_listing("/a").unwrap();

    assert!(ns.rename("/a/dir", "/b/dir").unwrap_err().is_quota_exceeded());
    assert_eq!(before, ns.get_listing("/a").unwrap());
    assert!(ns.get_listing("/b").unwrap().is_empty());
    assert_eq!(1, consumed(&ns, "/b").namespace);
}

#[test]
fn rename_onto_an_existing_file_fails() {
    let ns = Namespace::default();

    write_file(&ns, "/f", 1, 1);
    write_file(&ns, "/g", 1, 1);

    assert!(matches!(ns.rename("/f", "/g"), Err(FsError::FileAlreadyExists(_))));

    mkdir(&ns, "/d");
    write_file(&ns, "/d/f", 1, 1);

    assert!(matches!(ns.rename("/f", "/d"), Err(FsError::FileAlreadyExists(_))));
}

#[test]
fn rename_respects_directory_limits() {
    let ns = Namespace::new(nsmeta::NamespaceConfig {
        max_dir_items: 2,
        ..Default::default()
    });

    mkdir(&ns, "/a/x");
    mkdir(&ns, "/b/y");
    mkdir(&ns, "/b/w");

    assert!(matches!(
        ns.rename("/a/x", "/b/x"),
        Err(FsError::MaxDirectoryItemsExceeded { .. })
    ));

    // a new name in the same directory doesn't add an item
    ns.rename("/a/x", "/a/z").unwrap();
}

#[test]
fn renamed_inodes_keep_their_id() {
    let ns = Namespace::default();

    mkdir(&ns, "/a");
    write_file(&ns, "/a/f", 1, 1);

    let iid = ns.get_file_info("/a/f").unwrap().file_id;

    ns.rename("/a", "/b").unwrap();

    assert_eq!(iid, ns.get_file_info("/b/f").unwrap().file_id);
    assert_eq!("/b/f", ns.full_path_name(iid).unwrap());
    assert_eq!(
        vec![nsmeta::InodeId::ROOT, ns.get_file_info("/b").unwrap().file_id, iid],
        ns.get_inodes_in_path("/b/f", false).unwrap().inodes()
    );
}
