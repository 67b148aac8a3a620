mod common;

use self::common::*;
use nsmeta::{Namespace, NamespaceConfig, QuotaCounts};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const THREADS: usize = 4;
const FILES: usize = 25;

fn quota_dirs(ns: &Namespace, dirs: &[&str]) {
    for dir in dirs {
        mkdir(ns, dir);
        ns.set_quota(dir, 10_000, QuotaCounts::UNLIMITED).unwrap();
    }
}

fn assert_consistent(ns: &Namespace, dirs: &[&str]) {
    ns.merge_quota_updates().unwrap();

    let report = ns.update_count_for_quota().unwrap();

    assert_eq!(0, report.inconsistencies);
    assert_eq!(0, report.violations);

    for dir in dirs {
        assert_eq!(ns.compute_quota_usage(dir).unwrap(), consumed(ns, dir));
    }
}

#[test]
fn writers_in_disjoint_directories() {
    let ns = Arc::new(Namespace::default());
    let dirs = ["/w/0", "/w/1", "/w/2", "/w/3"];

    quota_dirs(&ns, &dirs);

    let handles: Vec<_> = (0..THREADS)
        .map(|nth| {
            let ns = Arc::clone(&ns);

            thread::spawn(move || {
                for file in 0..FILES {
                    write_file(&ns, &format!("/w/{}/f{}", nth, file), 2, BLOCK + file as u64);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_consistent(&ns, &dirs);

    let usage = consumed(&ns, "/w/2");

    assert_eq!(1 + FILES as i64, usage.namespace);
}

#[test]
fn writers_sharing_a_directory() {
    let ns = Arc::new(Namespace::default());

    quota_dirs(&ns, &["/shared"]);

    let handles: Vec<_> = (0..THREADS)
        .map(|nth| {
            let ns = Arc::clone(&ns);

            thread::spawn(move || {
                for file in 0..FILES {
                    let path = format!("/shared/t{}-{}", nth, file);

                    write_file(&ns, &path, 1, 10);

                    if file % 5 == 0 {
                        assert!(ns.delete(&path, false).unwrap());
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_consistent(&ns, &["/shared"]);

    let alive = THREADS * (FILES - FILES / 5);

    assert_eq!(alive, ns.get_listing("/shared").unwrap().len());
    assert_eq!(1 + alive as i64, consumed(&ns, "/shared").namespace);
    assert_eq!(10 * alive as i64, consumed(&ns, "/shared").diskspace);
}

#[test]
fn renames_racing_with_writers() {
    let ns = Arc::new(Namespace::default());
    let dirs = ["/r/a", "/r/b"];

    quota_dirs(&ns, &dirs);

    for nth in 0..THREADS {
        mkdir(&ns, &format!("/r/a/x{}", nth));
    }

    let movers = (0..THREADS).map(|nth| {
        let ns = Arc::clone(&ns);

        thread::spawn(move || {
            write_file(&ns, &format!("/r/a/x{}/payload", nth), 3, 2 * BLOCK);

            for round in 0..FILES {
                let (from, to) = if round % 2 == 0 { ("a", "b") } else { ("b", "a") };

                ns.rename(&format!("/r/{}/x{}", from, nth), &format!("/r/{}/x{}", to, nth))
                    .unwrap();
            }
        })
    });

    let writers = (0..THREADS).map(|nth| {
        let ns = Arc::clone(&ns);

        thread::spawn(move || {
            for file in 0..FILES {
                let dir = if file % 2 == 0 { "a" } else { "b" };

                write_file(&ns, &format!("/r/{}/w{}-{}", dir, nth, file), 1, 100);
            }
        })
    });

    let handles: Vec<_> = movers.chain(writers).collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_consistent(&ns, &dirs);

    // an odd number of moves leaves every subtree in /r/b
    for nth in 0..THREADS {
        assert!(ns.get_file_info(&format!("/r/b/x{}/payload", nth)).is_ok());
    }

    let total = consumed(&ns, "/r/a").diskspace + consumed(&ns, "/r/b").diskspace;

    assert_eq!((THREADS * (FILES * 100) + THREADS * 2 * BLOCK as usize * 3) as i64, total);
}

#[test]
fn monitor_drains_pending_updates() {
    let ns = Arc::new(Namespace::new(NamespaceConfig {
        quota_update_interval_ms: 10,
        ..Default::default()
    }));

    quota_dirs(&ns, &["/m"]);

    let monitor = ns.start_quota_update_monitor().unwrap();

    for file in 0..FILES {
        write_file(&ns, &format!("/m/f{}", file), 1, 10);
    }

    let deadline = Instant::now() + Duration::from_secs(10);

    while !ns.quota_update_manager().is_empty() {
        assert!(Instant::now() < deadline, "pending quota updates never got merged");
        thread::sleep(Duration::from_millis(5));
    }

    monitor.stop();

    let usage = ns.get_quota_usage("/m").unwrap().unwrap().consumed;

    assert_eq!(1 + FILES as i64, usage.namespace);
    assert_eq!(10 * FILES as i64, usage.diskspace);
}
