mod common;

use strata::*;

fn seeded(dir: &std::path::Path) -> (Store, Snapshot) {
    let store = common::create_store(dir, "main");
    let fs = store.branches().get("main").unwrap();
    let fs = fs.write("a.txt", b"a", Default::default()).unwrap();
    store.branches().set("dev", &fs).unwrap();
    store.tags().set("v1", &fs).unwrap();
    (store, fs)
}

fn dest_url(dir: &std::path::Path) -> String {
    dir.join("backup.git").to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Backup
// ---------------------------------------------------------------------------

#[test]
fn backup_creates_and_fills_missing_destination() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let url = dest_url(dir.path());

    let diff = store.backup(&url, &Default::default()).unwrap();
    assert_eq!(diff.add.len(), 3); // main, dev, v1
    assert!(diff.update.is_empty() && diff.delete.is_empty());

    // Every local ref exists remotely with the same target.
    let remote = Store::open(&url, OpenOptions::default()).unwrap();
    assert_eq!(
        remote.branches().iter().unwrap(),
        store.branches().iter().unwrap()
    );
    assert_eq!(remote.tags().iter().unwrap(), store.tags().iter().unwrap());
}

#[test]
fn backup_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let url = dest_url(dir.path());

    store.backup(&url, &Default::default()).unwrap();
    let second = store.backup(&url, &Default::default()).unwrap();
    assert!(second.in_sync());
    assert_eq!(second.total(), 0);
}

#[test]
fn backup_dry_run_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let url = dest_url(dir.path());

    let diff = store
        .backup(
            &url,
            &BackupOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(diff.add.len(), 3);
    assert!(!std::path::Path::new(&url).exists());
}

#[test]
fn backup_updates_moved_refs() {
    let dir = tempfile::tempdir().unwrap();
    let (store, fs) = seeded(dir.path());
    let url = dest_url(dir.path());
    store.backup(&url, &Default::default()).unwrap();

    fs.write("new.txt", b"new", Default::default()).unwrap();
    let diff = store.backup(&url, &Default::default()).unwrap();
    assert_eq!(diff.update.len(), 1);
    assert_eq!(diff.update[0].ref_name, "refs/heads/main");
    assert!(diff.update[0].old_target.is_some());
    assert!(diff.update[0].new_target.is_some());
}

#[test]
fn backup_deletes_destination_only_refs() {
    let dir = tempfile::tempdir().unwrap();
    let (store, fs) = seeded(dir.path());
    let url = dest_url(dir.path());
    store.backup(&url, &Default::default()).unwrap();

    store.branches().delete("dev").unwrap();
    let diff = store.backup(&url, &Default::default()).unwrap();
    assert_eq!(diff.delete.len(), 1);
    assert_eq!(diff.delete[0].ref_name, "refs/heads/dev");

    let remote = Store::open(&url, OpenOptions::default()).unwrap();
    assert!(!remote.branches().contains("dev").unwrap());
    let _ = fs;
}

#[test]
fn backup_with_refs_filter_is_additive() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let url = dest_url(dir.path());
    store.backup(&url, &Default::default()).unwrap();

    store.branches().delete("dev").unwrap();
    let diff = store
        .backup(
            &url,
            &BackupOptions {
                refs: Some(vec!["main".into()]),
                ..Default::default()
            },
        )
        .unwrap();
    // Nothing is deleted when a filter is given.
    assert!(diff.delete.is_empty());
    let remote = Store::open(&url, OpenOptions::default()).unwrap();
    assert!(remote.branches().contains("dev").unwrap());
}

#[test]
fn scp_style_urls_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    assert!(matches!(
        store.backup("user@host:path.git", &Default::default()),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        store.restore("host.example.com:repo.git", &Default::default()),
        Err(Error::InvalidArgument(_))
    ));
}

// ---------------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------------

#[test]
fn restore_reverts_local_changes() {
    let dir = tempfile::tempdir().unwrap();
    let (store, fs) = seeded(dir.path());
    let url = dest_url(dir.path());
    store.backup(&url, &Default::default()).unwrap();
    let saved_main = store.branches().get("main").unwrap().commit_hash();

    // Diverge locally, then restore from the backup.
    fs.write("new.txt", b"new", Default::default()).unwrap();
    let diff = store.restore(&url, &Default::default()).unwrap();
    assert_eq!(diff.update.len(), 1);

    let main = store.branches().get("main").unwrap();
    assert_eq!(main.commit_hash(), saved_main);
    assert!(!main.exists("new.txt").unwrap());
}

#[test]
fn restore_deletes_local_only_refs() {
    let dir = tempfile::tempdir().unwrap();
    let (store, fs) = seeded(dir.path());
    let url = dest_url(dir.path());
    store.backup(&url, &Default::default()).unwrap();

    store.branches().set("local-only", &fs).unwrap();
    let diff = store.restore(&url, &Default::default()).unwrap();
    assert_eq!(diff.delete.len(), 1);
    assert_eq!(diff.delete[0].ref_name, "refs/heads/local-only");
    assert!(!store.branches().contains("local-only").unwrap());
}

#[test]
fn restore_leaves_head_alone() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let url = dest_url(dir.path());
    store.backup(&url, &Default::default()).unwrap();

    store.branches().set_default("dev").unwrap();
    store.restore(&url, &Default::default()).unwrap();
    // HEAD is operator-managed; restore must not rewrite it.
    assert_eq!(store.branches().default().unwrap(), Some("dev".to_string()));
}

#[test]
fn restore_round_trip_matches_refs() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let url = dest_url(dir.path());
    store.backup(&url, &Default::default()).unwrap();

    let diff = store.restore(&url, &Default::default()).unwrap();
    assert!(diff.in_sync());
}

#[test]
fn restore_from_missing_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let missing = dir.path().join("no-such.git").to_string_lossy().into_owned();
    assert!(matches!(
        store.restore(&missing, &Default::default()),
        Err(Error::NotGitRepository(_))
    ));
}

#[test]
fn restore_with_refs_filter_is_additive() {
    let dir = tempfile::tempdir().unwrap();
    let (store, fs) = seeded(dir.path());
    let url = dest_url(dir.path());
    store.backup(&url, &Default::default()).unwrap();

    store.branches().set("local-only", &fs).unwrap();
    let advanced = store
        .branches()
        .get("main")
        .unwrap()
        .write("new.txt", b"new", Default::default())
        .unwrap();

    let diff = store
        .restore(
            &url,
            &RestoreOptions {
                refs: Some(vec!["main".into()]),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(diff.delete.is_empty());
    assert!(store.branches().contains("local-only").unwrap());
    assert_ne!(
        store.branches().get("main").unwrap().commit_hash(),
        advanced.commit_hash()
    );
}

// ---------------------------------------------------------------------------
// Bundles
// ---------------------------------------------------------------------------

#[test]
fn bundle_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let bundle = dir.path().join("backup.bundle").to_string_lossy().into_owned();

    let diff = store.backup(&bundle, &Default::default()).unwrap();
    assert_eq!(diff.add.len(), 3);
    assert!(std::path::Path::new(&bundle).exists());

    // Restore into a fresh empty repository.
    let other = Store::open(
        dir.path().join("fresh.git"),
        OpenOptions {
            create: true,
            branch: Some("seed".into()),
            ..Default::default()
        },
    )
    .unwrap();
    let diff = other.restore(&bundle, &Default::default()).unwrap();
    assert!(!diff.add.is_empty());

    assert_eq!(
        other.branches().get("main").unwrap().read("a.txt").unwrap(),
        b"a"
    );
    assert!(other.tags().contains("v1").unwrap());
    // The pre-existing local-only branch is mirrored away.
    assert!(!other.branches().contains("seed").unwrap());
}

#[test]
fn bundle_backup_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let bundle = dir.path().join("backup.bundle").to_string_lossy().into_owned();

    store.backup(&bundle, &Default::default()).unwrap();
    let second = store.backup(&bundle, &Default::default()).unwrap();
    assert!(second.in_sync());
}

#[test]
fn explicit_bundle_format_without_extension() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let out = dir.path().join("backup.dat").to_string_lossy().into_owned();

    store
        .backup(
            &out,
            &BackupOptions {
                format: Some("bundle".into()),
                ..Default::default()
            },
        )
        .unwrap();
    let data = std::fs::read(&out).unwrap();
    assert!(data.starts_with(b"# v2 git bundle\n"));
}

#[test]
fn restore_from_non_bundle_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let bogus = dir.path().join("junk.bundle");
    std::fs::write(&bogus, b"not a bundle").unwrap();
    assert!(matches!(
        store.restore(&bogus.to_string_lossy(), &Default::default()),
        Err(Error::InvalidArgument(_))
    ));
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[test]
fn progress_callback_is_accepted() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    let (store, _fs) = seeded(dir.path());
    let url = dest_url(dir.path());

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let opts = BackupOptions {
        progress: Some(Arc::new(move |bytes: &[u8]| {
            counter.fetch_add(bytes.len(), Ordering::Relaxed);
        })),
        ..Default::default()
    };
    // Local pushes may not emit sideband data; the callback just must not
    // break the operation.
    store.backup(&url, &opts).unwrap();
}
