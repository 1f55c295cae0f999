mod common;

use strata::*;

/// Store with `main` (readme.txt, data/x.txt) and `worker`
/// (results/*, data/x.txt changed, data/y.txt added).
fn two_branches(dir: &std::path::Path) -> Store {
    let store = common::create_store(dir, "main");

    let main = store.branches().get("main").unwrap();
    let main = main.write("readme.txt", b"hello", Default::default()).unwrap();
    let main = main.write("data/x.txt", b"x-main", Default::default()).unwrap();

    store.branches().set("worker", &main).unwrap();
    let worker = store.branches().get("worker").unwrap();
    let worker = worker
        .write("results/a.json", br#"{"a":1}"#, Default::default())
        .unwrap();
    let worker = worker
        .write("results/b.json", br#"{"b":2}"#, Default::default())
        .unwrap();
    let worker = worker.write("data/x.txt", b"x-worker", Default::default()).unwrap();
    worker.write("data/y.txt", b"y-worker", Default::default()).unwrap();

    store
}

fn change_paths(entries: &[ChangeEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.path.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Basic copies
// ---------------------------------------------------------------------------

#[test]
fn copy_subtree_adds_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();

    let main = main
        .copy_from_ref(&worker, "results", None, Default::default())
        .unwrap();
    assert_eq!(main.read("results/a.json").unwrap(), br#"{"a":1}"#);
    assert_eq!(main.read("results/b.json").unwrap(), br#"{"b":2}"#);
    // Existing files untouched.
    assert_eq!(main.read("readme.txt").unwrap(), b"hello");
    assert_eq!(main.read("data/x.txt").unwrap(), b"x-main");
}

#[test]
fn copy_overwrites_differing_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();

    let main = main
        .copy_from_ref(&worker, "data", None, Default::default())
        .unwrap();
    assert_eq!(main.read("data/x.txt").unwrap(), b"x-worker");
    assert_eq!(main.read("data/y.txt").unwrap(), b"y-worker");
}

#[test]
fn copy_to_explicit_dest() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();

    let main = main
        .copy_from_ref(&worker, "results", Some("backup/results"), Default::default())
        .unwrap();
    assert_eq!(main.read("backup/results/a.json").unwrap(), br#"{"a":1}"#);
    assert!(!main.exists("results/a.json").unwrap());
}

#[test]
fn copy_root_to_root() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();

    let main = main.copy_from_ref(&worker, "", None, Default::default()).unwrap();
    assert_eq!(main.read("results/a.json").unwrap(), br#"{"a":1}"#);
    assert_eq!(main.read("data/x.txt").unwrap(), b"x-worker");
    // No delete by default.
    assert_eq!(main.read("readme.txt").unwrap(), b"hello");
}

#[test]
fn paths_are_slash_normalized() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();

    let main = main
        .copy_from_ref(&worker, "/results/", Some("/backup/results/"), Default::default())
        .unwrap();
    assert_eq!(main.read("backup/results/a.json").unwrap(), br#"{"a":1}"#);
}

// ---------------------------------------------------------------------------
// delete
// ---------------------------------------------------------------------------

#[test]
fn delete_removes_dest_only_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());

    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();
    let main = main.copy_from_ref(&worker, "data", None, Default::default()).unwrap();
    assert!(main.exists("data/y.txt").unwrap());

    // Worker drops y; sync main with delete.
    let worker = store.branches().get("worker").unwrap();
    worker.remove("data/y.txt", Default::default()).unwrap();
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();
    let main = main
        .copy_from_ref(
            &worker,
            "data",
            None,
            CopyFromRefOptions {
                delete: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(main.exists("data/x.txt").unwrap());
    assert!(!main.exists("data/y.txt").unwrap());
}

#[test]
fn delete_is_scoped_to_the_dest_subtree() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();

    let main = main
        .copy_from_ref(
            &worker,
            "results",
            None,
            CopyFromRefOptions {
                delete: true,
                ..Default::default()
            },
        )
        .unwrap();
    // readme.txt lives outside the dest subtree.
    assert_eq!(main.read("readme.txt").unwrap(), b"hello");
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

#[test]
fn dry_run_reports_without_committing() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();
    let before = main.commit_hash();

    let preview = main
        .copy_from_ref(
            &worker,
            "results",
            None,
            CopyFromRefOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(preview.commit_hash(), before);
    assert_eq!(preview.changes().unwrap().add.len(), 2);
    assert!(!preview.exists("results/a.json").unwrap());
}

#[test]
fn dry_run_classifies_adds_and_updates() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();

    let preview = main
        .copy_from_ref(
            &worker,
            "data",
            None,
            CopyFromRefOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
    let changes = preview.changes().unwrap();
    assert_eq!(change_paths(&changes.update), vec!["data/x.txt"]);
    assert_eq!(change_paths(&changes.add), vec!["data/y.txt"]);
}

#[test]
fn dry_run_reports_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let main = main
        .write("results/extra.txt", b"extra", Default::default())
        .unwrap();
    let worker = store.branches().get("worker").unwrap();

    let preview = main
        .copy_from_ref(
            &worker,
            "results",
            None,
            CopyFromRefOptions {
                delete: true,
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(
        change_paths(&preview.changes().unwrap().delete),
        vec!["results/extra.txt"]
    );
}

// ---------------------------------------------------------------------------
// Sources: tags and detached snapshots
// ---------------------------------------------------------------------------

#[test]
fn copy_from_a_tag() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let worker = store.branches().get("worker").unwrap();
    store.tags().set("v1.0", &worker).unwrap();

    let main = store.branches().get("main").unwrap();
    let tag_fs = store.tags().get("v1.0").unwrap();
    let main = main
        .copy_from_ref(&tag_fs, "results", None, Default::default())
        .unwrap();
    assert_eq!(main.read("results/a.json").unwrap(), br#"{"a":1}"#);
}

#[test]
fn copy_from_a_detached_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let worker = store.branches().get("worker").unwrap();
    let detached = store.snapshot(&worker.commit_hash()).unwrap();

    let main = store.branches().get("main").unwrap();
    let main = main
        .copy_from_ref(&detached, "results", None, Default::default())
        .unwrap();
    assert_eq!(main.read("results/a.json").unwrap(), br#"{"a":1}"#);
}

// ---------------------------------------------------------------------------
// No-ops
// ---------------------------------------------------------------------------

#[test]
fn repeat_copy_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();

    let main = main
        .copy_from_ref(&worker, "results", None, Default::default())
        .unwrap();
    let after_first = main.commit_hash();

    let worker = store.branches().get("worker").unwrap();
    let main = main
        .copy_from_ref(&worker, "results", None, Default::default())
        .unwrap();
    assert_eq!(main.commit_hash(), after_first);
}

#[test]
fn missing_source_subtree_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();
    let before = main.commit_hash();

    let main = main
        .copy_from_ref(&worker, "nonexistent", None, Default::default())
        .unwrap();
    assert_eq!(main.commit_hash(), before);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn cross_repo_copy_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store1 = Store::open(
        dir.path().join("r1.git"),
        OpenOptions {
            create: true,
            branch: Some("main".into()),
            ..Default::default()
        },
    )
    .unwrap();
    let store2 = Store::open(
        dir.path().join("r2.git"),
        OpenOptions {
            create: true,
            branch: Some("main".into()),
            ..Default::default()
        },
    )
    .unwrap();

    let fs1 = store1
        .branches()
        .get("main")
        .unwrap()
        .write("a.txt", b"a", Default::default())
        .unwrap();
    let fs2 = store2.branches().get("main").unwrap();

    assert!(matches!(
        fs2.copy_from_ref(&fs1, "a.txt", None, Default::default()),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn read_only_dest_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let worker = store.branches().get("worker").unwrap();
    let readonly = store.snapshot(&worker.commit_hash()).unwrap();

    assert!(matches!(
        readonly.copy_from_ref(&worker, "results", None, Default::default()),
        Err(Error::PermissionDenied(_))
    ));
}

#[test]
fn stale_dest_snapshot_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();

    // Advance main behind our back.
    store
        .branches()
        .get("main")
        .unwrap()
        .write("conflict.txt", b"conflict", Default::default())
        .unwrap();

    assert!(matches!(
        main.copy_from_ref(&worker, "results", None, Default::default()),
        Err(Error::StaleSnapshot(_))
    ));
}

// ---------------------------------------------------------------------------
// Modes and messages
// ---------------------------------------------------------------------------

#[test]
fn copy_preserves_executable_and_symlink() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let worker = store.branches().get("worker").unwrap();
    let worker = worker
        .write(
            "bin/run.sh",
            b"#!/bin/sh",
            WriteOptions {
                mode: Some(FileType::Executable),
                ..Default::default()
            },
        )
        .unwrap();
    let worker = worker
        .write_symlink("bin/readme", "../readme.txt", Default::default())
        .unwrap();

    let main = store.branches().get("main").unwrap();
    let main = main
        .copy_from_ref(&worker, "bin", None, Default::default())
        .unwrap();
    assert_eq!(main.file_type("bin/run.sh").unwrap(), FileType::Executable);
    assert_eq!(main.file_type("bin/readme").unwrap(), FileType::Link);
    assert_eq!(main.readlink("bin/readme").unwrap(), "../readme.txt");
}

#[test]
fn custom_and_auto_messages() {
    let dir = tempfile::tempdir().unwrap();
    let store = two_branches(dir.path());
    let main = store.branches().get("main").unwrap();
    let worker = store.branches().get("worker").unwrap();

    let main = main
        .copy_from_ref(
            &worker,
            "results",
            None,
            CopyFromRefOptions {
                message: Some("Import results from worker".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(main.message().unwrap(), "Import results from worker");

    let worker = store.branches().get("worker").unwrap();
    let main = main
        .copy_from_ref(&worker, "data", None, Default::default())
        .unwrap();
    // Auto message names the cp operation.
    assert!(main.message().unwrap().contains("cp"));
}
