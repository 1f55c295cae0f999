mod common;

use strata::*;

fn typed_repo(dir: &std::path::Path) -> (Store, Snapshot) {
    let store = common::create_store(dir, "main");
    let fs = store.branches().get("main").unwrap();
    let fs = fs.write("hello.txt", b"Hello!", Default::default()).unwrap();
    let fs = fs
        .write(
            "run.sh",
            b"#!/bin/sh\n",
            WriteOptions {
                mode: Some(FileType::Executable),
                ..Default::default()
            },
        )
        .unwrap();
    let fs = fs
        .write_symlink("link.txt", "hello.txt", Default::default())
        .unwrap();
    let fs = fs.write("src/main.py", b"print('hi')", Default::default()).unwrap();
    let fs = fs.write("src/lib/util.py", b"# util", Default::default()).unwrap();
    (store, fs)
}

// ---------------------------------------------------------------------------
// stat
// ---------------------------------------------------------------------------

#[test]
fn stat_regular_file() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    let st = fs.stat("hello.txt").unwrap();
    assert_eq!(st.mode, 0o100644);
    assert_eq!(st.file_type, FileType::Blob);
    assert_eq!(st.size, b"Hello!".len() as u64);
    assert_eq!(st.nlink, 1);
    assert_eq!(st.hash.len(), 40);
    assert!(st.mtime > 0);
}

#[test]
fn stat_executable() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    let st = fs.stat("run.sh").unwrap();
    assert_eq!(st.mode, 0o100755);
    assert_eq!(st.file_type, FileType::Executable);
    assert_eq!(st.size, b"#!/bin/sh\n".len() as u64);
}

#[test]
fn stat_symlink_size_is_target_length() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    let st = fs.stat("link.txt").unwrap();
    assert_eq!(st.mode, 0o120000);
    assert_eq!(st.file_type, FileType::Link);
    assert_eq!(st.size, "hello.txt".len() as u64);
    assert_eq!(st.nlink, 1);
}

#[test]
fn stat_directory_nlink_counts_subdirs() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    let st = fs.stat("src").unwrap();
    assert_eq!(st.mode, 0o040000);
    assert_eq!(st.file_type, FileType::Tree);
    assert_eq!(st.size, 0);
    // src has one subdir (lib): 2 + 1.
    assert_eq!(st.nlink, 3);

    // Leaf directory: no subdirs.
    assert_eq!(fs.stat("src/lib").unwrap().nlink, 2);
}

#[test]
fn stat_root() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    let st = fs.stat("").unwrap();
    assert_eq!(st.file_type, FileType::Tree);
    assert_eq!(st.hash, fs.tree_hash());
    // Root has one subdir (src).
    assert_eq!(st.nlink, 3);
}

#[test]
fn stat_missing_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    assert!(matches!(fs.stat("nope.txt"), Err(Error::NotFound(_))));
}

#[test]
fn stat_agrees_with_size_and_object_hash() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    for path in ["hello.txt", "run.sh", "src/main.py", "src/lib/util.py"] {
        assert_eq!(fs.stat(path).unwrap().size, fs.size(path).unwrap());
        assert_eq!(fs.stat(path).unwrap().hash, fs.object_hash(path).unwrap());
    }
}

#[test]
fn stat_mtime_is_commit_time_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    let t = fs.time().unwrap();
    assert_eq!(fs.stat("hello.txt").unwrap().mtime, t);
    assert_eq!(fs.stat("src").unwrap().mtime, t);
    assert_eq!(fs.stat("").unwrap().mtime, t);
}

// ---------------------------------------------------------------------------
// size via the object sizer
// ---------------------------------------------------------------------------

#[test]
fn size_matches_content_length() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    assert_eq!(fs.size("hello.txt").unwrap(), 6);
    assert_eq!(fs.size("src/main.py").unwrap(), b"print('hi')".len() as u64);
    // Symlink: length of the target string.
    assert_eq!(fs.size("link.txt").unwrap(), 9);
}

#[test]
fn size_of_directory_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    assert!(matches!(fs.size("src"), Err(Error::IsADirectory(_))));
}

#[test]
fn size_of_missing_path_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    assert!(matches!(fs.size("nope"), Err(Error::NotFound(_))));
}

#[test]
fn size_works_across_many_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = common::create_store(dir.path(), "main");
    let mut fs = store.branches().get("main").unwrap();
    let mut batch = fs.batch(Default::default()).unwrap();
    for i in 0..50 {
        batch
            .write(&format!("file{}.txt", i), format!("content {}", i).as_bytes())
            .unwrap();
    }
    fs = batch.commit().unwrap();

    for i in 0..50 {
        let expected = format!("content {}", i).len() as u64;
        assert_eq!(fs.size(&format!("file{}.txt", i)).unwrap(), expected);
    }
    fs.close();
}

#[test]
fn close_is_idempotent_and_size_still_works() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    assert_eq!(fs.size("hello.txt").unwrap(), 6);
    fs.close();
    fs.close();
    // The sizer state rebuilds lazily after close.
    assert_eq!(fs.size("hello.txt").unwrap(), 6);
}

#[test]
fn close_without_prior_size_is_safe() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, fs) = typed_repo(dir.path());
    fs.close();
}

#[test]
fn size_of_large_blob() {
    let dir = tempfile::tempdir().unwrap();
    let store = common::create_store(dir.path(), "main");
    let fs = store.branches().get("main").unwrap();
    let big = vec![b'x'; 100_000];
    let fs = fs.write("big.bin", &big, Default::default()).unwrap();
    assert_eq!(fs.size("big.bin").unwrap(), 100_000);
}
