//! The snapshot filesystem: one commit viewed as an immutable tree.
//!
//! Reads never mutate anything. Derive operations (write, remove, move,
//! copy) build a new root tree through the tree engine, commit it, and
//! advance the branch ref under the repository lock with a stale-snapshot
//! check; they return a **new** `Snapshot` and leave the receiver untouched.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::batch::Batch;
use crate::error::{Error, Result};
use crate::lock::with_repo_lock;
use crate::message::format_commit_message;
use crate::paths;
use crate::sizer::ObjectSizer;
use crate::store::StoreInner;
use crate::tree::{self, EntryRef, TreeWrite};
use crate::types::{
    ChangeEntry, ChangeReport, DirListing, FileType, StatResult, TreeItem, MODE_LINK, MODE_TREE,
};

// ---------------------------------------------------------------------------
// Option structs
// ---------------------------------------------------------------------------

/// Options for [`Snapshot::write`] and friends.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// File type to record. Defaults to a plain blob (or, for
    /// [`Snapshot::write_from_file`], the type detected on disk).
    pub mode: Option<FileType>,
    /// Commit message template. Auto-generated if `None`.
    pub message: Option<String>,
}

/// Options for [`Snapshot::remove`].
#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Allow removing a directory and everything under it.
    pub recursive: bool,
    /// Report what would change without committing.
    pub dry_run: bool,
    /// Commit message template. Auto-generated if `None`.
    pub message: Option<String>,
}

/// Options for [`Snapshot::move_paths`].
#[derive(Debug, Clone, Default)]
pub struct MoveOptions {
    /// Allow moving directories.
    pub recursive: bool,
    /// Report what would change without committing.
    pub dry_run: bool,
    /// Commit message template. Auto-generated if `None`.
    pub message: Option<String>,
}

/// Options for [`Snapshot::copy_from_ref`].
#[derive(Debug, Clone, Default)]
pub struct CopyFromRefOptions {
    /// Also delete destination entries that are absent from the source.
    pub delete: bool,
    /// Report what would change without committing.
    pub dry_run: bool,
    /// Commit message template. Auto-generated if `None`.
    pub message: Option<String>,
}

/// Options for [`Snapshot::batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Commit message template. Auto-generated if `None`.
    pub message: Option<String>,
    /// Operation name exposed to the `{op}` message placeholder.
    pub operation: Option<String>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable view of one commit as a filesystem.
///
/// Cheap to clone; clones share the repository handle and the sizer cache.
/// Snapshots from a branch are writable; snapshots from a tag or a detached
/// commit are read-only and refuse derive operations.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) inner: Arc<StoreInner>,
    pub(crate) commit_oid: git2::Oid,
    pub(crate) tree_oid: git2::Oid,
    pub(crate) ref_name: Option<String>,
    pub(crate) writable: bool,
    pub(crate) changes: Option<ChangeReport>,
    sizer: Arc<Mutex<Option<ObjectSizer>>>,
}

impl Snapshot {
    /// Build a snapshot for a known commit.
    pub(crate) fn from_commit(
        inner: Arc<StoreInner>,
        commit_oid: git2::Oid,
        ref_name: Option<String>,
        writable: bool,
    ) -> Result<Self> {
        let tree_oid = {
            let repo = inner.git();
            let tree_oid = repo
                .find_commit(commit_oid)
                .map_err(|_| Error::not_found(format!("commit {}", commit_oid)))?
                .tree_id();
            tree_oid
        };
        Ok(Snapshot {
            inner,
            commit_oid,
            tree_oid,
            ref_name,
            writable,
            changes: None,
            sizer: Arc::new(Mutex::new(None)),
        })
    }

    /// Lock the repository handle and run `f` against it.
    pub(crate) fn with_repo<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&git2::Repository) -> Result<T>,
    {
        let repo = self.inner.git();
        f(&repo)
    }

    fn require_writable(&self, verb: &str) -> Result<&str> {
        if !self.writable {
            return Err(Error::permission_denied(match &self.ref_name {
                Some(name) => format!("cannot {} read-only snapshot of {:?}", verb, name),
                None => format!("cannot {} detached snapshot", verb),
            }));
        }
        self.ref_name
            .as_deref()
            .ok_or_else(|| Error::permission_denied(format!("cannot {} without a branch", verb)))
    }

    // -- Identity -----------------------------------------------------------

    /// 40-char hex id of this snapshot's commit.
    pub fn commit_hash(&self) -> String {
        self.commit_oid.to_string()
    }

    /// 40-char hex id of this snapshot's root tree.
    pub fn tree_hash(&self) -> String {
        self.tree_oid.to_string()
    }

    /// The branch or tag this snapshot was obtained from, if any.
    pub fn ref_name(&self) -> Option<&str> {
        self.ref_name.as_deref()
    }

    /// `true` for branch snapshots, `false` for tags and detached commits.
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// What a dry-run derive would have changed. `None` on snapshots not
    /// produced by a dry run.
    pub fn changes(&self) -> Option<&ChangeReport> {
        self.changes.as_ref()
    }

    /// The commit message, without its trailing newline.
    pub fn message(&self) -> Result<String> {
        self.with_repo(|repo| {
            let commit = repo.find_commit(self.commit_oid)?;
            Ok(commit.message().unwrap_or("").trim_end_matches('\n').to_string())
        })
    }

    /// Commit timestamp, seconds since the epoch.
    pub fn time(&self) -> Result<u64> {
        self.with_repo(|repo| {
            let commit = repo.find_commit(self.commit_oid)?;
            Ok(commit.time().seconds().max(0) as u64)
        })
    }

    pub fn author_name(&self) -> Result<String> {
        self.with_repo(|repo| {
            let commit = repo.find_commit(self.commit_oid)?;
            let name = commit.author().name().unwrap_or("").to_string();
            Ok(name)
        })
    }

    pub fn author_email(&self) -> Result<String> {
        self.with_repo(|repo| {
            let commit = repo.find_commit(self.commit_oid)?;
            let email = commit.author().email().unwrap_or("").to_string();
            Ok(email)
        })
    }

    /// Release the sizer cache (pack index and file handles). Idempotent;
    /// the cache rebuilds lazily on the next size query.
    pub fn close(&self) {
        let mut guard = self.sizer.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }

    // -- Reads --------------------------------------------------------------

    /// File contents as bytes.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.with_repo(|repo| tree::read_blob_at_path(repo, self.tree_oid, path))
    }

    /// File contents from `offset`, at most `size` bytes (to the end when
    /// `None`). Reads past the end return what remains.
    pub fn read_range(&self, path: &str, offset: usize, size: Option<usize>) -> Result<Vec<u8>> {
        let data = self.read(path)?;
        Ok(slice_range(&data, offset, size))
    }

    /// File contents as UTF-8 text.
    pub fn read_text(&self, path: &str) -> Result<String> {
        String::from_utf8(self.read(path)?)
            .map_err(|e| Error::invalid_argument(format!("{}: not UTF-8: {}", path, e)))
    }

    /// Blob contents by hex object id, bypassing the tree.
    pub fn read_by_hash(&self, hash: &str, offset: usize, size: Option<usize>) -> Result<Vec<u8>> {
        let oid = git2::Oid::from_str(hash)
            .map_err(|e| Error::invalid_argument(format!("bad object hash {:?}: {}", hash, e)))?;
        self.with_repo(|repo| {
            let blob = repo
                .find_blob(oid)
                .map_err(|_| Error::not_found(format!("object {}", hash)))?;
            Ok(slice_range(blob.content(), offset, size))
        })
    }

    /// `true` when any object exists at `path`.
    pub fn exists(&self, path: &str) -> Result<bool> {
        self.with_repo(|repo| tree::exists_at_path(repo, self.tree_oid, path))
    }

    /// `true` when `path` is a directory.
    pub fn is_dir(&self, path: &str) -> Result<bool> {
        self.with_repo(|repo| {
            Ok(tree::entry_at_path(repo, self.tree_oid, path)?
                .map(|e| e.mode == MODE_TREE)
                .unwrap_or(false))
        })
    }

    /// The [`FileType`] at `path`.
    pub fn file_type(&self, path: &str) -> Result<FileType> {
        self.with_repo(|repo| {
            let entry = tree::entry_at_path(repo, self.tree_oid, path)?
                .ok_or_else(|| Error::not_found(path))?;
            FileType::from_mode(entry.mode)
                .ok_or_else(|| Error::invalid_state(format!("unsupported mode {:#o}", entry.mode)))
        })
    }

    /// Sorted entry names of the directory at `path` (root when empty).
    pub fn ls(&self, path: &str) -> Result<Vec<String>> {
        self.with_repo(|repo| {
            let mut names: Vec<String> = tree::list_tree_at_path(repo, self.tree_oid, path)?
                .into_iter()
                .map(|e| e.name)
                .collect();
            names.sort();
            Ok(names)
        })
    }

    /// Entries of the directory at `path` with name, object id, and mode.
    pub fn listdir(&self, path: &str) -> Result<Vec<TreeItem>> {
        self.with_repo(|repo| tree::list_tree_at_path(repo, self.tree_oid, path))
    }

    /// Lazily walk the tree under `path`, one [`DirListing`] per directory,
    /// parents before children.
    pub fn walk(&self, path: &str) -> Result<Walk> {
        let norm = paths::normalize(path)?;
        let start = if norm.is_empty() {
            self.tree_oid
        } else {
            let entry = self.with_repo(|repo| {
                tree::entry_at_path(repo, self.tree_oid, &norm)?
                    .ok_or_else(|| Error::not_found(&norm))
            })?;
            if entry.mode != MODE_TREE {
                return Err(Error::not_a_directory(&norm));
            }
            entry.oid
        };
        Ok(Walk {
            inner: Arc::clone(&self.inner),
            stack: vec![(norm, start)],
        })
    }

    /// Matching paths for a glob pattern, sorted and deduplicated.
    pub fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        self.with_repo(|repo| crate::glob::glob_tree(repo, self.tree_oid, pattern))
    }

    /// Single-call metadata for `path` (pass `""` for the root).
    pub fn stat(&self, path: &str) -> Result<StatResult> {
        let mtime = self.time()?;
        let norm = paths::normalize(path)?;

        let entry = if norm.is_empty() {
            EntryRef {
                oid: self.tree_oid,
                mode: MODE_TREE,
            }
        } else {
            self.with_repo(|repo| {
                tree::entry_at_path(repo, self.tree_oid, &norm)?
                    .ok_or_else(|| Error::not_found(&norm))
            })?
        };

        let file_type = FileType::from_mode(entry.mode)
            .ok_or_else(|| Error::invalid_state(format!("unsupported mode {:#o}", entry.mode)))?;

        if entry.mode == MODE_TREE {
            let nlink = self.with_repo(|repo| Ok(2 + tree::count_subdirs(repo, entry.oid)?))?;
            Ok(StatResult {
                mode: entry.mode,
                file_type,
                size: 0,
                hash: entry.oid.to_string(),
                nlink,
                mtime,
            })
        } else {
            Ok(StatResult {
                mode: entry.mode,
                file_type,
                size: self.object_size(entry.oid)?,
                hash: entry.oid.to_string(),
                nlink: 1,
                mtime,
            })
        }
    }

    /// Size in bytes of the file at `path`, via the fast object sizer.
    pub fn size(&self, path: &str) -> Result<u64> {
        let entry = self.with_repo(|repo| {
            tree::entry_at_path(repo, self.tree_oid, path)?
                .ok_or_else(|| Error::not_found(path))
        })?;
        if entry.mode == MODE_TREE {
            return Err(Error::is_a_directory(path));
        }
        self.object_size(entry.oid)
    }

    /// Symlink target at `path`.
    pub fn readlink(&self, path: &str) -> Result<String> {
        self.with_repo(|repo| {
            let entry = tree::entry_at_path(repo, self.tree_oid, path)?
                .ok_or_else(|| Error::not_found(path))?;
            if entry.mode != MODE_LINK {
                return Err(Error::not_a_link(path));
            }
            let blob = repo.find_blob(entry.oid)?;
            String::from_utf8(blob.content().to_vec())
                .map_err(|e| Error::invalid_state(format!("{}: bad symlink target: {}", path, e)))
        })
    }

    /// 40-char hex id of the object at `path`.
    pub fn object_hash(&self, path: &str) -> Result<String> {
        self.with_repo(|repo| {
            let entry = tree::entry_at_path(repo, self.tree_oid, path)?
                .ok_or_else(|| Error::not_found(path))?;
            Ok(entry.oid.to_string())
        })
    }

    fn object_size(&self, oid: git2::Oid) -> Result<u64> {
        let repo = self.inner.git();
        let mut guard = self.sizer.lock().unwrap_or_else(PoisonError::into_inner);
        let sizer = guard.get_or_insert_with(|| ObjectSizer::new(self.inner.path.clone()));
        sizer.size(&repo, oid)
    }

    // -- History ------------------------------------------------------------

    /// The parent snapshot, or `None` at the root commit.
    pub fn parent(&self) -> Result<Option<Snapshot>> {
        let parent_oid = self.with_repo(|repo| {
            let commit = repo.find_commit(self.commit_oid)?;
            if commit.parent_count() > 0 {
                Ok(Some(commit.parent_id(0)?))
            } else {
                Ok(None)
            }
        })?;
        parent_oid
            .map(|oid| {
                Snapshot::from_commit(
                    Arc::clone(&self.inner),
                    oid,
                    self.ref_name.clone(),
                    self.writable,
                )
            })
            .transpose()
    }

    /// The snapshot `n` commits back along first parents.
    ///
    /// # Errors
    /// [`Error::NotFound`] when history is shorter than `n`.
    pub fn back(&self, n: usize) -> Result<Snapshot> {
        let mut current = self.clone();
        for _ in 0..n {
            current = current
                .parent()?
                .ok_or_else(|| Error::not_found("not enough history"))?;
        }
        Ok(current)
    }

    /// Lazily iterate ancestor snapshots, newest first, starting with this
    /// one.
    pub fn log(&self) -> History {
        History {
            inner: Arc::clone(&self.inner),
            next: Some(self.commit_oid),
            ref_name: self.ref_name.clone(),
            writable: self.writable,
        }
    }

    // -- Derives ------------------------------------------------------------

    /// Write `data` at `path` and commit, returning the new snapshot.
    pub fn write(&self, path: &str, data: &[u8], opts: WriteOptions) -> Result<Snapshot> {
        self.require_writable("write to")?;
        let path = paths::normalize(path)?;
        if path.is_empty() {
            return Err(Error::invalid_path("cannot write to the root"));
        }

        let file_type = opts.mode.unwrap_or(FileType::Blob);
        if file_type == FileType::Tree {
            return Err(Error::invalid_argument("cannot write a tree entry directly"));
        }
        let mode = file_type.filemode();

        let (blob_oid, existing) = self.with_repo(|repo| {
            let blob_oid = repo.blob(data)?;
            let existing = tree::entry_at_path(repo, self.tree_oid, &path)?;
            Ok((blob_oid, existing))
        })?;

        let mut report = ChangeReport::new();
        let entry = ChangeEntry::new(&path, file_type);
        match existing {
            Some(_) => report.update.push(entry),
            None => report.add.push(entry),
        }

        let message = format_commit_message(&report, opts.message.as_deref(), None)?;
        let changes = vec![(path, Some(TreeWrite { oid: blob_oid, mode }))];
        self.commit_changes(&changes, &message)
    }

    /// Write UTF-8 text at `path` and commit.
    pub fn write_text(&self, path: &str, text: &str, opts: WriteOptions) -> Result<Snapshot> {
        self.write(path, text.as_bytes(), opts)
    }

    /// Import one file from disk, auto-detecting symlink/executable modes.
    pub fn write_from_file(&self, path: &str, src: &Path, opts: WriteOptions) -> Result<Snapshot> {
        let mode = match opts.mode {
            Some(ft) => ft,
            None => FileType::from_mode(tree::mode_from_disk(src)?).unwrap_or(FileType::Blob),
        };
        if mode == FileType::Link {
            let target = std::fs::read_link(src).map_err(|e| Error::io(src, e))?;
            let target = target.to_string_lossy().into_owned();
            return self.write_symlink(path, &target, opts);
        }
        let data = std::fs::read(src).map_err(|e| Error::io(src, e))?;
        self.write(
            path,
            &data,
            WriteOptions {
                mode: Some(mode),
                ..opts
            },
        )
    }

    /// Record a symlink to `target` at `path` and commit.
    pub fn write_symlink(&self, path: &str, target: &str, opts: WriteOptions) -> Result<Snapshot> {
        self.write(
            path,
            target.as_bytes(),
            WriteOptions {
                mode: Some(FileType::Link),
                ..opts
            },
        )
    }

    /// Remove the file (or, with `recursive`, directory) at `path`.
    pub fn remove(&self, path: &str, opts: RemoveOptions) -> Result<Snapshot> {
        self.require_writable("remove from")?;
        let path = paths::normalize(path)?;
        if path.is_empty() {
            return Err(Error::invalid_argument("cannot remove the root"));
        }

        let mut report = ChangeReport::new();
        let mut changes: Vec<(String, Option<TreeWrite>)> = Vec::new();

        self.with_repo(|repo| {
            let entry = tree::entry_at_path(repo, self.tree_oid, &path)?
                .ok_or_else(|| Error::not_found(&path))?;
            if entry.mode == MODE_TREE {
                if !opts.recursive {
                    return Err(Error::is_a_directory(&path));
                }
                for (rel, e) in tree::walk_tree(repo, entry.oid)? {
                    let full = paths::join(&path, &rel);
                    report.delete.push(ChangeEntry::new(
                        &full,
                        FileType::from_mode(e.mode).unwrap_or(FileType::Blob),
                    ));
                    changes.push((full, None));
                }
            } else {
                report.delete.push(ChangeEntry::new(
                    &path,
                    FileType::from_mode(entry.mode).unwrap_or(FileType::Blob),
                ));
                changes.push((path.clone(), None));
            }
            Ok(())
        })?;

        if opts.dry_run {
            return Ok(self.with_changes(report));
        }
        let message = format_commit_message(&report, opts.message.as_deref(), Some("rm"))?;
        self.commit_changes(&changes, &message)
    }

    /// Move (rename) paths in a single commit, POSIX `mv` style.
    ///
    /// A destination ending in `/`, or naming an existing directory, means
    /// "into this directory keeping the source basename". Multiple sources
    /// require a directory destination.
    pub fn move_paths(&self, sources: &[&str], dest: &str, opts: MoveOptions) -> Result<Snapshot> {
        self.require_writable("move within")?;
        let dest_norm = paths::normalize(dest)?;
        let trailing_slash = dest.ends_with('/');

        let mut report = ChangeReport::new();
        let mut changes: Vec<(String, Option<TreeWrite>)> = Vec::new();

        self.with_repo(|repo| {
            let dest_is_dir = tree::entry_at_path(repo, self.tree_oid, &dest_norm)?
                .map(|e| e.mode == MODE_TREE)
                .unwrap_or(false);
            let into_dir = trailing_slash || dest_is_dir;

            if sources.len() > 1 && !into_dir {
                return Err(Error::not_a_directory(&dest_norm));
            }

            for src in sources {
                let src_norm = paths::normalize(src)?;
                if src_norm.is_empty() {
                    return Err(Error::invalid_argument("cannot move the root"));
                }
                let entry = tree::entry_at_path(repo, self.tree_oid, &src_norm)?
                    .ok_or_else(|| Error::not_found(&src_norm))?;

                let target = if into_dir {
                    paths::join(&dest_norm, paths::basename(&src_norm))
                } else {
                    dest_norm.clone()
                };
                if target == src_norm {
                    return Err(Error::invalid_argument(format!(
                        "source and destination are the same: {}",
                        src_norm
                    )));
                }

                if entry.mode == MODE_TREE {
                    if !opts.recursive {
                        return Err(Error::is_a_directory(&src_norm));
                    }
                    if target.starts_with(&format!("{}/", src_norm)) {
                        return Err(Error::invalid_argument(format!(
                            "cannot move {} into itself",
                            src_norm
                        )));
                    }
                    for (rel, e) in tree::walk_tree(repo, entry.oid)? {
                        let old = paths::join(&src_norm, &rel);
                        let new = paths::join(&target, &rel);
                        let ft = FileType::from_mode(e.mode).unwrap_or(FileType::Blob);
                        report.delete.push(ChangeEntry::new(&old, ft));
                        report.add.push(ChangeEntry::new(&new, ft));
                        changes.push((old, None));
                        changes.push((new, Some(TreeWrite { oid: e.oid, mode: e.mode })));
                    }
                } else {
                    let ft = FileType::from_mode(entry.mode).unwrap_or(FileType::Blob);
                    report.delete.push(ChangeEntry::new(&src_norm, ft));
                    report.add.push(ChangeEntry::new(&target, ft));
                    changes.push((src_norm, None));
                    changes.push((
                        target,
                        Some(TreeWrite {
                            oid: entry.oid,
                            mode: entry.mode,
                        }),
                    ));
                }
            }
            Ok(())
        })?;

        if opts.dry_run {
            return Ok(self.with_changes(report));
        }
        if changes.is_empty() {
            return Ok(self.clone());
        }
        let message = format_commit_message(&report, opts.message.as_deref(), Some("mv"))?;
        self.commit_changes(&changes, &message)
    }

    /// Copy the subtree at `src_path` of another snapshot onto `dest`
    /// (defaulting to `src_path`) in a single commit.
    ///
    /// Both snapshots must belong to the same repository. Entries already
    /// identical on the destination are skipped; with `delete`, destination
    /// entries absent from the source are removed. A missing source subtree
    /// or an already-in-sync copy returns the unchanged snapshot.
    pub fn copy_from_ref(
        &self,
        source: &Snapshot,
        src_path: &str,
        dest: Option<&str>,
        opts: CopyFromRefOptions,
    ) -> Result<Snapshot> {
        self.require_writable("copy into")?;
        if !crate::store::same_store(&self.inner, &source.inner) {
            return Err(Error::invalid_argument(
                "source snapshot belongs to a different repository",
            ));
        }

        let src_norm = paths::normalize(src_path)?;
        let dest_norm = match dest {
            Some(d) => paths::normalize(d)?,
            None => src_norm.clone(),
        };

        let mut report = ChangeReport::new();
        let mut changes: Vec<(String, Option<TreeWrite>)> = Vec::new();

        let found = self.with_repo(|repo| {
            let src_files = match subtree_files(repo, source.tree_oid, &src_norm)? {
                Some(files) => files,
                None => return Ok(false),
            };
            let dest_files =
                subtree_files(repo, self.tree_oid, &dest_norm)?.unwrap_or_default();

            for (rel, src_entry) in &src_files {
                let full = paths::join(&dest_norm, rel);
                if full.is_empty() {
                    return Err(Error::invalid_argument(
                        "cannot copy a file onto the root",
                    ));
                }
                let ft = FileType::from_mode(src_entry.mode).unwrap_or(FileType::Blob);
                match dest_files.get(rel) {
                    Some(d) if d.oid == src_entry.oid && d.mode == src_entry.mode => {}
                    Some(_) => {
                        report.update.push(ChangeEntry::new(&full, ft));
                        changes.push((
                            full,
                            Some(TreeWrite {
                                oid: src_entry.oid,
                                mode: src_entry.mode,
                            }),
                        ));
                    }
                    None => {
                        report.add.push(ChangeEntry::new(&full, ft));
                        changes.push((
                            full,
                            Some(TreeWrite {
                                oid: src_entry.oid,
                                mode: src_entry.mode,
                            }),
                        ));
                    }
                }
            }

            if opts.delete {
                for (rel, d) in &dest_files {
                    if !src_files.contains_key(rel) {
                        let full = paths::join(&dest_norm, rel);
                        report.delete.push(ChangeEntry::new(
                            &full,
                            FileType::from_mode(d.mode).unwrap_or(FileType::Blob),
                        ));
                        changes.push((full, None));
                    }
                }
            }
            Ok(true)
        })?;

        if !found {
            return Ok(self.clone());
        }
        if opts.dry_run {
            return Ok(self.with_changes(report));
        }
        if changes.is_empty() {
            return Ok(self.clone());
        }
        let message = format_commit_message(&report, opts.message.as_deref(), Some("cp"))?;
        self.commit_changes(&changes, &message)
    }

    /// Start a [`Batch`] of writes that will land as one commit.
    ///
    /// # Errors
    /// [`Error::PermissionDenied`] on a read-only snapshot.
    pub fn batch(&self, opts: BatchOptions) -> Result<Batch> {
        self.require_writable("batch on")?;
        Ok(Batch::new(self.clone(), opts))
    }

    /// A buffered writer that commits `path` when closed.
    pub fn writer(&self, path: &str) -> Result<crate::writer::SnapshotWriter> {
        self.require_writable("write to")?;
        let normalized = paths::normalize(path)?;
        if normalized.is_empty() {
            return Err(Error::invalid_path("cannot write to the root"));
        }
        Ok(crate::writer::SnapshotWriter::new(self.clone(), normalized))
    }

    // -- Internals ----------------------------------------------------------

    fn with_changes(&self, report: ChangeReport) -> Snapshot {
        let mut fs = self.clone();
        fs.changes = Some(report);
        fs
    }

    /// Rebuild the tree, commit, and advance the branch under the repo lock.
    ///
    /// The compare-and-swap: if the branch no longer points at this
    /// snapshot's commit the update fails with [`Error::StaleSnapshot`] and
    /// the ref is left untouched. A rebuild that reproduces the current
    /// tree skips the commit entirely and returns `self`.
    pub(crate) fn commit_changes(
        &self,
        changes: &[(String, Option<TreeWrite>)],
        message: &str,
    ) -> Result<Snapshot> {
        let branch = self.require_writable("commit to")?;
        let refname = format!("{}{}", crate::refs::BRANCH_PREFIX, branch);

        let (new_commit, new_tree) = with_repo_lock(&self.inner.path, || {
            let repo = self.inner.git();

            let current = repo
                .find_reference(&refname)
                .map_err(|_| Error::not_found(format!("branch {}", branch)))?;
            let current_oid = current
                .target()
                .ok_or_else(|| Error::invalid_state(format!("{} is symbolic", refname)))?;
            if current_oid != self.commit_oid {
                return Err(Error::stale_snapshot(format!(
                    "branch {} moved: expected {}, found {}",
                    branch, self.commit_oid, current_oid
                )));
            }

            let new_tree = tree::rebuild_tree(&repo, Some(self.tree_oid), changes)?;
            if new_tree == self.tree_oid {
                return Ok((self.commit_oid, self.tree_oid));
            }

            let sig = git2::Signature::now(
                &self.inner.signature.name,
                &self.inner.signature.email,
            )?;
            let tree = repo.find_tree(new_tree)?;
            let parent = repo.find_commit(self.commit_oid)?;
            let new_commit = repo.commit(None, &sig, &sig, message, &tree, &[&parent])?;
            repo.reference(&refname, new_commit, true, &format!("commit: {}", message))?;
            Ok((new_commit, new_tree))
        })?;

        if new_commit == self.commit_oid {
            return Ok(self.clone());
        }
        Ok(Snapshot {
            inner: Arc::clone(&self.inner),
            commit_oid: new_commit,
            tree_oid: new_tree,
            ref_name: self.ref_name.clone(),
            writable: self.writable,
            changes: None,
            sizer: Arc::new(Mutex::new(None)),
        })
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex = self.commit_oid.to_string();
        write!(f, "Snapshot(")?;
        if let Some(name) = &self.ref_name {
            write!(f, "ref={:?}, ", name)?;
        }
        write!(f, "commit={}", &hex[..7])?;
        if !self.writable {
            write!(f, ", readonly")?;
        }
        write!(f, ")")
    }
}

/// Slice `data[offset..offset+size]`, clamped to the data length.
fn slice_range(data: &[u8], offset: usize, size: Option<usize>) -> Vec<u8> {
    let start = offset.min(data.len());
    let end = match size {
        Some(s) => start.saturating_add(s).min(data.len()),
        None => data.len(),
    };
    data[start..end].to_vec()
}

/// Files under `path` in the tree at `root`, keyed by path relative to
/// `path`. A blob at `path` maps from the empty key; a missing path is
/// `None`.
pub(crate) fn subtree_files(
    repo: &git2::Repository,
    root: git2::Oid,
    path: &str,
) -> Result<Option<BTreeMap<String, EntryRef>>> {
    if path.is_empty() {
        return Ok(Some(tree::walk_tree(repo, root)?));
    }
    match tree::entry_at_path(repo, root, path)? {
        None => Ok(None),
        Some(entry) if entry.mode == MODE_TREE => Ok(Some(tree::walk_tree(repo, entry.oid)?)),
        Some(entry) => {
            let mut map = BTreeMap::new();
            map.insert(String::new(), entry);
            Ok(Some(map))
        }
    }
}

// ---------------------------------------------------------------------------
// Walk
// ---------------------------------------------------------------------------

/// Lazy directory traversal created by [`Snapshot::walk`].
///
/// Yields one [`DirListing`] per directory, a parent before its children,
/// reading each tree only when reached.
pub struct Walk {
    inner: Arc<StoreInner>,
    stack: Vec<(String, git2::Oid)>,
}

impl Iterator for Walk {
    type Item = Result<DirListing>;

    fn next(&mut self) -> Option<Self::Item> {
        let (dirpath, oid) = self.stack.pop()?;

        let repo = self.inner.git();
        let items = match tree::tree_items(&repo, oid) {
            Ok(items) => items,
            Err(e) => {
                self.stack.clear();
                return Some(Err(e));
            }
        };
        drop(repo);

        let mut listing = DirListing {
            dirpath: dirpath.clone(),
            dirs: Vec::new(),
            files: Vec::new(),
        };
        let mut subdirs = Vec::new();
        for item in items {
            if item.mode == MODE_TREE {
                listing.dirs.push(item.name.clone());
                subdirs.push((paths::join(&dirpath, &item.name), item.oid));
            } else {
                listing.files.push(item);
            }
        }
        // Depth-first, in tree order: push in reverse so the first subdir
        // is visited next.
        for sub in subdirs.into_iter().rev() {
            self.stack.push(sub);
        }
        Some(Ok(listing))
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Lazy first-parent history created by [`Snapshot::log`]; newest first,
/// starting at the snapshot itself.
pub struct History {
    inner: Arc<StoreInner>,
    next: Option<git2::Oid>,
    ref_name: Option<String>,
    writable: bool,
}

impl Iterator for History {
    type Item = Result<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        let oid = self.next.take()?;

        let parent = {
            let repo = self.inner.git();
            let parent = match repo.find_commit(oid) {
                Ok(commit) => {
                    if commit.parent_count() > 0 {
                        commit.parent_id(0).ok()
                    } else {
                        None
                    }
                }
                Err(e) => return Some(Err(e.into())),
            };
            parent
        };
        self.next = parent;

        Some(Snapshot::from_commit(
            Arc::clone(&self.inner),
            oid,
            self.ref_name.clone(),
            self.writable,
        ))
    }
}
