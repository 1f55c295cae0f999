//! Batched writes that land as a single commit.

use std::path::Path;

use crate::error::{Error, Result};
use crate::message::format_commit_message;
use crate::paths;
use crate::snapshot::{BatchOptions, Snapshot};
use crate::tree::{self, TreeWrite};
use crate::types::{ChangeEntry, ChangeReport, FileType};

/// Accumulates writes and removes against a parent snapshot and commits
/// them atomically.
///
/// Within a batch the last operation on a path wins. [`commit`](Batch::commit)
/// closes the batch on success; after that every operation fails with
/// [`Error::InvalidState`]. The one exception is a [`Error::StaleSnapshot`]
/// failure, which leaves the batch open so the caller can
/// [`rebase`](Batch::rebase) onto a freshly fetched snapshot and retry.
/// Dropping an uncommitted batch discards it without committing.
pub struct Batch {
    parent: Snapshot,
    changes: Vec<(String, Option<TreeWrite>)>,
    message: Option<String>,
    operation: Option<String>,
    closed: bool,
}

impl Batch {
    pub(crate) fn new(parent: Snapshot, opts: BatchOptions) -> Self {
        Self {
            parent,
            changes: Vec::new(),
            message: opts.message,
            operation: opts.operation,
            closed: false,
        }
    }

    fn require_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::invalid_state("batch is closed"))
        } else {
            Ok(())
        }
    }

    /// Stage a change, superseding any earlier change at the same path.
    fn stage(&mut self, path: String, write: Option<TreeWrite>) {
        self.changes.retain(|(p, _)| p != &path);
        self.changes.push((path, write));
    }

    fn stage_blob(&mut self, path: &str, data: &[u8], mode: u32) -> Result<()> {
        self.require_open()?;
        let path = paths::normalize(path)?;
        if path.is_empty() {
            return Err(Error::invalid_path("cannot write to the root"));
        }
        let oid = self.parent.with_repo(|repo| Ok(repo.blob(data)?))?;
        self.stage(path, Some(TreeWrite { oid, mode }));
        Ok(())
    }

    /// Stage raw bytes at `path` as a plain blob.
    pub fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.stage_blob(path, data, FileType::Blob.filemode())
    }

    /// Stage raw bytes at `path` with an explicit file type.
    pub fn write_with_mode(&mut self, path: &str, data: &[u8], mode: FileType) -> Result<()> {
        if mode == FileType::Tree {
            return Err(Error::invalid_argument("cannot write a tree entry directly"));
        }
        self.stage_blob(path, data, mode.filemode())
    }

    /// Stage a file from disk, auto-detecting symlink/executable modes.
    pub fn write_from_file(&mut self, path: &str, src: &Path) -> Result<()> {
        self.require_open()?;
        let mode = tree::mode_from_disk(src)?;
        if mode == FileType::Link.filemode() {
            let target = std::fs::read_link(src).map_err(|e| Error::io(src, e))?;
            return self.write_symlink(path, &target.to_string_lossy());
        }
        let data = std::fs::read(src).map_err(|e| Error::io(src, e))?;
        self.stage_blob(path, &data, mode)
    }

    /// Stage a symlink to `target` at `path`.
    pub fn write_symlink(&mut self, path: &str, target: &str) -> Result<()> {
        self.stage_blob(path, target.as_bytes(), FileType::Link.filemode())
    }

    /// Stage a removal of `path`. Removing a path that doesn't exist is a
    /// no-op at commit time.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.require_open()?;
        let path = paths::normalize(path)?;
        if path.is_empty() {
            return Err(Error::invalid_argument("cannot remove the root"));
        }
        self.stage(path, None);
        Ok(())
    }

    /// A buffered writer whose contents are staged into this batch when it
    /// is closed.
    pub fn writer(&mut self, path: &str) -> Result<crate::writer::BatchWriter<'_>> {
        self.require_open()?;
        let normalized = paths::normalize(path)?;
        if normalized.is_empty() {
            return Err(Error::invalid_path("cannot write to the root"));
        }
        Ok(crate::writer::BatchWriter::new(self, normalized))
    }

    /// Swap in a freshly fetched parent after a stale-snapshot failure.
    ///
    /// The new parent must be a writable snapshot of the same branch.
    /// Staged changes are kept.
    pub fn rebase(&mut self, parent: &Snapshot) -> Result<()> {
        self.require_open()?;
        if !parent.writable() || parent.ref_name() != self.parent.ref_name() {
            return Err(Error::invalid_argument(
                "rebase target must be a writable snapshot of the same branch",
            ));
        }
        self.parent = parent.clone();
        Ok(())
    }

    /// Commit all staged changes as one commit and return the resulting
    /// snapshot.
    ///
    /// An empty batch closes without committing and returns the parent.
    /// On [`Error::StaleSnapshot`] the batch stays open for
    /// [`rebase`](Batch::rebase)-and-retry; every other outcome closes it.
    pub fn commit(&mut self) -> Result<Snapshot> {
        self.require_open()?;

        if self.changes.is_empty() {
            self.closed = true;
            return Ok(self.parent.clone());
        }

        let report = self.build_report()?;
        let message = format_commit_message(
            &report,
            self.message.as_deref(),
            self.operation.as_deref(),
        )?;

        match self.parent.commit_changes(&self.changes, &message) {
            Ok(fs) => {
                self.closed = true;
                Ok(fs)
            }
            Err(e @ Error::StaleSnapshot(_)) => Err(e),
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }

    /// `true` once [`commit`](Batch::commit) has completed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// `true` when nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Classify staged changes against the parent tree for the commit
    /// message.
    fn build_report(&self) -> Result<ChangeReport> {
        let mut report = ChangeReport::new();
        self.parent.with_repo(|repo| {
            for (path, write) in &self.changes {
                let existing = tree::entry_at_path(repo, self.parent.tree_oid, path)?;
                match write {
                    Some(tw) => {
                        let ft = FileType::from_mode(tw.mode).unwrap_or(FileType::Blob);
                        if existing.is_some() {
                            report.update.push(ChangeEntry::new(path, ft));
                        } else {
                            report.add.push(ChangeEntry::new(path, ft));
                        }
                    }
                    None => {
                        if let Some(e) = existing {
                            report.delete.push(ChangeEntry::new(
                                path,
                                FileType::from_mode(e.mode).unwrap_or(FileType::Blob),
                            ));
                        }
                    }
                }
            }
            Ok(())
        })?;
        Ok(report)
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("parent", &self.parent.commit_hash())
            .field("staged", &self.changes.len())
            .field("closed", &self.closed)
            .finish()
    }
}
