//! Import from and export to the local filesystem.
//!
//! `copy_in`/`sync_in` bring disk files into the store as one commit;
//! `copy_out`/`sync_out` materialize store files on disk. The sync variants
//! additionally delete destination entries that are absent from the source.
//! Symlinks and the executable bit survive both directions; exported files
//! are stamped with the commit time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::error::{Error, Result};
use crate::message::format_commit_message;
use crate::paths;
use crate::snapshot::Snapshot;
use crate::tree::{self, TreeWrite};
use crate::types::{ChangeEntry, ChangeReport, FileType, MODE_EXEC, MODE_LINK};

/// Options for [`Snapshot::copy_in`] and [`Snapshot::sync_in`].
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Report what would change without committing.
    pub dry_run: bool,
    /// Commit message template. Auto-generated if `None`.
    pub message: Option<String>,
}

/// One file found on disk: its git mode and its payload (file contents, or
/// the symlink target).
struct DiskFile {
    mode: u32,
    payload: Vec<u8>,
}

impl Snapshot {
    /// Import a file, or the contents of a directory, from disk into
    /// `dest`, committing once. Files already identical in content and
    /// mode are skipped.
    pub fn copy_in(
        &self,
        src: &Path,
        dest: &str,
        opts: ImportOptions,
    ) -> Result<(ChangeReport, Snapshot)> {
        self.import(src, dest, false, opts, "cp")
    }

    /// Like [`copy_in`](Snapshot::copy_in), but also remove store entries
    /// under `dest` that have no counterpart on disk.
    pub fn sync_in(
        &self,
        src: &Path,
        dest: &str,
        opts: ImportOptions,
    ) -> Result<(ChangeReport, Snapshot)> {
        self.import(src, dest, true, opts, "sync")
    }

    fn import(
        &self,
        src: &Path,
        dest: &str,
        delete: bool,
        opts: ImportOptions,
        operation: &str,
    ) -> Result<(ChangeReport, Snapshot)> {
        self.require_writable_for_import()?;
        let dest_norm = paths::normalize(dest)?;

        let meta = std::fs::symlink_metadata(src).map_err(|e| Error::io(src, e))?;
        let src_is_dir = meta.is_dir();

        // Gather disk files keyed by their path within `dest`.
        let mut disk: BTreeMap<String, DiskFile> = BTreeMap::new();
        if src_is_dir {
            let mut files = BTreeMap::new();
            collect_disk_files(src, "", &mut files)?;
            for (rel, path) in files {
                disk.insert(paths::join(&dest_norm, &rel), read_disk_file(&path)?);
            }
        } else {
            let name = src
                .file_name()
                .ok_or_else(|| Error::invalid_argument(format!("bad source path {:?}", src)))?
                .to_string_lossy()
                .into_owned();
            let target = if dest_norm.is_empty() || self.is_dir(&dest_norm)? {
                paths::join(&dest_norm, &name)
            } else {
                dest_norm.clone()
            };
            disk.insert(target, read_disk_file(src)?);
        }

        let mut report = ChangeReport::new();
        let mut changes: Vec<(String, Option<TreeWrite>)> = Vec::new();

        self.with_repo(|repo| {
            for (repo_path, file) in &disk {
                let existing = tree::entry_at_path(repo, self.tree_oid, repo_path)?;
                let content_oid =
                    git2::Oid::hash_object(git2::ObjectType::Blob, &file.payload)?;
                let ft = FileType::from_mode(file.mode).unwrap_or(FileType::Blob);

                match existing {
                    Some(e) if e.mode == file.mode && e.oid == content_oid => continue,
                    Some(_) => report.update.push(ChangeEntry::new(repo_path, ft)),
                    None => report.add.push(ChangeEntry::new(repo_path, ft)),
                }
                if !opts.dry_run {
                    let oid = repo.blob(&file.payload)?;
                    changes.push((repo_path.clone(), Some(TreeWrite { oid, mode: file.mode })));
                }
            }

            if delete && src_is_dir {
                if let Some(existing) = crate::snapshot::subtree_files(repo, self.tree_oid, &dest_norm)? {
                    for (rel, e) in existing {
                        let full = paths::join(&dest_norm, &rel);
                        if !disk.contains_key(&full) {
                            report.delete.push(ChangeEntry::new(
                                &full,
                                FileType::from_mode(e.mode).unwrap_or(FileType::Blob),
                            ));
                            if !opts.dry_run {
                                changes.push((full, None));
                            }
                        }
                    }
                }
            }
            Ok(())
        })?;

        if opts.dry_run || changes.is_empty() {
            return Ok((report, self.clone()));
        }
        let message = format_commit_message(&report, opts.message.as_deref(), Some(operation))?;
        let fs = self.commit_changes(&changes, &message)?;
        Ok((report, fs))
    }

    fn require_writable_for_import(&self) -> Result<()> {
        if self.writable() {
            Ok(())
        } else {
            Err(Error::permission_denied(
                "cannot import into a read-only snapshot",
            ))
        }
    }

    /// Export the file or subtree at `src` to `dest` on disk, stamping
    /// regular files with the commit time.
    pub fn copy_out(&self, src: &str, dest: &Path) -> Result<ChangeReport> {
        let src_norm = paths::normalize(src)?;
        let mtime = FileTime::from_unix_time(self.time()? as i64, 0);

        let mut report = ChangeReport::new();
        let files = self.with_repo(|repo| {
            crate::snapshot::subtree_files(repo, self.tree_oid, &src_norm)?
                .ok_or_else(|| Error::not_found(&src_norm))
        })?;

        for (rel, entry) in &files {
            let out_path = if rel.is_empty() {
                // Blob source: into an existing directory, or to the exact
                // destination path.
                if dest.is_dir() {
                    dest.join(paths::basename(&src_norm))
                } else {
                    dest.to_path_buf()
                }
            } else {
                dest.join(rel)
            };
            let existed = out_path.symlink_metadata().is_ok();
            let data = self.with_repo(|repo| Ok(repo.find_blob(entry.oid)?.content().to_vec()))?;
            write_disk_file(&out_path, &data, entry.mode, mtime)?;

            let entry_path = if rel.is_empty() {
                src_norm.clone()
            } else {
                paths::join(&src_norm, rel)
            };
            let ft = FileType::from_mode(entry.mode).unwrap_or(FileType::Blob);
            if existed {
                report.update.push(ChangeEntry::new(entry_path, ft));
            } else {
                report.add.push(ChangeEntry::new(entry_path, ft));
            }
        }
        Ok(report)
    }

    /// Like [`copy_out`](Snapshot::copy_out), but also delete disk files
    /// under `dest` that have no counterpart in the store subtree.
    pub fn sync_out(&self, src: &str, dest: &Path) -> Result<ChangeReport> {
        let src_norm = paths::normalize(src)?;
        let mut report = self.copy_out(src, dest)?;

        let files = self.with_repo(|repo| {
            crate::snapshot::subtree_files(repo, self.tree_oid, &src_norm)?
                .ok_or_else(|| Error::not_found(&src_norm))
        })?;
        if files.contains_key("") {
            // Blob source: nothing to reconcile.
            return Ok(report);
        }

        let mut on_disk = BTreeMap::new();
        if dest.is_dir() {
            collect_disk_files(dest, "", &mut on_disk)?;
        }
        for (rel, path) in on_disk {
            if !files.contains_key(&rel) {
                std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
                report.delete.push(ChangeEntry::new(rel, FileType::Blob));
                // Prune directories emptied by the removal.
                let mut parent = path.parent();
                while let Some(dir) = parent {
                    if dir == dest || std::fs::remove_dir(dir).is_err() {
                        break;
                    }
                    parent = dir.parent();
                }
            }
        }
        Ok(report)
    }
}

/// Recursively gather regular files and symlinks under `dir`, keyed by
/// relative path. Directory entries are visited in name order so reports
/// are deterministic.
fn collect_disk_files(
    dir: &Path,
    prefix: &str,
    out: &mut BTreeMap<String, PathBuf>,
) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| Error::io(dir, e))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = paths::join(prefix, &name);
        let path = entry.path();
        let meta = path.symlink_metadata().map_err(|e| Error::io(&path, e))?;
        if meta.is_dir() {
            collect_disk_files(&path, &rel, out)?;
        } else {
            out.insert(rel, path);
        }
    }
    Ok(())
}

fn read_disk_file(path: &Path) -> Result<DiskFile> {
    let mode = tree::mode_from_disk(path)?;
    let payload = if mode == MODE_LINK {
        let target = std::fs::read_link(path).map_err(|e| Error::io(path, e))?;
        target.to_string_lossy().into_owned().into_bytes()
    } else {
        std::fs::read(path).map_err(|e| Error::io(path, e))?
    };
    Ok(DiskFile { mode, payload })
}

fn write_disk_file(path: &Path, data: &[u8], mode: u32, mtime: FileTime) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    if path.symlink_metadata().is_ok() {
        std::fs::remove_file(path).map_err(|e| Error::io(path, e))?;
    }

    if mode == MODE_LINK {
        let target = String::from_utf8(data.to_vec())
            .map_err(|e| Error::invalid_state(format!("bad symlink target: {}", e)))?;
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, path).map_err(|e| Error::io(path, e))?;
        #[cfg(not(unix))]
        std::fs::write(path, target.as_bytes()).map_err(|e| Error::io(path, e))?;
        return Ok(());
    }

    std::fs::write(path, data).map_err(|e| Error::io(path, e))?;
    #[cfg(unix)]
    if mode == MODE_EXEC {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| Error::io(path, e))?;
    }
    filetime::set_file_mtime(path, mtime).map_err(|e| Error::io(path, e))?;
    Ok(())
}

