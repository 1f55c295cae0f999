//! The tree engine: incremental root-tree rebuilds plus read-side helpers.
//!
//! [`rebuild_tree`] turns a parent tree and a flat change list into a new
//! root tree OID. Only the ancestor chain of each changed leaf is rewritten;
//! every untouched sibling subtree is carried over by OID, so consecutive
//! commits share structure. Empty directories are pruned bottom-up and are
//! never persisted.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::paths;
use crate::types::{TreeItem, MODE_TREE};

/// A pending tree write: a blob already stored in the odb, plus its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeWrite {
    pub oid: git2::Oid,
    pub mode: u32,
}

/// `(oid, mode)` of a resolved tree entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryRef {
    pub oid: git2::Oid,
    pub mode: u32,
}

/// Resolve the entry at `path` under `tree_oid`, or `None` if absent.
///
/// The root path resolves to the tree itself. Traversal stops with `None`
/// when an intermediate segment is missing or not a tree.
pub fn entry_at_path(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
    path: &str,
) -> Result<Option<EntryRef>> {
    let path = paths::normalize(path)?;
    if path.is_empty() {
        return Ok(Some(EntryRef {
            oid: tree_oid,
            mode: MODE_TREE,
        }));
    }

    let mut current = tree_oid;
    let mut segments = path.split('/').peekable();

    while let Some(segment) = segments.next() {
        let tree = repo.find_tree(current)?;
        let found = match tree.get_name(segment) {
            Some(e) => (e.id(), e.filemode() as u32),
            None => return Ok(None),
        };
        if segments.peek().is_none() {
            return Ok(Some(EntryRef {
                oid: found.0,
                mode: found.1,
            }));
        }
        if found.1 != MODE_TREE {
            return Ok(None);
        }
        current = found.0;
    }

    Ok(None)
}

/// Like [`entry_at_path`] but with typed errors instead of `None`.
///
/// # Errors
/// [`Error::NotFound`] for a missing segment, [`Error::NotADirectory`] when
/// an intermediate segment is not a tree.
pub fn resolve_entry(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
    path: &str,
) -> Result<EntryRef> {
    let path = paths::normalize(path)?;
    if path.is_empty() {
        return Ok(EntryRef {
            oid: tree_oid,
            mode: MODE_TREE,
        });
    }

    let segments: Vec<&str> = path.split('/').collect();
    let mut current = tree_oid;

    for (i, segment) in segments.iter().enumerate() {
        let tree = repo.find_tree(current)?;
        let (oid, mode) = match tree.get_name(segment) {
            Some(e) => (e.id(), e.filemode() as u32),
            None => return Err(Error::not_found(segments[..=i].join("/"))),
        };
        if i == segments.len() - 1 {
            return Ok(EntryRef { oid, mode });
        }
        if mode != MODE_TREE {
            return Err(Error::not_a_directory(segments[..=i].join("/")));
        }
        current = oid;
    }

    // Unreachable: a normalized non-root path has at least one segment.
    Err(Error::not_found(path))
}

/// Read the blob at `path`, returning its raw bytes.
///
/// # Errors
/// [`Error::IsADirectory`] when the path resolves to a tree,
/// [`Error::NotFound`] when it does not exist.
pub fn read_blob_at_path(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
    path: &str,
) -> Result<Vec<u8>> {
    let entry = resolve_entry(repo, tree_oid, path)?;
    if entry.mode == MODE_TREE {
        return Err(Error::is_a_directory(path));
    }
    let blob = repo.find_blob(entry.oid)?;
    Ok(blob.content().to_vec())
}

/// List the immediate children of the tree at `path`.
///
/// # Errors
/// [`Error::NotFound`] when the path is missing, [`Error::NotADirectory`]
/// when it is not a tree.
pub fn list_tree_at_path(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
    path: &str,
) -> Result<Vec<TreeItem>> {
    let target = if paths::is_root(path) {
        tree_oid
    } else {
        let entry = entry_at_path(repo, tree_oid, path)?
            .ok_or_else(|| Error::not_found(path))?;
        if entry.mode != MODE_TREE {
            return Err(Error::not_a_directory(path));
        }
        entry.oid
    };
    tree_items(repo, target)
}

/// All entries of a single tree, in tree order.
pub fn tree_items(repo: &git2::Repository, tree_oid: git2::Oid) -> Result<Vec<TreeItem>> {
    let tree = repo.find_tree(tree_oid)?;
    let mut items = Vec::with_capacity(tree.len());
    for entry in tree.iter() {
        items.push(TreeItem {
            name: entry.name().unwrap_or("").to_string(),
            oid: entry.id(),
            mode: entry.filemode() as u32,
        });
    }
    Ok(items)
}

/// Recursively collect every non-tree entry under `tree_oid`, keyed by its
/// slash-separated path relative to that tree.
pub fn walk_tree(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
) -> Result<BTreeMap<String, EntryRef>> {
    let mut out = BTreeMap::new();
    collect_files(repo, tree_oid, "", &mut out)?;
    Ok(out)
}

fn collect_files(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
    prefix: &str,
    out: &mut BTreeMap<String, EntryRef>,
) -> Result<()> {
    for item in tree_items(repo, tree_oid)? {
        let full = paths::join(prefix, &item.name);
        if item.mode == MODE_TREE {
            collect_files(repo, item.oid, &full, out)?;
        } else {
            out.insert(
                full,
                EntryRef {
                    oid: item.oid,
                    mode: item.mode,
                },
            );
        }
    }
    Ok(())
}

/// `true` when any object exists at `path`.
pub fn exists_at_path(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
    path: &str,
) -> Result<bool> {
    Ok(entry_at_path(repo, tree_oid, path)?.is_some())
}

/// Number of immediate subdirectories of a tree (for stat `nlink`).
pub fn count_subdirs(repo: &git2::Repository, tree_oid: git2::Oid) -> Result<u32> {
    let tree = repo.find_tree(tree_oid)?;
    let mut count = 0u32;
    for entry in tree.iter() {
        if entry.filemode() as u32 == MODE_TREE {
            count += 1;
        }
    }
    Ok(count)
}

/// Rebuild a tree by applying a change list.
///
/// `changes` pairs a normalized non-root path with `Some(TreeWrite)` for an
/// add/update or `None` for a remove. Removing a missing path is a no-op.
/// Because trees are content-addressed, a change list that reproduces the
/// base tree yields the base OID unchanged.
pub fn rebuild_tree(
    repo: &git2::Repository,
    base: Option<git2::Oid>,
    changes: &[(String, Option<TreeWrite>)],
) -> Result<git2::Oid> {
    let borrowed: Vec<(&str, Option<&TreeWrite>)> = changes
        .iter()
        .map(|(p, w)| (p.as_str(), w.as_ref()))
        .collect();
    rebuild_level(repo, base, &borrowed)
}

fn rebuild_level(
    repo: &git2::Repository,
    base: Option<git2::Oid>,
    changes: &[(&str, Option<&TreeWrite>)],
) -> Result<git2::Oid> {
    // Split this level's changes into leaf operations and per-subdir tails.
    let mut leaves: Vec<(&str, Option<&TreeWrite>)> = Vec::new();
    let mut subdirs: BTreeMap<&str, Vec<(&str, Option<&TreeWrite>)>> = BTreeMap::new();

    for &(path, write) in changes {
        match path.split_once('/') {
            Some((dir, rest)) => subdirs.entry(dir).or_default().push((rest, write)),
            None => leaves.push((path, write)),
        }
    }

    // Current entries of the base tree.
    let mut entries: BTreeMap<String, (git2::Oid, u32)> = BTreeMap::new();
    if let Some(oid) = base {
        for item in tree_items(repo, oid)? {
            entries.insert(item.name, (item.oid, item.mode));
        }
    }

    // Leaf writes and removes first, so a remove of `a` composes with a
    // write of `a/b` in the same change list.
    for (name, write) in leaves {
        match write {
            Some(tw) => {
                entries.insert(name.to_string(), (tw.oid, tw.mode));
            }
            None => {
                entries.remove(name);
            }
        }
    }

    for (dir, tail) in subdirs {
        // A non-tree entry in the way of a subdir write is replaced.
        let sub_base = match entries.get(dir) {
            Some((oid, mode)) if *mode == MODE_TREE => Some(*oid),
            Some(_) => {
                entries.remove(dir);
                None
            }
            None => None,
        };

        let new_sub = rebuild_level(repo, sub_base, &tail)?;
        if repo.find_tree(new_sub)?.len() == 0 {
            // Emptied directory: prune instead of persisting.
            entries.remove(dir);
        } else {
            entries.insert(dir.to_string(), (new_sub, MODE_TREE));
        }
    }

    let mut builder = repo.treebuilder(None)?;
    for (name, (oid, mode)) in &entries {
        builder.insert(name, *oid, *mode as i32)?;
    }
    Ok(builder.write()?)
}

/// Determine the git filemode for a file on disk: symlink, executable
/// (Unix), or plain blob.
pub fn mode_from_disk(path: &std::path::Path) -> Result<u32> {
    use crate::types::{MODE_BLOB, MODE_EXEC, MODE_LINK};

    let meta = std::fs::symlink_metadata(path).map_err(|e| Error::io(path, e))?;
    if meta.file_type().is_symlink() {
        return Ok(MODE_LINK);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 != 0 {
            return Ok(MODE_EXEC);
        }
    }
    Ok(MODE_BLOB)
}
