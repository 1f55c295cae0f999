//! Glob matching over snapshot trees.
//!
//! Patterns are slash-separated. Within a segment, `*` matches any run of
//! characters and `?` exactly one; neither crosses a `/`. A `**` segment
//! matches zero or more whole segments. Entries whose name starts with `.`
//! are hidden from `*`, `?`, and `**` unless the pattern segment itself
//! starts with `.`.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::paths;
use crate::types::MODE_TREE;

/// Match one pattern segment against one entry name.
pub fn segment_match(pattern: &str, name: &str) -> bool {
    if name.starts_with('.') && !pattern.starts_with('.') {
        return false;
    }
    fnmatch(pattern.as_bytes(), name.as_bytes())
}

/// Backtracking wildcard match: `*` any run, `?` one byte.
fn fnmatch(pat: &[u8], name: &[u8]) -> bool {
    let mut pi = 0;
    let mut ni = 0;
    let mut star_pi = usize::MAX;
    let mut star_ni = 0;

    while ni < name.len() {
        if pi < pat.len() && (pat[pi] == b'?' || pat[pi] == name[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < pat.len() && pat[pi] == b'*' {
            star_pi = pi;
            star_ni = ni;
            pi += 1;
        } else if star_pi != usize::MAX {
            pi = star_pi + 1;
            star_ni += 1;
            ni = star_ni;
        } else {
            return false;
        }
    }

    while pi < pat.len() && pat[pi] == b'*' {
        pi += 1;
    }
    pi == pat.len()
}

/// Expand `pattern` against the tree at `root`, returning matching paths
/// sorted and deduplicated. An empty pattern matches nothing.
pub fn glob_tree(
    repo: &git2::Repository,
    root: git2::Oid,
    pattern: &str,
) -> Result<Vec<String>> {
    if pattern.is_empty() {
        return Ok(Vec::new());
    }
    let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = BTreeSet::new();
    glob_level(repo, root, &segments, "", &mut out)?;
    Ok(out.into_iter().collect())
}

fn glob_level(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
    segments: &[&str],
    prefix: &str,
    out: &mut BTreeSet<String>,
) -> Result<()> {
    let (seg, rest) = match segments.split_first() {
        Some(s) => s,
        None => return Ok(()),
    };

    if *seg == "**" {
        if rest.is_empty() {
            // Bare `**`: every visible entry at every depth.
            emit_all(repo, tree_oid, prefix, out)?;
            return Ok(());
        }
        // Zero segments consumed...
        glob_level(repo, tree_oid, rest, prefix, out)?;
        // ...or descend through each visible subdirectory, keeping `**`.
        for item in crate::tree::tree_items(repo, tree_oid)? {
            if item.mode == MODE_TREE && !item.name.starts_with('.') {
                let full = paths::join(prefix, &item.name);
                glob_level(repo, item.oid, segments, &full, out)?;
            }
        }
        return Ok(());
    }

    for item in crate::tree::tree_items(repo, tree_oid)? {
        if !segment_match(seg, &item.name) {
            continue;
        }
        let full = paths::join(prefix, &item.name);
        if rest.is_empty() {
            out.insert(full);
        } else if item.mode == MODE_TREE {
            glob_level(repo, item.oid, rest, &full, out)?;
        }
    }
    Ok(())
}

fn emit_all(
    repo: &git2::Repository,
    tree_oid: git2::Oid,
    prefix: &str,
    out: &mut BTreeSet<String>,
) -> Result<()> {
    for item in crate::tree::tree_items(repo, tree_oid)? {
        if item.name.starts_with('.') {
            continue;
        }
        let full = paths::join(prefix, &item.name);
        if item.mode == MODE_TREE {
            out.insert(full.clone());
            emit_all(repo, item.oid, &full, out)?;
        } else {
            out.insert(full);
        }
    }
    Ok(())
}
