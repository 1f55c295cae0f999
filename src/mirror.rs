//! Ref-level mirroring between repositories.
//!
//! [`backup`] pushes every local ref to a destination, deleting
//! destination-only refs; [`restore`] is the same operation pointed the
//! other way, fetching every remote ref and deleting local-only refs.
//! HEAD and peeled-tag (`^{}`) refs are excluded on both sides, and HEAD
//! is never rewritten by a restore. Destinations ending in `.bundle` (or
//! an explicit `format: "bundle"`) use the portable v2 bundle file format
//! instead of a transport.

use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{MirrorDiff, RefChange};

/// Callback receiving opaque sideband progress bytes from the transport.
pub type ProgressFn = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Options for [`backup`].
#[derive(Clone, Default)]
pub struct BackupOptions {
    /// Compute the diff but do not push or write anything.
    pub dry_run: bool,
    /// Limit the operation to these refs (short or full names). With a
    /// filter the operation is additive: nothing is deleted.
    pub refs: Option<Vec<String>>,
    /// Force `"bundle"` output regardless of the destination extension.
    pub format: Option<String>,
    /// Progress callback fed from transport sideband data.
    pub progress: Option<ProgressFn>,
}

/// Options for [`restore`].
#[derive(Clone, Default)]
pub struct RestoreOptions {
    /// Compute the diff but do not fetch or write anything.
    pub dry_run: bool,
    /// Limit the operation to these refs (short or full names). With a
    /// filter the operation is additive: nothing is deleted.
    pub refs: Option<Vec<String>>,
    /// Force `"bundle"` input regardless of the source extension.
    pub format: Option<String>,
    /// Progress callback fed from transport sideband data.
    pub progress: Option<ProgressFn>,
}

impl std::fmt::Debug for BackupOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupOptions")
            .field("dry_run", &self.dry_run)
            .field("refs", &self.refs)
            .field("format", &self.format)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl std::fmt::Debug for RestoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreOptions")
            .field("dry_run", &self.dry_run)
            .field("refs", &self.refs)
            .field("format", &self.format)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// URL handling
// ---------------------------------------------------------------------------

const SCHEMES: [&str; 5] = ["http://", "https://", "git://", "ssh://", "file://"];

fn is_local(url: &str) -> bool {
    !SCHEMES[..4].iter().any(|s| url.starts_with(s))
}

fn local_path(url: &str) -> &str {
    url.strip_prefix("file://").unwrap_or(url)
}

/// Reject scp-style URLs (`user@host:path`, `host:path`).
///
/// Windows drive letters (a single letter, then `:`, then a path
/// separator) are local paths, not scp hosts.
fn reject_scp_url(url: &str) -> Result<()> {
    if SCHEMES.iter().any(|s| url.starts_with(s)) {
        return Ok(());
    }

    let scp = || {
        Error::invalid_argument(format!(
            "scp-style URL not supported: {:?}; use the ssh:// form instead",
            url
        ))
    };

    if let Some((_, after_at)) = url.split_once('@') {
        if after_at.contains(':') {
            return Err(scp());
        }
    }
    if let Some(colon) = url.find(':') {
        let prefix = &url[..colon];
        if colon > 1 && !prefix.contains('/') && !prefix.contains('\\') {
            return Err(scp());
        }
    }
    Ok(())
}

fn is_bundle_path(url: &str) -> bool {
    url.to_lowercase().ends_with(".bundle")
}

// ---------------------------------------------------------------------------
// Ref enumeration
// ---------------------------------------------------------------------------

/// Should this ref take part in mirroring? HEAD and peeled-tag markers are
/// skipped on both sides.
fn mirrored_ref(name: &str) -> bool {
    name != "HEAD" && !name.ends_with("^{}")
}

/// All mirrored refs of the repository at `path`, as `{name: hex}`.
fn refs_at_path(path: &Path) -> Result<HashMap<String, String>> {
    let repo = git2::Repository::open_bare(path)
        .map_err(|_| Error::not_git_repository(path.display().to_string()))?;
    let mut refs = HashMap::new();
    for r in repo.references()?.flatten() {
        let name = match r.name() {
            Some(n) if mirrored_ref(n) => n.to_string(),
            _ => continue,
        };
        let oid = r
            .target()
            .or_else(|| r.resolve().ok().and_then(|r| r.target()));
        if let Some(oid) = oid {
            refs.insert(name, oid.to_string());
        }
    }
    Ok(refs)
}

/// Mirrored refs of the remote at `url`.
///
/// Local paths are opened directly; `missing_ok` controls whether an absent
/// local path is an empty ref set (push targets) or an error (pull sources).
fn remote_refs(
    repo_path: &Path,
    url: &str,
    missing_ok: bool,
) -> Result<HashMap<String, String>> {
    if is_local(url) {
        let path = Path::new(local_path(url));
        if !path.exists() {
            if missing_ok {
                return Ok(HashMap::new());
            }
            return Err(Error::not_git_repository(url.to_string()));
        }
        return refs_at_path(path);
    }

    let repo = git2::Repository::open_bare(repo_path)
        .map_err(|_| Error::not_git_repository(repo_path.display().to_string()))?;
    let mut remote = repo.remote_anonymous(url)?;
    remote
        .connect(git2::Direction::Fetch)
        .map_err(|e| Error::transport(format!("{}: {}", url, e.message())))?;

    let mut refs = HashMap::new();
    for head in remote
        .list()
        .map_err(|e| Error::transport(format!("{}: {}", url, e.message())))?
    {
        if mirrored_ref(head.name()) {
            refs.insert(head.name().to_string(), head.oid().to_string());
        }
    }
    let _ = remote.disconnect();
    Ok(refs)
}

/// Resolve short ref names against the available refs.
///
/// Full `refs/...` names pass through; otherwise `refs/heads/`, then
/// `refs/tags/` are tried, defaulting to `refs/heads/` when neither
/// matches.
fn resolve_ref_names(names: &[String], available: &HashMap<String, String>) -> HashSet<String> {
    let mut out = HashSet::new();
    for name in names {
        if name.starts_with("refs/") {
            out.insert(name.clone());
            continue;
        }
        let resolved = ["refs/heads/", "refs/tags/"]
            .iter()
            .map(|p| format!("{}{}", p, name))
            .find(|candidate| available.contains_key(candidate));
        out.insert(resolved.unwrap_or_else(|| format!("refs/heads/{}", name)));
    }
    out
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Three-way ref diff: refs only in `src` are adds, shared refs with
/// different targets are updates, refs only in `dest` are deletes.
fn diff_refs(src: &HashMap<String, String>, dest: &HashMap<String, String>) -> MirrorDiff {
    let mut diff = MirrorDiff::new();

    for (name, sha) in src {
        match dest.get(name) {
            None => diff.add.push(RefChange {
                ref_name: name.clone(),
                old_target: None,
                new_target: Some(sha.clone()),
            }),
            Some(dest_sha) if dest_sha != sha => diff.update.push(RefChange {
                ref_name: name.clone(),
                old_target: Some(dest_sha.clone()),
                new_target: Some(sha.clone()),
            }),
            Some(_) => {}
        }
    }
    for (name, sha) in dest {
        if !src.contains_key(name) {
            diff.delete.push(RefChange {
                ref_name: name.clone(),
                old_target: Some(sha.clone()),
                new_target: None,
            });
        }
    }

    diff.add.sort_by(|a, b| a.ref_name.cmp(&b.ref_name));
    diff.update.sort_by(|a, b| a.ref_name.cmp(&b.ref_name));
    diff.delete.sort_by(|a, b| a.ref_name.cmp(&b.ref_name));
    diff
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

fn callbacks(progress: Option<&ProgressFn>) -> git2::RemoteCallbacks<'static> {
    let mut cbs = git2::RemoteCallbacks::new();
    if let Some(p) = progress {
        let p = Arc::clone(p);
        cbs.sideband_progress(move |data| {
            p(data);
            true
        });
    }
    cbs
}

fn push_refspecs(
    repo_path: &Path,
    url: &str,
    refspecs: &[String],
    progress: Option<&ProgressFn>,
) -> Result<()> {
    let repo = git2::Repository::open_bare(repo_path)
        .map_err(|_| Error::not_git_repository(repo_path.display().to_string()))?;
    let mut remote = repo.remote_anonymous(url)?;
    let mut opts = git2::PushOptions::new();
    opts.remote_callbacks(callbacks(progress));

    let strs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
    remote
        .push(&strs, Some(&mut opts))
        .map_err(|e| Error::transport(format!("push to {}: {}", url, e.message())))?;
    Ok(())
}

/// Mirror push: force every local ref and schedule deletion of every
/// destination-only ref.
fn mirror_push(
    repo_path: &Path,
    url: &str,
    local: &HashMap<String, String>,
    remote: &HashMap<String, String>,
    progress: Option<&ProgressFn>,
) -> Result<()> {
    let mut refspecs: Vec<String> = local.keys().map(|r| format!("+{}:{}", r, r)).collect();
    for name in remote.keys() {
        if !local.contains_key(name) {
            // A colon with no source maps the remote ref to the zero id.
            refspecs.push(format!(":{}", name));
        }
    }
    push_refspecs(repo_path, url, &refspecs, progress)
}

fn fetch_refspecs(
    repo_path: &Path,
    url: &str,
    refspecs: &[String],
    progress: Option<&ProgressFn>,
) -> Result<()> {
    if refspecs.is_empty() {
        return Ok(());
    }
    let repo = git2::Repository::open_bare(repo_path)
        .map_err(|_| Error::not_git_repository(repo_path.display().to_string()))?;
    let mut remote = repo.remote_anonymous(url)?;
    let mut opts = git2::FetchOptions::new();
    opts.remote_callbacks(callbacks(progress));

    let strs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
    remote
        .fetch(&strs, Some(&mut opts), None)
        .map_err(|e| Error::transport(format!("fetch from {}: {}", url, e.message())))?;
    Ok(())
}

fn delete_local_refs(repo_path: &Path, names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Ok(());
    }
    let repo = git2::Repository::open_bare(repo_path)
        .map_err(|_| Error::not_git_repository(repo_path.display().to_string()))?;
    for name in names {
        if let Ok(mut r) = repo.find_reference(name) {
            r.delete()?;
        }
    }
    Ok(())
}

fn auto_create_bare(url: &str) -> Result<()> {
    if !is_local(url) {
        return Ok(());
    }
    let path = Path::new(local_path(url));
    if path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| Error::io(path, e))?;
    git2::Repository::init_bare(path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Bundle codec
// ---------------------------------------------------------------------------

const BUNDLE_SIGNATURE: &[u8] = b"# v2 git bundle\n";

/// Parse a v2 bundle header. Returns the mirrored refs and the byte offset
/// of the pack data. Prerequisite lines (leading `-`) are skipped.
fn parse_bundle_header(data: &[u8]) -> Result<(HashMap<String, String>, usize)> {
    if data.len() < BUNDLE_SIGNATURE.len() || &data[..BUNDLE_SIGNATURE.len()] != BUNDLE_SIGNATURE {
        return Err(Error::invalid_argument("not a v2 git bundle"));
    }

    let header_end = data
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or_else(|| Error::invalid_argument("bundle header is unterminated"))?;

    let mut refs = HashMap::new();
    let header = String::from_utf8_lossy(&data[BUNDLE_SIGNATURE.len()..header_end]);
    for line in header.lines() {
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        if let Some((sha, name)) = line.split_once(' ') {
            if !sha.is_empty() && mirrored_ref(name) {
                refs.insert(name.to_string(), sha.to_string());
            }
        }
    }
    Ok((refs, header_end + 2))
}

/// Write a bundle containing `refs` and the full ancestry of each target.
fn bundle_export(repo_path: &Path, path: &str, refs: &HashMap<String, String>) -> Result<()> {
    if refs.is_empty() {
        return Err(Error::invalid_argument("no refs to bundle"));
    }
    let repo = git2::Repository::open_bare(repo_path)
        .map_err(|_| Error::not_git_repository(repo_path.display().to_string()))?;

    let mut builder = repo.packbuilder()?;
    let mut revwalk = repo.revwalk()?;
    for sha in refs.values() {
        revwalk.push(git2::Oid::from_str(sha)?)?;
    }
    builder.insert_walk(&mut revwalk)?;

    let mut pack = git2::Buf::new();
    builder.write_buf(&mut pack)?;

    let mut names: Vec<&String> = refs.keys().collect();
    names.sort();
    let mut header = Vec::from(BUNDLE_SIGNATURE);
    for name in names {
        header.extend_from_slice(refs[name].as_bytes());
        header.push(b' ');
        header.extend_from_slice(name.as_bytes());
        header.push(b'\n');
    }
    header.push(b'\n');

    let mut file =
        std::fs::File::create(path).map_err(|e| Error::io(Path::new(path), e))?;
    file.write_all(&header).map_err(|e| Error::io(Path::new(path), e))?;
    file.write_all(&pack).map_err(|e| Error::io(Path::new(path), e))?;
    Ok(())
}

fn bundle_refs(path: &str) -> Result<HashMap<String, String>> {
    let data = std::fs::read(path).map_err(|e| Error::io(Path::new(path), e))?;
    Ok(parse_bundle_header(&data)?.0)
}

/// Index a bundle's pack into the repository and point the given refs at
/// their bundled targets.
fn bundle_import(
    repo_path: &Path,
    path: &str,
    refs: &HashMap<String, String>,
) -> Result<()> {
    let data = std::fs::read(path).map_err(|e| Error::io(Path::new(path), e))?;
    let (_, pack_offset) = parse_bundle_header(&data)?;

    let pack_dir = repo_path.join("objects").join("pack");
    std::fs::create_dir_all(&pack_dir).map_err(|e| Error::io(&pack_dir, e))?;

    let mut indexer = git2::Indexer::new(None, &pack_dir, 0, false)?;
    indexer
        .write_all(&data[pack_offset..])
        .map_err(|e| Error::io(&pack_dir, e))?;
    indexer.commit()?;

    let repo = git2::Repository::open_bare(repo_path)
        .map_err(|_| Error::not_git_repository(repo_path.display().to_string()))?;
    for (name, sha) in refs {
        repo.reference(name, git2::Oid::from_str(sha)?, true, "bundle import")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn filter_refs(
    refs: HashMap<String, String>,
    filter: &HashSet<String>,
) -> HashMap<String, String> {
    refs.into_iter()
        .filter(|(name, _)| filter.contains(name))
        .collect()
}

/// Mirror the repository's refs to `dest`, returning what changed (or, with
/// `dry_run`, what would change).
///
/// A missing local destination is created as an empty bare repository.
/// Without a refs filter, destination-only refs are deleted; with one,
/// only the named refs are pushed and nothing is deleted. A `.bundle`
/// destination writes a bundle file instead of pushing.
pub fn backup(repo_path: &Path, dest: &str, opts: &BackupOptions) -> Result<MirrorDiff> {
    reject_scp_url(dest)?;

    let local = refs_at_path(repo_path)?;
    let selected = match &opts.refs {
        Some(names) => {
            let wanted = resolve_ref_names(names, &local);
            filter_refs(local, &wanted)
        }
        None => local,
    };

    if opts.format.as_deref() == Some("bundle") || is_bundle_path(dest) {
        let existing = if Path::new(dest).exists() {
            bundle_refs(dest)?
        } else {
            HashMap::new()
        };
        let mut diff = diff_refs(&selected, &existing);
        if opts.refs.is_some() {
            diff.delete.clear();
        }
        if !opts.dry_run {
            bundle_export(repo_path, dest, &selected)?;
        }
        return Ok(diff);
    }

    if !opts.dry_run {
        auto_create_bare(dest)?;
    }
    let remote = remote_refs(repo_path, dest, true)?;
    let mut diff = diff_refs(&selected, &remote);

    if opts.refs.is_some() {
        diff.delete.clear();
        if !opts.dry_run && !diff.in_sync() {
            let refspecs: Vec<String> =
                selected.keys().map(|r| format!("+{}:{}", r, r)).collect();
            push_refspecs(repo_path, dest, &refspecs, opts.progress.as_ref())?;
        }
        return Ok(diff);
    }

    if !opts.dry_run && !diff.in_sync() {
        mirror_push(repo_path, dest, &selected, &remote, opts.progress.as_ref())?;
    }
    Ok(diff)
}

/// Mirror refs from `src` into the repository, returning what changed (or,
/// with `dry_run`, what would change).
///
/// Every remote ref is written verbatim; local refs absent from the remote
/// are deleted — except HEAD, which is never touched. With a refs filter
/// the fetch is additive. A `.bundle` source reads a bundle file instead of
/// fetching.
pub fn restore(repo_path: &Path, src: &str, opts: &RestoreOptions) -> Result<MirrorDiff> {
    reject_scp_url(src)?;

    let use_bundle = opts.format.as_deref() == Some("bundle") || is_bundle_path(src);

    let remote = if use_bundle {
        bundle_refs(src)?
    } else {
        remote_refs(repo_path, src, false)?
    };
    let selected = match &opts.refs {
        Some(names) => {
            let wanted = resolve_ref_names(names, &remote);
            filter_refs(remote, &wanted)
        }
        None => remote,
    };

    let local = refs_at_path(repo_path)?;
    let mut diff = diff_refs(&selected, &local);
    if opts.refs.is_some() {
        diff.delete.clear();
    }
    if opts.dry_run {
        return Ok(diff);
    }
    if diff.in_sync() {
        return Ok(diff);
    }

    if use_bundle {
        bundle_import(repo_path, src, &selected)?;
    } else {
        let refspecs: Vec<String> = selected.keys().map(|r| format!("+{}:{}", r, r)).collect();
        fetch_refspecs(repo_path, src, &refspecs, opts.progress.as_ref())?;
    }

    let doomed: Vec<String> = diff.delete.iter().map(|c| c.ref_name.clone()).collect();
    delete_local_refs(repo_path, &doomed)?;
    Ok(diff)
}
