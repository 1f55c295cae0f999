//! The repository facade.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::refs::{Branches, Tags};
use crate::snapshot::Snapshot;
use crate::types::{MirrorDiff, Signature};

/// Options for [`Store::open`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Create the repository (and its first branch) if it doesn't exist.
    pub create: bool,
    /// Branch to initialize when creating. Defaults to `main`.
    pub branch: Option<String>,
    /// Commit author name. Defaults to the crate signature.
    pub author: Option<String>,
    /// Commit author email. Defaults to the crate signature.
    pub email: Option<String>,
}

/// Shared state behind every [`Store`] and [`Snapshot`].
pub(crate) struct StoreInner {
    pub(crate) git: Mutex<git2::Repository>,
    pub(crate) path: PathBuf,
    pub(crate) signature: Signature,
}

impl StoreInner {
    /// Lock the underlying repository handle.
    pub(crate) fn git(&self) -> MutexGuard<'_, git2::Repository> {
        self.git.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for StoreInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreInner")
            .field("path", &self.path)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// A versioned filesystem backed by a bare git repository.
///
/// Cheap to clone; all clones share one repository handle.
#[derive(Debug, Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl Store {
    /// Open (or create) the bare repository at `path`.
    ///
    /// Creating initializes an empty-tree root commit on the configured
    /// branch and points HEAD at it.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the repository is missing and
    /// `options.create` is false; [`Error::NotGitRepository`] when `path`
    /// exists but is not a bare repository.
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let signature = Signature {
            name: options
                .author
                .unwrap_or_else(|| Signature::default().name),
            email: options
                .email
                .unwrap_or_else(|| Signature::default().email),
        };

        let repo = if path.exists() {
            git2::Repository::open_bare(&path).map_err(|_| {
                Error::not_git_repository(path.display().to_string())
            })?
        } else if options.create {
            std::fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;
            let repo = git2::Repository::init_bare(&path)?;
            let branch = options.branch.as_deref().unwrap_or("main");
            crate::paths::validate_ref_name(branch)?;
            init_branch(&repo, branch, &signature)?;
            repo
        } else {
            return Err(Error::not_found(format!(
                "repository {}",
                path.display()
            )));
        };

        Ok(Store {
            inner: Arc::new(StoreInner {
                git: Mutex::new(repo),
                path,
                signature,
            }),
        })
    }

    /// A detached, read-only [`Snapshot`] of the commit named by `hash`.
    pub fn snapshot(&self, hash: &str) -> Result<Snapshot> {
        let oid = git2::Oid::from_str(hash)
            .map_err(|e| Error::invalid_argument(format!("bad commit hash {:?}: {}", hash, e)))?;
        Snapshot::from_commit(Arc::clone(&self.inner), oid, None, false)
    }

    /// The branch dictionary (`refs/heads/`). Branch snapshots are writable.
    pub fn branches(&self) -> Branches<'_> {
        Branches::new(self)
    }

    /// The tag dictionary (`refs/tags/`). Tags are write-once and their
    /// snapshots are read-only.
    pub fn tags(&self) -> Tags<'_> {
        Tags::new(self)
    }

    /// Path of the bare repository on disk.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The identity used for commits created through this store.
    pub fn signature(&self) -> &Signature {
        &self.inner.signature
    }

    /// Mirror this repository's refs to `dest`; see [`crate::mirror::backup`].
    pub fn backup(&self, dest: &str, opts: &crate::mirror::BackupOptions) -> Result<MirrorDiff> {
        crate::mirror::backup(&self.inner.path, dest, opts)
    }

    /// Mirror refs from `src` into this repository; see
    /// [`crate::mirror::restore`].
    pub fn restore(&self, src: &str, opts: &crate::mirror::RestoreOptions) -> Result<MirrorDiff> {
        crate::mirror::restore(&self.inner.path, src, opts)
    }
}

/// Whether two handles refer to the same repository, either by sharing
/// state or by canonicalizing to the same path.
pub(crate) fn same_store(a: &Arc<StoreInner>, b: &Arc<StoreInner>) -> bool {
    if Arc::ptr_eq(a, b) {
        return true;
    }
    let ca = std::fs::canonicalize(&a.path).ok();
    let cb = std::fs::canonicalize(&b.path).ok();
    ca.is_some() && ca == cb
}

/// Create the empty-tree root commit on `branch` and point HEAD at it.
fn init_branch(repo: &git2::Repository, branch: &str, sig: &Signature) -> Result<()> {
    let tree_oid = repo.treebuilder(None)?.write()?;
    let tree = repo.find_tree(tree_oid)?;

    let git_sig = git2::Signature::now(&sig.name, &sig.email)?;
    let refname = format!("refs/heads/{}", branch);
    let message = format!("Initialize {}", branch);

    repo.commit(Some(&refname), &git_sig, &git_sig, &message, &tree, &[])?;
    repo.set_head(&refname)?;
    Ok(())
}
