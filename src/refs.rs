//! Branch and tag dictionaries.
//!
//! Both views share the same ref plumbing but carry different write
//! policies: branches fork and advance freely, tags are write-once, and a
//! snapshot obtained from a tag is read-only.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::lock::with_repo_lock;
use crate::paths;
use crate::snapshot::Snapshot;
use crate::store::{Store, StoreInner};

pub(crate) const BRANCH_PREFIX: &str = "refs/heads/";
pub(crate) const TAG_PREFIX: &str = "refs/tags/";

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

/// The direct or resolved target of `refname`, or `None` if absent.
fn ref_target(repo: &git2::Repository, refname: &str) -> Option<git2::Oid> {
    match repo.find_reference(refname) {
        Ok(r) => r
            .target()
            .or_else(|| r.resolve().ok().and_then(|r| r.target())),
        Err(_) => None,
    }
}

fn list_prefixed(inner: &StoreInner, prefix: &str) -> Result<Vec<(String, git2::Oid)>> {
    let repo = inner.git();
    let mut out = Vec::new();
    for reference in repo.references()?.flatten() {
        let name = match reference.name() {
            Some(n) => n,
            None => continue,
        };
        if let Some(short) = name.strip_prefix(prefix) {
            if let Some(oid) = reference
                .target()
                .or_else(|| reference.resolve().ok().and_then(|r| r.target()))
            {
                out.push((short.to_string(), oid));
            }
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn delete_ref(inner: &StoreInner, refname: &str, short: &str) -> Result<()> {
    with_repo_lock(&inner.path, || {
        let repo = inner.git();
        let mut reference = repo
            .find_reference(refname)
            .map_err(|_| Error::not_found(short.to_string()))?;
        reference.delete()?;
        Ok(())
    })
}

fn require_same_store(inner: &Arc<StoreInner>, fs: &Snapshot) -> Result<()> {
    if crate::store::same_store(inner, &fs.inner) {
        Ok(())
    } else {
        Err(Error::invalid_argument(
            "snapshot belongs to a different repository",
        ))
    }
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

/// Dictionary view over `refs/heads/`.
pub struct Branches<'a> {
    store: &'a Store,
}

impl<'a> Branches<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    fn refname(name: &str) -> String {
        format!("{}{}", BRANCH_PREFIX, name)
    }

    /// A writable [`Snapshot`] at the branch head.
    pub fn get(&self, name: &str) -> Result<Snapshot> {
        paths::validate_ref_name(name)?;
        let oid = {
            let repo = self.store.inner.git();
            ref_target(&repo, &Self::refname(name))
                .ok_or_else(|| Error::not_found(format!("branch {}", name)))?
        };
        Snapshot::from_commit(
            Arc::clone(&self.store.inner),
            oid,
            Some(name.to_string()),
            true,
        )
    }

    /// Create or advance `name` to the commit of `fs` (fork).
    pub fn set(&self, name: &str, fs: &Snapshot) -> Result<()> {
        paths::validate_ref_name(name)?;
        require_same_store(&self.store.inner, fs)?;
        let refname = Self::refname(name);
        with_repo_lock(&self.store.inner.path, || {
            let repo = self.store.inner.git();
            repo.reference(
                &refname,
                fs.commit_oid,
                true,
                &format!("branch: set {}", name),
            )?;
            Ok(())
        })
    }

    /// Delete the branch ref.
    pub fn delete(&self, name: &str) -> Result<()> {
        paths::validate_ref_name(name)?;
        delete_ref(&self.store.inner, &Self::refname(name), name)
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        paths::validate_ref_name(name)?;
        let repo = self.store.inner.git();
        Ok(ref_target(&repo, &Self::refname(name)).is_some())
    }

    /// Sorted branch names.
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(list_prefixed(&self.store.inner, BRANCH_PREFIX)?
            .into_iter()
            .map(|(n, _)| n)
            .collect())
    }

    /// Sorted `(name, commit hex)` pairs.
    pub fn iter(&self) -> Result<Vec<(String, String)>> {
        Ok(list_prefixed(&self.store.inner, BRANCH_PREFIX)?
            .into_iter()
            .map(|(n, oid)| (n, oid.to_string()))
            .collect())
    }

    /// The default branch (HEAD), or `None` when HEAD dangles.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] when HEAD points outside `refs/heads/`.
    pub fn default(&self) -> Result<Option<String>> {
        let repo = self.store.inner.git();
        let head = match repo.find_reference("HEAD") {
            Ok(h) => h,
            Err(_) => return Ok(None),
        };
        let target = match head.symbolic_target() {
            Some(t) => t.to_string(),
            None => return Ok(None), // detached
        };
        let short = target.strip_prefix(BRANCH_PREFIX).ok_or_else(|| {
            Error::invalid_argument(format!("HEAD points outside refs/heads/: {}", target))
        })?;
        if ref_target(&repo, &target).is_none() {
            // HEAD names a branch that doesn't exist.
            return Ok(None);
        }
        Ok(Some(short.to_string()))
    }

    /// Point HEAD at the named branch.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the branch does not exist.
    pub fn set_default(&self, name: &str) -> Result<()> {
        paths::validate_ref_name(name)?;
        let refname = Self::refname(name);
        with_repo_lock(&self.store.inner.path, || {
            let repo = self.store.inner.git();
            if ref_target(&repo, &refname).is_none() {
                return Err(Error::not_found(format!("branch {}", name)));
            }
            repo.reference_symbolic(
                "HEAD",
                &refname,
                true,
                &format!("set default branch: {}", name),
            )?;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Dictionary view over `refs/tags/`. Tags are write-once.
pub struct Tags<'a> {
    store: &'a Store,
}

impl<'a> Tags<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    fn refname(name: &str) -> String {
        format!("{}{}", TAG_PREFIX, name)
    }

    /// A read-only [`Snapshot`] at the tagged commit.
    ///
    /// Annotated tags are peeled to the commit they reference.
    ///
    /// # Errors
    /// [`Error::NotFound`] for a missing tag; [`Error::InvalidTag`] when
    /// the tag resolves to something other than a commit.
    pub fn get(&self, name: &str) -> Result<Snapshot> {
        paths::validate_ref_name(name)?;
        let commit_oid = {
            let repo = self.store.inner.git();
            let oid = ref_target(&repo, &Self::refname(name))
                .ok_or_else(|| Error::not_found(format!("tag {}", name)))?;
            let object = repo.find_object(oid, None)?;
            let peeled = match object.kind() {
                Some(git2::ObjectType::Tag) => object
                    .peel(git2::ObjectType::Commit)
                    .map_err(|_| {
                        Error::invalid_tag(format!("tag {} does not reference a commit", name))
                    })?
                    .id(),
                Some(git2::ObjectType::Commit) => oid,
                other => {
                    return Err(Error::invalid_tag(format!(
                        "tag {} points to a {:?}, not a commit",
                        name, other
                    )));
                }
            };
            peeled
        };
        Snapshot::from_commit(
            Arc::clone(&self.store.inner),
            commit_oid,
            Some(name.to_string()),
            false,
        )
    }

    /// Create tag `name` at the commit of `fs`.
    ///
    /// # Errors
    /// [`Error::AlreadyExists`] when the tag exists; delete it first to
    /// re-point it.
    pub fn set(&self, name: &str, fs: &Snapshot) -> Result<()> {
        paths::validate_ref_name(name)?;
        require_same_store(&self.store.inner, fs)?;
        let refname = Self::refname(name);
        with_repo_lock(&self.store.inner.path, || {
            let repo = self.store.inner.git();
            if ref_target(&repo, &refname).is_some() {
                return Err(Error::already_exists(format!("tag {}", name)));
            }
            repo.reference(&refname, fs.commit_oid, false, &format!("tag: set {}", name))
                .map_err(|e| {
                    if e.code() == git2::ErrorCode::Exists {
                        Error::already_exists(format!("tag {}", name))
                    } else {
                        Error::from(e)
                    }
                })?;
            Ok(())
        })
    }

    /// Delete the tag ref. Deleting and re-creating a tag is allowed.
    pub fn delete(&self, name: &str) -> Result<()> {
        paths::validate_ref_name(name)?;
        delete_ref(&self.store.inner, &Self::refname(name), name)
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        paths::validate_ref_name(name)?;
        let repo = self.store.inner.git();
        Ok(ref_target(&repo, &Self::refname(name)).is_some())
    }

    /// Sorted tag names.
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(list_prefixed(&self.store.inner, TAG_PREFIX)?
            .into_iter()
            .map(|(n, _)| n)
            .collect())
    }

    /// Sorted `(name, target hex)` pairs.
    pub fn iter(&self) -> Result<Vec<(String, String)>> {
        Ok(list_prefixed(&self.store.inner, TAG_PREFIX)?
            .into_iter()
            .map(|(n, oid)| (n, oid.to_string()))
            .collect())
    }
}
