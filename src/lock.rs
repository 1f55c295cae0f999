//! The repository write lock.
//!
//! Ref mutations are serialized by two nested locks: a process-wide
//! reentrant mutex looked up in a global table keyed by repository identity
//! (device + inode, so two paths naming the same repo — symlinks included —
//! contend on one lock), and an exclusive advisory file lock that extends
//! the exclusion across processes.
//!
//! The lock file is `vost.lock` inside a directory repository, or
//! `<repo>.lock` beside a file-backed one; the name is shared with the
//! other implementations of this store so foreign processes serialize too.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::thread::{self, ThreadId};

use fs2::FileExt;

use crate::error::{Error, Result};

const LOCK_FILE: &str = "vost.lock";

// ---------------------------------------------------------------------------
// Repo identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RepoKey {
    DevIno(u64, u64),
    Path(PathBuf),
}

fn repo_key(path: &Path) -> RepoKey {
    let real = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Ok(meta) = std::fs::metadata(&real) {
            if meta.ino() != 0 {
                return RepoKey::DevIno(meta.dev(), meta.ino());
            }
        }
    }
    RepoKey::Path(real)
}

// ---------------------------------------------------------------------------
// Reentrant in-process lock
// ---------------------------------------------------------------------------

struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// A mutex the owning thread may re-acquire.
struct ReentrantLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl ReentrantLock {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                owner: None,
                depth: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let me = thread::current().id();
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match st.owner {
                None => {
                    st.owner = Some(me);
                    st.depth = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    st.depth += 1;
                    return;
                }
                Some(_) => {
                    st = self.cond.wait(st).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn release(&self) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert_eq!(st.owner, Some(thread::current().id()));
        st.depth = st.depth.saturating_sub(1);
        if st.depth == 0 {
            st.owner = None;
            self.cond.notify_one();
        }
    }
}

/// Releases the in-process lock on every exit path, panics included.
struct ThreadLockGuard<'a>(&'a ReentrantLock);

impl Drop for ThreadLockGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

fn thread_lock_for(path: &Path) -> Arc<ReentrantLock> {
    static TABLE: OnceLock<Mutex<HashMap<RepoKey, Arc<ReentrantLock>>>> = OnceLock::new();
    let table = TABLE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = table.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(
        map.entry(repo_key(path))
            .or_insert_with(|| Arc::new(ReentrantLock::new())),
    )
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn lock_file_path(repo_path: &Path) -> PathBuf {
    if repo_path.is_dir() {
        repo_path.join(LOCK_FILE)
    } else {
        let mut s = repo_path.as_os_str().to_os_string();
        s.push(".lock");
        PathBuf::from(s)
    }
}

/// Run `f` while holding the repository write lock.
///
/// Acquires the in-process lock, then the cross-process file lock; both are
/// released when `f` returns or panics.
///
/// # Errors
/// Any error opening or locking the lock file, plus whatever `f` returns.
pub fn with_repo_lock<F, T>(repo_path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let tlock = thread_lock_for(repo_path);
    tlock.acquire();
    let _guard = ThreadLockGuard(&tlock);

    let lock_path = lock_file_path(repo_path);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| Error::io(&lock_path, e))?;
    file.lock_exclusive().map_err(|e| Error::io(&lock_path, e))?;

    let result = f();

    let _ = file.unlock();
    result
}
