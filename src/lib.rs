//! A persistent, branching, versioned filesystem backed by a bare git
//! repository.
//!
//! `strata` treats the git object model as durable application storage:
//! every write is an atomic commit, branches are cheap forks, tags are
//! write-once marks, and unchanged subtrees are shared between commits
//! rather than copied. Any git client can read (and back up) the result.
//!
//! # Key types
//!
//! - [`Store`] — opens (or creates) a bare repository and hands out
//!   branches, tags, and mirror operations.
//! - [`Snapshot`] — one commit viewed as an immutable filesystem. Reads
//!   never mutate; writes commit and return a **new** snapshot.
//! - [`Batch`] — accumulates writes and removes into a single commit,
//!   with stale-snapshot detection against concurrent writers.
//!
//! # Quick example
//!
//! ```no_run
//! use strata::{Store, OpenOptions};
//!
//! let store = Store::open(
//!     "/tmp/my-repo",
//!     OpenOptions { create: true, ..Default::default() },
//! ).unwrap();
//!
//! let fs = store.branches().get("main").unwrap();
//! let fs = fs.write("hello.txt", b"world", Default::default()).unwrap();
//! assert_eq!(fs.read_text("hello.txt").unwrap(), "world");
//!
//! // The previous snapshot is still intact one commit back.
//! assert!(!fs.back(1).unwrap().exists("hello.txt").unwrap());
//! ```

pub mod batch;
pub mod error;
pub mod glob;
pub mod lock;
pub mod message;
pub mod mirror;
pub mod paths;
pub mod refpath;
pub mod refs;
pub mod sizer;
pub mod snapshot;
pub mod store;
pub mod transfer;
pub mod tree;
pub mod types;
pub mod writer;

pub use batch::Batch;
pub use error::{Error, Result};
pub use mirror::{BackupOptions, RestoreOptions};
pub use refpath::PathArg;
pub use refs::{Branches, Tags};
pub use sizer::ObjectSizer;
pub use snapshot::{
    BatchOptions, CopyFromRefOptions, History, MoveOptions, RemoveOptions, Snapshot, Walk,
    WriteOptions,
};
pub use store::{OpenOptions, Store};
pub use transfer::ImportOptions;
pub use types::*;
pub use writer::{BatchWriter, SnapshotWriter};
