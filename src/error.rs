/// All errors produced by strata.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Path, ref, or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A file operation was applied to a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// A directory operation was applied to a non-directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A symlink operation was applied to a non-symlink.
    #[error("not a symlink: {0}")]
    NotALink(String),

    /// Path is empty or contains `.`/`..`/empty segments.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Ref name contains a forbidden character.
    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    /// Tag does not resolve to a commit.
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    /// Attempt to overwrite an existing tag.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Write attempted on a read-only snapshot.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The branch moved since this snapshot was taken; refetch and retry.
    #[error("stale snapshot: {0}")]
    StaleSnapshot(String),

    /// Cross-repo operation, scp-style URL, same src/dst, and similar misuse.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation on a closed batch or writer.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Commit message template contains an unknown placeholder.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Network or protocol failure talking to a remote.
    #[error("transport error: {0}")]
    Transport(String),

    /// The given location is not a git repository.
    #[error("not a git repository: {0}")]
    NotGitRepository(String),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn not_a_link(path: impl Into<String>) -> Self {
        Self::NotALink(path.into())
    }

    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    pub fn invalid_ref_name(msg: impl Into<String>) -> Self {
        Self::InvalidRefName(msg.into())
    }

    pub fn invalid_tag(msg: impl Into<String>) -> Self {
        Self::InvalidTag(msg.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn stale_snapshot(msg: impl Into<String>) -> Self {
        Self::StaleSnapshot(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn not_git_repository(what: impl Into<String>) -> Self {
        Self::NotGitRepository(what.into())
    }

    /// Attach the failing path to an io error.
    pub fn io(path: impl Into<std::path::PathBuf>, err: std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.into().display(), err),
        ))
    }
}
