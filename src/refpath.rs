//! Parsing of `ref:path` command-line arguments.
//!
//! Collaborating tools accept either a local filesystem path or a
//! repository address of the form `[name][~N]:path`. The two cases become
//! an explicit sum type here:
//!
//! - `:path` — file on the default branch
//! - `name:path` — file on ref `name`
//! - `name~N:path` — file on the N-th ancestor of `name`
//! - `~N:path` — N-th ancestor of the default branch
//!
//! A `/` or `\` anywhere before the first colon makes the argument a local
//! path, as does a Windows drive letter (single letter, colon, path
//! separator). Only the first colon splits; later colons belong to the
//! path.

use crate::error::{Error, Result};

/// A parsed path-or-ref argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathArg {
    /// A local filesystem path, passed through verbatim.
    Local(String),
    /// A path inside the repository.
    Ref {
        /// Ref name; `None` means the default branch.
        name: Option<String>,
        /// How many first-parent steps to walk back.
        back: usize,
        /// Path within the snapshot (empty for the root).
        path: String,
    },
}

impl PathArg {
    /// `true` when the argument addresses the repository.
    pub fn is_repo(&self) -> bool {
        matches!(self, PathArg::Ref { .. })
    }

    /// Parse one argument.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] for a malformed ancestor suffix (`~0`,
    /// `~abc`).
    pub fn parse(arg: &str) -> Result<PathArg> {
        let colon = match arg.find(':') {
            Some(i) => i,
            None => return Ok(PathArg::Local(arg.to_string())),
        };

        let prefix = &arg[..colon];
        let rest = &arg[colon + 1..];

        if prefix.contains('/') || prefix.contains('\\') {
            return Ok(PathArg::Local(arg.to_string()));
        }
        // Windows drive letter: `C:/...` or `C:\...`.
        if prefix.len() == 1 && (rest.starts_with('/') || rest.starts_with('\\')) {
            return Ok(PathArg::Local(arg.to_string()));
        }

        let (name_part, back) = match prefix.rsplit_once('~') {
            Some((name, count)) => {
                let back: usize = count.parse().map_err(|_| {
                    Error::invalid_argument(format!(
                        "ancestor count in {:?} must be a positive integer",
                        arg
                    ))
                })?;
                if back == 0 {
                    return Err(Error::invalid_argument(format!(
                        "~0 is not a valid ancestor in {:?}",
                        arg
                    )));
                }
                (name, back)
            }
            None => (prefix, 0),
        };

        let name = if name_part.is_empty() {
            None
        } else {
            Some(name_part.to_string())
        };
        Ok(PathArg::Ref {
            name,
            back,
            path: rest.to_string(),
        })
    }
}
