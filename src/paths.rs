//! Path normalization and ref-name validation.
//!
//! Store paths are forward-slash separated and never begin or end with a
//! slash; the empty string is the tree root. Normalization is idempotent:
//! feeding its output back in returns the same string.

use crate::error::{Error, Result};

/// Normalize a store path.
///
/// Strips leading/trailing slashes, collapses repeated slashes and `.`
/// segments, and rejects `..`. The empty string and all-slash inputs
/// normalize to the root (empty string).
///
/// # Errors
/// [`Error::InvalidPath`] when the path contains a `..` segment or
/// collapses to nothing without being a root spelling.
pub fn normalize(path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(String::new());
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            // leading/trailing/doubled slashes
            "" => continue,
            "." => continue,
            ".." => {
                return Err(Error::invalid_path(
                    "path must not contain '..' segments",
                ));
            }
            _ => segments.push(seg),
        }
    }

    if segments.is_empty() {
        // "///" is a root spelling; "." or "./." is not.
        if path.bytes().all(|b| b == b'/') {
            return Ok(String::new());
        }
        return Err(Error::invalid_path(format!(
            "path {:?} collapses to nothing",
            path
        )));
    }

    Ok(segments.join("/"))
}

/// Returns `true` when `path` denotes the tree root.
pub fn is_root(path: &str) -> bool {
    path.is_empty() || path.bytes().all(|b| b == b'/')
}

/// Return the final segment of a normalized path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join a directory prefix and a relative path, treating an empty prefix
/// as the root.
pub fn join(prefix: &str, rest: &str) -> String {
    if prefix.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, rest)
    }
}

/// Validate a branch or tag name.
///
/// Names must be non-empty and must not contain a colon (reserved by the
/// `ref:path` argument syntax), space, tab, or newline. Slashes and dots
/// are allowed.
///
/// # Errors
/// [`Error::InvalidRefName`] naming the offending character.
pub fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_ref_name("ref name must not be empty"));
    }
    for ch in name.chars() {
        let what = match ch {
            ':' => "colon",
            ' ' => "space",
            '\t' => "tab",
            '\n' | '\r' => "newline",
            _ => continue,
        };
        return Err(Error::invalid_ref_name(format!(
            "ref name {:?} contains a {}",
            name, what
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_root() {
        assert_eq!(normalize("").unwrap(), "");
        assert_eq!(normalize("/").unwrap(), "");
        assert_eq!(normalize("///").unwrap(), "");
    }

    #[test]
    fn normalize_strips_slashes() {
        assert_eq!(normalize("/a/b/c/").unwrap(), "a/b/c");
        assert_eq!(normalize("a//b///c").unwrap(), "a/b/c");
    }

    #[test]
    fn normalize_collapses_dot() {
        assert_eq!(normalize("a/./b").unwrap(), "a/b");
        assert_eq!(normalize("./a/b/.").unwrap(), "a/b");
    }

    #[test]
    fn normalize_idempotent() {
        for p in ["", "a", "a/b/c", "/x//y/./z/"] {
            let once = normalize(p).unwrap();
            assert_eq!(normalize(&once).unwrap(), once);
        }
    }

    #[test]
    fn normalize_rejects_dotdot() {
        assert!(matches!(normalize("a/../b"), Err(Error::InvalidPath(_))));
        assert!(matches!(normalize(".."), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn normalize_rejects_only_dots() {
        assert!(matches!(normalize("."), Err(Error::InvalidPath(_))));
        assert!(matches!(normalize("./."), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn root_detection() {
        assert!(is_root(""));
        assert!(is_root("//"));
        assert!(!is_root("a"));
    }

    #[test]
    fn basename_of_nested_path() {
        assert_eq!(basename("a/b/c.txt"), "c.txt");
        assert_eq!(basename("c.txt"), "c.txt");
    }

    #[test]
    fn ref_name_ok() {
        validate_ref_name("main").unwrap();
        validate_ref_name("feature/my-thing.v2").unwrap();
    }

    #[test]
    fn ref_name_rejects_colon() {
        assert!(validate_ref_name("my:branch").is_err());
    }

    #[test]
    fn ref_name_rejects_whitespace() {
        assert!(validate_ref_name("my branch").is_err());
        assert!(validate_ref_name("my\tbranch").is_err());
        assert!(validate_ref_name("my\nbranch").is_err());
    }

    #[test]
    fn ref_name_rejects_empty() {
        assert!(validate_ref_name("").is_err());
    }

    #[test]
    fn ref_name_allows_dots_and_slashes() {
        validate_ref_name("v1.0").unwrap();
        validate_ref_name("release/v1.0").unwrap();
    }
}
