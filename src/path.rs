//! Path primitives used across the VMR
//!
//! Two wrappers keep the two kinds of paths apart:
//!
//! - [`UnixPath`]: a repository-relative path with `/` separators, as git and
//!   the manifests see it (`src/runtime/eng/common`).
//! - [`NativePath`]: an absolute path on the local machine.
//!
//! Joining a `UnixPath` onto a `NativePath` converts separators, so callers
//! never splice strings together by hand.

use std::fmt;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use crate::error::{Error, Result};

/// Repository-relative path that always uses `/` as separator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct UnixPath(String);

impl UnixPath {
    /// Normalize separators and drop redundant slashes.
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalized = path
            .as_ref()
            .replace('\\', "/")
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect::<Vec<_>>()
            .join("/");
        UnixPath(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join(&self, other: impl AsRef<str>) -> UnixPath {
        let other = UnixPath::new(other);
        if self.0.is_empty() {
            return other;
        }
        if other.0.is_empty() {
            return self.clone();
        }
        UnixPath(format!("{}/{}", self.0, other.0))
    }

    /// Last path segment
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Strip `prefix/` from the start of the path.
    pub fn strip_prefix(&self, prefix: &UnixPath) -> Option<UnixPath> {
        if prefix.is_empty() {
            return Some(self.clone());
        }
        self.0
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .map(UnixPath::new)
    }
}

impl fmt::Display for UnixPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnixPath {
    fn from(value: &str) -> Self {
        UnixPath::new(value)
    }
}

impl From<String> for UnixPath {
    fn from(value: String) -> Self {
        UnixPath::new(value)
    }
}

impl AsRef<str> for UnixPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Absolute path on the local file system
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NativePath(PathBuf);

impl NativePath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        NativePath(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Append a repository-relative path, converting separators.
    pub fn join(&self, relative: impl AsRef<str>) -> NativePath {
        let relative = UnixPath::new(relative);
        let mut path = self.0.clone();
        for segment in relative.as_str().split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        NativePath(path)
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl fmt::Display for NativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for NativePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl From<PathBuf> for NativePath {
    fn from(value: PathBuf) -> Self {
        NativePath(value)
    }
}

impl From<&Path> for NativePath {
    fn from(value: &Path) -> Self {
        NativePath(value.to_path_buf())
    }
}

/// Match a repository-relative path against a glob pattern.
///
/// `*` does not cross directory boundaries, `**` does.
pub fn glob_match(pattern: &str, path: &str) -> Result<bool> {
    let pattern = Pattern::new(pattern).map_err(Error::Glob)?;
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    Ok(pattern.matches_with(path, options))
}

/// Name of the local clone directory for a remote URI.
///
/// Takes the last segment of the URI and strips a trailing `.git`.
pub fn clone_dir_name(uri: &str) -> String {
    let trimmed = uri.trim_end_matches(['/', '\\']);
    let last = trimmed
        .rsplit(['/', '\\', ':'])
        .next()
        .unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

/// Encode a URI into a string usable as a git remote or directory name.
pub fn encode_url_path(url: &str) -> String {
    url.chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' => c,
            _ => '-',
        })
        .collect()
}
