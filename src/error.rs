//! # Error Handling
//!
//! This module defines the centralized error type for the code flow engine.
//! It uses the `thiserror` library to build a single `Error` enum covering
//! every failure mode the engine can surface, with enough context attached
//! for a caller to act on it.
//!
//! ## Taxonomy
//!
//! - **Configuration errors** (`Configuration`, `JsonTypeMismatch`,
//!   `VersionDetails`): malformed mapping files, manifests, or dependency
//!   files. Fatal and never retried.
//! - **Not-found errors** (`NotFound`): refs missing on every remote tried,
//!   unknown mapping names, missing manifest records.
//! - **Process failures** (`ProcessFailed`, `PatchApplicationFailed`): a git
//!   invocation exited non-zero or timed out. The captured output is kept so
//!   callers can extract conflicted paths.
//! - **Conflicts** (`PrBranchConflict`, `ConflictingDependencyUpdate`):
//!   textual conflicts against a live PR branch, and semantic dependency
//!   conflicts that cannot be arbitrated.
//! - **Cancellation** (`Cancelled`): cooperative cancellation, never wrapped.
//!
//! The `Result<T>` alias is used throughout the library.

use thiserror::Error;

/// Main error type for code flow operations
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration file (mappings, manifest) could not be parsed or is
    /// missing a required value.
    #[error("Configuration error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    Configuration {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// A mapping, manifest record, ref or remote could not be found.
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// An external process (usually git) exited with a non-zero code or was
    /// killed after its timeout elapsed.
    #[error("{}Process failed: {command} (exit code {}){}",
        if *timed_out { "Timed out: " } else { "" },
        exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()),
        if stderr.trim().is_empty() { String::new() } else { format!("\n{}", stderr.trim()) })]
    ProcessFailed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        timed_out: bool,
    },

    /// `git apply` refused a patch.
    #[error("Failed to apply patch {patch}{}", if stderr.trim().is_empty() { String::new() } else { format!("\n{}", stderr.trim()) })]
    PatchApplicationFailed {
        patch: String,
        stdout: String,
        stderr: String,
    },

    /// Changes could not be applied on top of an already existing PR branch.
    #[error("Failed to flow changes due to conflicts in the head branch: {}", files.join(", "))]
    PrBranchConflict { files: Vec<String> },

    /// The same dependency was changed on both sides in ways that cannot be
    /// reconciled automatically.
    #[error("Conflicting dependency update: {message}")]
    ConflictingDependencyUpdate { message: String },

    /// A flattened JSON property changed its type between two snapshots.
    #[error("Type mismatch for JSON property '{path}': {left} vs {right}")]
    JsonTypeMismatch {
        path: String,
        left: String,
        right: String,
    },

    /// The Version.Details.xml dependency file is malformed.
    #[error("Version details error: {message}")]
    VersionDetails { message: String },

    /// Mapping metadata was accessed before it was loaded.
    #[error("Source mappings have not been initialized")]
    NotInitialized,

    /// The operation was cancelled cooperatively.
    #[error("Operation was cancelled")]
    Cancelled,

    /// A caller passed an argument the operation cannot work with.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The history of flows between the VMR and a repository is inconsistent.
    #[error("Invalid synchronization: {message}")]
    InvalidSynchronization { message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },
}

impl Error {
    /// Shorthand for a configuration error without a hint.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            hint: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Extract the paths git reported as not applicable from a failed patch
    /// application or a failed process.
    ///
    /// Recognizes `error: patch failed: <path>:<line>` and
    /// `error: <path>: patch does not apply` lines.
    pub fn conflicted_files(&self) -> Vec<String> {
        let stderr = match self {
            Error::PatchApplicationFailed { stderr, .. } => stderr,
            Error::ProcessFailed { stderr, .. } => stderr,
            _ => return Vec::new(),
        };

        let mut files: Vec<String> = Vec::new();
        for line in stderr.lines() {
            let line = line.trim();
            let candidate = if let Some(rest) = line.strip_prefix("error: patch failed: ") {
                rest.rsplit_once(':').map(|(path, _)| path)
            } else if let Some(rest) = line.strip_prefix("error: ") {
                rest.strip_suffix(": patch does not apply")
            } else {
                None
            };

            if let Some(path) = candidate {
                if !files.iter().any(|f| f == path) {
                    files.push(path.to_string());
                }
            }
        }
        files
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_configuration() {
        let error = Error::config("Missing name");
        let display = format!("{}", error);
        assert!(display.contains("Configuration error"));
        assert!(display.contains("Missing name"));
        assert!(!display.contains("hint:"));
    }

    #[test]
    fn test_error_display_configuration_with_hint() {
        let error = Error::Configuration {
            message: "Missing defaultRemote".to_string(),
            hint: Some("Add 'defaultRemote' to the mapping".to_string()),
        };
        let display = format!("{}", error);
        assert!(display.contains("hint:"));
        assert!(display.contains("Add 'defaultRemote'"));
    }

    #[test]
    fn test_error_display_process_failed() {
        let error = Error::ProcessFailed {
            command: "git fetch origin".to_string(),
            exit_code: Some(128),
            stdout: String::new(),
            stderr: "fatal: could not read from remote".to_string(),
            timed_out: false,
        };
        let display = format!("{}", error);
        assert!(display.starts_with("Process failed"));
        assert!(display.contains("git fetch origin"));
        assert!(display.contains("128"));
        assert!(display.contains("could not read from remote"));
    }

    #[test]
    fn test_error_display_process_timed_out() {
        let error = Error::ProcessFailed {
            command: "git clone".to_string(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        };
        let display = format!("{}", error);
        assert!(display.starts_with("Timed out"));
        assert!(display.contains("exit code none"));
    }

    #[test]
    fn test_error_display_pr_branch_conflict() {
        let error = Error::PrBranchConflict {
            files: vec!["src/a.txt".to_string(), "src/b.txt".to_string()],
        };
        assert!(format!("{}", error).contains("src/a.txt, src/b.txt"));
    }

    #[test]
    fn test_error_display_not_initialized() {
        assert_eq!(
            format!("{}", Error::NotInitialized),
            "Source mappings have not been initialized"
        );
    }

    #[test]
    fn test_error_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::NotInitialized.is_cancelled());
    }

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error: Error = io_error.into();
        let display = format!("{}", error);
        assert!(display.contains("I/O error"));
        assert!(display.contains("File not found"));
    }

    #[test]
    fn test_error_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: Error = json_error.into();
        assert!(format!("{}", error).contains("JSON error"));
    }

    #[test]
    fn test_conflicted_files_from_patch_failure() {
        let error = Error::PatchApplicationFailed {
            patch: "/tmp/repo.patch".to_string(),
            stdout: String::new(),
            stderr: "error: patch failed: src/repo/file.txt:12\n\
                     error: src/repo/file.txt: patch does not apply\n\
                     error: src/repo/other.txt: patch does not apply\n"
                .to_string(),
        };
        assert_eq!(
            error.conflicted_files(),
            vec!["src/repo/file.txt".to_string(), "src/repo/other.txt".to_string()]
        );
    }

    #[test]
    fn test_conflicted_files_other_errors() {
        assert!(Error::Cancelled.conflicted_files().is_empty());
    }
}
