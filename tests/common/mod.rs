//! Shared test utilities for integration and E2E tests.
//!
//! Add `mod common;` to a test file and `use common::prelude::*;`.
//!
//! ```rust,ignore
//! let fixture = VmrFixture::new().with_default_metadata();
//! fixture.command().arg("mappings").assert().success();
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::git;
    #[allow(unused_imports)]
    pub use super::metadata;
    pub use super::VmrFixture;
}

/// Snippets of VMR metadata files.
#[allow(dead_code)]
pub mod metadata {
    pub const MAPPINGS: &str = r#"{
  // Shared by every mapping
  "defaults": {
    "defaultRef": "main",
    "exclude": [ "**/*.zip" ]
  },
  "mappings": [
    {
      "name": "runtime",
      "defaultRemote": "https://github.com/dotnet/runtime",
      "exclude": [ "src/libraries/**/*.dll" ]
    },
    {
      "name": "sdk",
      "defaultRemote": "https://github.com/dotnet/sdk",
      "defaultRef": "release/9.0",
      "disableSynchronization": true
    },
  ]
}"#;

    pub const MANIFEST: &str = r#"{
  "repositories": [
    {
      "path": "runtime",
      "remoteUri": "https://github.com/dotnet/runtime",
      "commitSha": "1111111111111111111111111111111111111111",
      "barId": 1234
    }
  ],
  "submodules": [
    {
      "path": "runtime/external/zlib",
      "remoteUri": "https://github.com/madler/zlib",
      "commitSha": "2222222222222222222222222222222222222222"
    }
  ]
}"#;

    pub const INVALID_MAPPINGS: &str = r#"{ "mappings": [ { "name": "runtime" } ] }"#;
}

/// A VMR working tree in a temporary directory.
pub struct VmrFixture {
    temp_dir: assert_fs::TempDir,
}

impl VmrFixture {
    pub fn new() -> Self {
        let temp_dir = assert_fs::TempDir::new().expect("Failed to create temp directory");
        temp_dir
            .child("vmr")
            .create_dir_all()
            .expect("Failed to create VMR directory");
        Self { temp_dir }
    }

    /// Write `src/source-mappings.json`.
    pub fn with_mappings(self, content: &str) -> Self {
        self.with_file("src/source-mappings.json", content)
    }

    /// Write `src/source-manifest.json`.
    pub fn with_manifest(self, content: &str) -> Self {
        self.with_file("src/source-manifest.json", content)
    }

    pub fn with_default_metadata(self) -> Self {
        self.with_mappings(metadata::MAPPINGS)
            .with_manifest(metadata::MANIFEST)
    }

    /// Add a file relative to the VMR root.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.vmr()
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    #[allow(dead_code)]
    pub fn with_binary_file(self, path: &str, content: &[u8]) -> Self {
        self.vmr()
            .child(path)
            .write_binary(content)
            .expect("Failed to write binary file");
        self
    }

    pub fn vmr(&self) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child("vmr")
    }

    pub fn vmr_path(&self) -> PathBuf {
        self.temp_dir.path().join("vmr")
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.temp_dir.path().join("tmp")
    }

    #[allow(dead_code)]
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A command pointed at this fixture's VMR and tmp directories.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("vmr-codeflow");
        cmd.env_remove("VMR_PATH")
            .env_remove("VMR_TMP")
            .arg("--vmr")
            .arg(self.vmr_path())
            .arg("--tmp")
            .arg(self.tmp_path())
            .arg("--color")
            .arg("never");
        cmd
    }
}

impl Default for VmrFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `git` in `dir` and return its trimmed stdout. Panics on failure.
#[allow(dead_code)]
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
