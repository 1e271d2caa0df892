//! Record of which commit of every repository and submodule is embedded in
//! the VMR (`src/source-manifest.json`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::git::EMPTY_GIT_OBJECT;

/// A mapped repository embedded under `src/<path>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRecord {
    pub path: String,
    pub remote_uri: String,
    pub commit_sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar_id: Option<i64>,
}

/// A submodule of a mapped repository, `path` is relative to `src/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmoduleRecord {
    pub path: String,
    pub remote_uri: String,
    pub commit_sha: String,
}

impl SubmoduleRecord {
    pub fn new(path: impl Into<String>, remote_uri: impl Into<String>, commit_sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            remote_uri: remote_uri.into(),
            commit_sha: commit_sha.into(),
        }
    }

    /// A record with the empty object SHA marks a removed submodule.
    pub fn is_removal(&self) -> bool {
        self.commit_sha == EMPTY_GIT_OBJECT
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceManifest {
    #[serde(default)]
    repositories: Vec<RepositoryRecord>,
    #[serde(default)]
    submodules: Vec<SubmoduleRecord>,
}

impl SourceManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Option<SourceManifest> = serde_json::from_str(json)?;
        manifest.ok_or_else(|| Error::config("Failed to deserialize source-manifest.json"))
    }

    /// Reload from `path`. A missing file yields an empty manifest.
    pub fn refresh(&mut self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        *self = if fs.file_exists(path) {
            Self::from_json(&fs.read_to_string(path)?)?
        } else {
            Self::default()
        };
        Ok(())
    }

    /// Pretty-printed JSON with both lists sorted by path
    pub fn to_json(&self) -> Result<String> {
        let mut sorted = self.clone();
        sorted.repositories.sort_by(|a, b| a.path.cmp(&b.path));
        sorted.submodules.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(serde_json::to_string_pretty(&sorted)?)
    }

    pub fn repositories(&self) -> &[RepositoryRecord] {
        &self.repositories
    }

    pub fn submodules(&self) -> &[SubmoduleRecord] {
        &self.submodules
    }

    /// Insert or replace the record of a repository. `None` keeps the
    /// previously recorded build id. Paths match case-insensitively and an
    /// existing record keeps its stored path.
    pub fn update_version(&mut self, path: &str, remote_uri: &str, commit_sha: &str, bar_id: Option<i64>) {
        match self.repositories.iter_mut().find(|r| r.path.eq_ignore_ascii_case(path)) {
            Some(record) => {
                record.remote_uri = remote_uri.to_string();
                record.commit_sha = commit_sha.to_string();
                if bar_id.is_some() {
                    record.bar_id = bar_id;
                }
            }
            None => self.repositories.push(RepositoryRecord {
                path: path.to_string(),
                remote_uri: remote_uri.to_string(),
                commit_sha: commit_sha.to_string(),
                bar_id,
            }),
        }
    }

    /// Upsert a submodule, or drop it when the record marks a removal.
    pub fn update_submodule(&mut self, submodule: &SubmoduleRecord) {
        if submodule.is_removal() {
            self.remove_submodule(&submodule.path);
            return;
        }

        match self.submodules.iter_mut().find(|s| s.path.eq_ignore_ascii_case(&submodule.path)) {
            Some(existing) => *existing = submodule.clone(),
            None => self.submodules.push(submodule.clone()),
        }
    }

    /// Remove a repository along with every submodule below it.
    pub fn remove_repository(&mut self, path: &str) {
        self.repositories.retain(|r| !r.path.eq_ignore_ascii_case(path));
        self.submodules.retain(|s| !is_below(&s.path, path));
    }

    pub fn remove_submodule(&mut self, path: &str) {
        self.submodules.retain(|s| !s.path.eq_ignore_ascii_case(path));
    }

    pub fn try_get_repo_version(&self, name: &str) -> Option<SubmoduleRecord> {
        self.repositories
            .iter()
            .find(|r| r.path.eq_ignore_ascii_case(name))
            .map(|r| SubmoduleRecord::new(&r.path, &r.remote_uri, &r.commit_sha))
            .or_else(|| {
                self.submodules
                    .iter()
                    .find(|s| s.path.eq_ignore_ascii_case(name))
                    .cloned()
            })
    }

    /// Current path, URI and commit of a repository or submodule
    pub fn get_repo_version(&self, name: &str) -> Result<SubmoduleRecord> {
        self.try_get_repo_version(name)
            .ok_or_else(|| Error::not_found(format!("No manifest record named {} found", name)))
    }

    pub fn get_repository(&self, path: &str) -> Option<&RepositoryRecord> {
        self.repositories
            .iter()
            .find(|r| r.path.eq_ignore_ascii_case(path))
    }

    /// Submodules recorded below the repository at `path`
    pub fn submodules_of(&self, path: &str) -> Vec<&SubmoduleRecord> {
        self.submodules.iter().filter(|s| is_below(&s.path, path)).collect()
    }
}

/// Whether `path` lies under the `parent` directory, ignoring ASCII case
fn is_below(path: &str, parent: &str) -> bool {
    path.as_bytes().get(parent.len()) == Some(&b'/')
        && path.get(..parent.len()).is_some_and(|head| head.eq_ignore_ascii_case(parent))
}
