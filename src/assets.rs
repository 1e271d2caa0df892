//! Build metadata consumed by flows

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filesystem::FileSystem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildAsset {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub non_shipping: bool,
}

/// A build of a repository, identified by its registry id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: i64,
    /// Commit the build was produced from
    pub commit: String,
    pub repository: String,
    #[serde(default)]
    pub assets: Vec<BuildAsset>,
}

impl Build {
    /// Case-insensitive asset lookup
    pub fn find_asset(&self, name: &str) -> Option<&BuildAsset> {
        self.assets.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

/// Source of build metadata
pub trait BuildClient: Send + Sync {
    fn get_build(&self, id: i64) -> Result<Build>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BuildFile {
    Many(Vec<Build>),
    One(Build),
}

/// [`BuildClient`] reading builds from a local JSON file holding either a
/// single build or a list of builds
pub struct JsonBuildClient {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl JsonBuildClient {
    pub fn new(path: impl AsRef<Path>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            fs,
        }
    }
}

impl BuildClient for JsonBuildClient {
    fn get_build(&self, id: i64) -> Result<Build> {
        let content = self.fs.read_to_string(&self.path)?;
        let builds = match serde_json::from_str::<BuildFile>(&content)? {
            BuildFile::Many(builds) => builds,
            BuildFile::One(build) => vec![build],
        };

        builds
            .into_iter()
            .find(|b| b.id == id)
            .ok_or_else(|| Error::not_found(format!("Build {} not found in {}", id, self.path.display())))
    }
}
