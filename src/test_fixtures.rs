//! Shared wiring for tests of the flow components

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::assets::{Build, BuildAsset};
use crate::cache::CloneCache;
use crate::clone_manager::CloneManager;
use crate::codeflow::CodeflowOptions;
use crate::dependency_tracker::DependencyTracker;
use crate::filesystem::{FileSystem, LocalFileSystem};
use crate::git::testing::MockGitClient;
use crate::git::GitClient;
use crate::patch_handler::PatchHandler;
use crate::source_mapping::{SourceMapping, SourceMappingParser};
use crate::telemetry::LogTelemetryRecorder;
use crate::vmr_info::VmrInfo;

pub const MAPPING: &str = "runtime";
pub const REMOTE: &str = "https://github.com/dotnet/runtime";
pub const VMR_REMOTE: &str = "https://github.com/dotnet/dotnet";

pub const MAPPINGS_JSON: &str = r#"{
  "mappings": [
    { "name": "runtime", "defaultRemote": "https://github.com/dotnet/runtime" }
  ]
}"#;

pub fn manifest_json(repo_sha: &str) -> String {
    format!(
        r#"{{
  "repositories": [
    {{
      "path": "runtime",
      "remoteUri": "https://github.com/dotnet/runtime",
      "commitSha": "{}"
    }}
  ],
  "submodules": []
}}
"#,
        repo_sha
    )
}

/// A VMR and a repository clone in a temporary directory, with every
/// component wired to the same mock git client
pub struct Harness {
    pub _temp: TempDir,
    pub vmr: PathBuf,
    pub repo: PathBuf,
    pub info: VmrInfo,
    pub git: MockGitClient,
    pub fs: Arc<dyn FileSystem>,
    pub tracker: Arc<DependencyTracker>,
    pub clones: Arc<CloneManager>,
    pub patches: Arc<PatchHandler>,
}

impl Harness {
    /// `make_git` receives the VMR and repository paths.
    pub fn new<F>(manifest_sha: &str, make_git: F) -> Self
    where
        F: FnOnce(PathBuf, PathBuf) -> MockGitClient,
    {
        let temp = TempDir::new().unwrap();
        let vmr = temp.path().join("vmr");
        let repo = temp.path().join("repo");
        let info = VmrInfo::new(&vmr, temp.path().join("tmp"));
        let git = make_git(vmr.clone(), repo.clone());

        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        fs.write(&info.default_mappings_path(), MAPPINGS_JSON).unwrap();
        fs.write(&info.source_manifest_path(), &manifest_json(manifest_sha)).unwrap();
        fs.create_dir_all(&repo).unwrap();
        fs.create_dir_all(&info.tmp_path()).unwrap();

        let git_client: Arc<dyn GitClient> = Arc::new(git.clone());
        let tracker = Arc::new(DependencyTracker::new(
            info.clone(),
            SourceMappingParser::new(info.clone(), fs.clone()),
            fs.clone(),
        ));
        tracker.refresh_metadata(None).unwrap();
        let clones = Arc::new(CloneManager::new(
            info.clone(),
            git_client.clone(),
            fs.clone(),
            Arc::new(LogTelemetryRecorder),
            CloneCache::new(),
        ));
        let patches = Arc::new(PatchHandler::new(
            info.clone(),
            git_client,
            fs.clone(),
            tracker.clone(),
            clones.clone(),
        ));

        Self {
            _temp: temp,
            vmr,
            repo,
            info,
            git,
            fs,
            tracker,
            clones,
            patches,
        }
    }

    pub fn git_client(&self) -> Arc<dyn GitClient> {
        Arc::new(self.git.clone())
    }

    pub fn write(&self, path: &Path, content: &str) {
        self.fs.write(path, content).unwrap();
    }
}

pub fn mapping() -> SourceMapping {
    SourceMapping {
        name: MAPPING.to_string(),
        default_remote: REMOTE.to_string(),
        default_ref: "main".to_string(),
        include: Vec::new(),
        exclude: Vec::new(),
        disable_synchronization: false,
        version: None,
    }
}

pub fn build(commit: &str, assets: &[(&str, &str)]) -> Build {
    Build {
        id: 4242,
        commit: commit.to_string(),
        repository: VMR_REMOTE.to_string(),
        assets: assets
            .iter()
            .map(|(name, version)| BuildAsset {
                name: name.to_string(),
                version: version.to_string(),
                locations: Vec::new(),
                non_shipping: false,
            })
            .collect(),
    }
}

pub fn options(build: Build, excluded_assets: &[&str]) -> CodeflowOptions {
    CodeflowOptions {
        mapping: mapping(),
        build,
        excluded_assets: excluded_assets.iter().map(|s| s.to_string()).collect(),
        target_branch: "main".to_string(),
        head_branch: "codeflow/head".to_string(),
        discard_patches: false,
    }
}

/// Files committed at given refs: repository, ref, path, content
pub type CommittedFiles = Vec<(PathBuf, &'static str, &'static str, String)>;

/// Answer `git show <ref>:<path>` from `files`
pub fn show_file(files: &CommittedFiles, repo: &Path, args: &[String]) -> Option<String> {
    let (git_ref, path) = args.get(1)?.split_once(':')?;
    files
        .iter()
        .find(|(r, f, p, _)| r == repo && *f == git_ref && *p == path)
        .map(|(_, _, _, content)| content.clone())
}
