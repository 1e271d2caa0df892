//! Arguments and wiring shared by `forwardflow` and `backflow`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::Args;

use vmr_codeflow::assets::{BuildClient, JsonBuildClient};
use vmr_codeflow::cache::CloneCache;
use vmr_codeflow::clone_manager::CloneManager;
use vmr_codeflow::codeflow::{CodeFlowResult, CodeflowOptions};
use vmr_codeflow::dependency_files::{DependencyFileWriter, VersionDetailsFileWriter};
use vmr_codeflow::dependency_tracker::DependencyTracker;
use vmr_codeflow::filesystem::{FileSystem, LocalFileSystem};
use vmr_codeflow::git::{GitClient, LocalGitClient};
use vmr_codeflow::patch_handler::PatchHandler;
use vmr_codeflow::process::ProcessRunner;
use vmr_codeflow::source_mapping::SourceMappingParser;
use vmr_codeflow::telemetry::LogTelemetryRecorder;
use vmr_codeflow::vmr_info::VmrInfo;

#[derive(Args, Debug)]
pub struct FlowArgs {
    /// Name of the source mapping to flow
    pub mapping: String,

    /// Local clone of the mapping's repository
    pub repo: PathBuf,

    /// JSON file describing the build (a single build or a list of builds)
    #[arg(long, value_name = "FILE")]
    pub build_file: PathBuf,

    /// Id of the build to flow
    #[arg(long, value_name = "ID")]
    pub build_id: i64,

    /// Branch the flow will be merged into
    #[arg(long, value_name = "BRANCH", default_value = "main")]
    pub target_branch: String,

    /// Branch the flow is committed to
    #[arg(long, value_name = "BRANCH")]
    pub head_branch: String,

    /// Asset names or `*` patterns that must not be updated (repeatable)
    #[arg(long = "exclude-asset", value_name = "PATTERN")]
    pub excluded_assets: Vec<String>,

    /// Do not re-apply the VMR's own patches after a forward flow
    #[arg(long)]
    pub discard_patches: bool,

    /// Kill git commands running longer than this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub git_timeout: Option<u64>,
}

/// Components of the engine wired for local git and disk access
pub struct Engine {
    pub vmr_info: VmrInfo,
    pub git: Arc<dyn GitClient>,
    pub fs: Arc<dyn FileSystem>,
    pub tracker: Arc<DependencyTracker>,
    pub patches: Arc<PatchHandler>,
    pub writer: Arc<dyn DependencyFileWriter>,
}

impl Engine {
    pub fn new(vmr_info: &VmrInfo, args: &FlowArgs) -> Result<Self> {
        let git: Arc<dyn GitClient> = match args.git_timeout {
            Some(seconds) => Arc::new(LocalGitClient::with_runner(ProcessRunner::with_timeout(
                Duration::from_secs(seconds),
            ))),
            None => Arc::new(LocalGitClient::new()),
        };
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let tracker = Arc::new(DependencyTracker::new(
            vmr_info.clone(),
            SourceMappingParser::new(vmr_info.clone(), fs.clone()),
            fs.clone(),
        ));
        tracker
            .refresh_metadata(None)
            .with_context(|| format!("Failed to load VMR metadata from {}", vmr_info.vmr_path().display()))?;

        let clones = Arc::new(CloneManager::new(
            vmr_info.clone(),
            git.clone(),
            fs.clone(),
            Arc::new(LogTelemetryRecorder),
            CloneCache::new(),
        ));
        let patches = Arc::new(PatchHandler::new(
            vmr_info.clone(),
            git.clone(),
            fs.clone(),
            tracker.clone(),
            clones,
        ));
        let writer: Arc<dyn DependencyFileWriter> = Arc::new(VersionDetailsFileWriter::new(fs.clone()));

        Ok(Self {
            vmr_info: vmr_info.clone(),
            git,
            fs,
            tracker,
            patches,
            writer,
        })
    }

    /// Resolve the mapping and the build named by `args`.
    pub fn options(&self, args: &FlowArgs) -> Result<CodeflowOptions> {
        if !args.repo.is_dir() {
            bail!("Repository clone {} does not exist", args.repo.display());
        }

        let mapping = self.tracker.get_mapping(&args.mapping)?;
        let build = JsonBuildClient::new(&args.build_file, self.fs.clone()).get_build(args.build_id)?;

        Ok(CodeflowOptions {
            mapping,
            build,
            excluded_assets: args.excluded_assets.clone(),
            target_branch: args.target_branch.clone(),
            head_branch: args.head_branch.clone(),
            discard_patches: args.discard_patches,
        })
    }
}

/// Print the outcome of a flow. Conflicts make the command fail.
pub fn report(result: &CodeFlowResult) -> Result<()> {
    if result.had_conflicts() {
        eprintln!("Conflicts with the target branch need to be resolved manually:");
        for file in &result.conflicted_files {
            eprintln!("  {}", file);
        }
        bail!("{} conflicted file(s)", result.conflicted_files.len());
    }

    if !result.had_updates {
        println!("Nothing to flow, {} is up to date", result.repo_path.display());
        return Ok(());
    }

    println!("Flowed changes into {}", result.repo_path.display());
    for update in &result.dependency_updates {
        let version = |d: &Option<vmr_codeflow::version_details::DependencyDetail>| {
            d.as_ref().map(|d| d.version.clone()).unwrap_or_else(|| "-".to_string())
        };
        println!("  {} {} -> {}", update.name(), version(&update.from), version(&update.to));
    }
    Ok(())
}
