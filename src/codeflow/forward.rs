//! Forward flow: replaying a repository's changes into `src/<mapping>`

use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use super::flower::{CodeFlower, FlowDirection};
use super::last_flows::LastFlowsReader;
use super::{CodeFlowResult, Codeflow, CodeflowOptions, LastFlows};
use crate::cancellation::CancellationToken;
use crate::conflicts::branch::BranchMerger;
use crate::conflicts::forward::ForwardConflictResolver;
use crate::conflicts::{FlowContext, Resolution};
use crate::dependency_files::DependencyFileWriter;
use crate::dependency_tracker::{DependencyTracker, VmrDependencyUpdate};
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::git::{GitClient, EMPTY_GIT_OBJECT};
use crate::patch_handler::{exclusion_rule, inclusion_rule, PatchHandler, VmrIngestionPatch};
use crate::version_details::DEPENDENCY_FILES;
use crate::vmr_info::{VmrInfo, SOURCE_MANIFEST_FILE};

pub struct ForwardFlower {
    vmr_info: VmrInfo,
    git: Arc<dyn GitClient>,
    fs: Arc<dyn FileSystem>,
    tracker: Arc<DependencyTracker>,
    patches: Arc<PatchHandler>,
    resolver: ForwardConflictResolver,
    flower: CodeFlower,
    reset_clones: bool,
}

impl ForwardFlower {
    pub fn new(
        vmr_info: VmrInfo,
        git: Arc<dyn GitClient>,
        fs: Arc<dyn FileSystem>,
        tracker: Arc<DependencyTracker>,
        patches: Arc<PatchHandler>,
        writer: Arc<dyn DependencyFileWriter>,
    ) -> Self {
        let branches = Arc::new(BranchMerger::new(vmr_info.clone(), git.clone(), fs.clone(), patches.clone()));
        let resolver = ForwardConflictResolver::new(vmr_info.clone(), git.clone(), fs.clone(), writer, branches);
        let reader = LastFlowsReader::new(vmr_info.clone(), git.clone(), fs.clone(), tracker.clone());
        let flower = CodeFlower::new(vmr_info.clone(), git.clone(), tracker.clone(), reader);

        Self {
            vmr_info,
            git,
            fs,
            tracker,
            patches,
            resolver,
            flower,
            reset_clones: false,
        }
    }

    /// Discard local changes in the VMR before flowing.
    pub fn with_clone_reset(mut self, reset: bool) -> Self {
        self.reset_clones = reset;
        self
    }

    /// Flow `options.build.commit` of the repository cloned at `repo` into
    /// the VMR's head branch.
    pub fn flow_forward(
        &self,
        options: &CodeflowOptions,
        repo: &Path,
        cancel: &CancellationToken,
    ) -> Result<CodeFlowResult> {
        info!(
            "Flowing {} @ {} into the VMR",
            options.mapping.name,
            options.build.commit
        );
        self.flower.flow(self, options, repo, cancel)
    }

    /// Patch `src/<mapping>` from `from_sha` to the current repository
    /// commit and record the new commit in the source manifest.
    fn ingest(&self, ctx: &FlowContext<'_>, from_sha: &str, cancel: &CancellationToken) -> Result<bool> {
        let vmr = self.vmr_info.vmr_path();
        let to_sha = ctx.current_flow.repo_sha();
        let mut mapping = ctx.options.mapping.clone();
        mapping.exclude.extend(DEPENDENCY_FILES.iter().map(|f| f.to_string()));

        let vmr_patches = self.vmr_patches(&mapping.name)?;
        if from_sha != EMPTY_GIT_OBJECT {
            for patch in vmr_patches.iter().rev() {
                debug!("Restoring the original files of {}", patch.path.display());
                self.patches.apply_patch(patch, &vmr, false, true, cancel)?;
            }
        }

        let patches = self
            .patches
            .create_patches(&mapping, ctx.repo, from_sha, to_sha, &self.vmr_info.tmp_path(), cancel)?;
        for patch in &patches {
            self.patches.apply_patch(patch, &vmr, true, false, cancel)?;
        }

        if ctx.options.discard_patches {
            info!("Not re-applying VMR patches of {}", mapping.name);
        } else {
            for patch in &vmr_patches {
                self.patches.apply_patch(patch, &vmr, false, false, cancel)?;
            }
        }

        self.tracker.update_dependency_version(&VmrDependencyUpdate {
            mapping_name: mapping.name.clone(),
            remote_uri: mapping.default_remote.clone(),
            target_revision: to_sha.to_string(),
            bar_id: Some(ctx.options.build.id),
        })?;
        self.git.stage(&vmr, &[SOURCE_MANIFEST_FILE], cancel)?;

        self.git.has_working_tree_changes(&vmr, cancel)
    }

    fn vmr_patches(&self, mapping_name: &str) -> Result<Vec<VmrIngestionPatch>> {
        let application_path = VmrInfo::relative_repo_sources_path(mapping_name);
        Ok(self
            .patches
            .get_vmr_patches(mapping_name)?
            .into_iter()
            .map(|path| VmrIngestionPatch::new(path, Some(application_path.clone())))
            .collect())
    }

    /// Remove the mapping's files from `src/<mapping>`, keeping dependency
    /// files.
    fn remove_mapped_files(&self, ctx: &FlowContext<'_>, cancel: &CancellationToken) -> Result<()> {
        let mapping = &ctx.options.mapping;
        let sources = self.vmr_info.repo_sources_path(&mapping.name);
        if !self.fs.dir_exists(&sources) {
            debug!("{} does not exist, nothing to remove", sources.display());
            return Ok(());
        }

        let mut args: Vec<String> = ["rm", "-r", "-q", "-f", "--"].iter().map(|a| a.to_string()).collect();
        if mapping.include.is_empty() {
            args.push(inclusion_rule("**/*"));
        } else {
            args.extend(mapping.include.iter().map(|p| inclusion_rule(p)));
        }
        args.extend(mapping.exclude.iter().map(|p| exclusion_rule(p)));
        args.extend(DEPENDENCY_FILES.iter().map(|f| exclusion_rule(f)));

        let output = self.git.run_git(&sources, &args, cancel)?;
        if !output.succeeded() && !output.stderr.contains("did not match any files") {
            output.ensure_success(format!("git rm in {}", sources.display()))?;
        }
        Ok(())
    }
}

impl FlowDirection for ForwardFlower {
    fn target_repo_is_vmr(&self) -> bool {
        true
    }

    fn should_reset_clones(&self) -> bool {
        self.reset_clones
    }

    fn same_direction_flow(&self, ctx: &FlowContext<'_>, cancel: &CancellationToken) -> Result<bool> {
        self.ingest(ctx, ctx.last_flows.last_flow.repo_sha(), cancel)
    }

    fn opposite_direction_flow(&self, ctx: &FlowContext<'_>, cancel: &CancellationToken) -> Result<bool> {
        let mapping = &ctx.options.mapping;
        info!("Rebuilding src/{} from scratch", mapping.name);

        let record = self.tracker.get_dependency_version(&mapping.name)?.ok_or_else(|| {
            Error::not_found(format!("No source manifest record found for {}", mapping.name))
        })?;

        self.remove_mapped_files(ctx, cancel)?;
        self.tracker.update_dependency_version(&VmrDependencyUpdate {
            mapping_name: mapping.name.clone(),
            remote_uri: record.remote_uri,
            target_revision: EMPTY_GIT_OBJECT.to_string(),
            bar_id: None,
        })?;

        self.ingest(ctx, EMPTY_GIT_OBJECT, cancel)
    }

    /// A forward flow following a backflow crosses it when the backflow was
    /// taken from a VMR commit older than the last forward flow.
    fn detect_crossing_flow(
        &self,
        last_flows: &LastFlows,
        _repo: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<Codeflow>> {
        let Codeflow::Backflow { vmr_sha, .. } = &last_flows.last_flow else {
            return Ok(None);
        };

        let forward = &last_flows.last_forward_flow;
        let crossed = self
            .git
            .is_ancestor_commit(&self.vmr_info.vmr_path(), vmr_sha, forward.vmr_sha(), cancel)?;
        Ok(crossed.then(|| forward.clone()))
    }

    fn resolve_conflicts(
        &self,
        ctx: &FlowContext<'_>,
        had_changes: bool,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        if !had_changes {
            return Ok(Resolution::default());
        }
        self.resolver.try_merging_branch_and_update_dependencies(ctx, cancel)
    }
}
