//! Backflow: replaying `src/<mapping>` changes of the VMR into the
//! repository

use std::path::Path;
use std::sync::Arc;

use log::info;

use super::flower::{CodeFlower, FlowDirection};
use super::last_flows::LastFlowsReader;
use super::{CodeFlowResult, Codeflow, CodeflowOptions, LastFlows};
use crate::cancellation::CancellationToken;
use crate::conflicts::backflow::BackflowConflictResolver;
use crate::conflicts::branch::BranchMerger;
use crate::conflicts::{FlowContext, Resolution};
use crate::dependency_files::DependencyFileWriter;
use crate::dependency_tracker::DependencyTracker;
use crate::error::Result;
use crate::filesystem::FileSystem;
use crate::git::{GitClient, EMPTY_GIT_OBJECT};
use crate::patch_handler::{exclusion_rule, PatchHandler};
use crate::version_details::DEPENDENCY_FILES;
use crate::vmr_info::VmrInfo;

pub struct Backflower {
    vmr_info: VmrInfo,
    git: Arc<dyn GitClient>,
    patches: Arc<PatchHandler>,
    resolver: BackflowConflictResolver,
    flower: CodeFlower,
}

impl Backflower {
    pub fn new(
        vmr_info: VmrInfo,
        git: Arc<dyn GitClient>,
        fs: Arc<dyn FileSystem>,
        tracker: Arc<DependencyTracker>,
        patches: Arc<PatchHandler>,
        writer: Arc<dyn DependencyFileWriter>,
    ) -> Self {
        let branches = Arc::new(BranchMerger::new(vmr_info.clone(), git.clone(), fs.clone(), patches.clone()));
        let resolver = BackflowConflictResolver::new(vmr_info.clone(), git.clone(), fs.clone(), writer, branches);
        let reader = LastFlowsReader::new(vmr_info.clone(), git.clone(), fs, tracker.clone());
        let flower = CodeFlower::new(vmr_info.clone(), git.clone(), tracker, reader);

        Self {
            vmr_info,
            git,
            patches,
            resolver,
            flower,
        }
    }

    /// Flow VMR commit `options.build.commit` into the head branch of the
    /// repository cloned at `repo`.
    pub fn flow_back(
        &self,
        options: &CodeflowOptions,
        repo: &Path,
        cancel: &CancellationToken,
    ) -> Result<CodeFlowResult> {
        info!(
            "Flowing VMR @ {} back into {}",
            options.build.commit,
            options.mapping.name
        );
        self.flower.flow(self, options, repo, cancel)
    }

    /// Apply the changes of `src/<mapping>` between `from_vmr_sha` and the
    /// current VMR commit at the repository root.
    fn apply_vmr_changes(&self, ctx: &FlowContext<'_>, from_vmr_sha: &str, cancel: &CancellationToken) -> Result<bool> {
        let dependency_filters: Vec<String> = DEPENDENCY_FILES.iter().map(|f| exclusion_rule(f)).collect();
        let patches = self.patches.create_backflow_patches(
            ctx.mapping_name(),
            from_vmr_sha,
            ctx.current_flow.vmr_sha(),
            &dependency_filters,
            cancel,
        )?;
        if patches.is_empty() {
            return Ok(false);
        }

        for patch in &patches {
            self.patches.apply_patch(patch, ctx.repo, true, false, cancel)?;
        }
        self.git.has_working_tree_changes(ctx.repo, cancel)
    }
}

impl FlowDirection for Backflower {
    fn target_repo_is_vmr(&self) -> bool {
        false
    }

    fn prepare(&self, options: &CodeflowOptions, cancel: &CancellationToken) -> Result<()> {
        self.git.checkout(&self.vmr_info.vmr_path(), &options.build.commit, cancel)
    }

    fn same_direction_flow(&self, ctx: &FlowContext<'_>, cancel: &CancellationToken) -> Result<bool> {
        self.apply_vmr_changes(ctx, ctx.last_flows.last_flow.vmr_sha(), cancel)
    }

    fn opposite_direction_flow(&self, ctx: &FlowContext<'_>, cancel: &CancellationToken) -> Result<bool> {
        let mapping = &ctx.options.mapping;
        info!("Rebuilding {} from src/{} of the VMR", ctx.repo.display(), mapping.name);

        let mut args: Vec<String> = ["rm", "-r", "-q", "-f", "--", ":(glob)**/*"]
            .iter()
            .map(|a| a.to_string())
            .collect();
        args.extend(mapping.exclude.iter().map(|p| exclusion_rule(p)));
        args.extend(DEPENDENCY_FILES.iter().map(|f| exclusion_rule(f)));

        let output = self.git.run_git(ctx.repo, &args, cancel)?;
        if !output.succeeded() && !output.stderr.contains("did not match any files") {
            output.ensure_success(format!("git rm in {}", ctx.repo.display()))?;
        }

        self.apply_vmr_changes(ctx, EMPTY_GIT_OBJECT, cancel)
    }

    /// A backflow following a forward flow crosses it when the last backflow
    /// was taken from a VMR commit the forward flow already contains.
    fn detect_crossing_flow(
        &self,
        last_flows: &LastFlows,
        _repo: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<Codeflow>> {
        let (Codeflow::Forward { vmr_sha, .. }, Some(backflow)) = (&last_flows.last_flow, &last_flows.last_backflow)
        else {
            return Ok(None);
        };

        let crossed = self
            .git
            .is_ancestor_commit(&self.vmr_info.vmr_path(), backflow.vmr_sha(), vmr_sha, cancel)?;
        Ok(crossed.then(|| last_flows.last_flow.clone()))
    }

    fn resolve_conflicts(
        &self,
        ctx: &FlowContext<'_>,
        _had_changes: bool,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        // Dependencies move with every build even when no code changed
        self.resolver.try_merging_branch_and_update_dependencies(ctx, cancel)
    }
}
