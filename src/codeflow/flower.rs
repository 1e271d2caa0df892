//! Sequencing shared by forward flows and backflows
//!
//! A flow runs as follows:
//!
//! 1. Check out the head branch in the target repository, or the target
//!    branch when the head branch does not exist yet.
//! 2. Read the last flows and look for a crossing flow.
//! 3. Base a new head branch on the last flow's commit in the target
//!    repository.
//! 4. Replay the source side's changes, either incrementally (same direction
//!    as the last flow) or by rebuilding the mapped files from scratch
//!    (opposite direction).
//! 5. Resolve conflicts with the target branch and update dependencies.
//!
//! Direction-specific behaviour comes from [`FlowDirection`].

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use super::last_flows::LastFlowsReader;
use super::{CodeFlowResult, Codeflow, CodeflowOptions, LastFlows};
use crate::cancellation::CancellationToken;
use crate::conflicts::{FlowContext, Resolution};
use crate::dependency_tracker::DependencyTracker;
use crate::error::{Error, Result};
use crate::git::{short_sha, CommitOutcome, GitClient, GitObjectType};
use crate::vmr_info::VmrInfo;

/// The points where forward flows and backflows differ
pub trait FlowDirection {
    /// Whether changes are committed to the VMR (forward) or to the
    /// repository (backflow)
    fn target_repo_is_vmr(&self) -> bool;

    /// Whether the target repository is force-checked-out, discarding local
    /// changes
    fn should_reset_clones(&self) -> bool {
        false
    }

    /// Prepare the source side before anything is read from it.
    fn prepare(&self, _options: &CodeflowOptions, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    /// Replay the changes made since the last flow, which went the same way.
    /// Returns whether anything changed.
    fn same_direction_flow(&self, ctx: &FlowContext<'_>, cancel: &CancellationToken) -> Result<bool>;

    /// Rebuild the mapped files from scratch because the last flow went the
    /// other way. Returns whether anything changed.
    fn opposite_direction_flow(&self, ctx: &FlowContext<'_>, cancel: &CancellationToken) -> Result<bool>;

    /// A flow of the other direction that the last flow crossed, if any
    fn detect_crossing_flow(
        &self,
        last_flows: &LastFlows,
        repo: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<Codeflow>>;

    /// Merge the target branch and reconcile dependencies once the code was
    /// flown.
    fn resolve_conflicts(
        &self,
        ctx: &FlowContext<'_>,
        had_changes: bool,
        cancel: &CancellationToken,
    ) -> Result<Resolution>;
}

pub struct CodeFlower {
    vmr_info: VmrInfo,
    git: Arc<dyn GitClient>,
    tracker: Arc<DependencyTracker>,
    last_flows: LastFlowsReader,
}

impl CodeFlower {
    pub fn new(
        vmr_info: VmrInfo,
        git: Arc<dyn GitClient>,
        tracker: Arc<DependencyTracker>,
        last_flows: LastFlowsReader,
    ) -> Self {
        Self {
            vmr_info,
            git,
            tracker,
            last_flows,
        }
    }

    /// Flow `options.build` between the VMR and the repository clone at
    /// `repo` in the direction given by `direction`.
    pub fn flow(
        &self,
        direction: &dyn FlowDirection,
        options: &CodeflowOptions,
        repo: &Path,
        cancel: &CancellationToken,
    ) -> Result<CodeFlowResult> {
        cancel.check()?;
        direction.prepare(options, cancel)?;

        let vmr = self.vmr_info.vmr_path();
        let target_repo = if direction.target_repo_is_vmr() { vmr.as_path() } else { repo };

        let head_existed = self.checkout_head(direction, target_repo, options, cancel)?;
        self.tracker.refresh_metadata(None)?;

        let mut last_flows = self
            .last_flows
            .read(&options.mapping.name, repo, !direction.target_repo_is_vmr(), cancel)?;
        last_flows.crossing_flow = direction.detect_crossing_flow(&last_flows, repo, cancel)?;
        if let Some(crossing) = &last_flows.crossing_flow {
            info!("Detected crossing {} flow {}", crossing.name(), crossing.branch_name());
        }

        if !head_existed {
            let base = last_flows.last_flow.target_sha().to_string();
            self.create_head_branch(target_repo, &base, &options.head_branch, cancel)?;
            self.tracker.refresh_metadata(None)?;
        }

        let target_sha = self.git.get_sha(target_repo, None, cancel)?;
        let current = if direction.target_repo_is_vmr() {
            Codeflow::forward(options.build.commit.clone(), target_sha)
        } else {
            Codeflow::backflow(options.build.commit.clone(), target_sha)
        };

        let ctx = FlowContext {
            options,
            last_flows: &last_flows,
            current_flow: &current,
            head_existed,
            repo,
            target_repo,
        };

        let had_changes = self.flow_code(direction, &ctx, cancel)?;
        let resolution = direction.resolve_conflicts(&ctx, had_changes, cancel)?;

        Ok(CodeFlowResult {
            had_updates: had_changes || !resolution.dependency_updates.is_empty(),
            conflicted_files: resolution.conflicted_files,
            dependency_updates: resolution.dependency_updates,
            repo_path: target_repo.to_path_buf(),
        })
    }

    /// Check out the head branch, or the target branch when the head branch
    /// does not exist yet. Returns whether the head branch existed.
    fn checkout_head(
        &self,
        direction: &dyn FlowDirection,
        target_repo: &Path,
        options: &CodeflowOptions,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let head_existed =
            self.git.get_ref_type(target_repo, &options.head_branch, cancel)? != GitObjectType::Unknown;
        let branch = if head_existed { &options.head_branch } else { &options.target_branch };
        debug!("Checking out {} in {}", branch, target_repo.display());

        if direction.should_reset_clones() {
            self.git.force_checkout(target_repo, branch, cancel)?;
        } else {
            self.git.checkout(target_repo, branch, cancel)?;
        }
        Ok(head_existed)
    }

    fn create_head_branch(&self, target_repo: &Path, base: &str, head: &str, cancel: &CancellationToken) -> Result<()> {
        info!("Creating branch {} at {} in {}", head, short_sha(base), target_repo.display());
        self.git.checkout(target_repo, base, cancel)?;
        self.git.create_branch(target_repo, head, true, cancel)
    }

    /// Replay the source side's new commits onto the target repository and
    /// commit them. Returns whether a commit was made.
    ///
    /// # Errors
    ///
    /// Returns `Error::PrBranchConflict` when the changes do not apply onto an
    /// existing head branch.
    pub fn flow_code(
        &self,
        direction: &dyn FlowDirection,
        ctx: &FlowContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let last_flow = &ctx.last_flows.last_flow;
        let current = ctx.current_flow;

        if last_flow.source_sha() == current.source_sha() {
            info!("No new commits to flow from {}", short_sha(current.source_sha()));
            return Ok(false);
        }

        let changed = if last_flow.is_forward() == current.is_forward() {
            debug!("Last flow was also {}, replaying new changes", current.name());
            match direction.same_direction_flow(ctx, cancel) {
                Ok(changed) => changed,
                Err(err @ Error::PatchApplicationFailed { .. }) => {
                    if ctx.head_existed {
                        return Err(Error::PrBranchConflict {
                            files: err.conflicted_files(),
                        });
                    }
                    warn!("{}. Recreating the previous flow and flowing the whole repository", err);
                    self.create_head_branch(ctx.target_repo, last_flow.target_sha(), &ctx.options.head_branch, cancel)?;
                    direction.opposite_direction_flow(ctx, cancel)?
                }
                Err(err) => return Err(err),
            }
        } else {
            debug!("Last flow was {}, flowing the whole repository", last_flow.name());
            direction.opposite_direction_flow(ctx, cancel)?
        };

        if !changed {
            info!("There were no code changes to flow");
            return Ok(false);
        }

        let last_sha = if direction.target_repo_is_vmr() {
            last_flow.repo_sha()
        } else {
            last_flow.vmr_sha()
        };
        let message = format!("[VMR] Codeflow {}-{}", short_sha(last_sha), short_sha(current.source_sha()));
        match self.git.commit(ctx.target_repo, &message, false, cancel)? {
            CommitOutcome::Committed => {
                info!("Committed {} to {}", message, ctx.target_repo.display());
                Ok(true)
            }
            CommitOutcome::NothingToCommit => Ok(false),
        }
    }
}
