//! Reconciling version files inside `src/<mapping>` after a forward flow
//!
//! Dependency files are never patched by forward flows. Instead the
//! repository's changes to them since the last flow are merged with the
//! VMR's own changes.

use std::sync::Arc;

use log::info;

use super::branch::BranchMerger;
use super::{FlowContext, Resolution};
use crate::cancellation::CancellationToken;
use crate::dependency_files::{DependencyFileWriter, DependencyUpdate};
use crate::error::Result;
use crate::filesystem::FileSystem;
use crate::git::{CommitOutcome, GitClient};
use crate::merge::dependencies::{VersionDetailsMerger, VersionDetailsSnapshots};
use crate::merge::json::{FileSnapshot, JsonFileMerger, JsonMergeSnapshots};
use crate::merge::AssetMatcher;
use crate::version_details::{VersionDetails, GLOBAL_JSON, VERSION_DETAILS_XML};
use crate::vmr_info::VmrInfo;

const COMMIT_MESSAGE: &str = "Update dependency files";

pub struct ForwardConflictResolver {
    vmr_info: VmrInfo,
    git: Arc<dyn GitClient>,
    fs: Arc<dyn FileSystem>,
    writer: Arc<dyn DependencyFileWriter>,
    branches: Arc<BranchMerger>,
}

impl ForwardConflictResolver {
    pub fn new(
        vmr_info: VmrInfo,
        git: Arc<dyn GitClient>,
        fs: Arc<dyn FileSystem>,
        writer: Arc<dyn DependencyFileWriter>,
        branches: Arc<BranchMerger>,
    ) -> Self {
        Self {
            vmr_info,
            git,
            fs,
            writer,
            branches,
        }
    }

    /// Merge the VMR's target branch into the head branch, then merge the
    /// mapping's version files.
    pub fn try_merging_branch_and_update_dependencies(
        &self,
        ctx: &FlowContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let conflicts = self.branches.merge_target_branch(ctx, cancel)?;
        if !conflicts.is_empty() {
            return Ok(Resolution::conflicts(conflicts));
        }

        Ok(Resolution {
            conflicted_files: Vec::new(),
            dependency_updates: self.merge_version_files(ctx, cancel)?,
        })
    }

    /// Three-way merge `eng/Version.Details.xml` and `global.json` of
    /// `src/<mapping>` and commit the result.
    pub fn merge_version_files(&self, ctx: &FlowContext<'_>, cancel: &CancellationToken) -> Result<Vec<DependencyUpdate>> {
        let vmr = self.vmr_info.vmr_path();
        let last_flow = &ctx.last_flows.last_flow;
        let current = ctx.current_flow;
        let target_branch = ctx.options.target_branch.as_str();
        let sources = VmrInfo::relative_repo_sources_path(ctx.mapping_name());
        let sources_dir = self.vmr_info.repo_sources_path(ctx.mapping_name());
        let vmr_details = sources.join(VERSION_DETAILS_XML);
        let vmr_global_json = sources.join(GLOBAL_JSON);

        let before = match self.git.get_file_from_git(&vmr, vmr_details.as_str(), target_branch, cancel)? {
            Some(content) => VersionDetails::parse(&content, true)?,
            None => VersionDetails::default(),
        };

        let changes = VersionDetailsMerger::new(self.git.clone(), self.writer.clone()).merge(
            &sources_dir,
            &VersionDetailsSnapshots {
                target_previous: FileSnapshot::new(&vmr, vmr_details.as_str(), last_flow.vmr_sha()),
                target_current: FileSnapshot::new(&vmr, vmr_details.as_str(), target_branch),
                source_previous: FileSnapshot::new(ctx.repo, VERSION_DETAILS_XML, last_flow.repo_sha()),
                source_current: FileSnapshot::new(ctx.repo, VERSION_DETAILS_XML, current.repo_sha()),
            },
            &AssetMatcher::new(&ctx.options.excluded_assets)?,
            cancel,
        )?;

        JsonFileMerger::new(self.git.clone(), self.fs.clone()).merge(
            &sources_dir.join(GLOBAL_JSON),
            &JsonMergeSnapshots {
                target_previous: FileSnapshot::new(&vmr, vmr_global_json.as_str(), last_flow.vmr_sha()),
                target_current: FileSnapshot::new(&vmr, vmr_global_json.as_str(), target_branch),
                source_previous: FileSnapshot::new(ctx.repo, GLOBAL_JSON, last_flow.repo_sha()),
                source_current: FileSnapshot::new(ctx.repo, GLOBAL_JSON, current.repo_sha()),
            },
            cancel,
        )?;

        let mut updates: Vec<DependencyUpdate> = changes
            .removals()
            .iter()
            .filter_map(|name| before.find(name).cloned())
            .map(DependencyUpdate::removal)
            .collect();
        for dependency in changes.additions().values().chain(changes.updates().values()) {
            updates.push(DependencyUpdate {
                from: before.find(&dependency.name).cloned(),
                to: Some(dependency.clone()),
            });
        }

        if !self.git.has_working_tree_changes(&vmr, cancel)? {
            return Ok(Vec::new());
        }

        self.git.stage(&vmr, &[sources.as_str()], cancel)?;
        if self.git.commit(&vmr, COMMIT_MESSAGE, false, cancel)? == CommitOutcome::Committed {
            info!("Merged version files of {} ({} dependency change(s))", ctx.mapping_name(), updates.len());
        }
        Ok(updates)
    }
}
