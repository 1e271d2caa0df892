//! Recomputing a repository's dependencies after a backflow
//!
//! The repository and the VMR both edit `eng/Version.Details.xml` between
//! flows. Each side's changes since the last flow are diffed, the build being
//! flown overrides whatever it produced, and the remaining changes are
//! arbitrated name by name before being written to the head branch.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use super::branch::BranchMerger;
use super::{FlowContext, Resolution};
use crate::assets::{Build, BuildAsset};
use crate::cancellation::CancellationToken;
use crate::dependency_files::{DependencyFileWriter, DependencyUpdate};
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::git::GitClient;
use crate::merge::dependencies::diff_dependencies;
use crate::merge::json::{FileSnapshot, JsonFileMerger, JsonMergeSnapshots};
use crate::merge::{AssetMatcher, Change};
use crate::version_details::{DependencyDetail, SourceDependency, VersionDetails, ARCADE_SDK, GLOBAL_JSON, VERSION_DETAILS_XML};
use crate::vmr_info::VmrInfo;

const ARCADE_MAPPING: &str = "arcade";
const ENG_COMMON: &str = "eng/common";

/// What to do with one dependency of the head branch
#[derive(Debug, Clone, PartialEq)]
enum Resolved {
    Skip,
    Remove,
    Set(DependencyDetail),
}

/// The higher of two versions, or the repository's when they do not compare
fn newer<'a>(repo: &'a DependencyDetail, vmr: &'a DependencyDetail) -> &'a DependencyDetail {
    match (
        semver::Version::parse(&repo.version),
        semver::Version::parse(&vmr.version),
    ) {
        (Ok(r), Ok(v)) if v > r => vmr,
        _ => repo,
    }
}

fn from_build(base: &DependencyDetail, asset: &BuildAsset, build: &Build) -> DependencyDetail {
    DependencyDetail {
        version: asset.version.clone(),
        commit: build.commit.clone(),
        repo_uri: build.repository.clone(),
        ..base.clone()
    }
}

fn conflict(name: &str, detail: &str) -> Error {
    Error::ConflictingDependencyUpdate {
        message: format!("Dependency {} {}", name, detail),
    }
}

fn resolve(
    name: &str,
    head: Option<&DependencyDetail>,
    repo_change: Option<Change<DependencyDetail>>,
    vmr_change: Option<Change<DependencyDetail>>,
    asset: Option<&BuildAsset>,
    build: &Build,
) -> Result<Resolved> {
    if let Some(asset) = asset {
        if let Some(head) = head {
            return Ok(Resolved::Set(from_build(head, asset, build)));
        }
        return Ok(match (repo_change, vmr_change) {
            (Some(Change::Addition(added)), _) | (_, Some(Change::Addition(added))) => {
                Resolved::Set(from_build(&added, asset, build))
            }
            _ => Resolved::Skip,
        });
    }

    Ok(match (repo_change, vmr_change) {
        (Some(Change::Update(repo)), Some(Change::Update(vmr))) => Resolved::Set(newer(&repo, &vmr).clone()),

        (Some(Change::Removal), Some(Change::Addition(_))) => {
            return Err(conflict(name, "was removed in the repository but added in the VMR"))
        }
        (Some(Change::Removal), _) => Resolved::Skip,

        (Some(Change::Addition(_)), Some(Change::Removal)) => {
            return Err(conflict(name, "was added in the repository but removed in the VMR"))
        }
        (_, Some(Change::Removal)) => Resolved::Remove,

        (Some(Change::Addition(repo)), Some(Change::Addition(vmr))) => Resolved::Set(newer(&repo, &vmr).clone()),
        (Some(Change::Addition(repo)), _) => Resolved::Set(repo),
        (_, Some(Change::Addition(vmr))) => Resolved::Set(vmr),

        (Some(Change::Update(_)), None) => Resolved::Skip,
        (_, Some(Change::Update(vmr))) => Resolved::Set(vmr),

        (None, None) => Resolved::Skip,
    })
}

/// Commit message body summarizing `updates`.
///
/// Updates sharing the same version transition are listed on one line.
pub fn build_dependency_update_commit_message(updates: &[DependencyUpdate]) -> String {
    if updates.is_empty() {
        return "No dependency updates to commit".to_string();
    }

    fn group<'a>(groups: &mut Vec<(String, Vec<&'a str>)>, blurb: String, name: &'a str) {
        match groups.iter_mut().find(|(b, _)| *b == blurb) {
            Some((_, names)) => names.push(name),
            None => groups.push((blurb, vec![name])),
        }
    }

    let mut updated = Vec::new();
    let mut added = Vec::new();
    let mut removed = Vec::new();
    for update in updates {
        match (&update.from, &update.to) {
            (Some(from), Some(to)) => group(
                &mut updated,
                format!("Version {} -> {}", from.version, to.version),
                &to.name,
            ),
            (None, Some(to)) => group(&mut added, format!("Version {}", to.version), &to.name),
            (Some(from), None) => group(&mut removed, format!("Version {}", from.version), &from.name),
            (None, None) => {}
        }
    }

    let mut message = String::new();
    for (title, groups) in [
        ("Updated Dependencies:", &updated),
        ("Added Dependencies:", &added),
        ("Removed Dependencies:", &removed),
    ] {
        if groups.is_empty() {
            continue;
        }
        message.push_str(title);
        message.push('\n');
        for (blurb, names) in groups {
            message.push_str(&format!("{} ({})\n", names.join(", "), blurb));
        }
        message.push('\n');
    }
    message.trim_end().to_string()
}

pub struct BackflowConflictResolver {
    vmr_info: VmrInfo,
    git: Arc<dyn GitClient>,
    fs: Arc<dyn FileSystem>,
    writer: Arc<dyn DependencyFileWriter>,
    branches: Arc<BranchMerger>,
}

impl BackflowConflictResolver {
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

    /// Merge the target branch into the head branch and, when that succeeds,
    /// bring the repository's dependencies up to date with the build.
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
            dependency_updates: self.update_dependencies(ctx, cancel)?,
        })
    }

    fn read_details(&self, repo: &Path, path: &str, git_ref: &str, cancel: &CancellationToken) -> Result<VersionDetails> {
        match self.git.get_file_from_git(repo, path, git_ref, cancel)? {
            Some(content) => VersionDetails::parse(&content, false),
            None => Ok(VersionDetails::default()),
        }
    }

    /// Rewrite the head branch's dependency files and commit them.
    ///
    /// Returns the dependency changes made, empty when nothing changed.
    pub fn update_dependencies(&self, ctx: &FlowContext<'_>, cancel: &CancellationToken) -> Result<Vec<DependencyUpdate>> {
        cancel.check()?;

        let options = ctx.options;
        let build = &options.build;
        let last_flow = &ctx.last_flows.last_flow;
        let current = ctx.current_flow;
        let vmr = self.vmr_info.vmr_path();
        let sources = VmrInfo::relative_repo_sources_path(ctx.mapping_name());
        let vmr_details_path = sources.join(VERSION_DETAILS_XML);
        let matcher = AssetMatcher::new(&options.excluded_assets)?;

        let previous_repo = self.read_details(ctx.repo, VERSION_DETAILS_XML, last_flow.repo_sha(), cancel)?;
        let target = self.read_details(ctx.repo, VERSION_DETAILS_XML, &options.target_branch, cancel)?;
        let previous_vmr = if last_flow.is_forward() {
            previous_repo.clone()
        } else {
            self.read_details(&vmr, vmr_details_path.as_str(), last_flow.vmr_sha(), cancel)?
        };
        let current_vmr = self.read_details(&vmr, vmr_details_path.as_str(), current.vmr_sha(), cancel)?;

        let repo_changes = diff_dependencies(&previous_repo, &target, &matcher);
        let vmr_changes = diff_dependencies(&previous_vmr, &current_vmr, &matcher);

        let head_path = ctx.repo.join(VERSION_DETAILS_XML);
        let head_all = if self.fs.file_exists(&head_path) {
            VersionDetails::parse(&self.fs.read_to_string(&head_path)?, true)?
        } else {
            VersionDetails::default()
        };
        let pinned: Vec<String> = head_all
            .dependencies
            .iter()
            .filter(|d| d.pinned)
            .map(|d| d.name.to_lowercase())
            .collect();

        let mut candidates: BTreeMap<String, String> = BTreeMap::new();
        for dependency in head_all.dependencies.iter().filter(|d| !d.pinned) {
            candidates.insert(dependency.name.to_lowercase(), dependency.name.clone());
        }
        for (key, change) in repo_changes.changes().into_iter().chain(vmr_changes.changes()) {
            let name = change.value().map(|d| d.name.clone()).unwrap_or_else(|| key.clone());
            candidates.entry(key).or_insert(name);
        }
        candidates.retain(|key, name| !matcher.is_excluded(name) && !pinned.contains(key));

        let mut removals = Vec::new();
        let mut additions = Vec::new();
        let mut updates = Vec::new();
        for (key, name) in &candidates {
            let head = head_all.find(name).filter(|d| !d.pinned);
            let asset = build.find_asset(name).filter(|a| !matcher.is_excluded(&a.name));
            match resolve(name, head, repo_changes.get(key), vmr_changes.get(key), asset, build)? {
                Resolved::Skip => {}
                Resolved::Remove => {
                    if let Some(head) = head {
                        removals.push(DependencyUpdate::removal(head.clone()));
                    }
                }
                Resolved::Set(to) => {
                    let from = previous_repo.find(name).cloned();
                    match head {
                        Some(head) if head.same_revision(&to) => {}
                        Some(_) => updates.push(DependencyUpdate { from, to: Some(to) }),
                        None => additions.push(DependencyUpdate { from, to: Some(to) }),
                    }
                }
            }
        }

        for removal in &removals {
            self.writer.remove_dependency(ctx.repo, removal.name())?;
        }
        for addition in additions.iter().filter_map(|u| u.to.as_ref()) {
            self.writer.add_dependency(ctx.repo, addition)?;
        }
        for update in updates.iter().filter_map(|u| u.to.as_ref()) {
            self.writer.update_dependency(ctx.repo, update)?;
        }

        self.writer.set_source(
            ctx.repo,
            &SourceDependency {
                uri: build.repository.clone(),
                mapping: ctx.mapping_name().to_string(),
                sha: current.vmr_sha().to_string(),
                bar_id: Some(build.id),
            },
        )?;

        let all: Vec<DependencyUpdate> = removals.into_iter().chain(additions).chain(updates).collect();
        debug!("Computed {} dependency update(s) for {}", all.len(), ctx.mapping_name());

        self.merge_global_json(ctx, cancel)?;

        let arcade_updated = all
            .iter()
            .filter_map(|u| u.to.as_ref())
            .any(|d| d.matches_name(ARCADE_SDK));
        if arcade_updated {
            self.update_eng_common(ctx.repo)?;
        }

        if !self.git.has_working_tree_changes(ctx.repo, cancel)? {
            info!("No dependency changes to commit in {}", ctx.repo.display());
            return Ok(Vec::new());
        }

        let message = format!(
            "Update dependencies from {} build {}\n{}",
            build.repository,
            build.id,
            build_dependency_update_commit_message(&all)
        );
        self.git.stage(ctx.repo, &["."], cancel)?;
        self.git.commit(ctx.repo, &message, false, cancel)?;
        info!("Committed {} dependency update(s) to {}", all.len(), ctx.repo.display());
        Ok(all)
    }

    fn merge_global_json(&self, ctx: &FlowContext<'_>, cancel: &CancellationToken) -> Result<()> {
        let last_flow = &ctx.last_flows.last_flow;
        let vmr = self.vmr_info.vmr_path();
        let vmr_file = VmrInfo::relative_repo_sources_path(ctx.mapping_name()).join(GLOBAL_JSON);

        let source_previous = if last_flow.is_forward() {
            FileSnapshot::new(ctx.repo, GLOBAL_JSON, last_flow.repo_sha())
        } else {
            FileSnapshot::new(&vmr, vmr_file.as_str(), last_flow.vmr_sha())
        };

        JsonFileMerger::new(self.git.clone(), self.fs.clone()).merge(
            &ctx.repo.join(GLOBAL_JSON),
            &JsonMergeSnapshots {
                target_previous: FileSnapshot::new(ctx.repo, GLOBAL_JSON, last_flow.repo_sha()),
                target_current: FileSnapshot::new(ctx.repo, GLOBAL_JSON, &ctx.options.target_branch),
                source_previous,
                source_current: FileSnapshot::new(&vmr, vmr_file.as_str(), ctx.current_flow.vmr_sha()),
            },
            cancel,
        )?;
        Ok(())
    }

    /// Replace the repository's `eng/common` with the VMR's arcade copy
    fn update_eng_common(&self, repo: &Path) -> Result<()> {
        let source = self.vmr_info.repo_sources_path(ARCADE_MAPPING).join(ENG_COMMON);
        if !self.fs.dir_exists(&source) {
            warn!("{} was updated but {} does not exist, keeping eng/common", ARCADE_SDK, source.display());
            return Ok(());
        }
        info!("Updating {} from {}", ENG_COMMON, source.display());
        self.fs.copy_dir(&source, &repo.join(ENG_COMMON))
    }
}
