//! Three-way merge of `eng/Version.Details.xml` dependency lists
//!
//! Dependencies are keyed by lower-cased name. A dependency counts as changed
//! when its version, commit or repository differs. Excluded assets are
//! dropped from both sides before merging so they stay exactly as they are
//! in the target.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use super::json::FileSnapshot;
use super::{AssetMatcher, Change, VersionFileChanges};
use crate::cancellation::CancellationToken;
use crate::dependency_files::DependencyFileWriter;
use crate::error::{Error, Result};
use crate::git::GitClient;
use crate::version_details::{DependencyDetail, VersionDetails};

/// Dependency changes keyed by lower-cased name
pub type DependencyChanges = VersionFileChanges<String, DependencyDetail>;

fn key(name: &str) -> String {
    name.to_lowercase()
}

fn index(details: &VersionDetails) -> BTreeMap<String, &DependencyDetail> {
    details.dependencies.iter().map(|d| (key(&d.name), d)).collect()
}

/// Changes turning `old` into `new`, ignoring excluded assets
pub fn diff_dependencies(old: &VersionDetails, new: &VersionDetails, excluded: &AssetMatcher) -> DependencyChanges {
    let old = index(old);
    let new = index(new);
    let mut changes = DependencyChanges::new();

    for (name, old_dependency) in &old {
        if excluded.is_excluded(&old_dependency.name) {
            continue;
        }
        match new.get(name) {
            None => changes.remove(name.clone()),
            Some(new_dependency) if !new_dependency.same_revision(old_dependency) => {
                changes.update(name.clone(), (*new_dependency).clone())
            }
            Some(_) => {}
        }
    }

    for (name, new_dependency) in &new {
        if !old.contains_key(name) && !excluded.is_excluded(&new_dependency.name) {
            changes.add(name.clone(), (*new_dependency).clone());
        }
    }

    changes
}

fn conflict(name: &str, detail: &str) -> Error {
    Error::ConflictingDependencyUpdate {
        message: format!("Dependency {} {}", name, detail),
    }
}

/// Combine target and source dependency changes into the changes to apply
/// onto the current target.
///
/// Target additions and updates are kept. Target removals are already in
/// effect and are not repeated. On top of that:
///
/// - a source removal of a dependency the target left untouched removes it
/// - an addition on both sides with the same revision stays one addition
/// - an addition on both sides with different revisions becomes an update to
///   the source revision
/// - an update on both sides keeps the source revision
///
/// # Errors
///
/// Returns `Error::ConflictingDependencyUpdate` when one side removed a
/// dependency the other side added or updated.
pub fn merge_dependency_changes(target: &DependencyChanges, source: &DependencyChanges) -> Result<DependencyChanges> {
    let mut merged = target.clone();
    merged.retain(|name| !target.removals().contains(name));

    for (name, source_change) in source.changes() {
        match (target.get(&name), source_change) {
            (None, change) => merged.record(name, change),

            (Some(Change::Removal), Change::Removal) => {
                debug!("Dependency {} was removed on both sides", name);
            }
            (Some(Change::Removal), _) => return Err(conflict(&name, "was removed in the target but changed in the source")),
            (Some(_), Change::Removal) => return Err(conflict(&name, "was changed in the target but removed in the source")),

            (Some(Change::Addition(ours)), Change::Addition(theirs)) => {
                if ours.same_revision(&theirs) {
                    merged.add(name, theirs);
                } else {
                    info!(
                        "Dependency {} was added on both sides ({} and {}). Taking {}",
                        theirs.name, ours.version, theirs.version, theirs.version
                    );
                    merged.update(name, theirs);
                }
            }
            (Some(Change::Addition(ours)), Change::Update(theirs))
            | (Some(Change::Update(ours)), Change::Addition(theirs))
            | (Some(Change::Update(ours)), Change::Update(theirs)) => {
                if !ours.same_revision(&theirs) {
                    info!(
                        "Dependency {} was changed on both sides ({} and {}). Taking {}",
                        theirs.name, ours.version, theirs.version, theirs.version
                    );
                }
                merged.update(name, theirs);
            }
        }
    }

    Ok(merged)
}

/// The four snapshots of `eng/Version.Details.xml` taking part in a merge
#[derive(Debug, Clone, Copy)]
pub struct VersionDetailsSnapshots<'a> {
    pub target_previous: FileSnapshot<'a>,
    pub target_current: FileSnapshot<'a>,
    pub source_previous: FileSnapshot<'a>,
    pub source_current: FileSnapshot<'a>,
}

/// Merges dependency lists read from git and writes the outcome through a
/// [`DependencyFileWriter`]
pub struct VersionDetailsMerger {
    git: Arc<dyn GitClient>,
    writer: Arc<dyn DependencyFileWriter>,
}

impl VersionDetailsMerger {
    pub fn new(git: Arc<dyn GitClient>, writer: Arc<dyn DependencyFileWriter>) -> Self {
        Self { git, writer }
    }

    fn read(&self, snapshot: &FileSnapshot<'_>, cancel: &CancellationToken) -> Result<VersionDetails> {
        match self
            .git
            .get_file_from_git(snapshot.repo, snapshot.path, snapshot.git_ref, cancel)?
        {
            Some(content) => VersionDetails::parse(&content, false),
            None => Ok(VersionDetails::default()),
        }
    }

    /// Merge the snapshots and apply the result inside `target_repo`.
    ///
    /// Removals are applied first, then additions, then updates.
    pub fn merge(
        &self,
        target_repo: &Path,
        snapshots: &VersionDetailsSnapshots<'_>,
        excluded: &AssetMatcher,
        cancel: &CancellationToken,
    ) -> Result<DependencyChanges> {
        cancel.check()?;

        let target_changes = diff_dependencies(
            &self.read(&snapshots.target_previous, cancel)?,
            &self.read(&snapshots.target_current, cancel)?,
            excluded,
        );
        let source_changes = diff_dependencies(
            &self.read(&snapshots.source_previous, cancel)?,
            &self.read(&snapshots.source_current, cancel)?,
            excluded,
        );
        let changes = merge_dependency_changes(&target_changes, &source_changes)?;

        for name in changes.removals() {
            self.writer.remove_dependency(target_repo, name)?;
        }
        for dependency in changes.additions().values() {
            self.writer.add_dependency(target_repo, dependency)?;
        }
        for dependency in changes.updates().values() {
            self.writer.update_dependency(target_repo, dependency)?;
        }

        debug!(
            "Merged dependencies in {}: {} removed, {} added, {} updated",
            target_repo.display(),
            changes.removals().len(),
            changes.additions().len(),
            changes.updates().len()
        );
        Ok(changes)
    }
}
