//! # Patch Handler
//!
//! Moves file changes across the repository/VMR boundary as `git diff`
//! patches.
//!
//! - [`PatchHandler::create_patches`] diffs two commits of a component
//!   repository, honouring the mapping's include/exclude rules. Submodules
//!   are excluded from the parent diff and inlined through their own patches.
//! - Patches larger than [`MAX_PATCH_SIZE`] are replaced by one patch per
//!   immediate subdirectory (and per loose file), recursively.
//! - [`PatchHandler::apply_patch`] applies a patch to the index of a target
//!   repository and then syncs the working tree with it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::cancellation::CancellationToken;
use crate::clone_manager::CloneManager;
use crate::dependency_tracker::DependencyTracker;
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::git::{short_sha, GitClient, SubmoduleInfo, EMPTY_GIT_OBJECT};
use crate::path::{clone_dir_name, UnixPath};
use crate::source_manifest::SubmoduleRecord;
use crate::source_mapping::SourceMapping;
use crate::vmr_info::{VmrInfo, IGNORE_ATTRIBUTE, KEEP_ATTRIBUTE, SOURCES_DIR};

/// Patches above this size are split up
pub const MAX_PATCH_SIZE: u64 = 1_000_000_000;

const MATCH_EVERYTHING: &str = "**/*";

/// A patch file and where inside the target repository it applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmrIngestionPatch {
    pub path: PathBuf,
    /// `None` applies the patch at the repository root
    pub application_path: Option<UnixPath>,
}

impl VmrIngestionPatch {
    pub fn new(path: impl Into<PathBuf>, application_path: Option<UnixPath>) -> Self {
        Self {
            path: path.into(),
            application_path,
        }
    }
}

/// `:(glob,attr:!vmr-ignore)<pattern>`
pub fn inclusion_rule(pattern: &str) -> String {
    format!(":(glob,attr:!{}){}", IGNORE_ATTRIBUTE, pattern)
}

/// `:(exclude,glob,attr:!vmr-keep)<pattern>`
pub fn exclusion_rule(pattern: &str) -> String {
    format!(":(exclude,glob,attr:!{}){}", KEEP_ATTRIBUTE, pattern)
}

fn submodule_exclusion(path: &str) -> String {
    format!(":(exclude){}", path)
}

/// Everything needed for one `git diff` invocation
#[derive(Debug, Clone)]
pub struct PatchRequest {
    pub patch_name: PathBuf,
    pub from_sha: String,
    pub to_sha: String,
    /// Limit the diff to this path (relative to `working_dir`)
    pub path: Option<String>,
    pub filters: Vec<String>,
    /// Make paths in the patch relative to `working_dir`
    pub relative_paths: bool,
    pub working_dir: PathBuf,
    pub application_path: Option<UnixPath>,
}

impl PatchRequest {
    /// Arguments of the `git diff` call producing this patch
    pub fn diff_args(&self) -> Vec<String> {
        let mut args = vec![
            "diff".to_string(),
            "--patch".to_string(),
            "--binary".to_string(),
            "--no-color".to_string(),
            "--output".to_string(),
            self.patch_name.display().to_string(),
        ];
        if self.relative_paths {
            args.push("--relative".to_string());
        }
        args.push(format!("{}..{}", self.from_sha, self.to_sha));
        args.push("--".to_string());
        if let Some(path) = &self.path {
            args.push(path.clone());
        }
        args.extend(self.filters.iter().cloned());
        args
    }
}

/// A submodule as it was at the two ends of a diff. Additions and removals
/// use the empty object on the missing side.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SubmoduleChange {
    name: String,
    path: String,
    url: String,
    before: String,
    after: String,
}

pub struct PatchHandler {
    vmr_info: VmrInfo,
    git: Arc<dyn GitClient>,
    fs: Arc<dyn FileSystem>,
    tracker: Arc<DependencyTracker>,
    clones: Arc<CloneManager>,
}

impl PatchHandler {
    pub fn new(
        vmr_info: VmrInfo,
        git: Arc<dyn GitClient>,
        fs: Arc<dyn FileSystem>,
        tracker: Arc<DependencyTracker>,
        clones: Arc<CloneManager>,
    ) -> Self {
        Self {
            vmr_info,
            git,
            fs,
            tracker,
            clones,
        }
    }

    /// Patches bringing `src/<mapping>` from `from_sha` to `to_sha` of the
    /// repository cloned at `repo_path`, submodules included.
    pub fn create_patches(
        &self,
        mapping: &SourceMapping,
        repo_path: &Path,
        from_sha: &str,
        to_sha: &str,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<VmrIngestionPatch>> {
        info!("Creating patches for {} in {}", mapping.name, dest_dir.display());
        self.fs.create_dir_all(dest_dir)?;

        let patches = self.create_patches_recursive(
            mapping,
            repo_path,
            from_sha,
            to_sha,
            dest_dir,
            &UnixPath::new(&mapping.name),
            cancel,
        )?;

        info!(
            "{} patch{} created",
            patches.len(),
            if patches.len() == 1 { "" } else { "es" }
        );
        Ok(patches)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_patches_recursive(
        &self,
        mapping: &SourceMapping,
        repo_path: &Path,
        from_sha: &str,
        to_sha: &str,
        dest_dir: &Path,
        relative_path: &UnixPath,
        cancel: &CancellationToken,
    ) -> Result<Vec<VmrIngestionPatch>> {
        cancel.check()?;

        let patch_name = dest_dir.join(format!(
            "{}-{}-{}.patch",
            mapping.name,
            short_sha(from_sha),
            short_sha(to_sha)
        ));

        let changes = self.get_submodule_changes(repo_path, from_sha, to_sha, cancel)?;
        let records: Vec<SubmoduleRecord> = changes
            .iter()
            .map(|c| SubmoduleRecord::new(relative_path.join(&c.path).as_str(), &c.url, &c.after))
            .collect();
        self.tracker.update_submodules(&records)?;

        let mut filters: Vec<String> = if mapping.include.is_empty() {
            vec![inclusion_rule(MATCH_EVERYTHING)]
        } else {
            mapping.include.iter().map(|p| inclusion_rule(p)).collect()
        };
        filters.extend(mapping.exclude.iter().map(|p| exclusion_rule(p)));
        for change in &changes {
            let rule = submodule_exclusion(&change.path);
            if !filters.contains(&rule) {
                filters.push(rule);
            }
        }

        let mut patches = self.create_split_patches(
            &PatchRequest {
                patch_name,
                from_sha: from_sha.to_string(),
                to_sha: to_sha.to_string(),
                path: None,
                filters,
                relative_paths: false,
                working_dir: repo_path.to_path_buf(),
                application_path: Some(UnixPath::new(SOURCES_DIR).join(relative_path)),
            },
            cancel,
        )?;

        for change in &changes {
            if change.before == change.after {
                debug!("No changes for submodule {} of {}", change.name, mapping.name);
                continue;
            }

            if change.before == EMPTY_GIT_OBJECT {
                info!(
                    "New submodule {} was added to {} at {} @ {}",
                    change.name,
                    mapping.name,
                    change.path,
                    short_sha(&change.after)
                );
            } else if change.after == EMPTY_GIT_OBJECT {
                info!("Submodule {} of {} was removed", change.name, mapping.name);
            } else {
                info!(
                    "Found changes for submodule {} of {} ({}..{})",
                    change.name,
                    mapping.name,
                    short_sha(&change.before),
                    short_sha(&change.after)
                );
            }

            patches.extend(self.create_submodule_patches(mapping, dest_dir, relative_path, change, cancel)?);
        }

        Ok(patches)
    }

    fn create_submodule_patches(
        &self,
        mapping: &SourceMapping,
        dest_dir: &Path,
        relative_path: &UnixPath,
        change: &SubmoduleChange,
        cancel: &CancellationToken,
    ) -> Result<Vec<VmrIngestionPatch>> {
        let checkout = if change.before == EMPTY_GIT_OBJECT {
            &change.after
        } else {
            &change.before
        };
        let clone_path = self.clones.prepare_uri_clone(&change.url, checkout, cancel)?;

        let (include, exclude) = mapping.submodule_filters(&change.path);
        let submodule_mapping = SourceMapping {
            name: clone_dir_name(&change.name),
            default_remote: change.url.clone(),
            default_ref: change.before.clone(),
            include,
            exclude,
            disable_synchronization: false,
            version: None,
        };

        self.create_patches_recursive(
            &submodule_mapping,
            &clone_path,
            &change.before,
            &change.after,
            dest_dir,
            &relative_path.join(&change.path),
            cancel,
        )
    }

    fn get_submodule_changes(
        &self,
        repo_path: &Path,
        from_sha: &str,
        to_sha: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubmoduleChange>> {
        let before = self.submodules_at(repo_path, from_sha, cancel)?;
        let after = self.submodules_at(repo_path, to_sha, cancel)?;

        let mut paths: Vec<&str> = Vec::new();
        for submodule in before.iter().chain(after.iter()) {
            if !paths.contains(&submodule.path.as_str()) {
                paths.push(&submodule.path);
            }
        }

        let change = |info: &SubmoduleInfo, before: &str, after: &str| SubmoduleChange {
            name: info.name.clone(),
            path: info.path.clone(),
            url: info.url.clone(),
            before: before.to_string(),
            after: after.to_string(),
        };

        let mut changes = Vec::new();
        for path in paths {
            let old = before.iter().find(|s| s.path == path);
            let new = after.iter().find(|s| s.path == path);
            match (old, new) {
                (None, Some(new)) => changes.push(change(new, EMPTY_GIT_OBJECT, &new.commit)),
                (Some(old), None) => changes.push(change(old, &old.commit, EMPTY_GIT_OBJECT)),
                // A new remote is a removal of the old submodule plus an addition
                (Some(old), Some(new)) if old.url != new.url => {
                    changes.push(change(old, &old.commit, EMPTY_GIT_OBJECT));
                    changes.push(change(new, EMPTY_GIT_OBJECT, &new.commit));
                }
                (Some(old), Some(new)) => changes.push(change(new, &old.commit, &new.commit)),
                (None, None) => {}
            }
        }
        Ok(changes)
    }

    fn submodules_at(&self, repo_path: &Path, sha: &str, cancel: &CancellationToken) -> Result<Vec<SubmoduleInfo>> {
        if sha == EMPTY_GIT_OBJECT {
            return Ok(Vec::new());
        }
        self.git.get_submodules(repo_path, sha, cancel)
    }

    /// Create the patch described by `request`, splitting it by directory
    /// when it is too large.
    pub fn create_split_patches(
        &self,
        request: &PatchRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<VmrIngestionPatch>> {
        let patch = self.create_patch(request, cancel)?;
        if self.fs.file_size(&patch.path)? <= MAX_PATCH_SIZE {
            return Ok(vec![patch]);
        }

        warn!(
            "Patch {} targeting {} is too large, splitting it by directory",
            request.patch_name.display(),
            request
                .application_path
                .as_ref()
                .map(UnixPath::as_str)
                .unwrap_or("/")
        );
        self.fs.delete_file(&patch.path)?;

        let directories: Vec<PathBuf> = self
            .fs
            .list_dirs(&request.working_dir)?
            .into_iter()
            .filter(|d| d.file_name().map(|n| n != ".git").unwrap_or(true))
            .collect();
        let files = self.fs.list_files(&request.working_dir)?;

        let child_name = |index: usize| {
            PathBuf::from(format!("{}.{}", request.patch_name.display(), index + 1))
        };
        let child_application_path = |name: &str| match &request.application_path {
            Some(parent) => Some(parent.join(name)),
            None => Some(UnixPath::new(name)),
        };

        let mut patches = Vec::new();
        for (i, directory) in directories.iter().enumerate() {
            let name = file_name(directory);
            patches.extend(self.create_split_patches(
                &PatchRequest {
                    patch_name: child_name(i),
                    path: Some(".".to_string()),
                    relative_paths: true,
                    working_dir: directory.clone(),
                    application_path: child_application_path(&name),
                    ..request.clone()
                },
                cancel,
            )?);
        }

        let catch_all = inclusion_rule(MATCH_EVERYTHING);
        for (i, file) in files.iter().enumerate() {
            let name = file_name(file);
            let patch = self.create_patch(
                &PatchRequest {
                    patch_name: child_name(i + directories.len()),
                    path: Some(name),
                    filters: request
                        .filters
                        .iter()
                        .filter(|f| **f != catch_all)
                        .cloned()
                        .collect(),
                    relative_paths: true,
                    ..request.clone()
                },
                cancel,
            )?;

            if self.fs.file_size(&patch.path)? > MAX_PATCH_SIZE {
                return Err(Error::Configuration {
                    message: format!(
                        "File {} is too big to be ingested into the VMR via git patches",
                        file.display()
                    ),
                    hint: Some("Add the file into the VMR manually".to_string()),
                });
            }
            patches.push(patch);
        }

        Ok(patches)
    }

    fn create_patch(&self, request: &PatchRequest, cancel: &CancellationToken) -> Result<VmrIngestionPatch> {
        cancel.check()?;
        let args = request.diff_args();
        let output = self.git.run_git(&request.working_dir, &args, cancel)?;
        output.ensure_success(format!("git diff (patch {})", request.patch_name.display()))?;
        Ok(VmrIngestionPatch::new(
            request.patch_name.clone(),
            request.application_path.clone(),
        ))
    }

    /// Apply `patch` to the index of the repository at `target`, then make the
    /// working tree under the application path match the index.
    pub fn apply_patch(
        &self,
        patch: &VmrIngestionPatch,
        target: &Path,
        remove_patch_after: bool,
        reverse: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.check()?;

        if !self.fs.file_exists(&patch.path) {
            error!("Failed to find a patch which was expected at {}", patch.path.display());
            return Ok(());
        }

        if self.fs.file_size(&patch.path)? == 0 {
            debug!("No changes in {}", patch.path.display());
            if remove_patch_after {
                self.fs.delete_file(&patch.path)?;
            }
            return Ok(());
        }

        info!(
            "Applying patch {} to {}",
            patch.path.display(),
            patch
                .application_path
                .as_ref()
                .map(UnixPath::as_str)
                .unwrap_or("the repository root")
        );

        let mut args = vec![
            "apply".to_string(),
            "--cached".to_string(),
            "--ignore-space-change".to_string(),
        ];
        if reverse {
            args.push("-R".to_string());
        }
        if let Some(application_path) = &patch.application_path {
            args.push("--directory".to_string());
            args.push(application_path.to_string());
            let directory = target.join(application_path.as_str());
            if !self.fs.dir_exists(&directory) {
                self.fs.create_dir_all(&directory)?;
            }
        }
        args.push(patch.path.display().to_string());

        // Once started, the apply runs to completion
        let output = self.git.run_git(target, &args, &CancellationToken::none())?;
        if !output.succeeded() {
            return Err(Error::PatchApplicationFailed {
                patch: patch.path.display().to_string(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        let scope = patch
            .application_path
            .clone()
            .unwrap_or_else(|| UnixPath::new("."));
        self.reset_working_tree_directory(target, &scope)?;

        if remove_patch_after {
            self.fs.delete_file(&patch.path)?;
        }
        Ok(())
    }

    fn reset_working_tree_directory(&self, repo: &Path, relative: &UnixPath) -> Result<()> {
        let path = if relative.is_empty() { "." } else { relative.as_str() };
        debug!("Cleaning the working tree directory {}", repo.join(path).display());

        let none = CancellationToken::none();
        let output = self.git.run_git(repo, &["checkout".to_string(), path.to_string()], &none)?;
        if !output.succeeded() {
            let unknown = format!("pathspec '{}' did not match any file(s) known to git", path);
            if output.stderr.contains(&unknown) {
                // A removed submodule is no longer in the index
                info!("A removed submodule detected, removing files at {}", path);
                let directory = repo.join(path);
                if self.fs.dir_exists(&directory) {
                    self.fs.delete_dir(&directory)?;
                }
            } else {
                output.ensure_success(format!("git checkout {}", path))?;
            }
        }

        self.git.run_git_checked(repo, &["clean", "-df", path], &none)?;
        Ok(())
    }

    /// Hand-authored patches in `src/patches/<mapping>`, sorted by path
    pub fn get_vmr_patches(&self, mapping_name: &str) -> Result<Vec<PathBuf>> {
        let directory = self.vmr_info.patches_path(mapping_name);
        if !self.fs.dir_exists(&directory) {
            return Ok(Vec::new());
        }
        Ok(self
            .fs
            .list_files(&directory)?
            .into_iter()
            .filter(|p| p.extension().map(|e| e == "patch").unwrap_or(false))
            .collect())
    }

    /// Patches bringing a repository from the state of `src/<mapping>` at
    /// `from_vmr_sha` to its state at `to_vmr_sha`, applicable at the
    /// repository root. Submodules of the mapping are left out.
    pub fn create_backflow_patches(
        &self,
        mapping_name: &str,
        from_vmr_sha: &str,
        to_vmr_sha: &str,
        extra_filters: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<VmrIngestionPatch>> {
        if !self.get_vmr_patches(mapping_name)?.is_empty() {
            return Err(Error::InvalidSynchronization {
                message: format!("Cannot backflow {} while the VMR carries patches for it", mapping_name),
            });
        }

        if from_vmr_sha == to_vmr_sha {
            info!(
                "No changes to synchronize, {} was just synchronized into the VMR ({})",
                mapping_name, to_vmr_sha
            );
            return Ok(Vec::new());
        }

        let patch_name = self.vmr_info.tmp_path().join(format!(
            "{}.{}-{}.patch",
            mapping_name,
            short_sha(from_vmr_sha),
            short_sha(to_vmr_sha)
        ));
        self.fs.create_dir_all(&self.vmr_info.tmp_path())?;

        let mut filters = extra_filters.to_vec();
        filters.extend(self.submodule_exclusions(mapping_name)?);

        let patches = self.create_split_patches(
            &PatchRequest {
                patch_name,
                from_sha: from_vmr_sha.to_string(),
                to_sha: to_vmr_sha.to_string(),
                path: None,
                filters,
                relative_paths: true,
                working_dir: self.vmr_info.repo_sources_path(mapping_name),
                application_path: None,
            },
            cancel,
        )?;

        let mut empty = true;
        for patch in &patches {
            if self.fs.file_size(&patch.path)? > 0 {
                empty = false;
                break;
            }
        }
        if empty {
            info!("There are no new changes between the VMR and {}", mapping_name);
            return Ok(Vec::new());
        }

        Ok(patches)
    }

    /// Exclusion rules for submodules the manifest records under `<mapping>/`,
    /// relative to `src/<mapping>`
    pub fn submodule_exclusions(&self, mapping_name: &str) -> Result<Vec<String>> {
        let manifest = self.tracker.manifest()?;
        Ok(manifest
            .submodules_of(mapping_name)
            .into_iter()
            .map(|s| exclusion_rule(&s.path[mapping_name.len() + 1..]))
            .collect())
    }

}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
