//! Merging the target branch into a flow's head branch
//!
//! Conflicts in files known to be rewritten by flows are resolved without a
//! human:
//!
//! - dependency files keep the head branch's side (or the target's, for a
//!   new head branch) since dependencies are recomputed afterwards
//! - any other file changed by a crossing flow is reset to the head branch's
//!   side and the changes made since that flow are replayed on top

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use super::FlowContext;
use crate::cancellation::CancellationToken;
use crate::codeflow::Codeflow;
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::git::{short_sha, CommitOutcome, GitClient};
use crate::patch_handler::{PatchHandler, PatchRequest};
use crate::version_details::DEPENDENCY_FILES;
use crate::vmr_info::VmrInfo;

const LIST_CONFLICTS: [&str; 4] = ["diff", "--name-only", "--diff-filter=U", "--relative"];

fn is_dependency_file(path: &str) -> bool {
    DEPENDENCY_FILES.iter().any(|f| f.eq_ignore_ascii_case(path))
}

pub struct BranchMerger {
    vmr_info: VmrInfo,
    git: Arc<dyn GitClient>,
    fs: Arc<dyn FileSystem>,
    patches: Arc<PatchHandler>,
}

impl BranchMerger {
    pub fn new(
        vmr_info: VmrInfo,
        git: Arc<dyn GitClient>,
        fs: Arc<dyn FileSystem>,
        patches: Arc<PatchHandler>,
    ) -> Self {
        Self {
            vmr_info,
            git,
            fs,
            patches,
        }
    }

    /// Merge `branch` into `head_branch` of `repo`.
    ///
    /// Returns the conflicted files, leaving the merge in progress for the
    /// caller. An empty list means the merge was committed.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProcessFailed` when the merge failed and the
    /// conflicts could not be listed. The merge is aborted in that case.
    pub fn try_merging_branch(
        &self,
        repo: &Path,
        head_branch: &str,
        branch: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        info!("Checking if target branch {} has conflicts with {}", branch, head_branch);

        self.git.checkout(repo, head_branch, cancel)?;
        let merge_args: Vec<String> = ["merge", "--no-commit", "--no-ff", branch]
            .iter()
            .map(|a| a.to_string())
            .collect();
        let merge = self.git.run_git(repo, &merge_args, cancel)?;

        if merge.succeeded() {
            let message = format!("Merge {} into {}", branch, head_branch);
            match self.git.commit(repo, &message, false, cancel)? {
                CommitOutcome::Committed => info!("Merged {} into {}", branch, head_branch),
                CommitOutcome::NothingToCommit => {
                    debug!("{} was already merged into {}", branch, head_branch)
                }
            }
            return Ok(Vec::new());
        }

        let list_args: Vec<String> = LIST_CONFLICTS.iter().map(|a| a.to_string()).collect();
        let listed = self.git.run_git(repo, &list_args, cancel)?;
        if let Err(err) = listed.clone().ensure_success(format!("git {}", list_args.join(" "))) {
            warn!("Failed to list conflicted files after merging {}, aborting the merge", branch);
            self.git.merge_abort(repo)?;
            return Err(err);
        }

        let conflicts = listed.output_lines();
        info!("Merging {} into {} produced {} conflict(s)", branch, head_branch, conflicts.len());
        Ok(conflicts)
    }

    /// Merge the target branch into the head branch and resolve conflicts
    /// flows are known to produce.
    ///
    /// Returns the conflicts that remain. The merge is aborted when any
    /// remain, and committed otherwise.
    pub fn merge_target_branch(&self, ctx: &FlowContext<'_>, cancel: &CancellationToken) -> Result<Vec<String>> {
        let repo = ctx.target_repo;
        let head = ctx.options.head_branch.as_str();
        let target = ctx.options.target_branch.as_str();

        let conflicts = self.try_merging_branch(repo, head, target, cancel)?;
        if conflicts.is_empty() {
            return Ok(conflicts);
        }

        let mut unresolved = Vec::new();
        for (index, file) in conflicts.iter().enumerate() {
            if !self.try_resolve(ctx, file, index, cancel)? {
                unresolved.push(file.clone());
            }
        }

        if !unresolved.is_empty() {
            warn!(
                "Failed to auto-resolve conflicts in {}, aborting the merge of {} into {}",
                unresolved.join(", "),
                target,
                head
            );
            self.git.merge_abort(repo)?;
            return Ok(unresolved);
        }

        let mut message = format!("Merge {} into {}\n\nAuto-resolved conflicts:", target, head);
        for file in &conflicts {
            message.push_str("\n- ");
            message.push_str(file);
        }
        self.git.commit(repo, &message, true, cancel)?;
        info!("Auto-resolved {} conflict(s) while merging {} into {}", conflicts.len(), target, head);
        Ok(Vec::new())
    }

    fn try_resolve(&self, ctx: &FlowContext<'_>, file: &str, index: usize, cancel: &CancellationToken) -> Result<bool> {
        let repo = ctx.target_repo;
        let sources = VmrInfo::relative_repo_sources_path(ctx.mapping_name()).to_string() + "/";
        let relative = if ctx.current_flow.is_forward() {
            file.strip_prefix(sources.as_str())
        } else {
            Some(file)
        };

        if relative.map(is_dependency_file).unwrap_or(false) {
            debug!("Resolving dependency file {} in favour of the {} side", file, if ctx.head_existed { "head" } else { "target" });
            self.git.resolve_conflict(repo, file, ctx.head_existed, cancel)?;
            self.git.stage(repo, &[file], cancel)?;
            return Ok(true);
        }

        let (Some(crossing), Some(relative)) = (ctx.last_flows.crossing_flow.as_ref(), relative) else {
            debug!("Cannot auto-resolve {}", file);
            return Ok(false);
        };

        self.replay_since_crossing(ctx, crossing, file, relative, index, cancel)
    }

    /// Take the head branch's version of `file` and apply the changes made to
    /// it since `crossing` flowed.
    fn replay_since_crossing(
        &self,
        ctx: &FlowContext<'_>,
        crossing: &Codeflow,
        file: &str,
        relative: &str,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let current = ctx.current_flow;
        let mapping = ctx.mapping_name();
        let (from, to) = if current.is_forward() {
            (crossing.repo_sha(), current.repo_sha())
        } else {
            (crossing.vmr_sha(), current.vmr_sha())
        };

        let tmp = self.vmr_info.tmp_path();
        self.fs.create_dir_all(&tmp)?;
        let (working_dir, application_path) = if current.is_forward() {
            (ctx.repo.to_path_buf(), Some(VmrInfo::relative_repo_sources_path(mapping)))
        } else {
            (self.vmr_info.repo_sources_path(mapping), None)
        };
        let request = PatchRequest {
            patch_name: tmp.join(format!("{}-{}-{}-{}.patch", mapping, short_sha(from), short_sha(to), index)),
            from_sha: from.to_string(),
            to_sha: to.to_string(),
            path: Some(relative.to_string()),
            filters: Vec::new(),
            relative_paths: true,
            working_dir,
            application_path,
        };

        let patches = self.patches.create_split_patches(&request, cancel)?;
        if patches.len() > 1 {
            for patch in &patches {
                if self.fs.file_exists(&patch.path) {
                    self.fs.delete_file(&patch.path)?;
                }
            }
            return Err(Error::InvalidArgument {
                message: format!("Conflict resolution patch for {} was split into {} patches", file, patches.len()),
            });
        }

        self.git.resolve_conflict(ctx.target_repo, file, true, cancel)?;
        self.git.stage(ctx.target_repo, &[file], cancel)?;

        let Some(patch) = patches.into_iter().next() else {
            return Ok(true);
        };
        if self.fs.file_size(&patch.path)? == 0 {
            debug!("{} did not change since the crossing flow", file);
            self.fs.delete_file(&patch.path)?;
            return Ok(true);
        }

        match self.patches.apply_patch(&patch, ctx.target_repo, true, false, cancel) {
            Ok(()) => {
                debug!("Auto-resolved {} by replaying changes since {}", file, short_sha(from));
                Ok(true)
            }
            Err(Error::PatchApplicationFailed { .. }) => {
                info!("Changes to {} since the crossing flow do not apply, leaving it conflicted", file);
                self.git
                    .run_git_checked(ctx.target_repo, &["checkout", "--conflict=merge", "--", file], cancel)?;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codeflow::LastFlows;
    use crate::git::testing::MockGitClient;
    use crate::process::ProcessOutput;
    use crate::test_fixtures::{build, options, Harness};

    const REPO_SHA: &str = "1111111111111111111111111111111111111111";
    const VMR_SHA: &str = "2222222222222222222222222222222222222222";

    fn merger(h: &Harness) -> BranchMerger {
        BranchMerger::new(h.info.clone(), h.git_client(), h.fs.clone(), h.patches.clone())
    }

    mod try_merging_branch_tests {
        use super::*;

        #[test]
        fn test_fast_forward_merge_is_not_an_error() {
            let h = Harness::new(REPO_SHA, |_, _| {
                MockGitClient::new(|_, args| match args[0].as_str() {
                    "commit" => ProcessOutput {
                        exit_code: Some(1),
                        stdout: "On branch head\nnothing to commit, working tree clean\n".to_string(),
                        ..Default::default()
                    },
                    _ => ProcessOutput::success(""),
                })
            });

            let conflicts = merger(&h)
                .try_merging_branch(&h.repo, "head", "main", &CancellationToken::none())
                .unwrap();

            assert!(conflicts.is_empty());
            assert_eq!(h.git.count(&["merge", "--no-commit", "--no-ff", "main"]), 1);
            assert_eq!(h.git.count(&["commit", "-m", "Merge main into head"]), 1);
        }

        #[test]
        fn test_failed_listing_aborts_once() {
            let h = Harness::new(REPO_SHA, |_, _| {
                MockGitClient::new(|_, args| match (args[0].as_str(), args.get(1).map(String::as_str)) {
                    ("merge", Some("--no-commit")) => ProcessOutput::failure(1, "CONFLICT"),
                    ("diff", _) => ProcessOutput::failure(128, "fatal: broken index"),
                    _ => ProcessOutput::success(""),
                })
            });

            let err = merger(&h)
                .try_merging_branch(&h.repo, "head", "main", &CancellationToken::none())
                .unwrap_err();

            assert!(matches!(err, Error::ProcessFailed { .. }));
            assert_eq!(h.git.count(&["merge", "--abort"]), 1);
        }

        #[test]
        fn test_conflicts_leave_merge_in_progress() {
            let h = Harness::new(REPO_SHA, |_, _| {
                MockGitClient::new(|_, args| match args[0].as_str() {
                    "merge" => ProcessOutput::failure(1, "CONFLICT"),
                    "diff" => ProcessOutput::success("src/a.txt\n\n  src/b.txt \n"),
                    _ => ProcessOutput::success(""),
                })
            });

            let conflicts = merger(&h)
                .try_merging_branch(&h.repo, "head", "main", &CancellationToken::none())
                .unwrap();

            assert_eq!(conflicts, vec!["src/a.txt", "src/b.txt"]);
            assert_eq!(h.git.count(&["merge", "--abort"]), 0);
        }
    }

    mod auto_resolution_tests {
        use super::*;
        use std::path::PathBuf;

        fn conflicted(files: &'static str) -> impl Fn(PathBuf, PathBuf) -> MockGitClient {
            move |_, _| {
                MockGitClient::new(move |_, args| match args[0].as_str() {
                    "merge" if args[1] == "--no-commit" => ProcessOutput::failure(1, "CONFLICT"),
                    "diff" if args[1] == "--name-only" => ProcessOutput::success(files),
                    _ => ProcessOutput::success(""),
                })
            }
        }

        fn history(crossing: Option<Codeflow>) -> LastFlows {
            LastFlows {
                last_flow: Codeflow::forward(REPO_SHA, VMR_SHA),
                last_backflow: None,
                last_forward_flow: Codeflow::forward(REPO_SHA, VMR_SHA),
                crossing_flow: crossing,
            }
        }

        #[test]
        fn test_dependency_files_are_resolved_to_head() {
            let h = Harness::new(REPO_SHA, conflicted("eng/Version.Details.xml\nglobal.json\n"));
            let options = options(build(VMR_SHA, &[]), &[]);
            let last_flows = history(None);
            let current = Codeflow::backflow(VMR_SHA, REPO_SHA);
            let ctx = FlowContext {
                options: &options,
                last_flows: &last_flows,
                current_flow: &current,
                head_existed: true,
                repo: &h.repo,
                target_repo: &h.repo,
            };

            let unresolved = merger(&h).merge_target_branch(&ctx, &CancellationToken::none()).unwrap();

            assert!(unresolved.is_empty());
            assert_eq!(h.git.count(&["checkout", "--ours", "--", "eng/Version.Details.xml"]), 1);
            assert_eq!(h.git.count(&["checkout", "--ours", "--", "global.json"]), 1);
            let commit = h.git.calls().into_iter().find(|c| c[0] == "commit").unwrap();
            assert_eq!(
                commit[2],
                "Merge main into codeflow/head\n\nAuto-resolved conflicts:\n- eng/Version.Details.xml\n- global.json"
            );
            assert!(commit.contains(&"--allow-empty".to_string()));
        }

        #[test]
        fn test_new_head_takes_target_side_of_dependency_files() {
            let h = Harness::new(REPO_SHA, conflicted("src/runtime/eng/Versions.props\n"));
            let options = options(build(REPO_SHA, &[]), &[]);
            let last_flows = history(None);
            let current = Codeflow::forward(REPO_SHA, VMR_SHA);
            let ctx = FlowContext {
                options: &options,
                last_flows: &last_flows,
                current_flow: &current,
                head_existed: false,
                repo: &h.repo,
                target_repo: &h.vmr,
            };

            let unresolved = merger(&h).merge_target_branch(&ctx, &CancellationToken::none()).unwrap();

            assert!(unresolved.is_empty());
            assert_eq!(
                h.git.count(&["checkout", "--theirs", "--", "src/runtime/eng/Versions.props"]),
                1
            );
        }

        #[test]
        fn test_unknown_conflicts_abort_the_merge() {
            let h = Harness::new(REPO_SHA, conflicted("src/Program.cs\neng/Version.Details.xml\n"));
            let options = options(build(VMR_SHA, &[]), &[]);
            let last_flows = history(None);
            let current = Codeflow::backflow(VMR_SHA, REPO_SHA);
            let ctx = FlowContext {
                options: &options,
                last_flows: &last_flows,
                current_flow: &current,
                head_existed: true,
                repo: &h.repo,
                target_repo: &h.repo,
            };

            let unresolved = merger(&h).merge_target_branch(&ctx, &CancellationToken::none()).unwrap();

            assert_eq!(unresolved, vec!["src/Program.cs"]);
            assert_eq!(h.git.count(&["merge", "--abort"]), 1);
            assert_eq!(h.git.count(&["commit"]), 0);
        }

        #[test]
        fn test_crossing_flow_replays_changes() {
            let h = Harness::new(REPO_SHA, |_, _| {
                MockGitClient::new(|_, args| match args[0].as_str() {
                    "merge" if args[1] == "--no-commit" => ProcessOutput::failure(1, "CONFLICT"),
                    "diff" if args[1] == "--name-only" => ProcessOutput::success("src/Program.cs\n"),
                    "diff" => {
                        let i = args.iter().position(|a| a == "--output").unwrap();
                        std::fs::write(&args[i + 1], "diff --git a/src/Program.cs b/src/Program.cs\n").unwrap();
                        ProcessOutput::success("")
                    }
                    _ => ProcessOutput::success(""),
                })
            });
            let options = options(build(VMR_SHA, &[]), &[]);
            let crossing = Codeflow::forward("3333333333333333333333333333333333333333", "4444444444444444444444444444444444444444");
            let last_flows = history(Some(crossing));
            let current = Codeflow::backflow(VMR_SHA, REPO_SHA);
            let ctx = FlowContext {
                options: &options,
                last_flows: &last_flows,
                current_flow: &current,
                head_existed: true,
                repo: &h.repo,
                target_repo: &h.repo,
            };

            let unresolved = merger(&h).merge_target_branch(&ctx, &CancellationToken::none()).unwrap();

            assert!(unresolved.is_empty());
            let vmr_sources = h.info.repo_sources_path("runtime");
            let diff = h
                .git
                .calls_in(&vmr_sources)
                .into_iter()
                .find(|c| c[0] == "diff")
                .unwrap();
            assert!(diff.contains(&format!("4444444444444444444444444444444444444444..{}", VMR_SHA)));
            assert!(diff.contains(&"src/Program.cs".to_string()));
            assert_eq!(h.git.count(&["checkout", "--ours", "--", "src/Program.cs"]), 1);
            assert_eq!(h.git.count(&["apply", "--cached"]), 1);
        }

        #[test]
        fn test_unappliable_replay_stays_conflicted() {
            let h = Harness::new(REPO_SHA, |_, _| {
                MockGitClient::new(|_, args| match args[0].as_str() {
                    "merge" if args[1] == "--no-commit" => ProcessOutput::failure(1, "CONFLICT"),
                    "diff" if args[1] == "--name-only" => ProcessOutput::success("src/Program.cs\n"),
                    "diff" => {
                        let i = args.iter().position(|a| a == "--output").unwrap();
                        std::fs::write(&args[i + 1], "diff --git a/src/Program.cs b/src/Program.cs\n").unwrap();
                        ProcessOutput::success("")
                    }
                    "apply" => ProcessOutput::failure(1, "error: patch failed: src/Program.cs:3"),
                    _ => ProcessOutput::success(""),
                })
            });
            let options = options(build(VMR_SHA, &[]), &[]);
            let crossing = Codeflow::forward(REPO_SHA, "4444444444444444444444444444444444444444");
            let last_flows = history(Some(crossing));
            let current = Codeflow::backflow(VMR_SHA, REPO_SHA);
            let ctx = FlowContext {
                options: &options,
                last_flows: &last_flows,
                current_flow: &current,
                head_existed: true,
                repo: &h.repo,
                target_repo: &h.repo,
            };

            let unresolved = merger(&h).merge_target_branch(&ctx, &CancellationToken::none()).unwrap();

            assert_eq!(unresolved, vec!["src/Program.cs"]);
            assert_eq!(h.git.count(&["checkout", "--conflict=merge", "--", "src/Program.cs"]), 1);
            assert_eq!(h.git.count(&["merge", "--abort"]), 1);
        }
    }
}
