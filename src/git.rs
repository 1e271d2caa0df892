//! Local git client
//!
//! All git access goes through the [`GitClient`] trait. Implementors provide
//! a single primitive, [`GitClient::run_git`], and every higher-level helper
//! (checkout, commit, ref lookup, submodule enumeration, blame, ...) is a
//! provided method built on top of it. Test doubles therefore only need to
//! script raw git invocations.
//!
//! [`LocalGitClient`] runs the system `git` binary, which picks up SSH keys,
//! credential helpers and everything else configured in `~/.gitconfig`.

use std::path::Path;

use log::debug;
use url::Url;

use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};
use crate::path::encode_url_path;
use crate::process::{ProcessOutput, ProcessRunner};

/// Sentinel standing for "object did not exist" at the boundary of an
/// addition or removal. This is the well-known empty tree object, which git
/// accepts on either side of a diff range.
pub const EMPTY_GIT_OBJECT: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

pub const HEAD: &str = "HEAD";

const NOTHING_TO_COMMIT: &str = "nothing to commit";

/// First 7 characters of a SHA, as used in branch and patch names
pub fn short_sha(sha: &str) -> &str {
    match sha.char_indices().nth(7) {
        Some((idx, _)) => &sha[..idx],
        None => sha,
    }
}

/// What a ref name resolves to in a local clone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitObjectType {
    Commit,
    Tag,
    /// A local branch
    Branch,
    /// A branch that only exists on a remote (`refs/remotes/<remote>/<ref>`)
    RemoteRef,
    Unknown,
}

/// Structured result of a commit attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Git refused to create an empty commit
    NothingToCommit,
}

/// A submodule recorded in `.gitmodules` at some commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmoduleInfo {
    pub name: String,
    pub path: String,
    pub url: String,
    pub commit: String,
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn describe(args: &[String]) -> String {
    format!("git {}", args.join(" "))
}

/// Git operations used by the code flow engine
pub trait GitClient: Send + Sync {
    /// Run `git <args>` inside `repo` and return its captured output,
    /// whether it succeeded or not.
    fn run_git(
        &self,
        repo: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput>;

    /// Run git and fail with [`Error::ProcessFailed`] on a non-zero exit.
    fn run_git_checked(
        &self,
        repo: &Path,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let args = to_args(args);
        let output = self.run_git(repo, &args, cancel)?;
        output.ensure_success(describe(&args))
    }

    fn checkout(&self, repo: &Path, git_ref: &str, cancel: &CancellationToken) -> Result<()> {
        self.run_git_checked(repo, &["checkout", git_ref], cancel)?;
        Ok(())
    }

    fn force_checkout(&self, repo: &Path, git_ref: &str, cancel: &CancellationToken) -> Result<()> {
        self.run_git_checked(repo, &["checkout", "-f", git_ref], cancel)?;
        Ok(())
    }

    /// Create `name` at the current HEAD and switch to it.
    fn create_branch(
        &self,
        repo: &Path,
        name: &str,
        overwrite: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let flag = if overwrite { "-B" } else { "-b" };
        self.run_git_checked(repo, &["checkout", flag, name], cancel)?;
        Ok(())
    }

    fn stage(&self, repo: &Path, paths: &[&str], cancel: &CancellationToken) -> Result<()> {
        let mut args = vec!["add", "-A", "--"];
        args.extend_from_slice(paths);
        self.run_git_checked(repo, &args, cancel)?;
        Ok(())
    }

    /// Commit staged changes.
    ///
    /// Git reports an empty commit as a failure. That case is recognized here
    /// and only here, and returned as [`CommitOutcome::NothingToCommit`].
    fn commit(
        &self,
        repo: &Path,
        message: &str,
        allow_empty: bool,
        cancel: &CancellationToken,
    ) -> Result<CommitOutcome> {
        let mut args = vec!["commit", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        let args = to_args(&args);
        let output = self.run_git(repo, &args, cancel)?;
        if output.succeeded() {
            return Ok(CommitOutcome::Committed);
        }
        if output.stdout.contains(NOTHING_TO_COMMIT) || output.stderr.contains(NOTHING_TO_COMMIT) {
            debug!("Nothing to commit in {}", repo.display());
            return Ok(CommitOutcome::NothingToCommit);
        }
        output.ensure_success(describe(&args))?;
        Ok(CommitOutcome::Committed)
    }

    /// Return the name of a remote pointing at `uri`, adding one if needed.
    fn add_remote_if_missing(
        &self,
        repo: &Path,
        uri: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let remotes = self.run_git_checked(repo, &["remote", "-v"], cancel)?;
        for line in remotes.output_lines() {
            let mut parts = line.split_whitespace();
            if let (Some(name), Some(url)) = (parts.next(), parts.next()) {
                if url == uri {
                    return Ok(name.to_string());
                }
            }
        }

        let name = remote_name(uri);
        debug!("Adding remote {} ({}) to {}", name, uri, repo.display());
        self.run_git_checked(repo, &["remote", "add", &name, uri], cancel)?;
        Ok(name)
    }

    fn update_remote(&self, repo: &Path, remote: &str, cancel: &CancellationToken) -> Result<()> {
        self.run_git_checked(repo, &["fetch", remote], cancel)?;
        Ok(())
    }

    fn get_ref_type(
        &self,
        repo: &Path,
        git_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<GitObjectType> {
        let local = format!("refs/heads/{}", git_ref);
        if self
            .run_git(repo, &to_args(&["show-ref", "--verify", "--quiet", &local]), cancel)?
            .succeeded()
        {
            return Ok(GitObjectType::Branch);
        }

        let remote = format!("refs/remotes/*/{}", git_ref);
        let remote_refs = self.run_git(
            repo,
            &to_args(&["for-each-ref", "--format=%(refname)", &remote]),
            cancel,
        )?;
        if remote_refs.succeeded() && !remote_refs.output_lines().is_empty() {
            return Ok(GitObjectType::RemoteRef);
        }

        let tag = format!("refs/tags/{}", git_ref);
        if self
            .run_git(repo, &to_args(&["show-ref", "--verify", "--quiet", &tag]), cancel)?
            .succeeded()
        {
            return Ok(GitObjectType::Tag);
        }

        let object = self.run_git(repo, &to_args(&["cat-file", "-t", git_ref]), cancel)?;
        if !object.succeeded() {
            return Ok(GitObjectType::Unknown);
        }
        Ok(match object.stdout.trim() {
            "commit" => GitObjectType::Commit,
            "tag" => GitObjectType::Tag,
            _ => GitObjectType::Unknown,
        })
    }

    /// Whether `ancestor` is reachable from `descendant`.
    fn is_ancestor_commit(
        &self,
        repo: &Path,
        ancestor: &str,
        descendant: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let args = to_args(&["merge-base", "--is-ancestor", ancestor, descendant]);
        let output = self.run_git(repo, &args, cancel)?;
        match output.exit_code {
            Some(0) => Ok(true),
            Some(1) if output.stderr.trim().is_empty() => Ok(false),
            _ => output.ensure_success(describe(&args)).map(|_| false),
        }
    }

    fn get_sha(&self, repo: &Path, git_ref: Option<&str>, cancel: &CancellationToken) -> Result<String> {
        let output =
            self.run_git_checked(repo, &["rev-parse", git_ref.unwrap_or(HEAD)], cancel)?;
        Ok(output.stdout.trim().to_string())
    }

    /// Submodules recorded in `.gitmodules` at `commit`, with the commit each
    /// one points to in that tree.
    fn get_submodules(
        &self,
        repo: &Path,
        commit: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubmoduleInfo>> {
        let Some(gitmodules) = self.get_file_from_git(repo, ".gitmodules", commit, cancel)? else {
            return Ok(Vec::new());
        };

        let mut submodules = Vec::new();
        for section in parse_gitmodules(&gitmodules) {
            let tree = self.run_git_checked(repo, &["ls-tree", commit, &section.path], cancel)?;
            // <mode> commit <sha>\t<path>
            let sha = tree.output_lines().into_iter().find_map(|line| {
                let mut fields = line.split_whitespace();
                match (fields.next(), fields.next(), fields.next()) {
                    (Some(_), Some("commit"), Some(sha)) => Some(sha.to_string()),
                    _ => None,
                }
            });

            match sha {
                Some(commit) => submodules.push(SubmoduleInfo {
                    name: section.name,
                    path: section.path,
                    url: section.url,
                    commit,
                }),
                None => debug!(
                    "Submodule {} is listed in .gitmodules but not in the tree at {}",
                    section.path, commit
                ),
            }
        }
        Ok(submodules)
    }

    fn has_working_tree_changes(&self, repo: &Path, cancel: &CancellationToken) -> Result<bool> {
        let output = self.run_git_checked(repo, &["status", "--porcelain"], cancel)?;
        Ok(!output.stdout.trim().is_empty())
    }

    /// Paths with unresolved merge conflicts
    fn get_conflicted_files(&self, repo: &Path, cancel: &CancellationToken) -> Result<Vec<String>> {
        let output = self.run_git_checked(
            repo,
            &["diff", "--name-only", "--diff-filter=U", "--relative"],
            cancel,
        )?;
        Ok(output.output_lines())
    }

    /// Content of `path` at `git_ref`, `None` when it does not exist there.
    fn get_file_from_git(
        &self,
        repo: &Path,
        path: &str,
        git_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let object = format!("{}:{}", git_ref, path);
        let output = self.run_git(repo, &to_args(&["show", &object]), cancel)?;
        Ok(output.succeeded().then_some(output.stdout))
    }

    /// Commit that last changed the first line of `file` matching `is_target_line`.
    fn blame_line(
        &self,
        repo: &Path,
        file: &str,
        is_target_line: &dyn Fn(&str) -> bool,
        at_ref: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let git_ref = at_ref.unwrap_or(HEAD);
        let content = self
            .get_file_from_git(repo, file, git_ref, cancel)?
            .ok_or_else(|| Error::not_found(format!("File {} not found at {}", file, git_ref)))?;

        let line_number = content
            .lines()
            .position(is_target_line)
            .map(|idx| idx + 1)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "Failed to blame file {} - no matching line found",
                    file
                ))
            })?;

        let range = format!("{},{}", line_number, line_number);
        let output = self.run_git_checked(
            repo,
            &["blame", "--first-parent", "-L", &range, "--porcelain", git_ref, "--", file],
            cancel,
        )?;
        output
            .stdout
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| Error::not_found(format!("git blame returned no commit for {}", file)))
    }

    /// Discard working tree changes under `path`.
    fn reset_working_tree(&self, repo: &Path, path: &str, cancel: &CancellationToken) -> Result<()> {
        self.run_git_checked(repo, &["checkout", "--", path], cancel)?;
        self.run_git_checked(repo, &["clean", "-xdf", "--", path], cancel)?;
        Ok(())
    }

    /// `git clean <args>`
    fn clean(&self, repo: &Path, args: &[&str], cancel: &CancellationToken) -> Result<()> {
        let mut full = vec!["clean"];
        full.extend_from_slice(args);
        self.run_git_checked(repo, &full, cancel)?;
        Ok(())
    }

    /// Take one side of a conflicted file and mark it resolved.
    fn resolve_conflict(
        &self,
        repo: &Path,
        file: &str,
        ours: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let side = if ours { "--ours" } else { "--theirs" };
        self.run_git_checked(repo, &["checkout", side, "--", file], cancel)?;
        self.stage(repo, &[file], cancel)
    }

    fn clone_no_checkout(&self, uri: &str, destination: &Path, cancel: &CancellationToken) -> Result<()> {
        let parent = destination.parent().unwrap_or(Path::new("."));
        let dest = destination.display().to_string();
        self.run_git_checked(parent, &["clone", "--no-checkout", uri, &dest], cancel)?;
        Ok(())
    }

    /// Abort an in-progress merge. Runs regardless of cancellation so a
    /// repository is never left mid-merge.
    fn merge_abort(&self, repo: &Path) -> Result<()> {
        self.run_git_checked(repo, &["merge", "--abort"], &CancellationToken::none())?;
        Ok(())
    }

    fn last_commit_message(&self, repo: &Path, cancel: &CancellationToken) -> Result<String> {
        let output = self.run_git_checked(repo, &["log", "-1", "--pretty=%B"], cancel)?;
        Ok(output.stdout.trim().to_string())
    }
}

/// Name for a new remote pointing at `uri`
pub fn remote_name(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(url) if url.host_str().is_some() => {
            let mut parts = vec![url.host_str().unwrap_or_default().to_string()];
            parts.extend(
                url.path_segments()
                    .into_iter()
                    .flatten()
                    .filter(|s| !s.is_empty())
                    .map(|s| s.trim_end_matches(".git").to_string()),
            );
            encode_url_path(&parts.join("-"))
        }
        _ => encode_url_path(uri.trim_start_matches(['/', '\\'])),
    }
}

#[derive(Debug, Default)]
struct GitmodulesSection {
    name: String,
    path: String,
    url: String,
}

/// Parse `.gitmodules` into its `[submodule "<name>"]` sections.
fn parse_gitmodules(content: &str) -> Vec<GitmodulesSection> {
    let mut sections = Vec::new();
    let mut current: Option<GitmodulesSection> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            if let Some(section) = current.take() {
                sections.push(section);
            }
            let header = trimmed[1..trimmed.len() - 1].trim();
            current = header.strip_prefix("submodule").map(|name| GitmodulesSection {
                name: name.trim().trim_matches('"').to_string(),
                ..Default::default()
            });
        } else if let (Some(section), Some(pos)) = (current.as_mut(), trimmed.find('=')) {
            let value = trimmed[pos + 1..].trim().to_string();
            match trimmed[..pos].trim() {
                "path" => section.path = value,
                "url" => section.url = value,
                _ => {}
            }
        }
    }

    if let Some(section) = current {
        sections.push(section);
    }

    sections.retain(|s| !s.path.is_empty());
    sections
}

/// [`GitClient`] that shells out to the system `git` binary
#[derive(Debug, Clone, Default)]
pub struct LocalGitClient {
    runner: ProcessRunner,
}

impl LocalGitClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runner(runner: ProcessRunner) -> Self {
        Self { runner }
    }
}

impl GitClient for LocalGitClient {
    fn run_git(
        &self,
        repo: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        self.runner.execute("git", args, Some(repo), cancel)
    }
}

/// Scriptable [`GitClient`] for unit tests.
#[cfg(test)]
pub mod testing {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use super::GitClient;
    use crate::cancellation::CancellationToken;
    use crate::error::Result;
    use crate::process::ProcessOutput;

    type Responder = dyn Fn(&Path, &[String]) -> ProcessOutput + Send + Sync;

    /// Records every invocation and answers from a closure.
    #[derive(Clone)]
    pub struct MockGitClient {
        calls: Arc<Mutex<Vec<(PathBuf, Vec<String>)>>>,
        responder: Arc<Responder>,
    }

    impl MockGitClient {
        pub fn new<F>(responder: F) -> Self
        where
            F: Fn(&Path, &[String]) -> ProcessOutput + Send + Sync + 'static,
        {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                responder: Arc::new(responder),
            }
        }

        /// Every call succeeds with empty output.
        pub fn succeeding() -> Self {
            Self::new(|_, _| ProcessOutput::success(""))
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, args)| args.clone())
                .collect()
        }

        pub fn calls_in(&self, repo: &Path) -> Vec<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(r, _)| r == repo)
                .map(|(_, args)| args.clone())
                .collect()
        }

        /// Number of calls whose arguments start with `prefix`
        pub fn count(&self, prefix: &[&str]) -> usize {
            self.calls()
                .iter()
                .filter(|args| {
                    args.len() >= prefix.len() && args.iter().zip(prefix).all(|(a, p)| a == p)
                })
                .count()
        }
    }

    impl GitClient for MockGitClient {
        fn run_git(
            &self,
            repo: &Path,
            args: &[String],
            cancel: &CancellationToken,
        ) -> Result<ProcessOutput> {
            cancel.check()?;
            self.calls
                .lock()
                .unwrap()
                .push((repo.to_path_buf(), args.to_vec()));
            Ok((self.responder)(repo, args))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockGitClient;
    use super::*;
    use std::path::PathBuf;

    fn repo() -> PathBuf {
        PathBuf::from("/repo")
    }

    #[test]
    fn test_short_sha() {
        assert_eq!(short_sha("0123456789abcdef"), "0123456");
        assert_eq!(short_sha("abc"), "abc");
    }

    mod commit_tests {
        use super::*;

        #[test]
        fn test_commit_success() {
            let git = MockGitClient::succeeding();
            let outcome = git
                .commit(&repo(), "message", false, &CancellationToken::none())
                .unwrap();
            assert_eq!(outcome, CommitOutcome::Committed);
            assert_eq!(git.calls(), vec![vec!["commit", "-m", "message"]]);
        }

        #[test]
        fn test_commit_nothing_to_commit() {
            let git = MockGitClient::new(|_, _| ProcessOutput {
                exit_code: Some(1),
                stdout: "On branch main\nnothing to commit, working tree clean\n".to_string(),
                ..Default::default()
            });
            let outcome = git
                .commit(&repo(), "message", false, &CancellationToken::none())
                .unwrap();
            assert_eq!(outcome, CommitOutcome::NothingToCommit);
        }

        #[test]
        fn test_commit_other_failure() {
            let git = MockGitClient::new(|_, _| ProcessOutput::failure(128, "fatal: bad object"));
            let result = git.commit(&repo(), "message", true, &CancellationToken::none());
            assert!(matches!(result, Err(Error::ProcessFailed { .. })));
            assert_eq!(
                git.calls(),
                vec![vec!["commit", "-m", "message", "--allow-empty"]]
            );
        }
    }

    mod remote_tests {
        use super::*;

        #[test]
        fn test_add_remote_reuses_existing() {
            let git = MockGitClient::new(|_, args| {
                if args[0] == "remote" && args[1] == "-v" {
                    ProcessOutput::success(
                        "origin\thttps://github.com/dotnet/runtime (fetch)\n\
                         origin\thttps://github.com/dotnet/runtime (push)\n",
                    )
                } else {
                    ProcessOutput::success("")
                }
            });
            let name = git
                .add_remote_if_missing(
                    &repo(),
                    "https://github.com/dotnet/runtime",
                    &CancellationToken::none(),
                )
                .unwrap();
            assert_eq!(name, "origin");
            assert_eq!(git.count(&["remote", "add"]), 0);
        }

        #[test]
        fn test_add_remote_when_missing() {
            let git = MockGitClient::succeeding();
            let name = git
                .add_remote_if_missing(
                    &repo(),
                    "https://github.com/dotnet/runtime.git",
                    &CancellationToken::none(),
                )
                .unwrap();
            assert_eq!(name, "github.com-dotnet-runtime");
            assert_eq!(git.count(&["remote", "add", "github.com-dotnet-runtime"]), 1);
        }

        #[test]
        fn test_remote_name_for_local_path() {
            assert_eq!(remote_name("/tmp/repos/external-1"), "tmp-repos-external-1");
        }
    }

    mod ref_type_tests {
        use super::*;

        fn git_with(answer: &'static str) -> MockGitClient {
            MockGitClient::new(move |_, args| {
                let joined = args.join(" ");
                match answer {
                    "branch" if joined.starts_with("show-ref --verify --quiet refs/heads/") => {
                        ProcessOutput::success("")
                    }
                    "remote" if args[0] == "for-each-ref" => {
                        ProcessOutput::success("refs/remotes/origin/main\n")
                    }
                    "tag" if joined.starts_with("show-ref --verify --quiet refs/tags/") => {
                        ProcessOutput::success("")
                    }
                    "commit" if args[0] == "cat-file" => ProcessOutput::success("commit\n"),
                    _ if args[0] == "for-each-ref" => ProcessOutput::success(""),
                    _ => ProcessOutput::failure(1, ""),
                }
            })
        }

        #[test]
        fn test_ref_types() {
            let cancel = CancellationToken::none();
            for (answer, expected) in [
                ("branch", GitObjectType::Branch),
                ("remote", GitObjectType::RemoteRef),
                ("tag", GitObjectType::Tag),
                ("commit", GitObjectType::Commit),
                ("none", GitObjectType::Unknown),
            ] {
                let git = git_with(answer);
                assert_eq!(
                    git.get_ref_type(&repo(), "main", &cancel).unwrap(),
                    expected,
                    "answer {}",
                    answer
                );
            }
        }
    }

    mod ancestor_tests {
        use super::*;

        #[test]
        fn test_is_ancestor_exit_codes() {
            let cancel = CancellationToken::none();
            let yes = MockGitClient::succeeding();
            assert!(yes.is_ancestor_commit(&repo(), "a", "b", &cancel).unwrap());

            let no = MockGitClient::new(|_, _| ProcessOutput::failure(1, ""));
            assert!(!no.is_ancestor_commit(&repo(), "a", "b", &cancel).unwrap());

            let broken = MockGitClient::new(|_, _| ProcessOutput::failure(128, "fatal: Not a valid commit name"));
            assert!(broken.is_ancestor_commit(&repo(), "a", "b", &cancel).is_err());
        }
    }

    mod submodule_tests {
        use super::*;

        const GITMODULES: &str = r#"
[submodule "src/external"]
	path = src/external
	url = https://github.com/org/external.git
[submodule "docs"]
	path = docs/site
	url = https://github.com/org/site
"#;

        #[test]
        fn test_parse_gitmodules() {
            let sections = parse_gitmodules(GITMODULES);
            assert_eq!(sections.len(), 2);
            assert_eq!(sections[0].name, "src/external");
            assert_eq!(sections[0].path, "src/external");
            assert_eq!(sections[0].url, "https://github.com/org/external.git");
            assert_eq!(sections[1].name, "docs");
            assert_eq!(sections[1].path, "docs/site");
        }

        #[test]
        fn test_get_submodules_reads_commits_from_tree() {
            let git = MockGitClient::new(|_, args| match args[0].as_str() {
                "show" => ProcessOutput::success(GITMODULES),
                "ls-tree" if args[2] == "src/external" => {
                    ProcessOutput::success("160000 commit abcdef0123\tsrc/external\n")
                }
                "ls-tree" => ProcessOutput::success(""),
                _ => ProcessOutput::failure(1, ""),
            });

            let submodules = git
                .get_submodules(&repo(), "sha1", &CancellationToken::none())
                .unwrap();

            assert_eq!(
                submodules,
                vec![SubmoduleInfo {
                    name: "src/external".to_string(),
                    path: "src/external".to_string(),
                    url: "https://github.com/org/external.git".to_string(),
                    commit: "abcdef0123".to_string(),
                }]
            );
        }

        #[test]
        fn test_get_submodules_without_gitmodules() {
            let git = MockGitClient::new(|_, _| ProcessOutput::failure(128, "fatal: path does not exist"));
            let submodules = git
                .get_submodules(&repo(), "sha1", &CancellationToken::none())
                .unwrap();
            assert!(submodules.is_empty());
        }
    }

    mod blame_tests {
        use super::*;

        #[test]
        fn test_blame_line_finds_first_matching_line() {
            let git = MockGitClient::new(|_, args| match args[0].as_str() {
                "show" => ProcessOutput::success("{\n  \"commitSha\": \"abc\"\n}\n"),
                "blame" => ProcessOutput::success("deadbeef 2 2 1\nauthor Someone\n"),
                _ => ProcessOutput::failure(1, ""),
            });

            let sha = git
                .blame_line(
                    &repo(),
                    "src/source-manifest.json",
                    &|line| line.contains("abc"),
                    None,
                    &CancellationToken::none(),
                )
                .unwrap();

            assert_eq!(sha, "deadbeef");
            assert_eq!(
                git.calls()[1],
                vec![
                    "blame",
                    "--first-parent",
                    "-L",
                    "2,2",
                    "--porcelain",
                    "HEAD",
                    "--",
                    "src/source-manifest.json"
                ]
            );
        }

        #[test]
        fn test_blame_line_no_match() {
            let git = MockGitClient::new(|_, _| ProcessOutput::success("nothing here\n"));
            let result = git.blame_line(
                &repo(),
                "file",
                &|line| line.contains("abc"),
                None,
                &CancellationToken::none(),
            );
            assert!(matches!(result, Err(Error::NotFound { .. })));
        }
    }

    #[test]
    fn test_merge_abort_ignores_cancellation() {
        let git = MockGitClient::succeeding();
        git.merge_abort(&repo()).unwrap();
        assert_eq!(git.calls(), vec![vec!["merge", "--abort"]]);
    }

    #[test]
    fn test_conflicted_files_are_trimmed() {
        let git = MockGitClient::new(|_, _| ProcessOutput::success(" a.txt \n\nb/c.txt\n"));
        let files = git
            .get_conflicted_files(&repo(), &CancellationToken::none())
            .unwrap();
        assert_eq!(files, vec!["a.txt", "b/c.txt"]);
    }
}
