//! Local clones of component repositories and of the VMR
//!
//! [`CloneManager::prepare_clone`] turns a list of candidate remotes and a
//! set of refs into a checked-out working copy:
//!
//! 1. clone (or clean up and reuse) `<tmp>/<name>`,
//! 2. fetch remotes one by one until every requested ref is known,
//! 3. check out the requested ref and optionally reset it to its upstream.
//!
//! Cloning and fetching a remote into a directory happens at most once per
//! process; see [`CloneCache`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::cache::{CloneCache, CloneKey};
use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::git::{GitClient, GitObjectType, EMPTY_GIT_OBJECT};
use crate::path::clone_dir_name;
use crate::source_mapping::SourceMapping;
use crate::telemetry::{TelemetryRecorder, TelemetryScope, TrackedOperation};
use crate::vmr_info::VmrInfo;

const OVERWRITTEN_BY_CHECKOUT: &str = "would be overwritten by checkout";
const NOT_A_GIT_REPOSITORY: &str = "not a git repository";

pub struct CloneManager {
    vmr_info: VmrInfo,
    git: Arc<dyn GitClient>,
    fs: Arc<dyn FileSystem>,
    telemetry: Arc<dyn TelemetryRecorder>,
    cache: CloneCache,
}

impl CloneManager {
    pub fn new(
        vmr_info: VmrInfo,
        git: Arc<dyn GitClient>,
        fs: Arc<dyn FileSystem>,
        telemetry: Arc<dyn TelemetryRecorder>,
        cache: CloneCache,
    ) -> Self {
        Self {
            vmr_info,
            git,
            fs,
            telemetry,
            cache,
        }
    }

    /// Clone of a mapped repository in `<tmp>/<mapping name>`
    pub fn prepare_repo_clone(
        &self,
        mapping: &SourceMapping,
        remote_uris: &[String],
        requested_refs: &[String],
        checkout_ref: &str,
        reset_to_remote: bool,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let path = self.vmr_info.tmp_path().join(&mapping.name);
        self.prepare_clone(&path, remote_uris, requested_refs, checkout_ref, reset_to_remote, cancel)
    }

    /// Clone of a raw URI in `<tmp>/<last URI segment>`
    pub fn prepare_uri_clone(
        &self,
        uri: &str,
        checkout_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let path = self.vmr_info.tmp_path().join(clone_dir_name(uri));
        self.prepare_clone(
            &path,
            &[uri.to_string()],
            &[checkout_ref.to_string()],
            checkout_ref,
            false,
            cancel,
        )
    }

    /// Prepare the VMR itself at the configured VMR path and remember which
    /// URI it came from.
    pub fn prepare_vmr(
        &self,
        remote_uris: &[String],
        requested_refs: &[String],
        checkout_ref: &str,
        reset_to_remote: bool,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let path = self.vmr_info.vmr_path();
        let prepared =
            self.prepare_clone(&path, remote_uris, requested_refs, checkout_ref, reset_to_remote, cancel)?;
        if let Some(uri) = remote_uris.first() {
            self.vmr_info.set_vmr_uri(uri.clone());
        }
        Ok(prepared)
    }

    /// Prepare a clone in `path` that contains every ref in
    /// `requested_refs`, and check out `checkout_ref`.
    pub fn prepare_clone(
        &self,
        path: &Path,
        remote_uris: &[String],
        requested_refs: &[String],
        checkout_ref: &str,
        reset_to_remote: bool,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        cancel.check()?;

        if remote_uris.is_empty() {
            return Err(Error::InvalidArgument {
                message: "No remote URIs provided to clone".to_string(),
            });
        }

        let directory_lock = self.cache.directory_lock(path)?;
        let _guard = directory_lock.lock().map_err(|_| Error::LockPoisoned {
            context: format!("clone directory {}", path.display()),
        })?;

        // The empty object is never fetched from anywhere
        let mut refs_to_verify: BTreeSet<&str> = requested_refs
            .iter()
            .map(String::as_str)
            .filter(|r| !EMPTY_GIT_OBJECT.starts_with(r))
            .collect();

        debug!(
            "Fetching refs {} from {}",
            requested_refs.join(", "),
            remote_uris.join(", ")
        );

        let mut cleanup = true;
        for remote_uri in remote_uris {
            self.prepare_remote(path, remote_uri, cleanup, cancel)?;
            cleanup = false;

            let mut found = Vec::new();
            for git_ref in refs_to_verify.iter().copied() {
                let ref_type = self.git.get_ref_type(path, git_ref, cancel)?;
                if ref_type == GitObjectType::Unknown {
                    continue;
                }

                found.push(git_ref);
                if ref_type == GitObjectType::RemoteRef {
                    let remote = self.git.add_remote_if_missing(path, remote_uri, cancel)?;
                    let upstream = format!("{}/{}", remote, git_ref);
                    self.git.run_git_checked(
                        path,
                        &["branch", "-f", "--track", git_ref, &upstream],
                        cancel,
                    )?;
                }
            }
            for git_ref in found {
                refs_to_verify.remove(git_ref);
            }

            if refs_to_verify.is_empty() {
                debug!("All requested refs found in {}", path.display());
                break;
            }
        }

        if !refs_to_verify.is_empty() {
            return Err(Error::not_found(format!(
                "Failed to find all requested refs ({}) in {}",
                refs_to_verify.into_iter().collect::<Vec<_>>().join(", "),
                remote_uris.join(", ")
            )));
        }

        cancel.check()?;
        self.checkout(path, checkout_ref, cancel)?;

        if reset_to_remote {
            self.reset_to_upstream(path, checkout_ref, cancel)?;
        }

        Ok(path.to_path_buf())
    }

    fn checkout(&self, path: &Path, checkout_ref: &str, cancel: &CancellationToken) -> Result<()> {
        match self.git.checkout(path, checkout_ref, cancel) {
            Err(Error::ProcessFailed { stderr, .. }) if stderr.contains(OVERWRITTEN_BY_CHECKOUT) => {
                debug!("Cleaning {} before checking out {}", path.display(), checkout_ref);
                self.git.clean(path, &["-fdqx", "."], cancel)?;
                self.git.force_checkout(path, checkout_ref, cancel)
            }
            other => other,
        }
    }

    fn reset_to_upstream(&self, path: &Path, branch: &str, cancel: &CancellationToken) -> Result<()> {
        let head = format!("refs/heads/{}", branch);
        let output = self.git.run_git_checked(
            path,
            &["for-each-ref", "--format=%(upstream:short)", &head],
            cancel,
        )?;
        let upstream = output.stdout.trim();
        if upstream.is_empty() {
            return Ok(());
        }

        cancel.check()?;
        self.git.run_git_checked(path, &["reset", "--hard", upstream], cancel)?;
        self.git.clean(path, &["-fdqx", "."], cancel)
    }

    /// Make sure `path` is a usable clone with `remote_uri` fetched.
    fn prepare_remote(
        &self,
        path: &Path,
        remote_uri: &str,
        cleanup: bool,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let key = CloneKey::new(path, remote_uri);
        self.cache.get_or_prepare(
            &key,
            |p| self.fs.dir_exists(p),
            || self.clone_or_fetch(path, remote_uri, cleanup, cancel),
        )
    }

    fn clone_or_fetch(
        &self,
        path: &Path,
        remote_uri: &str,
        cleanup: bool,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        cancel.check()?;

        if !self.fs.dir_exists(path) {
            debug!("Cloning {} to {}", remote_uri, path.display());
            let mut scope = TelemetryScope::new(self.telemetry.as_ref(), TrackedOperation::Clone, remote_uri);
            self.git.clone_no_checkout(remote_uri, path, cancel)?;
            scope.set_success();
            return Ok(path.to_path_buf());
        }

        debug!("Clone of {} found in {}, preparing for use", remote_uri, path.display());

        if cleanup {
            let reset = self
                .git
                .run_git(path, &["reset".to_string(), "--hard".to_string()], cancel)?;
            if !reset.succeeded() {
                warn!("Failed to clean up {}, re-cloning", path.display());
                return self.reclone(path, remote_uri, cancel);
            }
        }

        let remote = match self.git.add_remote_if_missing(path, remote_uri, cancel) {
            Err(Error::ProcessFailed { stderr, .. }) if stderr.contains(NOT_A_GIT_REPOSITORY) => {
                warn!("Clone at {} is not a git repository, re-cloning", path.display());
                return self.reclone(path, remote_uri, cancel);
            }
            other => other?,
        };

        let mut scope = TelemetryScope::new(self.telemetry.as_ref(), TrackedOperation::Fetch, remote_uri);
        self.git.update_remote(path, &remote, cancel)?;
        scope.set_success();

        Ok(path.to_path_buf())
    }

    fn reclone(&self, path: &Path, remote_uri: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        cancel.check()?;
        self.fs.delete_dir(path)?;
        self.clone_or_fetch(path, remote_uri, true, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use crate::git::testing::MockGitClient;
    use crate::process::ProcessOutput;
    use crate::telemetry::LogTelemetryRecorder;
    use std::time::Duration;
    use tempfile::TempDir;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    struct Fixture {
        temp: TempDir,
        git: MockGitClient,
        manager: CloneManager,
    }

    fn fixture(git: MockGitClient) -> Fixture {
        let temp = TempDir::new().unwrap();
        let info = VmrInfo::new(temp.path().join("vmr"), temp.path().join("tmp"));
        let manager = CloneManager::new(
            info,
            Arc::new(git.clone()),
            Arc::new(LocalFileSystem::new()),
            Arc::new(LogTelemetryRecorder),
            CloneCache::new(),
        );
        Fixture { temp, git, manager }
    }

    /// Knows branch `main`, commit [`SHA`] and remote branch `release`.
    fn responder(_: &Path, args: &[String]) -> ProcessOutput {
        let joined = args.join(" ");
        match args[0].as_str() {
            "show-ref" if joined.ends_with("refs/heads/main") => ProcessOutput::success(""),
            "show-ref" => ProcessOutput::failure(1, ""),
            "for-each-ref" if joined.contains("refs/remotes/*/release") => {
                ProcessOutput::success("refs/remotes/origin/release\n")
            }
            "for-each-ref" => ProcessOutput::success(""),
            "cat-file" if args[2] == SHA => ProcessOutput::success("commit\n"),
            "cat-file" => ProcessOutput::failure(128, "fatal: Not a valid object name"),
            "remote" if args.get(1).map(String::as_str) == Some("-v") => {
                ProcessOutput::success("origin\thttps://github.com/org/repo (fetch)\n")
            }
            _ => ProcessOutput::success(""),
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn mapping() -> SourceMapping {
        SourceMapping {
            name: "repo".to_string(),
            default_remote: "https://github.com/org/repo".to_string(),
            default_ref: "main".to_string(),
            include: Vec::new(),
            exclude: Vec::new(),
            disable_synchronization: false,
            version: None,
        }
    }

    #[test]
    fn test_cancelled_token_performs_no_git_calls() {
        let f = fixture(MockGitClient::new(responder));
        let token = CancellationToken::new();
        token.cancel();

        let result = f.manager.prepare_repo_clone(
            &mapping(),
            &strings(&["https://github.com/org/repo"]),
            &strings(&["main"]),
            "main",
            false,
            &token,
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(f.git.calls().is_empty());
    }

    #[test]
    fn test_no_remotes_is_an_argument_error() {
        let f = fixture(MockGitClient::new(responder));
        let result = f.manager.prepare_repo_clone(
            &mapping(),
            &[],
            &strings(&["main"]),
            "main",
            false,
            &CancellationToken::none(),
        );
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn test_missing_directory_is_cloned_and_checked_out() {
        let f = fixture(MockGitClient::new(responder));
        let path = f
            .manager
            .prepare_repo_clone(
                &mapping(),
                &strings(&["https://github.com/org/repo"]),
                &strings(&["main", SHA]),
                SHA,
                false,
                &CancellationToken::none(),
            )
            .unwrap();

        assert_eq!(path, f.temp.path().join("tmp").join("repo"));
        let calls = f.git.calls();
        assert_eq!(
            calls[0],
            vec![
                "clone".to_string(),
                "--no-checkout".to_string(),
                "https://github.com/org/repo".to_string(),
                path.display().to_string()
            ]
        );
        assert_eq!(calls.last().unwrap(), &strings(&["checkout", SHA]));
        assert_eq!(f.git.count(&["fetch"]), 0);
    }

    #[test]
    fn test_empty_object_refs_are_never_looked_up() {
        let f = fixture(MockGitClient::new(responder));
        f.manager
            .prepare_repo_clone(
                &mapping(),
                &strings(&["https://github.com/org/repo"]),
                &strings(&[EMPTY_GIT_OBJECT, &EMPTY_GIT_OBJECT[..7]]),
                "main",
                false,
                &CancellationToken::none(),
            )
            .unwrap();

        assert_eq!(f.git.count(&["show-ref"]), 0);
        assert_eq!(f.git.count(&["for-each-ref"]), 0);
        assert_eq!(f.git.count(&["cat-file"]), 0);
    }

    #[test]
    fn test_remote_ref_gets_a_tracking_branch() {
        let f = fixture(MockGitClient::new(responder));
        f.manager
            .prepare_repo_clone(
                &mapping(),
                &strings(&["https://github.com/org/repo"]),
                &strings(&["release"]),
                "release",
                false,
                &CancellationToken::none(),
            )
            .unwrap();

        assert_eq!(
            f.git.count(&["branch", "-f", "--track", "release", "origin/release"]),
            1
        );
    }

    #[test]
    fn test_missing_refs_name_refs_and_remotes() {
        let f = fixture(MockGitClient::new(responder));
        let err = f
            .manager
            .prepare_repo_clone(
                &mapping(),
                &strings(&["https://a/repo", "https://b/repo"]),
                &strings(&["main", "nope"]),
                "main",
                false,
                &CancellationToken::none(),
            )
            .unwrap_err();

        let message = err.to_string();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(message.contains("nope"));
        assert!(message.contains("https://a/repo, https://b/repo"));
        // The second remote was tried too, `main` is only looked up once
        assert_eq!(f.git.count(&["cat-file", "-t", "nope"]), 2);
        assert_eq!(f.git.count(&["show-ref", "--verify", "--quiet", "refs/heads/main"]), 1);
    }

    #[test]
    fn test_existing_clone_is_reset_and_fetched_once() {
        let f = fixture(MockGitClient::new(responder));
        let dir = f.temp.path().join("tmp").join("repo");
        std::fs::create_dir_all(&dir).unwrap();

        for _ in 0..2 {
            f.manager
                .prepare_repo_clone(
                    &mapping(),
                    &strings(&["https://github.com/org/repo"]),
                    &strings(&["main"]),
                    "main",
                    false,
                    &CancellationToken::none(),
                )
                .unwrap();
        }

        assert_eq!(f.git.count(&["clone"]), 0);
        assert_eq!(f.git.count(&["reset", "--hard"]), 1);
        assert_eq!(f.git.count(&["fetch", "origin"]), 1);
        assert_eq!(f.git.count(&["checkout", "main"]), 2);
    }

    #[test]
    fn test_failed_cleanup_deletes_and_reclones() {
        let f = fixture(MockGitClient::new(|repo, args| {
            if args[0] == "reset" {
                ProcessOutput::failure(128, "fatal: corrupt index")
            } else {
                responder(repo, args)
            }
        }));
        let dir = f.temp.path().join("tmp").join("repo");
        std::fs::create_dir_all(dir.join("leftover")).unwrap();

        f.manager
            .prepare_repo_clone(
                &mapping(),
                &strings(&["https://github.com/org/repo"]),
                &strings(&["main"]),
                "main",
                false,
                &CancellationToken::none(),
            )
            .unwrap();

        assert!(!dir.exists());
        assert_eq!(f.git.count(&["clone", "--no-checkout"]), 1);
    }

    #[test]
    fn test_not_a_git_repository_reclones() {
        let f = fixture(MockGitClient::new(|repo, args| {
            if args[0] == "remote" {
                ProcessOutput::failure(128, "fatal: not a git repository (or any of the parent directories): .git")
            } else {
                responder(repo, args)
            }
        }));
        let dir = f.temp.path().join("tmp").join("repo");
        std::fs::create_dir_all(&dir).unwrap();

        f.manager
            .prepare_repo_clone(
                &mapping(),
                &strings(&["https://github.com/org/repo"]),
                &strings(&["main"]),
                "main",
                false,
                &CancellationToken::none(),
            )
            .unwrap();

        assert_eq!(f.git.count(&["clone", "--no-checkout"]), 1);
    }

    #[test]
    fn test_checkout_falls_back_to_clean_and_force() {
        let f = fixture(MockGitClient::new(|repo, args| {
            if args.len() == 2 && args[0] == "checkout" {
                ProcessOutput::failure(
                    1,
                    "error: The following untracked working tree files would be overwritten by checkout",
                )
            } else {
                responder(repo, args)
            }
        }));

        f.manager
            .prepare_repo_clone(
                &mapping(),
                &strings(&["https://github.com/org/repo"]),
                &strings(&["main"]),
                "main",
                false,
                &CancellationToken::none(),
            )
            .unwrap();

        assert_eq!(f.git.count(&["clean", "-fdqx", "."]), 1);
        assert_eq!(f.git.count(&["checkout", "-f", "main"]), 1);
    }

    #[test]
    fn test_reset_to_remote_uses_upstream() {
        let f = fixture(MockGitClient::new(|repo, args| {
            if args[0] == "for-each-ref" && args[1] == "--format=%(upstream:short)" {
                ProcessOutput::success("origin/main\n")
            } else {
                responder(repo, args)
            }
        }));

        f.manager
            .prepare_repo_clone(
                &mapping(),
                &strings(&["https://github.com/org/repo"]),
                &strings(&["main"]),
                "main",
                true,
                &CancellationToken::none(),
            )
            .unwrap();

        let calls = f.git.calls();
        let tail: Vec<_> = calls[calls.len() - 3..].to_vec();
        assert_eq!(
            tail,
            vec![
                strings(&["for-each-ref", "--format=%(upstream:short)", "refs/heads/main"]),
                strings(&["reset", "--hard", "origin/main"]),
                strings(&["clean", "-fdqx", "."]),
            ]
        );
    }

    #[test]
    fn test_prepare_vmr_records_uri() {
        let f = fixture(MockGitClient::new(responder));
        let path = f
            .manager
            .prepare_vmr(
                &strings(&["https://github.com/dotnet/dotnet"]),
                &strings(&["main"]),
                "main",
                false,
                &CancellationToken::none(),
            )
            .unwrap();

        assert_eq!(path, f.temp.path().join("vmr"));
        assert_eq!(
            f.manager.vmr_info.vmr_uri().as_deref(),
            Some("https://github.com/dotnet/dotnet")
        );
    }

    #[test]
    fn test_concurrent_preparation_of_one_directory_clones_once() {
        let git = MockGitClient::new(|repo, args| {
            if args[0] == "clone" {
                std::thread::sleep(Duration::from_millis(30));
                std::fs::create_dir_all(&args[3]).unwrap();
            }
            responder(repo, args)
        });
        let f = Arc::new(fixture(git));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let f = f.clone();
                std::thread::spawn(move || {
                    f.manager
                        .prepare_repo_clone(
                            &mapping(),
                            &strings(&["https://github.com/org/repo"]),
                            &strings(&["main"]),
                            "main",
                            false,
                            &CancellationToken::none(),
                        )
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(f.git.count(&["clone"]), 1);
        assert_eq!(f.git.count(&["fetch"]), 0);
    }
}
