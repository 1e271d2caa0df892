//! Publishing the VMR
//!
//! Before a VMR branch is pushed, every commit recorded in the source
//! manifest can be checked to be public in its own repository, so the VMR
//! never references sources nobody else can fetch.

use std::sync::Arc;

use log::{debug, info};

use crate::cancellation::CancellationToken;
use crate::dependency_tracker::DependencyTracker;
use crate::error::{Error, Result};
use crate::git::{GitClient, EMPTY_GIT_OBJECT};
use crate::vmr_info::VmrInfo;

/// Tells whether a commit can be fetched from a public repository
pub trait CommitVerifier: Send + Sync {
    fn is_commit_public(&self, repo_uri: &str, sha: &str) -> Result<bool>;
}

pub struct VmrPusher {
    vmr_info: VmrInfo,
    git: Arc<dyn GitClient>,
    tracker: Arc<DependencyTracker>,
    verifier: Arc<dyn CommitVerifier>,
}

impl VmrPusher {
    pub fn new(
        vmr_info: VmrInfo,
        git: Arc<dyn GitClient>,
        tracker: Arc<DependencyTracker>,
        verifier: Arc<dyn CommitVerifier>,
    ) -> Self {
        Self {
            vmr_info,
            git,
            tracker,
            verifier,
        }
    }

    /// Push `branch` of the VMR to `remote`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSynchronization` when `verify` is set and a
    /// recorded commit is not public. Nothing is pushed in that case.
    pub fn push(&self, remote: &str, branch: &str, verify: bool, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;

        if verify {
            self.verify_commits()?;
        }

        let vmr = self.vmr_info.vmr_path();
        info!("Pushing {} to {}", branch, remote);
        self.git.run_git_checked(&vmr, &["push", remote, branch], cancel)?;
        Ok(())
    }

    fn verify_commits(&self) -> Result<()> {
        self.tracker.refresh_metadata(None)?;
        let manifest = self.tracker.manifest()?;

        let commits = manifest
            .repositories()
            .iter()
            .map(|r| (r.remote_uri.as_str(), r.commit_sha.as_str()))
            .chain(
                manifest
                    .submodules()
                    .iter()
                    .map(|s| (s.remote_uri.as_str(), s.commit_sha.as_str())),
            )
            .filter(|(_, sha)| *sha != EMPTY_GIT_OBJECT);

        for (uri, sha) in commits {
            debug!("Verifying {} is public in {}", sha, uri);
            if !self.verifier.is_commit_public(uri, sha)? {
                return Err(Error::InvalidSynchronization {
                    message: format!("Commit {} of {} is not public, refusing to push the VMR", sha, uri),
                });
            }
        }
        Ok(())
    }
}
