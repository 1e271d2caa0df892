//! Reconstructing the most recent flows from repository history
//!
//! - The last forward flow is the commit recorded for the mapping in the
//!   source manifest, paired with the VMR commit that last touched that
//!   manifest line.
//! - The last backflow is the `<Source>` element of the repository's
//!   `eng/Version.Details.xml`, paired with the repository commit that last
//!   touched that element.
//!
//! When both exist, the newer one is the last flow. Commits of the side the
//! current flow comes from are compared by ancestry.

use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use super::{Codeflow, LastFlows};
use crate::cancellation::CancellationToken;
use crate::dependency_tracker::DependencyTracker;
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::git::{GitClient, GitObjectType};
use crate::version_details::{VersionDetails, VERSION_DETAILS_XML};
use crate::vmr_info::{VmrInfo, SOURCE_MANIFEST_FILE};

const SOURCE_ELEMENT: &str = "<Source";

/// Reads flow records out of the VMR and a repository clone
pub struct LastFlowsReader {
    vmr_info: VmrInfo,
    git: Arc<dyn GitClient>,
    fs: Arc<dyn FileSystem>,
    tracker: Arc<DependencyTracker>,
}

impl LastFlowsReader {
    pub fn new(
        vmr_info: VmrInfo,
        git: Arc<dyn GitClient>,
        fs: Arc<dyn FileSystem>,
        tracker: Arc<DependencyTracker>,
    ) -> Self {
        Self {
            vmr_info,
            git,
            fs,
            tracker,
        }
    }

    /// Last forward flow of `mapping_name` according to the source manifest
    pub fn last_forward_flow(&self, mapping_name: &str, cancel: &CancellationToken) -> Result<Codeflow> {
        let record = self.tracker.manifest()?.get_repo_version(mapping_name)?;
        let repo_sha = record.commit_sha;
        let vmr_sha = self.git.blame_line(
            &self.vmr_info.vmr_path(),
            SOURCE_MANIFEST_FILE,
            &|line: &str| line.contains(repo_sha.as_str()),
            None,
            cancel,
        )?;
        Ok(Codeflow::forward(repo_sha, vmr_sha))
    }

    /// Last backflow into the repository at `repo`, if it was ever backflowed
    pub fn last_backflow(&self, repo: &Path, cancel: &CancellationToken) -> Result<Option<Codeflow>> {
        let path = repo.join(VERSION_DETAILS_XML);
        if !self.fs.file_exists(&path) {
            debug!("{} not found, {} was never backflowed", VERSION_DETAILS_XML, repo.display());
            return Ok(None);
        }

        let details = VersionDetails::parse(&self.fs.read_to_string(&path)?, true)?;
        let Some(source) = details.source else {
            return Ok(None);
        };

        let vmr_sha = source.sha;
        let repo_sha = self.git.blame_line(
            repo,
            VERSION_DETAILS_XML,
            &|line: &str| line.contains(SOURCE_ELEMENT) && line.contains(vmr_sha.as_str()),
            None,
            cancel,
        )?;
        Ok(Some(Codeflow::backflow(vmr_sha, repo_sha)))
    }

    /// Determine the last flows between `mapping_name` and the repository at
    /// `repo`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSynchronization` when the commits of the two
    /// last flows cannot be found or ordered.
    ///
    /// The crossing flow is left for the caller to detect.
    pub fn read(
        &self,
        mapping_name: &str,
        repo: &Path,
        current_is_backflow: bool,
        cancel: &CancellationToken,
    ) -> Result<LastFlows> {
        let last_forward_flow = self.last_forward_flow(mapping_name, cancel)?;
        let Some(last_backflow) = self.last_backflow(repo, cancel)? else {
            return Ok(LastFlows {
                last_flow: last_forward_flow.clone(),
                last_backflow: None,
                last_forward_flow,
                crossing_flow: None,
            });
        };

        let vmr_path = self.vmr_info.vmr_path();
        let (comparison_repo, backward_sha, forward_sha) = if current_is_backflow {
            (vmr_path.as_path(), last_backflow.vmr_sha(), last_forward_flow.vmr_sha())
        } else {
            (repo, last_backflow.repo_sha(), last_forward_flow.repo_sha())
        };

        for sha in [backward_sha, forward_sha] {
            if self.git.get_ref_type(comparison_repo, sha, cancel)? != GitObjectType::Commit {
                return Err(Error::InvalidSynchronization {
                    message: format!(
                        "Failed to find one or both commits {}, {} in {}",
                        backward_sha,
                        forward_sha,
                        comparison_repo.display()
                    ),
                });
            }
        }

        let history = |last_flow: &Codeflow| LastFlows {
            last_flow: last_flow.clone(),
            last_backflow: Some(last_backflow.clone()),
            last_forward_flow: last_forward_flow.clone(),
            crossing_flow: None,
        };

        // A commit created by a flow into one side that was then flown out again
        if backward_sha == forward_sha {
            return Ok(if current_is_backflow {
                history(&last_backflow)
            } else {
                history(&last_forward_flow)
            });
        }

        let forward_is_older = self
            .git
            .is_ancestor_commit(comparison_repo, forward_sha, backward_sha, cancel)?;
        let backward_is_older = self
            .git
            .is_ancestor_commit(comparison_repo, backward_sha, forward_sha, cancel)?;

        if forward_is_older == backward_is_older {
            return Err(Error::InvalidSynchronization {
                message: format!(
                    "Failed to determine which commit of {} is older ({}, {})",
                    comparison_repo.display(),
                    backward_sha,
                    forward_sha
                ),
            });
        }

        // A backflow that came from another VMR branch does not count for
        // forward flows into this one
        if !current_is_backflow && forward_is_older {
            let current_vmr_sha = self.git.get_sha(&vmr_path, None, cancel)?;
            if !self
                .git
                .is_ancestor_commit(&vmr_path, last_backflow.vmr_sha(), &current_vmr_sha, cancel)?
            {
                warn!(
                    "Last backflow ({}) comes from a different VMR branch than {}, considering the last forward flow to be the last flow",
                    last_backflow.vmr_sha(),
                    current_vmr_sha
                );
                return Ok(history(&last_forward_flow));
            }
        }

        Ok(if backward_is_older {
            history(&last_forward_flow)
        } else {
            history(&last_backflow)
        })
    }
}
