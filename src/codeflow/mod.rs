//! # Code flow
//!
//! A code flow moves the changes of one side of a repository/VMR pair to the
//! other side:
//!
//! - a **forward flow** takes a commit of a component repository into
//!   `src/<mapping>` of the VMR,
//! - a **backflow** takes a VMR commit back into the component repository.
//!
//! Every flow is recorded as a pair of SHAs. Forward flows are recorded in
//! `src/source-manifest.json`, backflows in the `<Source>` element of the
//! repository's `eng/Version.Details.xml`. The most recent records are read
//! back by [`last_flows`] to decide how the next flow is computed.
//!
//! The sequencing shared by both directions lives in [`flower::CodeFlower`].
//! [`forward::ForwardFlower`] and [`backflow::Backflower`] plug into it
//! through [`flower::FlowDirection`].

pub mod backflow;
pub mod flower;
pub mod forward;
pub mod last_flows;

use std::path::PathBuf;

use crate::assets::Build;
use crate::dependency_files::DependencyUpdate;
use crate::git::short_sha;
use crate::source_mapping::SourceMapping;

/// One synchronization event between a repository and the VMR
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codeflow {
    /// Repository commit `repo_sha` was flown into VMR commit `vmr_sha`
    Forward { repo_sha: String, vmr_sha: String },
    /// VMR commit `vmr_sha` was flown into repository commit `repo_sha`
    Backflow { vmr_sha: String, repo_sha: String },
}

impl Codeflow {
    pub fn forward(repo_sha: impl Into<String>, vmr_sha: impl Into<String>) -> Self {
        Codeflow::Forward {
            repo_sha: repo_sha.into(),
            vmr_sha: vmr_sha.into(),
        }
    }

    pub fn backflow(vmr_sha: impl Into<String>, repo_sha: impl Into<String>) -> Self {
        Codeflow::Backflow {
            vmr_sha: vmr_sha.into(),
            repo_sha: repo_sha.into(),
        }
    }

    pub fn repo_sha(&self) -> &str {
        match self {
            Codeflow::Forward { repo_sha, .. } | Codeflow::Backflow { repo_sha, .. } => repo_sha,
        }
    }

    pub fn vmr_sha(&self) -> &str {
        match self {
            Codeflow::Forward { vmr_sha, .. } | Codeflow::Backflow { vmr_sha, .. } => vmr_sha,
        }
    }

    /// SHA on the side the changes came from
    pub fn source_sha(&self) -> &str {
        match self {
            Codeflow::Forward { repo_sha, .. } => repo_sha,
            Codeflow::Backflow { vmr_sha, .. } => vmr_sha,
        }
    }

    /// SHA on the side the changes went to
    pub fn target_sha(&self) -> &str {
        match self {
            Codeflow::Forward { vmr_sha, .. } => vmr_sha,
            Codeflow::Backflow { repo_sha, .. } => repo_sha,
        }
    }

    pub fn is_forward(&self) -> bool {
        matches!(self, Codeflow::Forward { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codeflow::Forward { .. } => "forward",
            Codeflow::Backflow { .. } => "backward",
        }
    }

    /// Name of the branch holding the work of this flow
    pub fn branch_name(&self) -> String {
        format!("codeflow/{}-{}", short_sha(self.source_sha()), short_sha(self.target_sha()))
    }
}

/// The flows a new flow is computed against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastFlows {
    /// Most recent flow of either direction
    pub last_flow: Codeflow,
    pub last_backflow: Option<Codeflow>,
    pub last_forward_flow: Codeflow,
    /// A flow of the opposite direction that got merged after the last flow
    /// was created
    pub crossing_flow: Option<Codeflow>,
}

/// What to flow and where
#[derive(Debug, Clone)]
pub struct CodeflowOptions {
    pub mapping: SourceMapping,
    /// Build of the source side being flown
    pub build: Build,
    /// Asset names or `*` patterns that are never updated by the flow
    pub excluded_assets: Vec<String>,
    /// Branch the flow is eventually merged into
    pub target_branch: String,
    /// Branch the flow is committed to
    pub head_branch: String,
    /// Skip re-applying `src/patches/<mapping>` after a forward flow
    pub discard_patches: bool,
}

/// Outcome of one flow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeFlowResult {
    pub had_updates: bool,
    /// Files that could not be merged automatically
    pub conflicted_files: Vec<String>,
    pub dependency_updates: Vec<DependencyUpdate>,
    /// Repository the flow was committed to
    pub repo_path: PathBuf,
}

impl CodeFlowResult {
    pub fn had_conflicts(&self) -> bool {
        !self.conflicted_files.is_empty()
    }
}
