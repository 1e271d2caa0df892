//! Resolving what a flow cannot simply replay
//!
//! When a flow goes in the opposite direction of the previous one, the
//! target branch may have moved on independently. The resolvers merge it
//! into the head branch and reconcile the version files of both sides.
//!
//! - [`branch`] merges the target branch and auto-resolves known conflicts
//! - [`backflow`] recomputes the repository's dependencies after a backflow
//! - [`forward`] merges the version files inside `src/<mapping>` after a
//!   forward flow

pub mod backflow;
pub mod branch;
pub mod forward;

use std::path::Path;

use crate::codeflow::{Codeflow, CodeflowOptions, LastFlows};
use crate::dependency_files::DependencyUpdate;

/// Everything a resolver needs to know about the flow being resolved
#[derive(Debug, Clone, Copy)]
pub struct FlowContext<'a> {
    pub options: &'a CodeflowOptions,
    pub last_flows: &'a LastFlows,
    pub current_flow: &'a Codeflow,
    /// Whether the head branch existed before this flow started
    pub head_existed: bool,
    /// Clone of the component repository
    pub repo: &'a Path,
    /// Repository the flow is committed to (the VMR for forward flows)
    pub target_repo: &'a Path,
}

impl FlowContext<'_> {
    pub fn mapping_name(&self) -> &str {
        &self.options.mapping.name
    }
}

/// What a resolver left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Conflicts that need a human; nothing else was done when non-empty
    pub conflicted_files: Vec<String>,
    pub dependency_updates: Vec<DependencyUpdate>,
}

impl Resolution {
    pub fn conflicts(conflicted_files: Vec<String>) -> Self {
        Self {
            conflicted_files,
            dependency_updates: Vec::new(),
        }
    }
}
