//! # VMR code flow library
//!
//! This library keeps a virtual mono repo (VMR) and the component
//! repositories it embeds in sync. It is used by the `vmr-codeflow`
//! command-line tool but can also be integrated into other services that
//! open code flow pull requests.
//!
//! ## Quick Example
//!
//! ```
//! use vmr_codeflow::codeflow::Codeflow;
//!
//! let flow = Codeflow::forward("1111111aaaa", "2222222bbbb");
//! assert!(flow.is_forward());
//! assert_eq!(flow.source_sha(), "1111111aaaa");
//! assert_eq!(flow.branch_name(), "codeflow/1111111-2222222");
//! ```
//!
//! ## Core Concepts
//!
//! - **Configuration (`vmr_info`, `source_mapping`)**: the shared VMR
//!   location handle and the declarative mappings of
//!   `src/source-mappings.json`.
//! - **State (`source_manifest`, `dependency_tracker`)**: which commit of
//!   every repository and submodule is currently in the VMR.
//! - **Repositories (`git`, `clone_manager`, `cache`)**: git invocations
//!   behind the [`git::GitClient`] trait and memoized clones.
//! - **Patches (`patch_handler`)**: filtered diffs replayed across the
//!   repository/VMR boundary.
//! - **Dependency files (`version_details`, `dependency_files`, `merge`)**:
//!   `eng/Version.Details.xml` and friends, with three-way merges of their
//!   changes.
//! - **Flows (`codeflow`, `conflicts`)**: forward flows and backflows, with
//!   conflict resolution against the target branch.
//! - **Supporting tools (`scanner`, `notices`, `pusher`)**: read-only checks
//!   of the VMR, the aggregated third-party notices and publishing.
//!
//! ## Execution Flow
//!
//! A flow of either direction runs the following steps:
//!
//! 1.  **History**: find the last forward flow and the last backflow.
//! 2.  **Direction**: compare the last flow's direction with the new one.
//! 3.  **Replay**: apply patches incrementally, or rebuild the mapped files
//!     from scratch when the direction changed.
//! 4.  **Merge**: merge the target branch, auto-resolving known conflicts.
//! 5.  **Dependencies**: reconcile dependency files and commit the result.

pub mod assets;
pub mod cache;
pub mod cancellation;
pub mod clone_manager;
pub mod codeflow;
pub mod conflicts;
pub mod dependency_files;
pub mod dependency_tracker;
pub mod error;
pub mod filesystem;
pub mod git;
pub mod merge;
pub mod notices;
pub mod patch_handler;
pub mod path;
pub mod process;
pub mod pusher;
pub mod scanner;
pub mod source_manifest;
pub mod source_mapping;
pub mod telemetry;
pub mod version_details;
pub mod vmr_info;

#[cfg(test)]
mod path_proptest;
#[cfg(test)]
mod test_fixtures;
