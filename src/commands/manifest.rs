//! # Manifest Command Implementation
//!
//! Prints the repositories and submodules recorded in
//! `src/source-manifest.json`.

use anyhow::Result;

use vmr_codeflow::filesystem::LocalFileSystem;
use vmr_codeflow::git::short_sha;
use vmr_codeflow::source_manifest::SourceManifest;
use vmr_codeflow::vmr_info::VmrInfo;

/// Execute the `manifest` command.
pub fn execute(vmr_info: &VmrInfo) -> Result<()> {
    let mut manifest = SourceManifest::new();
    manifest.refresh(&LocalFileSystem::new(), &vmr_info.source_manifest_path())?;

    for repository in manifest.repositories() {
        let bar_id = repository.bar_id.map(|id| format!(" (build {})", id)).unwrap_or_default();
        println!(
            "{} {} {}{}",
            repository.path,
            short_sha(&repository.commit_sha),
            repository.remote_uri,
            bar_id
        );
    }
    for submodule in manifest.submodules() {
        println!(
            "{} {} {}",
            submodule.path,
            short_sha(&submodule.commit_sha),
            submodule.remote_uri
        );
    }
    Ok(())
}
