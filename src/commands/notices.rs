//! # Notices Command Implementation
//!
//! Regenerates `THIRD-PARTY-NOTICES.txt` at the VMR root.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;

use vmr_codeflow::dependency_tracker::DependencyTracker;
use vmr_codeflow::filesystem::{FileSystem, LocalFileSystem};
use vmr_codeflow::notices::ThirdPartyNoticesGenerator;
use vmr_codeflow::source_mapping::SourceMappingParser;
use vmr_codeflow::vmr_info::VmrInfo;

#[derive(Args, Debug)]
pub struct NoticesArgs {
    /// Header template. Defaults to `thirdPartyNoticesTemplatePath` of the
    /// mappings file, relative to the VMR root.
    #[arg(long, value_name = "FILE")]
    pub template: Option<PathBuf>,
}

/// Execute the `notices` command.
pub fn execute(vmr_info: &VmrInfo, args: NoticesArgs) -> Result<()> {
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
    let tracker = Arc::new(DependencyTracker::new(
        vmr_info.clone(),
        SourceMappingParser::new(vmr_info.clone(), fs.clone()),
        fs.clone(),
    ));
    tracker
        .refresh_metadata(None)
        .with_context(|| format!("Failed to load VMR metadata from {}", vmr_info.vmr_path().display()))?;

    // The parse above fills in the template path of the mappings file.
    let template = match args.template {
        Some(path) => path,
        None => vmr_info
            .vmr_path()
            .join(vmr_info.third_party_notices_template_path().unwrap_or_default()),
    };

    ThirdPartyNoticesGenerator::new(vmr_info.clone(), tracker, fs).update_third_party_notices(&template)?;
    println!("Updated {}", vmr_info.third_party_notices_path().display());
    Ok(())
}
