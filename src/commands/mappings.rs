//! # Mappings Command Implementation
//!
//! Prints every source mapping with its default ref and remote.

use std::sync::Arc;

use anyhow::Result;

use vmr_codeflow::filesystem::{FileSystem, LocalFileSystem};
use vmr_codeflow::source_mapping::SourceMappingParser;
use vmr_codeflow::vmr_info::VmrInfo;

/// Execute the `mappings` command.
pub fn execute(vmr_info: &VmrInfo) -> Result<()> {
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
    let parser = SourceMappingParser::new(vmr_info.clone(), fs);
    let mappings = parser.parse_mappings(&vmr_info.default_mappings_path())?;

    for mapping in &mappings {
        let disabled = if mapping.disable_synchronization { " (disabled)" } else { "" };
        println!("{} @ {} from {}{}", mapping.name, mapping.default_ref, mapping.default_remote, disabled);
    }
    Ok(())
}
