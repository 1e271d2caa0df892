//! # Scan Command Implementation
//!
//! Read-only check of the VMR's `src/` trees. Lists files that the mapping
//! exclusions should have kept out of the VMR and, with `--binaries`, binary
//! files. The command fails when anything is found.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;

use vmr_codeflow::dependency_tracker::DependencyTracker;
use vmr_codeflow::filesystem::{FileSystem, LocalFileSystem};
use vmr_codeflow::scanner::VmrScanner;
use vmr_codeflow::source_mapping::SourceMappingParser;
use vmr_codeflow::vmr_info::VmrInfo;

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// File of glob patterns (relative to the VMR root) of allowed files
    #[arg(long, value_name = "FILE")]
    pub baseline: Option<PathBuf>,

    /// Look for binary files instead of excluded ones
    #[arg(long)]
    pub binaries: bool,
}

/// Execute the `scan` command.
pub fn execute(vmr_info: &VmrInfo, args: ScanArgs) -> Result<()> {
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
    let tracker = Arc::new(DependencyTracker::new(
        vmr_info.clone(),
        SourceMappingParser::new(vmr_info.clone(), fs.clone()),
        fs.clone(),
    ));
    let scanner = VmrScanner::new(vmr_info.clone(), tracker, fs);

    let baseline = args.baseline.as_deref();
    let (files, kind) = if args.binaries {
        (scanner.scan_binaries(baseline)?, "binary")
    } else {
        (scanner.scan(baseline)?, "excluded")
    };

    if files.is_empty() {
        println!("No {} files found", kind);
        return Ok(());
    }

    for file in &files {
        println!("{}", file);
    }
    bail!("Found {} {} file(s) in the VMR", files.len(), kind)
}
