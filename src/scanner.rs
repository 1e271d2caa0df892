//! Read-only checks of the VMR's `src/` trees
//!
//! [`VmrScanner::scan`] finds files that a mapping's exclusion rules should
//! have kept out of `src/<mapping>` (cloaked files which got in anyway).
//! [`VmrScanner::scan_binaries`] finds binary files. Both report paths
//! relative to the VMR root, sorted, minus anything the baseline file
//! allows.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::dependency_tracker::DependencyTracker;
use crate::error::Result;
use crate::filesystem::FileSystem;
use crate::path::glob_match;
use crate::source_mapping::SourceMapping;
use crate::vmr_info::{VmrInfo, SOURCES_DIR};

/// Bytes inspected when deciding whether a file is binary
pub const BINARY_SNIFF_SIZE: usize = 8000;

pub struct VmrScanner {
    vmr_info: VmrInfo,
    tracker: Arc<DependencyTracker>,
    fs: Arc<dyn FileSystem>,
}

impl VmrScanner {
    pub fn new(vmr_info: VmrInfo, tracker: Arc<DependencyTracker>, fs: Arc<dyn FileSystem>) -> Self {
        Self { vmr_info, tracker, fs }
    }

    /// Files of each `src/<mapping>` matching one of the mapping's exclusion
    /// rules.
    pub fn scan(&self, baseline_file: Option<&Path>) -> Result<Vec<String>> {
        self.run("cloaked", baseline_file, |mapping, relative, _| {
            for pattern in &mapping.exclude {
                if glob_match(pattern, relative)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    /// Files of each `src/<mapping>` with a NUL byte among their first
    /// [`BINARY_SNIFF_SIZE`] bytes
    pub fn scan_binaries(&self, baseline_file: Option<&Path>) -> Result<Vec<String>> {
        self.run("binary", baseline_file, |_, _, path| is_binary(path))
    }

    fn run<F>(&self, kind: &str, baseline_file: Option<&Path>, offends: F) -> Result<Vec<String>>
    where
        F: Fn(&SourceMapping, &str, &Path) -> Result<bool> + Sync,
    {
        self.tracker.refresh_metadata(None)?;
        let baseline = match baseline_file {
            Some(path) => parse_baseline(&self.fs.read_to_string(path)?),
            None => Vec::new(),
        };
        let mappings = self.tracker.mappings()?;
        info!("Scanning {} mapping(s) for {} files", mappings.len(), kind);

        let per_mapping: Vec<Result<Vec<String>>> = mappings
            .par_iter()
            .map(|mapping| self.scan_mapping(mapping, &baseline, &offends))
            .collect();

        let mut files = Vec::new();
        for result in per_mapping {
            files.extend(result?);
        }
        files.sort();

        info!("Found {} {} file(s)", files.len(), kind);
        Ok(files)
    }

    fn scan_mapping<F>(&self, mapping: &SourceMapping, baseline: &[String], offends: &F) -> Result<Vec<String>>
    where
        F: Fn(&SourceMapping, &str, &Path) -> Result<bool>,
    {
        let root = self.vmr_info.repo_sources_path(&mapping.name);
        if !self.fs.dir_exists(&root) {
            debug!("{} is not in the VMR, skipping", mapping.name);
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(relative) = unix_relative(&root, entry.path()) else {
                continue;
            };
            let vmr_relative = format!("{}/{}/{}", SOURCES_DIR, mapping.name, relative);
            if is_baselined(baseline, &vmr_relative)? {
                continue;
            }
            if offends(mapping, &relative, entry.path())? {
                debug!("{} is flagged", vmr_relative);
                found.push(vmr_relative);
            }
        }
        Ok(found)
    }
}

/// Glob patterns of a baseline file, one per line. Blank lines and `#`
/// comments are skipped.
pub fn parse_baseline(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_baselined(baseline: &[String], path: &str) -> Result<bool> {
    for pattern in baseline {
        if glob_match(pattern, path)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn unix_relative(root: &Path, path: &Path) -> Option<String> {
    let relative: PathBuf = path.strip_prefix(root).ok()?.to_path_buf();
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Whether `path` has a NUL byte among its first [`BINARY_SNIFF_SIZE`] bytes.
pub fn is_binary(path: &Path) -> Result<bool> {
    let mut buffer = Vec::with_capacity(BINARY_SNIFF_SIZE);
    File::open(path)?
        .take(BINARY_SNIFF_SIZE as u64)
        .read_to_end(&mut buffer)?;
    Ok(buffer.contains(&0))
}
