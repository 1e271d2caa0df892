//! Shared, reassignable VMR configuration
//!
//! [`VmrInfo`] is a handle: cloning it shares the underlying state, so
//! reassigning the VMR root through any clone is visible everywhere.
//! Every derived path is computed from the current root on each call.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::path::{NativePath, UnixPath};

/// Directory under the VMR root holding all mapped sources
pub const SOURCES_DIR: &str = "src";
/// Hand-authored patches reapplied on every synchronization
pub const PATCHES_DIR: &str = "src/patches";
pub const SOURCE_MANIFEST_FILE: &str = "src/source-manifest.json";
pub const SOURCE_MAPPINGS_FILE: &str = "src/source-mappings.json";
pub const THIRD_PARTY_NOTICES_FILE: &str = "THIRD-PARTY-NOTICES.txt";

/// Git attribute that keeps a file out of the VMR
pub const IGNORE_ATTRIBUTE: &str = "vmr-ignore";
/// Git attribute that keeps a file in the VMR even when excluded
pub const KEEP_ATTRIBUTE: &str = "vmr-keep";

#[derive(Debug, Default)]
struct VmrInfoState {
    vmr_path: PathBuf,
    tmp_path: PathBuf,
    vmr_uri: Option<String>,
    third_party_notices_template_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VmrInfo {
    state: Arc<RwLock<VmrInfoState>>,
}

impl VmrInfo {
    pub fn new(vmr_path: impl Into<PathBuf>, tmp_path: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(RwLock::new(VmrInfoState {
                vmr_path: vmr_path.into(),
                tmp_path: tmp_path.into(),
                ..Default::default()
            })),
        }
    }

    // A poisoned lock only means a writer panicked mid-assignment of plain
    // values, the data itself is still usable.
    fn read(&self) -> RwLockReadGuard<'_, VmrInfoState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VmrInfoState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn vmr_path(&self) -> PathBuf {
        self.read().vmr_path.clone()
    }

    pub fn set_vmr_path(&self, path: impl Into<PathBuf>) {
        self.write().vmr_path = path.into();
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.read().tmp_path.clone()
    }

    pub fn set_tmp_path(&self, path: impl Into<PathBuf>) {
        self.write().tmp_path = path.into();
    }

    pub fn vmr_uri(&self) -> Option<String> {
        self.read().vmr_uri.clone()
    }

    pub fn set_vmr_uri(&self, uri: impl Into<String>) {
        self.write().vmr_uri = Some(uri.into());
    }

    pub fn third_party_notices_template_path(&self) -> Option<String> {
        self.read().third_party_notices_template_path.clone()
    }

    pub fn set_third_party_notices_template_path(&self, path: Option<String>) {
        self.write().third_party_notices_template_path = path;
    }

    fn under_root(&self, relative: &str) -> PathBuf {
        NativePath::new(self.vmr_path()).join(relative).into_path_buf()
    }

    pub fn source_manifest_path(&self) -> PathBuf {
        self.under_root(SOURCE_MANIFEST_FILE)
    }

    pub fn default_mappings_path(&self) -> PathBuf {
        self.under_root(SOURCE_MAPPINGS_FILE)
    }

    pub fn third_party_notices_path(&self) -> PathBuf {
        self.under_root(THIRD_PARTY_NOTICES_FILE)
    }

    /// `<vmr>/src/<mapping>`
    pub fn repo_sources_path(&self, mapping_name: &str) -> PathBuf {
        self.under_root(Self::relative_repo_sources_path(mapping_name).as_str())
    }

    /// `src/<mapping>` relative to the VMR root
    pub fn relative_repo_sources_path(mapping_name: &str) -> UnixPath {
        UnixPath::new(SOURCES_DIR).join(mapping_name)
    }

    /// `<vmr>/src/patches/<mapping>`
    pub fn patches_path(&self, mapping_name: &str) -> PathBuf {
        self.under_root(UnixPath::new(PATCHES_DIR).join(mapping_name).as_str())
    }

    /// Whether `path` lives inside the VMR working tree.
    pub fn is_in_vmr(&self, path: &Path) -> bool {
        path.starts_with(self.vmr_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths() {
        let info = VmrInfo::new("/data/vmr", "/data/tmp");
        assert_eq!(
            info.source_manifest_path(),
            Path::new("/data/vmr").join("src").join("source-manifest.json")
        );
        assert_eq!(
            info.default_mappings_path(),
            Path::new("/data/vmr").join("src").join("source-mappings.json")
        );
        assert_eq!(
            info.repo_sources_path("runtime"),
            Path::new("/data/vmr").join("src").join("runtime")
        );
        assert_eq!(
            info.patches_path("runtime"),
            Path::new("/data/vmr").join("src").join("patches").join("runtime")
        );
        assert_eq!(
            info.third_party_notices_path(),
            Path::new("/data/vmr").join("THIRD-PARTY-NOTICES.txt")
        );
    }

    #[test]
    fn test_reassignment_is_visible_through_clones() {
        let info = VmrInfo::new("/old", "/tmp");
        let shared = info.clone();

        info.set_vmr_path("/new");

        assert_eq!(shared.vmr_path(), PathBuf::from("/new"));
        assert_eq!(
            shared.source_manifest_path(),
            Path::new("/new").join("src").join("source-manifest.json")
        );
    }

    #[test]
    fn test_relative_repo_sources_path() {
        assert_eq!(
            VmrInfo::relative_repo_sources_path("arcade").as_str(),
            "src/arcade"
        );
    }

    #[test]
    fn test_optional_values() {
        let info = VmrInfo::default();
        assert_eq!(info.vmr_uri(), None);
        info.set_vmr_uri("https://github.com/dotnet/dotnet");
        assert_eq!(info.vmr_uri().as_deref(), Some("https://github.com/dotnet/dotnet"));

        info.set_third_party_notices_template_path(Some(String::new()));
        assert_eq!(info.third_party_notices_template_path(), Some(String::new()));
    }
}
