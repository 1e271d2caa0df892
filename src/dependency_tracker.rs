//! In-memory index over the source mappings and the source manifest.
//!
//! Mappings are loaded by [`DependencyTracker::refresh_metadata`] and are
//! unavailable until then. Every manifest mutation is written through to
//! `src/source-manifest.json` immediately.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::debug;

use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::source_manifest::{RepositoryRecord, SourceManifest, SubmoduleRecord};
use crate::source_mapping::{SourceMapping, SourceMappingParser};
use crate::vmr_info::VmrInfo;

/// New state of a mapped repository after a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmrDependencyUpdate {
    pub mapping_name: String,
    pub remote_uri: String,
    pub target_revision: String,
    pub bar_id: Option<i64>,
}

pub struct DependencyTracker {
    vmr_info: VmrInfo,
    parser: SourceMappingParser,
    fs: Arc<dyn FileSystem>,
    mappings: RwLock<Option<Vec<SourceMapping>>>,
    manifest: Mutex<SourceManifest>,
}

impl DependencyTracker {
    pub fn new(vmr_info: VmrInfo, parser: SourceMappingParser, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            vmr_info,
            parser,
            fs,
            mappings: RwLock::new(None),
            manifest: Mutex::new(SourceManifest::new()),
        }
    }

    /// Load mappings (from `mappings_path` or the default location) and then
    /// the source manifest. A failed mapping parse leaves the tracker
    /// uninitialized and the manifest untouched.
    pub fn refresh_metadata(&self, mappings_path: Option<&Path>) -> Result<()> {
        let path = mappings_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.vmr_info.default_mappings_path());

        let mappings = self.parser.parse_mappings(&path)?;
        debug!("Loaded {} source mappings from {}", mappings.len(), path.display());

        {
            let mut slot = self.mappings.write().map_err(|_| Error::LockPoisoned {
                context: "source mappings".to_string(),
            })?;
            *slot = Some(mappings);
        }

        self.lock_manifest()?
            .refresh(self.fs.as_ref(), &self.vmr_info.source_manifest_path())
    }

    pub fn mappings(&self) -> Result<Vec<SourceMapping>> {
        self.mappings
            .read()
            .map_err(|_| Error::LockPoisoned { context: "source mappings".to_string() })?
            .clone()
            .ok_or(Error::NotInitialized)
    }

    /// Case-insensitive lookup
    pub fn try_get_mapping(&self, name: &str) -> Result<Option<SourceMapping>> {
        Ok(self.mappings()?.into_iter().find(|m| m.matches_name(name)))
    }

    pub fn get_mapping(&self, name: &str) -> Result<SourceMapping> {
        self.try_get_mapping(name)?
            .ok_or_else(|| Error::not_found(format!("No mapping named {} found", name)))
    }

    /// Manifest record of a mapped repository
    pub fn get_dependency_version(&self, mapping_name: &str) -> Result<Option<RepositoryRecord>> {
        Ok(self.lock_manifest()?.get_repository(mapping_name).cloned())
    }

    /// Snapshot of the current manifest
    pub fn manifest(&self) -> Result<SourceManifest> {
        Ok(self.lock_manifest()?.clone())
    }

    pub fn update_dependency_version(&self, update: &VmrDependencyUpdate) -> Result<()> {
        let mut manifest = self.lock_manifest()?;
        manifest.update_version(
            &update.mapping_name,
            &update.remote_uri,
            &update.target_revision,
            update.bar_id,
        );
        self.persist(&manifest)
    }

    /// Apply every submodule record then write the manifest once.
    pub fn update_submodules(&self, submodules: &[SubmoduleRecord]) -> Result<()> {
        let mut manifest = self.lock_manifest()?;
        for submodule in submodules {
            manifest.update_submodule(submodule);
        }
        self.persist(&manifest)
    }

    pub fn remove_repository_version(&self, name: &str) -> Result<()> {
        let mut manifest = self.lock_manifest()?;
        manifest.remove_repository(name);
        self.persist(&manifest)
    }

    fn persist(&self, manifest: &SourceManifest) -> Result<()> {
        let json = manifest.to_json()?;
        self.fs.write(&self.vmr_info.source_manifest_path(), &json)
    }

    fn lock_manifest(&self) -> Result<MutexGuard<'_, SourceManifest>> {
        self.manifest.lock().map_err(|_| Error::LockPoisoned {
            context: "source manifest".to_string(),
        })
    }
}
