//! Writing dependency changes back into a repository's `eng/` files

use std::path::Path;
use std::sync::Arc;

use log::debug;
use regex::{NoExpand, Regex};

use crate::error::Result;
use crate::filesystem::FileSystem;
use crate::version_details::{
    DependencyDetail, SourceDependency, VersionDetails, VersionDetailsDocument, VERSIONS_PROPS, VERSION_DETAILS_XML,
};

/// One dependency change produced by a flow.
///
/// Both sides present is an update, `to` only is an addition and `from`
/// only is a removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyUpdate {
    pub from: Option<DependencyDetail>,
    pub to: Option<DependencyDetail>,
}

impl DependencyUpdate {
    pub fn addition(to: DependencyDetail) -> Self {
        Self { from: None, to: Some(to) }
    }

    pub fn removal(from: DependencyDetail) -> Self {
        Self { from: Some(from), to: None }
    }

    pub fn update(from: DependencyDetail, to: DependencyDetail) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    /// Name of the affected dependency, preferring the previous name
    pub fn name(&self) -> &str {
        self.from
            .as_ref()
            .or(self.to.as_ref())
            .map(|d| d.name.as_str())
            .unwrap_or_default()
    }

    pub fn is_addition(&self) -> bool {
        self.from.is_none() && self.to.is_some()
    }

    pub fn is_removal(&self) -> bool {
        self.from.is_some() && self.to.is_none()
    }
}

/// Materializes dependency changes inside a repository working tree
pub trait DependencyFileWriter: Send + Sync {
    /// Add `dependency` unless a dependency with the same name exists.
    fn add_dependency(&self, repo: &Path, dependency: &DependencyDetail) -> Result<()>;

    fn update_dependency(&self, repo: &Path, dependency: &DependencyDetail) -> Result<()>;

    fn remove_dependency(&self, repo: &Path, name: &str) -> Result<()>;

    fn set_source(&self, repo: &Path, source: &SourceDependency) -> Result<()>;
}

/// [`DependencyFileWriter`] over `eng/Version.Details.xml` and
/// `eng/Versions.props`
pub struct VersionDetailsFileWriter {
    fs: Arc<dyn FileSystem>,
}

impl VersionDetailsFileWriter {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// The current document, or an empty one when the repository has none
    fn read(&self, repo: &Path) -> Result<VersionDetailsDocument> {
        let path = repo.join(VERSION_DETAILS_XML);
        if !self.fs.file_exists(&path) {
            return VersionDetailsDocument::parse(&VersionDetails::default().to_xml());
        }
        VersionDetailsDocument::parse(&self.fs.read_to_string(&path)?)
    }

    fn modify<T, F>(&self, repo: &Path, change: F) -> Result<T>
    where
        F: FnOnce(&mut VersionDetailsDocument) -> Result<T>,
    {
        let mut document = self.read(repo)?;
        let result = change(&mut document)?;
        self.fs.write(&repo.join(VERSION_DETAILS_XML), &document.to_xml()?)?;
        Ok(result)
    }

    /// Update the `<{Name}PackageVersion>` property mirroring `dependency`
    /// when `eng/Versions.props` declares one.
    fn update_versions_props(&self, repo: &Path, dependency: &DependencyDetail) -> Result<()> {
        let path = repo.join(VERSIONS_PROPS);
        if !self.fs.file_exists(&path) {
            return Ok(());
        }

        let property = version_property_name(&dependency.name);
        let pattern = Regex::new(&format!(r"<{0}>[^<]*</{0}>", regex::escape(&property)))?;
        let content = self.fs.read_to_string(&path)?;
        if !pattern.is_match(&content) {
            return Ok(());
        }

        let replacement = format!("<{0}>{1}</{0}>", property, dependency.version);
        let updated = pattern.replace_all(&content, NoExpand(&replacement));
        if updated != content {
            debug!("Updating {} to {} in {}", property, dependency.version, VERSIONS_PROPS);
            self.fs.write(&path, &updated)?;
        }
        Ok(())
    }
}

impl DependencyFileWriter for VersionDetailsFileWriter {
    fn add_dependency(&self, repo: &Path, dependency: &DependencyDetail) -> Result<()> {
        if self.modify(repo, |document| document.add_dependency(dependency))? {
            self.update_versions_props(repo, dependency)?;
        }
        Ok(())
    }

    fn update_dependency(&self, repo: &Path, dependency: &DependencyDetail) -> Result<()> {
        self.modify(repo, |document| {
            if !document.update_dependency(dependency)? {
                document.add_dependency(dependency)?;
            }
            Ok(())
        })?;
        self.update_versions_props(repo, dependency)
    }

    fn remove_dependency(&self, repo: &Path, name: &str) -> Result<()> {
        self.modify(repo, |document| document.remove_dependency(name).map(|_| ()))
    }

    fn set_source(&self, repo: &Path, source: &SourceDependency) -> Result<()> {
        self.modify(repo, |document| document.set_source(source))
    }
}

/// `Microsoft.NET-Sdk` becomes `MicrosoftNETSdkPackageVersion`
pub fn version_property_name(dependency_name: &str) -> String {
    let mut name: String = dependency_name.chars().filter(|c| *c != '.' && *c != '-').collect();
    name.push_str("PackageVersion");
    name
}
