//! # Version.Details
//!
//! Model, parser and writer for `eng/Version.Details.xml`, the per-repository
//! list of dependencies the build pulls from other repositories:
//!
//! ```xml
//! <Dependencies>
//!   <Source Uri="https://github.com/dotnet/dotnet" Mapping="runtime" Sha="..." BarId="123" />
//!   <ProductDependencies>
//!     <Dependency Name="Microsoft.NET.Sdk" Version="9.0.100" Pinned="true">
//!       <Uri>https://github.com/dotnet/sdk</Uri>
//!       <Sha>...</Sha>
//!     </Dependency>
//!   </ProductDependencies>
//!   <ToolsetDependencies />
//! </Dependencies>
//! ```
//!
//! Parsing goes through `xot`. Writes go through [`VersionDetailsDocument`],
//! which edits the parsed tree in place so comments, formatting and elements
//! the model does not know about (`<SourceBuild>`, ...) are kept.

use xot::output::xml::{Declaration, Parameters};
use xot::{Node, Xot};

use crate::error::{Error, Result};

pub const VERSION_DETAILS_XML: &str = "eng/Version.Details.xml";
pub const VERSIONS_PROPS: &str = "eng/Versions.props";
pub const GLOBAL_JSON: &str = "global.json";
pub const NUGET_CONFIG: &str = "NuGet.config";

/// Files that are rewritten by dependency flows rather than by code flows
pub const DEPENDENCY_FILES: [&str; 4] = [VERSION_DETAILS_XML, VERSIONS_PROPS, GLOBAL_JSON, NUGET_CONFIG];

/// Updating this package also refreshes `eng/common`
pub const ARCADE_SDK: &str = "Microsoft.DotNet.Arcade.Sdk";

const PRODUCT_DEPENDENCIES: &str = "ProductDependencies";
const TOOLSET_DEPENDENCIES: &str = "ToolsetDependencies";

/// Which container a dependency lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyType {
    Product,
    Toolset,
}

impl DependencyType {
    fn element(&self) -> &'static str {
        match self {
            DependencyType::Product => PRODUCT_DEPENDENCIES,
            DependencyType::Toolset => TOOLSET_DEPENDENCIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDetail {
    pub name: String,
    pub version: String,
    pub commit: String,
    pub repo_uri: String,
    pub dependency_type: DependencyType,
    /// Pinned dependencies are never updated by flows
    pub pinned: bool,
    pub coherent_parent: Option<String>,
}

impl DependencyDetail {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            commit: String::new(),
            repo_uri: String::new(),
            dependency_type: DependencyType::Product,
            pinned: false,
            coherent_parent: None,
        }
    }

    pub fn with_origin(mut self, repo_uri: impl Into<String>, commit: impl Into<String>) -> Self {
        self.repo_uri = repo_uri.into();
        self.commit = commit.into();
        self
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Same version, commit and repository
    pub fn same_revision(&self, other: &DependencyDetail) -> bool {
        self.version == other.version && self.commit == other.commit && self.repo_uri == other.repo_uri
    }
}

/// The `<Source>` element: which VMR commit the repository was last
/// backflowed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDependency {
    pub uri: String,
    pub mapping: String,
    pub sha: String,
    pub bar_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionDetails {
    pub dependencies: Vec<DependencyDetail>,
    pub source: Option<SourceDependency>,
}

impl VersionDetails {
    /// Parse a Version.Details document.
    ///
    /// With `include_pinned` unset, pinned dependencies are left out of the
    /// result.
    pub fn parse(content: &str, include_pinned: bool) -> Result<Self> {
        VersionDetailsDocument::parse(content)?.details(include_pinned)
    }

    /// Case-insensitive lookup
    pub fn find(&self, name: &str) -> Option<&DependencyDetail> {
        self.dependencies.iter().find(|d| d.matches_name(name))
    }

    /// Render a fresh document from the model.
    ///
    /// Only used to seed a repository that has no Version.Details yet;
    /// existing files are edited through [`VersionDetailsDocument`].
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<Dependencies>\n");

        if let Some(source) = &self.source {
            xml.push_str(&format!(
                "  <Source Uri=\"{}\" Mapping=\"{}\" Sha=\"{}\"",
                escape(&source.uri),
                escape(&source.mapping),
                escape(&source.sha)
            ));
            if let Some(bar_id) = source.bar_id {
                xml.push_str(&format!(" BarId=\"{}\"", bar_id));
            }
            xml.push_str(" />\n");
        }

        for dependency_type in [DependencyType::Product, DependencyType::Toolset] {
            let container = dependency_type.element();
            let dependencies: Vec<&DependencyDetail> = self
                .dependencies
                .iter()
                .filter(|d| d.dependency_type == dependency_type)
                .collect();

            if dependencies.is_empty() {
                xml.push_str(&format!("  <{} />\n", container));
                continue;
            }

            xml.push_str(&format!("  <{}>\n", container));
            for dependency in dependencies {
                xml.push_str(&format!(
                    "    <Dependency Name=\"{}\" Version=\"{}\"",
                    escape(&dependency.name),
                    escape(&dependency.version)
                ));
                if let Some(parent) = &dependency.coherent_parent {
                    xml.push_str(&format!(" CoherentParentDependency=\"{}\"", escape(parent)));
                }
                if dependency.pinned {
                    xml.push_str(" Pinned=\"true\"");
                }
                xml.push_str(">\n");
                xml.push_str(&format!("      <Uri>{}</Uri>\n", escape(&dependency.repo_uri)));
                xml.push_str(&format!("      <Sha>{}</Sha>\n", escape(&dependency.commit)));
                xml.push_str("    </Dependency>\n");
            }
            xml.push_str(&format!("  </{}>\n", container));
        }

        xml.push_str("</Dependencies>\n");
        xml
    }
}

/// A parsed Version.Details file that is edited in place.
///
/// Only the touched parts change: the `Version` attribute and `<Uri>`/`<Sha>`
/// text of an updated dependency, the `<Source>` attributes, or the
/// inserted/removed `<Dependency>` element. Everything else is serialized
/// back as it was parsed.
pub struct VersionDetailsDocument {
    xot: Xot,
    root: Node,
    document: Node,
}

impl VersionDetailsDocument {
    pub fn parse(content: &str) -> Result<Self> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);

        let mut xot = Xot::new();
        let root = xot.parse(content).map_err(|e| invalid(format!("Failed to parse XML: {}", e)))?;
        let document = xot
            .document_element(root)
            .map_err(|e| invalid(format!("Missing root element: {}", e)))?;

        Ok(Self { xot, root, document })
    }

    /// Model view of the document
    pub fn details(&self, include_pinned: bool) -> Result<VersionDetails> {
        let mut details = VersionDetails::default();
        collect(&self.xot, self.document, &mut details)?;

        if !include_pinned {
            details.dependencies.retain(|d| !d.pinned);
        }
        Ok(details)
    }

    /// Set the version, commit and repository of an existing dependency.
    /// Returns false when no dependency has that name.
    pub fn update_dependency(&mut self, dependency: &DependencyDetail) -> Result<bool> {
        let Some(node) = self.find_dependency(&dependency.name) else {
            return Ok(false);
        };

        let version = self.xot.add_name("Version");
        self.xot.set_attribute(node, version, dependency.version.as_str());
        self.set_child_text(node, "Uri", &dependency.repo_uri)?;
        self.set_child_text(node, "Sha", &dependency.commit)?;
        Ok(true)
    }

    /// Append `dependency` to its container unless one with the same name
    /// exists. Returns whether it was added.
    pub fn add_dependency(&mut self, dependency: &DependencyDetail) -> Result<bool> {
        if self.find_dependency(&dependency.name).is_some() {
            return Ok(false);
        }

        let container = self.container(dependency.dependency_type)?;
        let element = self.dependency_element(dependency)?;
        self.append_indented(container, element, "    ", "  ")?;
        Ok(true)
    }

    /// Returns whether a dependency was removed.
    pub fn remove_dependency(&mut self, name: &str) -> Result<bool> {
        let Some(node) = self.find_dependency(name) else {
            return Ok(false);
        };

        let previous = self
            .xot
            .previous_sibling(node)
            .filter(|n| is_whitespace(&self.xot, *n));
        let following = self
            .xot
            .next_sibling(node)
            .and_then(|n| self.xot.text_str(n))
            .filter(|text| text.trim().is_empty())
            .map(str::to_string);

        self.xot.remove(node).map_err(edit_failed)?;

        // Removal merges the surrounding whitespace; keep only the trailing part
        if let (Some(previous), Some(following)) = (previous, following) {
            if let Some(text) = self.xot.text_mut(previous) {
                text.set(following);
            }
        }
        Ok(true)
    }

    /// Set the `<Source>` attributes, inserting the element first in the
    /// document when it is missing.
    pub fn set_source(&mut self, source: &SourceDependency) -> Result<()> {
        let existing = self
            .xot
            .children(self.document)
            .find(|child| element_name(&self.xot, *child) == Some("Source"));

        let node = match existing {
            Some(node) => node,
            None => {
                let name = self.xot.add_name("Source");
                let node = self.xot.new_element(name);
                self.insert_first(node)?;
                node
            }
        };

        for (name, value) in [("Uri", &source.uri), ("Mapping", &source.mapping), ("Sha", &source.sha)] {
            let name = self.xot.add_name(name);
            self.xot.set_attribute(node, name, value.as_str());
        }
        let bar_id = self.xot.add_name("BarId");
        match source.bar_id {
            Some(id) => self.xot.set_attribute(node, bar_id, id.to_string()),
            None => self.xot.remove_attribute(node, bar_id),
        }
        Ok(())
    }

    pub fn to_xml(&self) -> Result<String> {
        let parameters = Parameters {
            declaration: Some(Declaration {
                encoding: Some("utf-8".to_string()),
                standalone: None,
            }),
            ..Default::default()
        };
        let mut xml = self
            .xot
            .serialize_xml_string(parameters, self.root)
            .map_err(edit_failed)?;
        if !xml.ends_with('\n') {
            xml.push('\n');
        }
        Ok(xml)
    }

    fn find_dependency(&self, name: &str) -> Option<Node> {
        self.xot.descendants(self.document).find(|node| {
            element_name(&self.xot, *node) == Some("Dependency")
                && attribute(&self.xot, *node, "Name").is_some_and(|n| n.trim().eq_ignore_ascii_case(name))
        })
    }

    /// The container element for `dependency_type`, created at the end of
    /// the document when missing
    fn container(&mut self, dependency_type: DependencyType) -> Result<Node> {
        let existing = self
            .xot
            .children(self.document)
            .find(|child| element_name(&self.xot, *child) == Some(dependency_type.element()));
        if let Some(node) = existing {
            return Ok(node);
        }

        let name = self.xot.add_name(dependency_type.element());
        let node = self.xot.new_element(name);
        self.append_indented(self.document, node, "  ", "")?;
        Ok(node)
    }

    fn dependency_element(&mut self, dependency: &DependencyDetail) -> Result<Node> {
        let name = self.xot.add_name("Dependency");
        let node = self.xot.new_element(name);

        let mut attributes = vec![("Name", dependency.name.clone()), ("Version", dependency.version.clone())];
        if let Some(parent) = &dependency.coherent_parent {
            attributes.push(("CoherentParentDependency", parent.clone()));
        }
        if dependency.pinned {
            attributes.push(("Pinned", "true".to_string()));
        }
        for (name, value) in attributes {
            let name = self.xot.add_name(name);
            self.xot.set_attribute(node, name, value);
        }

        for (name, value) in [("Uri", &dependency.repo_uri), ("Sha", &dependency.commit)] {
            let name = self.xot.add_name(name);
            let child = self.xot.new_element(name);
            self.xot.append_text(child, value).map_err(edit_failed)?;
            self.append_indented(node, child, "      ", "    ")?;
        }
        Ok(node)
    }

    /// Replace the text of the `name` child element, creating it if needed
    fn set_child_text(&mut self, node: Node, name: &str, value: &str) -> Result<()> {
        let existing = self
            .xot
            .children(node)
            .find(|child| element_name(&self.xot, *child) == Some(name));

        let child = match existing {
            Some(child) => child,
            None => {
                let name = self.xot.add_name(name);
                let child = self.xot.new_element(name);
                self.append_indented(node, child, "      ", "    ")?;
                child
            }
        };

        let content: Vec<Node> = self.xot.children(child).collect();
        for old in content {
            self.xot.remove(old).map_err(edit_failed)?;
        }
        self.xot.append_text(child, value).map_err(edit_failed)
    }

    /// Append `child` as the last child of `parent` on its own line
    fn append_indented(&mut self, parent: Node, child: Node, indent: &str, closing: &str) -> Result<()> {
        let trailing = self
            .xot
            .last_child(parent)
            .filter(|n| is_whitespace(&self.xot, *n));

        match trailing.and_then(|n| self.xot.text_mut(n)) {
            Some(text) => text.set(format!("\n{}", indent)),
            None => {
                let text = self.xot.new_text(&format!("\n{}", indent));
                self.xot.append(parent, text).map_err(edit_failed)?;
            }
        }
        self.xot.append(parent, child).map_err(edit_failed)?;
        let text = self.xot.new_text(&format!("\n{}", closing));
        self.xot.append(parent, text).map_err(edit_failed)
    }

    /// Insert `node` as the first element of the document, after any
    /// leading whitespace
    fn insert_first(&mut self, node: Node) -> Result<()> {
        let leading = self
            .xot
            .first_child(self.document)
            .filter(|n| is_whitespace(&self.xot, *n));

        match leading {
            Some(whitespace) => {
                let indent = self.xot.text_str(whitespace).unwrap_or_default().to_string();
                self.xot.insert_after(whitespace, node).map_err(edit_failed)?;
                let text = self.xot.new_text(&indent);
                self.xot.insert_after(node, text).map_err(edit_failed)
            }
            None => self.xot.prepend(self.document, node).map_err(edit_failed),
        }
    }
}

fn is_whitespace(xot: &Xot, node: Node) -> bool {
    xot.text_str(node).is_some_and(|text| text.trim().is_empty())
}

fn edit_failed(error: xot::Error) -> Error {
    invalid(format!("Failed to edit XML: {}", error))
}

fn invalid(message: impl Into<String>) -> Error {
    Error::VersionDetails {
        message: message.into(),
    }
}

fn element_name(xot: &Xot, node: Node) -> Option<&str> {
    xot.element(node).map(|element| xot.local_name_str(element.name()))
}

fn attribute<'a>(xot: &'a Xot, node: Node, name: &str) -> Option<&'a str> {
    let name = xot.name(name)?;
    xot.get_attribute(node, name)
}

fn child_text(xot: &Xot, node: Node, name: &str) -> String {
    xot.children(node)
        .find(|child| element_name(xot, *child) == Some(name))
        .and_then(|child| xot.text_content_str(child))
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}

fn parse_bool(xot: &Xot, node: Node, name: &str) -> Result<bool> {
    match attribute(xot, node, name) {
        None => Ok(false),
        Some(value) if value.trim().eq_ignore_ascii_case("true") => Ok(true),
        Some(value) if value.trim().eq_ignore_ascii_case("false") => Ok(false),
        Some(value) => Err(invalid(format!(
            "The '{}' attribute is set but the value '{}' is not a valid boolean",
            name, value
        ))),
    }
}

fn collect(xot: &Xot, parent: Node, details: &mut VersionDetails) -> Result<()> {
    let parent_name = element_name(xot, parent).unwrap_or_default().to_string();

    for child in xot.children(parent) {
        match element_name(xot, child) {
            Some("Dependency") => {
                let dependency_type = match parent_name.as_str() {
                    PRODUCT_DEPENDENCIES => DependencyType::Product,
                    TOOLSET_DEPENDENCIES => DependencyType::Toolset,
                    other => return Err(invalid(format!("Unknown dependency type '{}'", other))),
                };
                details.dependencies.push(parse_dependency(xot, child, dependency_type)?);
            }
            Some("Source") => details.source = Some(parse_source(xot, child)?),
            Some(_) => collect(xot, child, details)?,
            None => {}
        }
    }
    Ok(())
}

fn parse_dependency(xot: &Xot, node: Node, dependency_type: DependencyType) -> Result<DependencyDetail> {
    let name = attribute(xot, node, "Name")
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| invalid("Dependency is missing the 'Name' attribute"))?;

    Ok(DependencyDetail {
        version: attribute(xot, node, "Version")
            .map(|v| v.trim().to_string())
            .unwrap_or_default(),
        commit: child_text(xot, node, "Sha"),
        repo_uri: child_text(xot, node, "Uri"),
        dependency_type,
        pinned: parse_bool(xot, node, "Pinned")?,
        coherent_parent: attribute(xot, node, "CoherentParentDependency").map(|p| p.trim().to_string()),
        name,
    })
}

fn parse_source(xot: &Xot, node: Node) -> Result<SourceDependency> {
    let required = |name: &str| {
        attribute(xot, node, name)
            .map(|v| v.trim().to_string())
            .ok_or_else(|| {
                invalid(format!(
                    "The XML tag `Source` does not contain a value for attribute `{}`",
                    name
                ))
            })
    };

    Ok(SourceDependency {
        uri: required("Uri")?,
        sha: required("Sha")?,
        mapping: required("Mapping")?,
        bar_id: attribute(xot, node, "BarId").and_then(|id| id.trim().parse().ok()),
    })
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
