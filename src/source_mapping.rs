//! # Source Mappings
//!
//! A source mapping declares how one component repository is embedded in the
//! VMR: where it lives, which ref is flowed by default, and which files are
//! kept or dropped on the way in.
//!
//! Mappings are read from `src/source-mappings.json`, a JSON document that
//! tolerates comments and trailing commas:
//!
//! ```json
//! {
//!   // Prepended to every mapping unless it sets "ignoreDefaults"
//!   "defaults": {
//!     "defaultRef": "main",
//!     "exclude": [ "**/*.dll" ],
//!   },
//!   "mappings": [
//!     { "name": "runtime", "defaultRemote": "https://github.com/dotnet/runtime" },
//!   ],
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use log::debug;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::vmr_info::VmrInfo;

const MAPPINGS_FILE_NAME: &str = "source-mappings.json";
const FALLBACK_DEFAULT_REF: &str = "main";

/// One component repository as embedded in the VMR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMapping {
    pub name: String,
    pub default_remote: String,
    pub default_ref: String,
    /// Glob patterns of files to take, defaults first
    pub include: Vec<String>,
    /// Glob patterns of files to drop, defaults first
    pub exclude: Vec<String>,
    pub disable_synchronization: bool,
    /// Optional version pin
    pub version: Option<String>,
}

impl SourceMapping {
    /// Whether `name` refers to this mapping, ignoring case.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Include and exclude rules that apply inside the submodule at
    /// `submodule_path`, relative to the submodule root.
    pub fn submodule_filters(&self, submodule_path: &str) -> (Vec<String>, Vec<String>) {
        (
            scope_rules(&self.include, submodule_path),
            scope_rules(&self.exclude, submodule_path),
        )
    }
}

/// Keep the rules under `prefix/` and strip that prefix.
fn scope_rules(rules: &[String], prefix: &str) -> Vec<String> {
    let prefix = format!("{}/", prefix.trim_end_matches('/'));
    rules
        .iter()
        .filter_map(|rule| rule.strip_prefix(&prefix))
        .filter(|rule| !rule.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDefaults {
    default_ref: Option<String>,
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMapping {
    name: Option<String>,
    default_remote: Option<String>,
    default_ref: Option<String>,
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    #[serde(default)]
    ignore_defaults: bool,
    #[serde(default)]
    disable_synchronization: bool,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMappingFile {
    #[serde(default)]
    defaults: Option<RawDefaults>,
    #[serde(default)]
    mappings: Option<Vec<RawMapping>>,
}

/// Reads and validates the mappings file.
pub struct SourceMappingParser {
    vmr_info: VmrInfo,
    fs: Arc<dyn FileSystem>,
}

impl SourceMappingParser {
    pub fn new(vmr_info: VmrInfo, fs: Arc<dyn FileSystem>) -> Self {
        Self { vmr_info, fs }
    }

    pub fn parse_mappings(&self, path: &Path) -> Result<Vec<SourceMapping>> {
        debug!("Reading source mappings from {}", path.display());
        let content = self.fs.read_to_string(path)?;
        self.parse_mappings_from_json(&content)
    }

    /// Parse mappings from the raw file content.
    ///
    /// A successful parse records `thirdPartyNoticesTemplatePath` in the shared
    /// [`VmrInfo`] when the key is present.
    pub fn parse_mappings_from_json(&self, content: &str) -> Result<Vec<SourceMapping>> {
        let document: Value = serde_json::from_str(&strip_json_comments(content))?;
        if document.is_null() {
            return Err(Error::config(format!("Failed to deserialize {}", MAPPINGS_FILE_NAME)));
        }

        let notices_template = document
            .get("thirdPartyNoticesTemplatePath")
            .map(|v| v.as_str().map(str::to_string));

        let raw: RawMappingFile = serde_json::from_value(document)?;
        let defaults = raw.defaults.unwrap_or_default();

        let mut mappings: Vec<SourceMapping> = Vec::new();
        for entry in raw.mappings.unwrap_or_default() {
            let mapping = create_mapping(&defaults, entry)?;
            if mappings.iter().any(|m| m.matches_name(&mapping.name)) {
                return Err(Error::Configuration {
                    message: format!("Duplicate mapping name `{}`", mapping.name),
                    hint: Some("Mapping names are compared case-insensitively".to_string()),
                });
            }
            mappings.push(mapping);
        }

        if let Some(template) = notices_template {
            self.vmr_info.set_third_party_notices_template_path(template);
        }

        Ok(mappings)
    }
}

fn create_mapping(defaults: &RawDefaults, raw: RawMapping) -> Result<SourceMapping> {
    let name = raw.name.ok_or_else(|| missing_field("name"))?;
    let default_remote = raw.default_remote.ok_or_else(|| missing_field("defaultRemote"))?;

    let default_ref = raw
        .default_ref
        .or_else(|| defaults.default_ref.clone())
        .unwrap_or_else(|| FALLBACK_DEFAULT_REF.to_string());

    let merge = |defaults: &Option<Vec<String>>, own: Option<Vec<String>>| -> Vec<String> {
        let mut rules = Vec::new();
        if !raw.ignore_defaults {
            rules.extend(defaults.iter().flatten().cloned());
        }
        rules.extend(own.unwrap_or_default());
        rules
    };

    Ok(SourceMapping {
        include: merge(&defaults.include, raw.include),
        exclude: merge(&defaults.exclude, raw.exclude),
        name,
        default_remote,
        default_ref,
        disable_synchronization: raw.disable_synchronization,
        version: raw.version,
    })
}

fn missing_field(field: &str) -> Error {
    Error::config(format!("Missing `{}` in {}", field, MAPPINGS_FILE_NAME))
}

/// Strip `//` and `/* */` comments and trailing commas so the text can be
/// handed to a strict JSON parser. String literals are left untouched.
pub fn strip_json_comments(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut without_comments = String::with_capacity(input.len());
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            without_comments.push(c);
            if c == '\\' && i + 1 < chars.len() {
                without_comments.push(chars[i + 1]);
                i += 1;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                without_comments.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                without_comments.push(' ');
            }
            _ => {
                without_comments.push(c);
                i += 1;
            }
        }
    }

    strip_trailing_commas(&without_comments)
}

fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut output = String::with_capacity(input.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            output.push(c);
            if c == '\\' && i + 1 < chars.len() {
                output.push(chars[i + 1]);
                i += 1;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
            output.push(c);
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if !matches!(next, Some('}') | Some(']')) {
                output.push(c);
            }
        } else {
            output.push(c);
        }
        i += 1;
    }
    output
}
