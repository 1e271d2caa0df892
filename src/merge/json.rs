//! JSON version file merge
//!
//! JSON documents are flattened into a map from property path to leaf value.
//! Paths are lists of keys rather than dotted strings because keys such as
//! `Microsoft.DotNet.Arcade.Sdk` contain dots themselves. Only strings,
//! booleans, numbers and arrays are leaves; arrays are compared as ordered
//! lists of strings, so reordering an array counts as an update.
//!
//! ## Example
//!
//! ```
//! use vmr_codeflow::merge::json::{merge_json_documents, JsonMergeInput, JsonMergeResult};
//!
//! let ancestor = r#"{ "sdk": { "version": "8.0.100" } }"#;
//! let input = JsonMergeInput {
//!     target_previous: Some(ancestor),
//!     target_current: Some(r#"{ "sdk": { "version": "8.0.100", "rollForward": "major" } }"#),
//!     source_previous: Some(ancestor),
//!     source_current: Some(r#"{ "sdk": { "version": "8.0.200" } }"#),
//! };
//!
//! match merge_json_documents(&input).unwrap() {
//!     JsonMergeResult::Write(json) => assert!(json.contains("8.0.200") && json.contains("major")),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use serde_json::{Map, Number, Value as JsonValue};

use super::{Change, VersionFileChanges};
use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::git::GitClient;

/// Keys leading from the document root to a leaf
pub type JsonPath = Vec<String>;

/// Changes between two flattened JSON documents
pub type JsonChanges = VersionFileChanges<JsonPath, JsonVersionProperty>;

/// Value of a flattened JSON leaf
#[derive(Debug, Clone, PartialEq)]
pub enum JsonVersionProperty {
    String(String),
    Bool(bool),
    Number(Number),
    List(Vec<String>),
}

impl JsonVersionProperty {
    fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => Some(JsonVersionProperty::String(s.clone())),
            JsonValue::Bool(b) => Some(JsonVersionProperty::Bool(*b)),
            JsonValue::Number(n) => Some(JsonVersionProperty::Number(n.clone())),
            JsonValue::Array(items) => Some(JsonVersionProperty::List(
                items
                    .iter()
                    .map(|item| match item {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            )),
            JsonValue::Null | JsonValue::Object(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JsonVersionProperty::String(_) => "string",
            JsonVersionProperty::Bool(_) => "boolean",
            JsonVersionProperty::Number(_) => "number",
            JsonVersionProperty::List(_) => "list",
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            JsonVersionProperty::String(s) => JsonValue::String(s.clone()),
            JsonVersionProperty::Bool(b) => JsonValue::Bool(*b),
            JsonVersionProperty::Number(n) => JsonValue::Number(n.clone()),
            JsonVersionProperty::List(items) => {
                JsonValue::Array(items.iter().cloned().map(JsonValue::String).collect())
            }
        }
    }
}

/// Human-readable form of a property path
pub fn dotted(path: &[String]) -> String {
    path.join(".")
}

/// Flatten `value` into its leaf properties.
///
/// Objects are descended into; `null` values and empty objects produce no
/// leaves.
pub fn flatten(value: &JsonValue) -> BTreeMap<JsonPath, JsonVersionProperty> {
    fn walk(value: &JsonValue, path: &mut JsonPath, out: &mut BTreeMap<JsonPath, JsonVersionProperty>) {
        if let JsonValue::Object(map) = value {
            for (key, child) in map {
                path.push(key.clone());
                walk(child, path, out);
                path.pop();
            }
        } else if let Some(leaf) = JsonVersionProperty::from_json(value) {
            out.insert(path.clone(), leaf);
        }
    }

    let mut out = BTreeMap::new();
    walk(value, &mut Vec::new(), &mut out);
    out
}

/// Compute the changes turning `old` into `new`.
///
/// # Errors
///
/// Returns `Error::JsonTypeMismatch` when a property exists in both with
/// different value types.
pub fn diff_properties(
    old: &BTreeMap<JsonPath, JsonVersionProperty>,
    new: &BTreeMap<JsonPath, JsonVersionProperty>,
) -> Result<JsonChanges> {
    let mut changes = JsonChanges::new();

    for (path, old_value) in old {
        match new.get(path) {
            None => changes.remove(path.clone()),
            Some(new_value) if new_value.kind() != old_value.kind() => {
                return Err(Error::JsonTypeMismatch {
                    path: dotted(path),
                    left: old_value.kind().to_string(),
                    right: new_value.kind().to_string(),
                });
            }
            Some(new_value) if new_value != old_value => changes.update(path.clone(), new_value.clone()),
            Some(_) => {}
        }
    }

    for (path, new_value) in new {
        if !old.contains_key(path) {
            changes.add(path.clone(), new_value.clone());
        }
    }

    Ok(changes)
}

/// Combine the target's own changes with the source's changes.
///
/// The result starts from `target`. Every source change is layered on top;
/// when both sides set the same property to different values the source
/// value is kept and a note is logged.
///
/// # Errors
///
/// Returns `Error::ConflictingDependencyUpdate` when one side removed a
/// property the other side added or updated.
pub fn merge_changes(target: &JsonChanges, source: &JsonChanges) -> Result<JsonChanges> {
    let mut merged = target.clone();

    for (path, source_change) in source.changes() {
        if let Some(target_change) = target.get(&path) {
            match (target_change.value(), source_change.value()) {
                (None, None) => {}
                (Some(_), None) | (None, Some(_)) => {
                    return Err(Error::ConflictingDependencyUpdate {
                        message: format!(
                            "Property '{}' was removed on one side and changed on the other",
                            dotted(&path)
                        ),
                    });
                }
                (Some(ours), Some(theirs)) if ours != theirs => {
                    info!(
                        "Conflicting changes to '{}': {:?} in the target, {:?} in the source. Taking the source value",
                        dotted(&path),
                        ours,
                        theirs
                    );
                }
                (Some(_), Some(_)) => {}
            }
        }
        merged.record(path, source_change);
    }

    Ok(merged)
}

/// Apply `changes` onto `document` in place.
///
/// Removals run first. A removal that empties an object removes that object
/// too. Setting a nested property below an existing non-object value does
/// nothing.
pub fn apply_changes(document: &mut JsonValue, changes: &JsonChanges) {
    for path in changes.removals() {
        remove_leaf(document, path);
    }

    for (path, change) in changes.changes() {
        if let Some(value) = change.value() {
            set_leaf(document, &path, value.to_json());
        }
    }
}

fn remove_leaf(node: &mut JsonValue, path: &[String]) -> bool {
    let Some((key, rest)) = path.split_first() else {
        return false;
    };
    let JsonValue::Object(map) = node else {
        return false;
    };

    if rest.is_empty() {
        return map.shift_remove(key).is_some();
    }

    let Some(child) = map.get_mut(key) else {
        return false;
    };
    let removed = remove_leaf(child, rest);
    if removed && child.as_object().is_some_and(Map::is_empty) {
        map.shift_remove(key);
    }
    removed
}

fn set_leaf(node: &mut JsonValue, path: &[String], value: JsonValue) {
    let Some((key, rest)) = path.split_first() else {
        *node = value;
        return;
    };
    let JsonValue::Object(map) = node else {
        debug!("Skipping property '{}' nested under a non-object value", key);
        return;
    };

    if rest.is_empty() {
        map.insert(key.clone(), value);
        return;
    }

    let child = map
        .entry(key.clone())
        .or_insert_with(|| JsonValue::Object(Map::new()));
    set_leaf(child, rest, value);
}

/// The four snapshots of a JSON file taking part in a merge. `None` means
/// the file does not exist in that snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMergeInput<'a> {
    /// Target at the last flow
    pub target_previous: Option<&'a str>,
    /// Target as it is now; the merge result is based on it
    pub target_current: Option<&'a str>,
    /// Source at the last flow
    pub source_previous: Option<&'a str>,
    pub source_current: Option<&'a str>,
}

/// What should happen to the target file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonMergeResult {
    Unchanged,
    Write(String),
    Delete,
}

fn parse(content: Option<&str>) -> Result<JsonValue> {
    match content {
        Some(content) => Ok(serde_json::from_str(content.strip_prefix('\u{feff}').unwrap_or(content))?),
        None => Ok(JsonValue::Object(Map::new())),
    }
}

/// Three-way merge of a JSON file.
///
/// - A target that deleted the file since the last flow keeps it deleted.
/// - A source that deleted the file deletes it in the target.
/// - Otherwise each side is diffed against its previous snapshot and the
///   merged changes are applied onto the current target.
///
/// A file missing on both sides of one repository counts as an empty
/// document, so a file introduced by the source is created in the target.
pub fn merge_json_documents(input: &JsonMergeInput<'_>) -> Result<JsonMergeResult> {
    if input.target_current.is_none() && input.target_previous.is_some() {
        debug!("File was deleted in the target, keeping it deleted");
        return Ok(JsonMergeResult::Unchanged);
    }

    if input.source_current.is_none() && input.source_previous.is_some() {
        return Ok(match input.target_current {
            Some(_) => JsonMergeResult::Delete,
            None => JsonMergeResult::Unchanged,
        });
    }

    let target_previous = parse(input.target_previous)?;
    let target_current = parse(input.target_current)?;
    let source_previous = parse(input.source_previous)?;
    let source_current = parse(input.source_current)?;

    let target_changes = diff_properties(&flatten(&target_previous), &flatten(&target_current))?;
    let source_changes = diff_properties(&flatten(&source_previous), &flatten(&source_current))?;
    let changes = merge_changes(&target_changes, &source_changes)?;

    let mut merged = target_current.clone();
    apply_changes(&mut merged, &changes);

    if input.target_current.is_some() && merged == target_current {
        return Ok(JsonMergeResult::Unchanged);
    }
    if input.target_current.is_none() && changes.is_empty() {
        return Ok(JsonMergeResult::Unchanged);
    }

    let mut json = serde_json::to_string_pretty(&merged)?;
    if input.target_current.map_or(true, |c| c.ends_with('\n')) {
        json.push('\n');
    }
    Ok(JsonMergeResult::Write(json))
}

/// A file inside a repository at a given ref
#[derive(Debug, Clone, Copy)]
pub struct FileSnapshot<'a> {
    pub repo: &'a Path,
    pub path: &'a str,
    pub git_ref: &'a str,
}

impl<'a> FileSnapshot<'a> {
    pub fn new(repo: &'a Path, path: &'a str, git_ref: &'a str) -> Self {
        Self { repo, path, git_ref }
    }
}

/// Where the four snapshots of a merged JSON file come from
#[derive(Debug, Clone, Copy)]
pub struct JsonMergeSnapshots<'a> {
    pub target_previous: FileSnapshot<'a>,
    pub target_current: FileSnapshot<'a>,
    pub source_previous: FileSnapshot<'a>,
    pub source_current: FileSnapshot<'a>,
}

/// Merges JSON files read from git into a working tree
pub struct JsonFileMerger {
    git: Arc<dyn GitClient>,
    fs: Arc<dyn FileSystem>,
}

impl JsonFileMerger {
    pub fn new(git: Arc<dyn GitClient>, fs: Arc<dyn FileSystem>) -> Self {
        Self { git, fs }
    }

    fn read(&self, snapshot: &FileSnapshot<'_>, cancel: &CancellationToken) -> Result<Option<String>> {
        self.git
            .get_file_from_git(snapshot.repo, snapshot.path, snapshot.git_ref, cancel)
    }

    /// Merge the snapshots and write the result to `target_file`.
    pub fn merge(
        &self,
        target_file: &Path,
        snapshots: &JsonMergeSnapshots<'_>,
        cancel: &CancellationToken,
    ) -> Result<JsonMergeResult> {
        cancel.check()?;

        let target_previous = self.read(&snapshots.target_previous, cancel)?;
        let target_current = self.read(&snapshots.target_current, cancel)?;
        let source_previous = self.read(&snapshots.source_previous, cancel)?;
        let source_current = self.read(&snapshots.source_current, cancel)?;

        let result = merge_json_documents(&JsonMergeInput {
            target_previous: target_previous.as_deref(),
            target_current: target_current.as_deref(),
            source_previous: source_previous.as_deref(),
            source_current: source_current.as_deref(),
        })?;

        match &result {
            JsonMergeResult::Unchanged => debug!("No changes to merge into {}", target_file.display()),
            JsonMergeResult::Write(json) => {
                info!("Merged changes into {}", target_file.display());
                self.fs.write(target_file, json)?;
            }
            JsonMergeResult::Delete => {
                info!("Deleting {} as it was removed in the source", target_file.display());
                if self.fs.file_exists(target_file) {
                    self.fs.delete_file(target_file)?;
                }
            }
        }
        Ok(result)
    }
}
