//! Three-way merges of version files
//!
//! Version files are the files through which repositories declare what they
//! depend on: JSON configuration such as `global.json`, and
//! `eng/Version.Details.xml`. When code flows in the opposite direction of
//! the previous flow, both sides may have edited these files independently,
//! so each side is diffed against its own previous snapshot and the two
//! change sets are combined.
//!
//! - [`json`] flattens JSON documents into leaf properties and merges them
//! - [`dependencies`] merges Version.Details dependency lists
//!
//! Both produce a [`VersionFileChanges`].

pub mod dependencies;
pub mod json;

use std::collections::{BTreeMap, BTreeSet};

use glob::{MatchOptions, Pattern};

use crate::error::Result;

/// Removals, additions and updates of one version file.
///
/// A key is present in at most one of the three collections; recording a
/// change for a key replaces whatever was recorded for it before.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionFileChanges<K: Ord, T> {
    removals: BTreeSet<K>,
    additions: BTreeMap<K, T>,
    updates: BTreeMap<K, T>,
}

impl<K: Ord, T> Default for VersionFileChanges<K, T> {
    fn default() -> Self {
        Self {
            removals: BTreeSet::new(),
            additions: BTreeMap::new(),
            updates: BTreeMap::new(),
        }
    }
}

/// A single recorded change
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Removal,
    Addition(T),
    Update(T),
}

impl<T> Change<T> {
    /// New value, `None` for a removal
    pub fn value(&self) -> Option<&T> {
        match self {
            Change::Removal => None,
            Change::Addition(value) | Change::Update(value) => Some(value),
        }
    }
}

impl<K: Ord + Clone, T: Clone> VersionFileChanges<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removals(&self) -> &BTreeSet<K> {
        &self.removals
    }

    pub fn additions(&self) -> &BTreeMap<K, T> {
        &self.additions
    }

    pub fn updates(&self) -> &BTreeMap<K, T> {
        &self.updates
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty() && self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.removals.len() + self.additions.len() + self.updates.len()
    }

    fn clear(&mut self, key: &K) {
        self.removals.remove(key);
        self.additions.remove(key);
        self.updates.remove(key);
    }

    pub fn remove(&mut self, key: K) {
        self.clear(&key);
        self.removals.insert(key);
    }

    pub fn add(&mut self, key: K, value: T) {
        self.clear(&key);
        self.additions.insert(key, value);
    }

    pub fn update(&mut self, key: K, value: T) {
        self.clear(&key);
        self.updates.insert(key, value);
    }

    pub fn record(&mut self, key: K, change: Change<T>) {
        match change {
            Change::Removal => self.remove(key),
            Change::Addition(value) => self.add(key, value),
            Change::Update(value) => self.update(key, value),
        }
    }

    /// Change recorded for `key`, if any
    pub fn get(&self, key: &K) -> Option<Change<T>> {
        if self.removals.contains(key) {
            return Some(Change::Removal);
        }
        if let Some(value) = self.additions.get(key) {
            return Some(Change::Addition(value.clone()));
        }
        self.updates.get(key).map(|value| Change::Update(value.clone()))
    }

    /// Every recorded change in key order
    pub fn changes(&self) -> Vec<(K, Change<T>)> {
        let mut keys: BTreeSet<&K> = self.removals.iter().collect();
        keys.extend(self.additions.keys());
        keys.extend(self.updates.keys());
        keys.into_iter()
            .filter_map(|key| self.get(key).map(|change| (key.clone(), change)))
            .collect()
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.removals.retain(|k| keep(k));
        self.additions.retain(|k, _| keep(k));
        self.updates.retain(|k, _| keep(k));
    }
}

/// Matches dependency names against excluded-asset patterns.
///
/// A pattern containing `*` is a glob, anything else is an exact name.
/// Matching ignores case either way.
#[derive(Debug, Clone, Default)]
pub struct AssetMatcher {
    globs: Vec<Pattern>,
    names: Vec<String>,
}

impl AssetMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut matcher = AssetMatcher::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            if pattern.contains('*') {
                matcher.globs.push(Pattern::new(pattern)?);
            } else {
                matcher.names.push(pattern.to_string());
            }
        }
        Ok(matcher)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
            || self.globs.iter().any(|g| g.matches_with(name, options))
    }
}
