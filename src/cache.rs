//! In-process cache of prepared clones

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

type Slot = Arc<Mutex<Option<PathBuf>>>;

/// Clone directory plus the remote that was fetched into it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CloneKey {
    pub directory: PathBuf,
    pub remote_uri: String,
}

impl CloneKey {
    pub fn new(directory: &Path, remote_uri: &str) -> Self {
        Self {
            directory: directory.to_path_buf(),
            remote_uri: remote_uri.to_string(),
        }
    }
}

/// Remembers which clone directories were already cloned and fetched in
/// this process.
///
/// Preparation is single-flight per key: concurrent callers for the same
/// key wait for the first one and then observe its finished result, while
/// callers for other keys proceed independently. Entries are never evicted.
#[derive(Debug, Clone, Default)]
pub struct CloneCache {
    slots: Arc<Mutex<HashMap<CloneKey, Slot>>>,
    directories: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl CloneCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &CloneKey) -> Result<Slot> {
        let mut slots = self.slots.lock().map_err(|_| poisoned("clone cache"))?;
        Ok(slots.entry(key.clone()).or_default().clone())
    }

    /// Lock serializing all work inside one clone directory.
    pub fn directory_lock(&self, directory: &Path) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .directories
            .lock()
            .map_err(|_| poisoned("clone directory locks"))?;
        Ok(locks.entry(directory.to_path_buf()).or_default().clone())
    }

    /// Return the cached path for `key` when `still_valid` accepts it,
    /// otherwise run `prepare` and cache its result.
    ///
    /// A failed preparation leaves the entry empty so a later call retries.
    pub fn get_or_prepare<V, F>(&self, key: &CloneKey, still_valid: V, prepare: F) -> Result<PathBuf>
    where
        V: Fn(&Path) -> bool,
        F: FnOnce() -> Result<PathBuf>,
    {
        let slot = self.slot(key)?;
        let mut prepared = slot
            .lock()
            .map_err(|_| poisoned(&format!("clone cache entry {}", key.directory.display())))?;

        if let Some(path) = prepared.as_ref() {
            if still_valid(path) {
                return Ok(path.clone());
            }
        }

        *prepared = None;
        let path = prepare()?;
        *prepared = Some(path.clone());
        Ok(path)
    }

    /// Whether `key` has a prepared entry
    pub fn contains(&self, key: &CloneKey) -> Result<bool> {
        let slot = {
            let slots = self.slots.lock().map_err(|_| poisoned("clone cache"))?;
            match slots.get(key) {
                Some(slot) => slot.clone(),
                None => return Ok(false),
            }
        };
        let prepared = slot
            .lock()
            .map_err(|_| poisoned(&format!("clone cache entry {}", key.directory.display())))?;
        Ok(prepared.is_some())
    }
}

fn poisoned(context: &str) -> Error {
    Error::LockPoisoned {
        context: context.to_string(),
    }
}
