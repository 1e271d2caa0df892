//! File system access behind a trait so components can be tested with stubs

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::Result;

/// File system operations the engine depends on
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool {
        self.file_exists(path) || self.dir_exists(path)
    }

    fn file_exists(&self, path: &Path) -> bool;

    fn dir_exists(&self, path: &Path) -> bool;

    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Write a whole file, creating parent directories as needed.
    fn write(&self, path: &Path, content: &str) -> Result<()>;

    fn file_size(&self, path: &Path) -> Result<u64>;

    fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete a directory and everything below it.
    fn delete_dir(&self, path: &Path) -> Result<()>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Copy one file, creating parent directories of `to` as needed.
    fn copy_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Replace `to` with a recursive copy of `from`.
    fn copy_dir(&self, from: &Path, to: &Path) -> Result<()> {
        if self.dir_exists(to) {
            self.delete_dir(to)?;
        }
        self.create_dir_all(to)?;
        for file in self.walk_files(from)? {
            if let Ok(relative) = file.strip_prefix(from) {
                self.copy_file(&file, &to.join(relative))?;
            }
        }
        Ok(())
    }

    /// Immediate child files, sorted by path
    fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Immediate child directories, sorted by path
    fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Every file below `path`, recursively, sorted by path
    fn walk_files(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// [`FileSystem`] backed by the real disk
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }

    fn list_children(&self, path: &Path, dirs: bool) -> Result<Vec<PathBuf>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() == dirs {
                children.push(entry.path());
            }
        }
        children.sort();
        Ok(children)
    }
}

impl FileSystem for LocalFileSystem {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(path)?)
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_file(path)?)
    }

    fn delete_dir(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_dir_all(path)?)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        Ok(fs::create_dir_all(path)?)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to)?;
        Ok(())
    }

    fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.list_children(path, false)
    }

    fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.list_children(path, true)
    }

    fn walk_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                std::io::Error::other(format!("Failed to walk {}: {}", path.display(), e))
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

/// Test doubles for [`FileSystem`].
#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use super::{FileSystem, LocalFileSystem};
    use crate::error::Result;

    /// Real disk access that records writes and deletions and can report
    /// made-up sizes for chosen files.
    #[derive(Default)]
    pub struct RecordingFileSystem {
        inner: LocalFileSystem,
        writes: Mutex<Vec<(PathBuf, String)>>,
        deleted: Mutex<Vec<PathBuf>>,
        sizes: Mutex<HashMap<PathBuf, u64>>,
    }

    impl RecordingFileSystem {
        pub fn new() -> Self {
            Self::default()
        }

        /// Report `size` for `path` instead of its real length.
        pub fn stub_size(&self, path: impl Into<PathBuf>, size: u64) {
            self.sizes.lock().unwrap().insert(path.into(), size);
        }

        pub fn writes(&self) -> Vec<(PathBuf, String)> {
            self.writes.lock().unwrap().clone()
        }

        pub fn deleted(&self) -> Vec<PathBuf> {
            self.deleted.lock().unwrap().clone()
        }
    }

    impl FileSystem for RecordingFileSystem {
        fn file_exists(&self, path: &Path) -> bool {
            self.inner.file_exists(path)
        }

        fn dir_exists(&self, path: &Path) -> bool {
            self.inner.dir_exists(path)
        }

        fn read_to_string(&self, path: &Path) -> Result<String> {
            self.inner.read_to_string(path)
        }

        fn write(&self, path: &Path, content: &str) -> Result<()> {
            self.writes
                .lock()
                .unwrap()
                .push((path.to_path_buf(), content.to_string()));
            self.inner.write(path, content)
        }

        fn file_size(&self, path: &Path) -> Result<u64> {
            if let Some(size) = self.sizes.lock().unwrap().get(path) {
                return Ok(*size);
            }
            self.inner.file_size(path)
        }

        fn delete_file(&self, path: &Path) -> Result<()> {
            self.deleted.lock().unwrap().push(path.to_path_buf());
            self.inner.delete_file(path)
        }

        fn delete_dir(&self, path: &Path) -> Result<()> {
            self.deleted.lock().unwrap().push(path.to_path_buf());
            self.inner.delete_dir(path)
        }

        fn create_dir_all(&self, path: &Path) -> Result<()> {
            self.inner.create_dir_all(path)
        }

        fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
            self.inner.copy_file(from, to)
        }

        fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
            self.inner.list_files(path)
        }

        fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>> {
            self.inner.list_dirs(path)
        }

        fn walk_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
            self.inner.walk_files(path)
        }
    }
}
