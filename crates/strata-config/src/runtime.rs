/*
 * runtime.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * File access capability for the configuration engine.
 *
 * Every read and write of a configuration file goes through a FileAccessor:
 * - NativeFileAccessor: std::fs, versions from modification time and length
 * - MemoryFileAccessor: in-memory files for tests and embedding
 */

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use thiserror::Error;

/// Result type for file access
pub type AccessResult<T> = Result<T, AccessError>;

/// Errors that can occur while accessing configuration files
#[derive(Debug, Error)]
pub enum AccessError {
    /// The file does not exist
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The caller may not read or write the file
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// Any other I/O failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AccessError {
    fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => AccessError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => AccessError::PermissionDenied(path.to_path_buf()),
            _ => AccessError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}

/// Opaque file version used for change detection.
///
/// Two tokens for the same file compare equal exactly when the file has not
/// changed in between (as far as the accessor can tell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionToken {
    stamp: u128,
    len: u64,
}

impl VersionToken {
    pub fn new(stamp: u128, len: u64) -> Self {
        Self { stamp, len }
    }
}

/// Capability for reading and writing configuration files.
pub trait FileAccessor: Send + Sync {
    /// Read a whole file as UTF-8 text.
    fn read(&self, path: &Path) -> AccessResult<String>;

    /// Replace a file's contents, creating it if needed.
    fn write(&self, path: &Path, contents: &str) -> AccessResult<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Current version of a file, or `None` when it does not exist.
    fn version(&self, path: &Path) -> AccessResult<Option<VersionToken>>;
}

/// File access through `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFileAccessor;

impl FileAccessor for NativeFileAccessor {
    fn read(&self, path: &Path) -> AccessResult<String> {
        std::fs::read_to_string(path).map_err(|e| AccessError::from_io(path, e))
    }

    fn write(&self, path: &Path, contents: &str) -> AccessResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AccessError::from_io(parent, e))?;
        }
        std::fs::write(path, contents).map_err(|e| AccessError::from_io(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn version(&self, path: &Path) -> AccessResult<Option<VersionToken>> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AccessError::from_io(path, e)),
        };
        let stamp = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        Ok(Some(VersionToken::new(stamp, metadata.len())))
    }
}

#[derive(Debug)]
struct MemoryFile {
    contents: String,
    version: u64,
    read_only: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<PathBuf, MemoryFile>,
    denied: Vec<PathBuf>,
    next_version: u64,
}

/// In-memory files. Every write bumps a global version counter.
#[derive(Debug, Default)]
pub struct MemoryFileAccessor {
    state: Mutex<MemoryState>,
}

impl MemoryFileAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryFileAccessor::insert`].
    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    /// Create or replace a file, as another program would.
    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        let mut state = self.lock();
        state.next_version += 1;
        let version = state.next_version;
        state.files.insert(
            path.into(),
            MemoryFile {
                contents: contents.into(),
                version,
                read_only: false,
            },
        );
    }

    pub fn remove(&self, path: &Path) {
        self.lock().files.remove(path);
    }

    /// Current contents of a file.
    pub fn contents(&self, path: &Path) -> Option<String> {
        self.lock().files.get(path).map(|f| f.contents.clone())
    }

    /// Make writes to `path` fail with [`AccessError::PermissionDenied`].
    pub fn set_read_only(&self, path: &Path, read_only: bool) {
        if let Some(file) = self.lock().files.get_mut(path) {
            file.read_only = read_only;
        }
    }

    /// Make every access to `path` fail with [`AccessError::PermissionDenied`].
    pub fn deny(&self, path: impl Into<PathBuf>) {
        self.lock().denied.push(path.into());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileAccessor for MemoryFileAccessor {
    fn read(&self, path: &Path) -> AccessResult<String> {
        let state = self.lock();
        if state.denied.iter().any(|p| p == path) {
            return Err(AccessError::PermissionDenied(path.to_path_buf()));
        }
        state
            .files
            .get(path)
            .map(|f| f.contents.clone())
            .ok_or_else(|| AccessError::NotFound(path.to_path_buf()))
    }

    fn write(&self, path: &Path, contents: &str) -> AccessResult<()> {
        let mut state = self.lock();
        if state.denied.iter().any(|p| p == path)
            || state.files.get(path).is_some_and(|f| f.read_only)
        {
            return Err(AccessError::PermissionDenied(path.to_path_buf()));
        }
        state.next_version += 1;
        let version = state.next_version;
        state.files.insert(
            path.to_path_buf(),
            MemoryFile {
                contents: contents.to_string(),
                version,
                read_only: false,
            },
        );
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }

    fn version(&self, path: &Path) -> AccessResult<Option<VersionToken>> {
        let state = self.lock();
        if state.denied.iter().any(|p| p == path) {
            return Err(AccessError::PermissionDenied(path.to_path_buf()));
        }
        Ok(state
            .files
            .get(path)
            .map(|f| VersionToken::new(u128::from(f.version), f.contents.len() as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_versions_change_on_write() {
        let files = MemoryFileAccessor::new().with_file("a.config", "<configuration/>");
        let path = Path::new("a.config");
        let before = files.version(path).unwrap();
        assert!(before.is_some());

        files.write(path, "<configuration />").unwrap();
        assert_ne!(files.version(path).unwrap(), before);
        assert_eq!(files.version(Path::new("missing")).unwrap(), None);
    }

    #[test]
    fn test_memory_permission_denied() {
        let files = MemoryFileAccessor::new().with_file("a.config", "x");
        let path = Path::new("a.config");
        files.set_read_only(path, true);
        assert!(matches!(
            files.write(path, "y"),
            Err(AccessError::PermissionDenied(_))
        ));

        files.deny("b.config");
        assert!(matches!(
            files.read(Path::new("b.config")),
            Err(AccessError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_native_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.config");
        let files = NativeFileAccessor;

        assert!(!files.exists(&path));
        assert_eq!(files.version(&path).unwrap(), None);
        assert!(matches!(files.read(&path), Err(AccessError::NotFound(_))));

        files.write(&path, "<configuration/>").unwrap();
        assert!(files.exists(&path));
        assert_eq!(files.read(&path).unwrap(), "<configuration/>");
        assert!(files.version(&path).unwrap().is_some());
    }
}
