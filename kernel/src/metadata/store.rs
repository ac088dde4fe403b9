// Metadata Cache Storage
//
// Defines the storage contract for cached metadata documents and the
// backends shipped with the kernel.
//
// Storage is a memoization layer only. Implementations may be
// unavailable, in which case every lookup misses and writes are dropped.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// String-keyed blob storage.
///
/// Implementations MUST NOT:
/// - Fail for absent keys
/// - Panic when the underlying medium is unavailable
pub trait StorageBackend: Send + Sync {
    fn has(&self, key: &str) -> bool;

    /// Return the stored blob, or `None` if the key is absent.
    fn get(&self, key: &str) -> Option<String>;

    /// Store a blob. Best-effort; failures are not reported.
    fn set(&self, key: &str, value: &str);
}

/// Process-local storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl StorageBackend for MemoryStorage {
    fn has(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }
}

/// Storage that is never available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorage;

impl StorageBackend for NullStorage {
    fn has(&self, _key: &str) -> bool {
        false
    }

    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: &str) {}
}

/// One file per key inside a cache directory.
///
/// The directory is created on construction. If that fails the
/// storage is unavailable for its whole lifetime.
#[derive(Debug)]
pub struct FileStorage {
    dir: Option<PathBuf>,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match fs::create_dir_all(&dir) {
            Ok(()) => Self { dir: Some(dir) },
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "metadata cache unavailable");
                Self { dir: None }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.dir.is_some()
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        let dir = self.dir.as_deref()?;
        Some(entry_path(dir, key))
    }
}

fn entry_path(dir: &Path, key: &str) -> PathBuf {
    let name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{name}.json"))
}

impl StorageBackend for FileStorage {
    fn has(&self, key: &str) -> bool {
        self.path_for(key).is_some_and(|path| path.is_file())
    }

    fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key)?;
        fs::read_to_string(path).ok()
    }

    fn set(&self, key: &str, value: &str) {
        let Some(path) = self.path_for(key) else {
            return;
        };
        if let Err(err) = fs::write(&path, value) {
            tracing::warn!(path = %path.display(), error = %err, "failed to write metadata cache entry");
        }
    }
}
