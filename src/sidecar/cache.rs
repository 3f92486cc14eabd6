//! Template file cache keyed by path and modification time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use tracing::debug;

use super::SidecarError;

#[derive(Clone)]
struct CachedTemplate {
    modified: SystemTime,
    source: Arc<str>,
}

/// Caches raw template text so the hot path only stats the file.
///
/// An entry is reused while the file's mtime is unchanged and is dropped
/// when the file can no longer be read.
#[derive(Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<PathBuf, CachedTemplate>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the template at `path`, reading it from disk if it changed.
    ///
    /// Entries are keyed by canonical path, so `./sidecar.yaml` and its
    /// absolute or symlinked spellings share one entry.
    pub fn get(&self, path: &Path) -> Result<Arc<str>, SidecarError> {
        let key = cache_key(path);
        let io_error = |source| SidecarError::Io {
            path: path.to_path_buf(),
            source,
        };

        let modified = match std::fs::metadata(&key).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(source) => {
                self.evict(&key);
                return Err(io_error(source));
            }
        };

        if let Some(hit) = self.lookup(&key, modified) {
            return Ok(hit);
        }

        let source: Arc<str> = match std::fs::read_to_string(&key) {
            Ok(source) => source.into(),
            Err(source) => {
                self.evict(&key);
                return Err(io_error(source));
            }
        };

        debug!(path = %key.display(), "Loaded sidecar template from disk");
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            CachedTemplate {
                modified,
                source: source.clone(),
            },
        );
        Ok(source)
    }

    /// Number of cached templates
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, path: &Path, modified: SystemTime) -> Option<Arc<str>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(path)
            .filter(|entry| entry.modified == modified)
            .map(|entry| entry.source.clone())
    }

    fn evict(&self, path: &Path) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(path);
    }
}

/// Canonical form of `path`; for a file that no longer exists, its
/// canonical parent joined with the file name
fn cache_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
