use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

/// Tracks every temporary recording file that has not been cleaned up yet
///
/// Files are registered when created through [`TempFileRegistry::create`] and
/// removed when their [`TempFileGuard`] drops. [`TempFileRegistry::sweep`]
/// removes whatever is left and is meant to run at shutdown.
#[derive(Debug, Default)]
pub struct TempFileRegistry {
    paths: Mutex<HashSet<PathBuf>>,
}

impl TempFileRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a uniquely named empty file in `dir` and register it
    pub fn create(
        self: &Arc<Self>,
        dir: &Path,
        prefix: &str,
    ) -> std::io::Result<(std::fs::File, TempFileGuard)> {
        let (file, path) = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(dir)?
            .keep()
            .map_err(|e| e.error)?;

        debug!("tmp: {}", path.display());
        self.lock().insert(path.clone());

        let guard = TempFileGuard {
            registry: Arc::clone(self),
            path,
        };
        Ok((file, guard))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every registered file; returns how many were deleted
    pub fn sweep(&self) -> usize {
        let paths: Vec<PathBuf> = self.lock().drain().collect();
        paths.iter().filter(|path| remove_quietly(path)).count()
    }

    fn release(&self, path: &Path) {
        remove_quietly(path);
        self.lock().remove(path);
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // A panic while holding the lock cannot leave the set inconsistent
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Owns one registered temporary file and deletes it on drop
#[derive(Debug)]
pub struct TempFileGuard {
    registry: Arc<TempFileRegistry>,
    path: PathBuf,
}

impl TempFileGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        self.registry.release(&self.path);
    }
}

fn remove_quietly(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_registers_file_in_directory() {
        let dir = tempdir().unwrap();
        let registry = TempFileRegistry::new();

        let (_file, guard) = registry.create(dir.path(), ".artist_-_title.mp3.").unwrap();

        assert!(guard.path().exists());
        assert_eq!(guard.path().parent(), Some(dir.path()));
        assert!(
            guard
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(".artist_-_title.mp3.")
        );
        assert!(registry.contains(guard.path()));
    }

    #[test]
    fn same_prefix_yields_distinct_files() {
        let dir = tempdir().unwrap();
        let registry = TempFileRegistry::new();

        let (_a, first) = registry.create(dir.path(), ".same.").unwrap();
        let (_b, second) = registry.create(dir.path(), ".same.").unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn dropping_guard_removes_file_and_entry() {
        let dir = tempdir().unwrap();
        let registry = TempFileRegistry::new();

        let (file, guard) = registry.create(dir.path(), ".t.").unwrap();
        let path = guard.path().to_path_buf();
        drop(file);
        drop(guard);

        assert!(!path.exists());
        assert!(registry.is_empty());
    }

    #[test]
    fn sweep_removes_leftover_files() {
        let dir = tempdir().unwrap();
        let registry = TempFileRegistry::new();

        let (_a, first) = registry.create(dir.path(), ".a.").unwrap();
        let (_b, second) = registry.create(dir.path(), ".b.").unwrap();
        let paths = [first.path().to_path_buf(), second.path().to_path_buf()];
        std::mem::forget(first);
        std::mem::forget(second);

        assert_eq!(registry.sweep(), 2);
        assert!(paths.iter().all(|p| !p.exists()));
        assert!(registry.is_empty());
    }
}
