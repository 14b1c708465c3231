use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Decides whether an artifact has been materialized.
pub trait ArtifactStore: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
}

/// Regular files count when present; directories count when non-empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsArtifactStore;

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => true,
            Ok(meta) if meta.is_dir() => fs::read_dir(path)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Path set standing in for the filesystem.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    paths: Mutex<BTreeSet<PathBuf>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>) {
        if let Ok(mut paths) = self.paths.lock() {
            paths.insert(path.into());
        }
    }

    pub fn len(&self) -> usize {
        self.paths.lock().map(|paths| paths.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn exists(&self, path: &Path) -> bool {
        self.paths
            .lock()
            .map(|paths| paths.contains(path))
            .unwrap_or(false)
    }
}
