//! File id interning and the per-pass write time cache.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::filesystem::FileSystem;
use super::path::normalize_path;

/// Point in time used for file write times and result records
pub type Timestamp = DateTime<Utc>;

/// Stable handle for an interned file path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The persisted half of `FileSystemState`: the id table and its high-water mark.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTable {
    /// Highest id ever allocated; the next id is `max_file_id + 1`
    pub max_file_id: u32,
    /// Normalized path for every interned id
    pub files: BTreeMap<FileId, String>,
}

#[derive(Default)]
struct PathTable {
    max_file_id: u32,
    files: HashMap<FileId, String>,
    lookup: HashMap<String, FileId>,
}

/// Bidirectional `FileId <-> path` mapping plus a lazily filled write time cache.
///
/// Shared by reference (usually behind an `Arc`) between the scheduler and its
/// workers. Interning takes a write lock on the path table; write time
/// lookups go through a `DashMap` so each id is stat'ed at most once per pass.
pub struct FileSystemState {
    paths: RwLock<PathTable>,
    write_times: DashMap<FileId, Option<Timestamp>>,
    file_system: Arc<dyn FileSystem>,
}

impl FileSystemState {
    /// Create an empty state
    pub fn new(file_system: Arc<dyn FileSystem>) -> Self {
        Self::from_table(FileTable::default(), file_system)
    }

    /// Rebuild a state from a previously persisted table
    pub fn from_table(table: FileTable, file_system: Arc<dyn FileSystem>) -> Self {
        let mut paths = PathTable {
            max_file_id: table.max_file_id,
            ..PathTable::default()
        };
        for (id, path) in table.files {
            paths.lookup.insert(path.clone(), id);
            paths.files.insert(id, path);
        }

        Self {
            paths: RwLock::new(paths),
            write_times: DashMap::new(),
            file_system,
        }
    }

    /// Snapshot of the persisted portion (ids and paths, no write times)
    pub fn to_table(&self) -> FileTable {
        let paths = self.paths.read().unwrap_or_else(PoisonError::into_inner);
        FileTable {
            max_file_id: paths.max_file_id,
            files: paths
                .files
                .iter()
                .map(|(id, path)| (*id, path.clone()))
                .collect(),
        }
    }

    pub fn max_file_id(&self) -> u32 {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .max_file_id
    }

    pub fn file_count(&self) -> usize {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .files
            .len()
    }

    /// Intern `path` relative to `working_directory`, allocating a new id on first use.
    ///
    /// # Panics
    /// If every `u32` id has been handed out. Loaded tables never start there.
    pub fn to_file_id(&self, path: impl AsRef<Path>, working_directory: impl AsRef<Path>) -> FileId {
        let normalized = normalize_path(path.as_ref(), working_directory.as_ref());

        if let Some(id) = self
            .paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup
            .get(&normalized)
        {
            return *id;
        }

        let mut paths = self.paths.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have interned it between the two locks
        if let Some(id) = paths.lookup.get(&normalized) {
            return *id;
        }

        let next = paths
            .max_file_id
            .checked_add(1)
            .unwrap_or_else(|| panic!("file id space exhausted at {}", paths.max_file_id));
        paths.max_file_id = next;
        let id = FileId(next);
        paths.lookup.insert(normalized.clone(), id);
        paths.files.insert(id, normalized);
        id
    }

    /// Reverse lookup without allocating
    pub fn try_find_file_id(&self, path: impl AsRef<Path>) -> Option<FileId> {
        let normalized = normalize_path(path.as_ref(), Path::new(""));
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup
            .get(&normalized)
            .copied()
    }

    pub fn try_get_file_path(&self, id: FileId) -> Option<PathBuf> {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .files
            .get(&id)
            .map(PathBuf::from)
    }

    /// Path for an id handed out by this state.
    ///
    /// # Panics
    /// If `id` was never allocated here; that is an internal invariant break.
    pub fn get_file_path(&self, id: FileId) -> PathBuf {
        self.try_get_file_path(id)
            .unwrap_or_else(|| panic!("the provided file id does not exist: {}", id))
    }

    /// Last write time of the file, `None` if it does not exist.
    ///
    /// The first call for an id queries the file system collaborator; the
    /// result (including absence) is memoized for the rest of the pass.
    pub fn get_last_write_time(&self, id: FileId) -> Option<Timestamp> {
        if let Some(cached) = self.write_times.get(&id) {
            return *cached;
        }

        // The vacant entry keeps its shard locked, so concurrent callers for
        // the same id wait here instead of stat'ing the file again
        match self.write_times.entry(id) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let time = self.query_write_time(id);
                entry.insert(time);
                time
            }
        }
    }

    /// Force the cached write time for `id`
    pub fn set_last_write_time(&self, id: FileId, time: Option<Timestamp>) {
        self.write_times.insert(id, time);
    }

    /// Drop the cached value and stat the file again
    pub fn refresh_last_write_time(&self, id: FileId) -> Option<Timestamp> {
        let time = self.query_write_time(id);
        self.write_times.insert(id, time);
        time
    }

    /// Forget every cached write time, e.g. between two passes sharing one state
    pub fn clear_write_times(&self) {
        self.write_times.clear();
    }

    fn query_write_time(&self, id: FileId) -> Option<Timestamp> {
        let path = self.get_file_path(id);
        if !self.file_system.exists(&path) {
            return None;
        }

        match self.file_system.last_write_time(&path) {
            Ok(time) => Some(time),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read write time");
                None
            }
        }
    }
}
