//! File system collaborator.
//!
//! The engine never stats files directly; it goes through this trait so tests
//! can substitute an in-memory file system with controlled write times.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use filetime::FileTime;

use super::Timestamp;

/// Minimal file system surface needed for staleness decisions.
///
/// Calls may block; the engine only makes them from blocking threads.
pub trait FileSystem: Send + Sync {
    /// Whether anything exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Last modification time of the file at `path`
    fn last_write_time(&self, path: &Path) -> io::Result<Timestamp>;
}

/// `FileSystem` backed by the host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn last_write_time(&self, path: &Path) -> io::Result<Timestamp> {
        let metadata = fs::metadata(path)?;
        let mtime = FileTime::from_last_modification_time(&metadata);
        DateTime::<Utc>::from_timestamp(mtime.unix_seconds(), mtime.nanoseconds()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("modification time out of range for {}", path.display()),
            )
        })
    }
}

/// In-memory `FileSystem` with explicit write times.
///
/// Keys are the normalized path strings produced by `normalize_path`. Every
/// `exists` call is counted so callers can assert how often files were stat'ed.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<HashMap<String, Timestamp>>,
    queries: AtomicUsize,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a file with the given write time
    pub fn set_file(&self, path: impl AsRef<Path>, time: Timestamp) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_key(path.as_ref()), time);
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&file_key(path.as_ref()));
    }

    /// Number of existence queries served so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn lookup(&self, path: &Path) -> Option<Timestamp> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&file_key(path))
            .copied()
    }
}

fn file_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.lookup(path).is_some()
    }

    fn last_write_time(&self, path: &Path) -> io::Result<Timestamp> {
        self.lookup(path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::set_file_mtime;
    use tempfile::TempDir;

    #[test]
    fn test_real_file_system_reads_mtime() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("input.c");
        fs::write(&file, "int main() {}").unwrap();
        set_file_mtime(&file, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

        let time = RealFileSystem.last_write_time(&file).unwrap();
        assert_eq!(time.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_real_file_system_missing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.h");

        assert!(!RealFileSystem.exists(&missing));
        assert!(RealFileSystem.last_write_time(&missing).is_err());
    }

    #[test]
    fn test_memory_file_system_counts_queries() {
        let fs = MemoryFileSystem::new();
        let time = DateTime::<Utc>::from_timestamp(100, 0).unwrap();
        fs.set_file("/work/a.c", time);

        assert!(fs.exists(Path::new("/work/a.c")));
        assert!(!fs.exists(Path::new("/work/b.c")));
        assert_eq!(fs.last_write_time(Path::new("/work/a.c")).unwrap(), time);
        assert_eq!(fs.query_count(), 2);

        fs.remove_file("/work/a.c");
        assert!(!fs.exists(Path::new("/work/a.c")));
    }
}
