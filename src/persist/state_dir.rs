//! On-disk location of all persisted build state.
//!
//! ## Concurrency Safety
//! A pass holds an exclusive fs2 lock on `.opgraph.lock` for as long as it
//! owns the directory, so two passes never interleave their writes. Every
//! file is written to a temporary sibling and renamed into place, so readers
//! only ever see a complete old file or a complete new one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::PersistError;
use crate::fs_state::FileTable;
use crate::graph::OperationGraph;
use crate::results::OperationResults;

use super::fs_state_format::{deserialize_file_table, serialize_file_table};
use super::graph_format::{deserialize_graph, serialize_graph};
use super::results_format::{deserialize_results, serialize_results};
use super::value_table::{deserialize_value_table, serialize_value_table, ValueTable};

pub const GRAPH_FILE_NAME: &str = "OperationGraph.bog";
pub const FILE_SYSTEM_STATE_FILE_NAME: &str = "FileSystemState.bfs";
pub const RESULTS_FILE_NAME: &str = "OperationResults.boh";
pub const SHARED_STATE_FILE_NAME: &str = "SharedState.bvt";
const LOCK_FILE_NAME: &str = ".opgraph.lock";

/// Outcome of reading one state file
#[derive(Debug)]
pub enum Loaded<T> {
    Found(T),
    /// No file yet, the normal first-run case
    Missing,
    /// The file exists but could not be decoded
    Corrupt(PersistError),
}

impl<T> Loaded<T> {
    /// The decoded value, `None` for missing or corrupt files
    pub fn found(self) -> Option<T> {
        match self {
            Loaded::Found(value) => Some(value),
            Loaded::Missing | Loaded::Corrupt(_) => None,
        }
    }

    /// The decoded value, or `T::default()` for missing or corrupt files
    pub fn unwrap_or_default(self) -> T
    where
        T: Default,
    {
        self.found().unwrap_or_default()
    }
}

/// Exclusive ownership of a state directory, released on drop
#[derive(Debug)]
pub struct StateLock {
    _file: File,
}

/// The directory holding the graph, file table, results and shared state
#[derive(Debug, Clone)]
pub struct StateDirectory {
    root: PathBuf,
}

impl StateDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn graph_path(&self) -> PathBuf {
        self.root.join(GRAPH_FILE_NAME)
    }

    pub fn file_system_state_path(&self) -> PathBuf {
        self.root.join(FILE_SYSTEM_STATE_FILE_NAME)
    }

    pub fn results_path(&self) -> PathBuf {
        self.root.join(RESULTS_FILE_NAME)
    }

    pub fn shared_state_path(&self) -> PathBuf {
        self.root.join(SHARED_STATE_FILE_NAME)
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE_NAME)
    }

    /// Ensure the directory exists
    pub fn ensure_dir(&self) -> Result<(), PersistError> {
        fs::create_dir_all(&self.root).map_err(|source| PersistError::Io {
            path: self.root.clone(),
            source,
        })
    }

    /// Take the directory lock without blocking.
    ///
    /// Returns `PersistError::Locked` if another pass already holds it. The
    /// returned handle must be kept alive for as long as the lock is needed.
    pub fn lock(&self) -> Result<StateLock, PersistError> {
        self.ensure_dir()?;

        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| PersistError::Io {
                path: lock_path.clone(),
                source,
            })?;

        file.try_lock_exclusive()
            .map_err(|_| PersistError::Locked(self.root.clone()))?;

        tracing::debug!(path = %lock_path.display(), "Acquired state directory lock");
        Ok(StateLock { _file: file })
    }

    pub fn load_graph(&self) -> Loaded<OperationGraph> {
        load_file(&self.graph_path(), deserialize_graph)
    }

    pub fn save_graph(&self, graph: &OperationGraph) -> Result<(), PersistError> {
        atomic_write(&self.graph_path(), &serialize_graph(graph)?)
    }

    pub fn load_file_table(&self) -> Loaded<FileTable> {
        load_file(&self.file_system_state_path(), deserialize_file_table)
    }

    pub fn save_file_table(&self, table: &FileTable) -> Result<(), PersistError> {
        atomic_write(&self.file_system_state_path(), &serialize_file_table(table)?)
    }

    pub fn load_results(&self) -> Loaded<OperationResults> {
        load_results(&self.results_path())
    }

    pub fn save_results(&self, results: &OperationResults) -> Result<(), PersistError> {
        save_results(&self.results_path(), results)
    }

    pub fn load_shared_state(&self) -> Loaded<ValueTable> {
        load_file(&self.shared_state_path(), deserialize_value_table)
    }

    pub fn save_shared_state(&self, table: &ValueTable) -> Result<(), PersistError> {
        atomic_write(&self.shared_state_path(), &serialize_value_table(table)?)
    }
}

/// Read an operation results file
pub fn load_results(path: &Path) -> Loaded<OperationResults> {
    load_file(path, deserialize_results)
}

/// Atomically write an operation results file
pub fn save_results(path: &Path, results: &OperationResults) -> Result<(), PersistError> {
    atomic_write(path, &serialize_results(results)?)
}

fn load_file<T>(path: &Path, decode: impl FnOnce(&[u8]) -> Result<T, PersistError>) -> Loaded<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No previous state found");
            return Loaded::Missing;
        }
        Err(source) => {
            let error = PersistError::Io {
                path: path.to_path_buf(),
                source,
            };
            tracing::error!(path = %path.display(), error = %error, "Failed to read state file");
            return Loaded::Corrupt(error);
        }
    };

    match decode(&bytes) {
        Ok(value) => {
            tracing::debug!(path = %path.display(), bytes = bytes.len(), "Loaded state file");
            Loaded::Found(value)
        }
        Err(error) => {
            tracing::error!(
                path = %path.display(),
                error = %error,
                "State file is corrupt, starting from empty state"
            );
            Loaded::Corrupt(error)
        }
    }
}

/// Write to a temporary sibling, sync, then rename over `path`
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let io_error = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let file = File::create(&temp_path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes).map_err(io_error)?;
    writer.flush().map_err(io_error)?;
    writer.get_ref().sync_all().map_err(io_error)?;
    drop(writer);

    fs::rename(&temp_path, path).map_err(io_error)?;
    Ok(())
}
