//! Error types for graph construction, persistence, and execution.
//!
//! Each subsystem gets its own enum. `EngineError` is what a whole
//! evaluation pass can fail with; per-operation `ExecError`s never reach it,
//! they are collected into the pass summary instead.

use std::path::PathBuf;

use crate::fs_state::FileId;
use crate::graph::OperationId;

/// Structural problems with an operation graph. Always fatal for a pass and
/// always raised before any operation executes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("operation {0} was added twice")]
    DuplicateId(OperationId),

    #[error("operation {referenced_by} references unknown operation {id}")]
    UnknownId {
        id: OperationId,
        referenced_by: OperationId,
    },

    #[error("root operation {0} does not exist")]
    UnknownRoot(OperationId),

    #[error("file {file} is declared as output by both operation {first} and operation {second}")]
    DuplicateOutput {
        file: FileId,
        first: OperationId,
        second: OperationId,
    },

    #[error("operations {first} and {second} run the same command")]
    DuplicateCommand {
        first: OperationId,
        second: OperationId,
    },

    #[error("operation {id} stores dependency count {stored} but has {derived} parents")]
    DependencyCountMismatch {
        id: OperationId,
        stored: u32,
        derived: u32,
    },

    #[error("root operations {actual:?} do not match operations without dependencies {expected:?}")]
    RootSetMismatch {
        expected: Vec<OperationId>,
        actual: Vec<OperationId>,
    },

    #[error("dependency cycle detected between operations {0:?}")]
    Cycle(Vec<OperationId>),
}

/// Failures reading or writing the persisted state files.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {kind} file header")]
    BadMagic { kind: &'static str },

    #[error("{kind} file version does not match expected: found {found}, expected {expected}")]
    BadVersion {
        kind: &'static str,
        found: u32,
        expected: u32,
    },

    #[error("invalid {kind} section, expected {expected}")]
    BadSection {
        kind: &'static str,
        expected: &'static str,
    },

    #[error("{kind} file is truncated at byte {offset}")]
    Truncated { kind: &'static str, offset: usize },

    #[error("{kind} file corrupted - did not read the entire file ({remaining} bytes left)")]
    TrailingData { kind: &'static str, remaining: usize },

    #[error("{kind} file contains a string that is not valid utf-8")]
    InvalidUtf8 { kind: &'static str },

    #[error("{kind} file contains invalid boolean value {value}")]
    InvalidBoolean { kind: &'static str, value: u32 },

    #[error("{kind} file contains unknown value type {value}")]
    InvalidValueType { kind: &'static str, value: u32 },

    #[error("{kind} file contains invalid or repeated file id {id} (maximum {max})")]
    InvalidFileId {
        kind: &'static str,
        id: u32,
        max: u32,
    },

    #[error("{kind} file lists id {id} more than once")]
    DuplicateEntry { kind: &'static str, id: u32 },

    #[error("{kind} file contains an out of range timestamp")]
    InvalidTimestamp { kind: &'static str },

    #[error("{kind} file nests values deeper than {limit} levels")]
    NestingTooDeep { kind: &'static str, limit: usize },

    #[error("{kind} file lists key {key:?} more than once")]
    DuplicateKey { kind: &'static str, key: String },

    #[error("{kind} is too large for the file format ({len} elements)")]
    TooLarge { kind: &'static str, len: usize },

    #[error("state directory {0} is locked by another evaluation pass")]
    Locked(PathBuf),
}

/// Why a single operation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("process exited with code {exit_code}")]
    NonZeroExit { exit_code: i32 },

    #[error("file access denied to {0:?}")]
    SandboxDenied(Vec<PathBuf>),

    #[error("failed to start {executable}: {message}")]
    Spawn { executable: String, message: String },

    #[error("worker task failed: {0}")]
    Join(String),
}

/// Failures loading an `EngineConfig` file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Pass-level failure. Per-operation failures are reported through
/// `EvaluationSummary`, not through this type.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}
