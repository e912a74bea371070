//! Operation graph and incremental evaluation engine.
//!
//! A build is a graph of operations (command invocations with declared input
//! and output files). Each pass loads the previous graph, file table and
//! results from a state directory, re-runs only the operations whose inputs
//! changed, and saves everything back for the next pass.

pub mod config;
pub mod error;
pub mod execution;
pub mod fs_state;
pub mod graph;
pub mod outdated;
pub mod persist;
pub mod results;
pub mod telemetry;

pub use config::EngineConfig;
pub use error::{ConfigError, EngineError, ExecError, GraphError, PersistError};
pub use execution::{
    AccessMonitor, BuildState, Collaborators, EvaluationEngine, EvaluationSummary, FailedOperation,
    FileAccesses, MonitoredRun, NoGenerator, NoMonitor, ProcessOutput, ProcessRunner,
    SystemProcessRunner,
};
pub use fs_state::{FileId, FileSystem, FileSystemState, MemoryFileSystem, RealFileSystem, Timestamp};
pub use graph::{
    CommandInfo, FileIdSet, GraphGenerator, OperationDeclaration, OperationGraph, OperationId,
    OperationInfo,
};
pub use outdated::{is_outdated, OutdatedChecker, OutdatedReason};
pub use persist::{Loaded, StateDirectory, Value, ValueTable};
pub use results::{OperationResults, ResultRecord};
pub use telemetry::init_tracing;
