//! External collaborators the engine delegates to.
//!
//! The engine never spawns processes or watches file accesses itself. It is
//! handed a `Collaborators` value at construction, so tests can swap every
//! piece for an in-memory fake.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::fs_state::{FileSystem, RealFileSystem};
use crate::graph::CommandInfo;

/// Captured result of one process invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a command to completion.
///
/// A nonzero exit code is data, not an error; `Err` means the process could
/// not be run at all.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn execute(&self, command: &CommandInfo) -> Result<ProcessOutput, ExecError>;
}

/// Files a process tree touched, as reported by a monitor.
/// Relative paths are resolved against the command's working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAccesses {
    pub reads: Vec<PathBuf>,
    pub writes: Vec<PathBuf>,
}

/// Result of running a command under an access monitor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitoredRun {
    pub output: ProcessOutput,
    /// `None` when the monitor could not observe anything; the engine then
    /// falls back to the declared inputs and outputs
    pub accesses: Option<FileAccesses>,
    /// Accesses the monitor refused
    pub denied: Vec<PathBuf>,
}

/// Wraps a `ProcessRunner` and reports which files the process really used
#[async_trait]
pub trait AccessMonitor: Send + Sync {
    async fn run(&self, command: &CommandInfo, runner: &dyn ProcessRunner) -> Result<MonitoredRun, ExecError>;
}

/// Monitor that observes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMonitor;

#[async_trait]
impl AccessMonitor for NoMonitor {
    async fn run(&self, command: &CommandInfo, runner: &dyn ProcessRunner) -> Result<MonitoredRun, ExecError> {
        Ok(MonitoredRun {
            output: runner.execute(command).await?,
            accesses: None,
            denied: Vec::new(),
        })
    }
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn execute(&self, command: &CommandInfo) -> Result<ProcessOutput, ExecError> {
        let command = command.clone();
        let executable = command.executable.to_string_lossy().into_owned();

        // duct blocks the calling thread until the child exits
        let output = tokio::task::spawn_blocking(move || {
            let arguments = split_arguments(&command.arguments);
            duct::cmd(command.executable, arguments)
                .dir(command.working_directory)
                .stdout_capture()
                .stderr_capture()
                .unchecked()
                .run()
        })
        .await
        .map_err(|e| ExecError::Join(e.to_string()))?
        .map_err(|e| ExecError::Spawn {
            executable,
            message: e.to_string(),
        })?;

        Ok(ProcessOutput {
            // Killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Split an argument string on whitespace, keeping double-quoted runs together.
///
/// Quotes are removed; `\"` inside quotes is a literal quote.
pub fn split_arguments(arguments: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut chars = arguments.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            '\\' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    result.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        result.push(current);
    }
    result
}

/// Everything the engine needs from the outside world
#[derive(Clone)]
pub struct Collaborators {
    pub file_system: Arc<dyn FileSystem>,
    pub runner: Arc<dyn ProcessRunner>,
    pub monitor: Arc<dyn AccessMonitor>,
}

impl Collaborators {
    /// Real disk, real processes, no access monitoring
    pub fn system() -> Self {
        Self {
            file_system: Arc::new(RealFileSystem),
            runner: Arc::new(SystemProcessRunner),
            monitor: Arc::new(NoMonitor),
        }
    }
}
