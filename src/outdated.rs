//! Outdated Checker
//!
//! Decides whether an operation's outputs are stale relative to its inputs
//! using the write times cached in `FileSystemState`.
//!
//! Equal write times count as up to date. File systems with coarse clocks
//! round down, and treating ties as stale would rebuild everything.

use serde::Serialize;

use crate::fs_state::{FileId, FileSystemState, Timestamp};
use crate::graph::FileIdSet;

/// Why a set of targets needs to be rebuilt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutdatedReason {
    /// A target file does not exist
    TargetMissing { target: FileId },
    /// An input file does not exist
    InputMissing { input: FileId },
    /// An input was written after a target
    InputNewer {
        input: FileId,
        target: FileId,
        input_time: Timestamp,
        target_time: Timestamp,
    },
}

impl OutdatedReason {
    /// Get a human-readable description of the reason
    pub fn description(&self, state: &FileSystemState) -> String {
        let path = |id: &FileId| {
            state
                .try_get_file_path(*id)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("<file {}>", id))
        };
        match self {
            OutdatedReason::TargetMissing { target } => format!("Target missing: {}", path(target)),
            OutdatedReason::InputMissing { input } => format!("Input missing: {}", path(input)),
            OutdatedReason::InputNewer { input, target, .. } => {
                format!("Input {} is newer than {}", path(input), path(target))
            }
        }
    }
}

/// Staleness checks over one pass's `FileSystemState`
pub struct OutdatedChecker<'a> {
    state: &'a FileSystemState,
}

impl<'a> OutdatedChecker<'a> {
    pub fn new(state: &'a FileSystemState) -> Self {
        Self { state }
    }

    /// Whether `targets` must be rebuilt from `inputs`
    pub fn is_outdated(&self, targets: &FileIdSet, inputs: &FileIdSet) -> bool {
        self.check(targets, inputs).is_some()
    }

    /// Like `is_outdated`, but reports the first reason found.
    ///
    /// # Returns
    /// * `None` if every target is at least as new as every input, or if
    ///   there are no inputs at all
    /// * `Some(reason)` for the first missing file or newer input
    pub fn check(&self, targets: &FileIdSet, inputs: &FileIdSet) -> Option<OutdatedReason> {
        // Nothing tracked, nothing can have changed
        if inputs.is_empty() {
            return None;
        }

        for target in targets {
            let Some(target_time) = self.state.get_last_write_time(*target) else {
                return Some(OutdatedReason::TargetMissing { target: *target });
            };

            for input in inputs {
                match self.state.get_last_write_time(*input) {
                    None => return Some(OutdatedReason::InputMissing { input: *input }),
                    Some(input_time) if input_time > target_time => {
                        return Some(OutdatedReason::InputNewer {
                            input: *input,
                            target: *target,
                            input_time,
                            target_time,
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        None
    }
}

/// Convenience wrapper around `OutdatedChecker::is_outdated`
pub fn is_outdated(state: &FileSystemState, targets: &FileIdSet, inputs: &FileIdSet) -> bool {
    OutdatedChecker::new(state).is_outdated(targets, inputs)
}
