//! Operation node types.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::fs_state::FileId;

/// Ordered set of file ids; ordering keeps serialized output deterministic
pub type FileIdSet = BTreeSet<FileId>;

/// Identifier of an operation, unique within one `OperationGraph`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(pub u32);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The process invocation an operation stands for.
///
/// Also the identity used to recognize the same logical operation across
/// two generated graphs whose numeric ids differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandInfo {
    pub working_directory: PathBuf,
    pub executable: PathBuf,
    pub arguments: String,
}

impl CommandInfo {
    pub fn new(
        working_directory: impl Into<PathBuf>,
        executable: impl Into<PathBuf>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            working_directory: working_directory.into(),
            executable: executable.into(),
            arguments: arguments.into(),
        }
    }

    /// Hex SHA-256 over the three fields, each length-prefixed.
    ///
    /// Unlike `Hash`, this value is stable across processes and platforms.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.working_directory.to_string_lossy(),
            self.executable.to_string_lossy(),
            Cow::Borrowed(self.arguments.as_str()),
        ] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for CommandInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (in {})",
            self.executable.display(),
            self.arguments,
            self.working_directory.display()
        )
    }
}

/// A node of the operation graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationInfo {
    pub id: OperationId,
    /// Human readable, not semantically significant
    pub title: String,
    pub command: CommandInfo,
    pub declared_input: FileIdSet,
    pub declared_output: FileIdSet,
    /// Operations that must run after this one
    pub children: Vec<OperationId>,
    /// Number of distinct parents that must complete first
    pub dependency_count: u32,
    pub was_successful_run: bool,
    pub observed_input: FileIdSet,
    pub observed_output: FileIdSet,
}

impl OperationInfo {
    /// Create an operation with no edges and no execution history
    pub fn new(
        id: OperationId,
        title: impl Into<String>,
        command: CommandInfo,
        declared_input: FileIdSet,
        declared_output: FileIdSet,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            command,
            declared_input,
            declared_output,
            children: Vec::new(),
            dependency_count: 0,
            was_successful_run: false,
            observed_input: FileIdSet::new(),
            observed_output: FileIdSet::new(),
        }
    }
}
