//! What a pass did, in a form fit for showing to the user.

use std::fmt;

use serde::Serialize;

use crate::graph::OperationId;

/// An operation that ran and did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedOperation {
    pub id: OperationId,
    pub title: String,
    /// Human-readable command line
    pub command: String,
    pub fingerprint: String,
    /// `None` when the process never produced an exit code
    pub exit_code: Option<i32>,
    pub stderr: String,
    /// Why the operation counts as failed
    pub error: String,
}

/// Result of one evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    /// Operations dispatched to the process runner (including failures)
    pub executed: usize,
    /// Operations found up to date
    pub skipped: usize,
    pub failed: Vec<FailedOperation>,
    /// Operations never dispatched because an ancestor failed
    pub not_run: Vec<OperationId>,
    /// Whether every reachable operation succeeded
    pub success: bool,
}

impl fmt::Display for EvaluationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} operations executed, {} skipped (up to date)",
            self.executed, self.skipped
        )?;

        if self.success {
            return Ok(());
        }

        write!(f, "\n{} operations failed:", self.failed.len())?;
        for failed in &self.failed {
            write!(f, "\n  [{}] {}: {}", failed.id, failed.title, failed.error)?;
            write!(f, "\n    {}", failed.command)?;
            let stderr = failed.stderr.trim_end();
            if !stderr.is_empty() {
                for line in stderr.lines() {
                    write!(f, "\n    | {}", line)?;
                }
            }
        }
        if !self.not_run.is_empty() {
            write!(f, "\n{} operations not run due to earlier failures", self.not_run.len())?;
        }
        Ok(())
    }
}
