//! Data structures for prior operation outcomes.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::fs_state::Timestamp;
use crate::graph::FileIdSet;

/// Outcome of the last time an operation was executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    /// When the operation finished
    pub evaluate_time: Timestamp,
    pub was_successful_run: bool,
    /// Files the process actually read
    pub observed_input: FileIdSet,
    /// Files the process actually wrote
    pub observed_output: FileIdSet,
}

impl ResultRecord {
    /// Record an execution that finished just now
    pub fn now(was_successful_run: bool, observed_input: FileIdSet, observed_output: FileIdSet) -> Self {
        Self {
            evaluate_time: Utc::now(),
            was_successful_run,
            observed_input,
            observed_output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_state::FileId;

    #[test]
    fn test_now_stamps_current_time() {
        let before = Utc::now();
        let record = ResultRecord::now(true, FileIdSet::from([FileId(1)]), FileIdSet::new());
        let after = Utc::now();

        assert!(record.evaluate_time >= before && record.evaluate_time <= after);
        assert!(record.was_successful_run);
        assert_eq!(record.observed_input.len(), 1);
    }
}
