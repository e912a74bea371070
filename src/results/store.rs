//! Keyed cache of prior operation outcomes.
//!
//! Purely a cache: losing it forces a full rebuild but never produces a
//! wrong one, so a missing or unreadable store loads as "nothing known".

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::PersistError;
use crate::graph::{OperationGraph, OperationId};
use crate::persist::{self, Loaded};

use super::entry::ResultRecord;

/// Prior results keyed by operation id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationResults {
    records: BTreeMap<OperationId, ResultRecord>,
}

impl OperationResults {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from disk, `None` if it is missing or unreadable
    pub fn try_load(path: &Path) -> Option<Self> {
        match persist::load_results(path) {
            Loaded::Found(results) => Some(results),
            Loaded::Missing | Loaded::Corrupt(_) => None,
        }
    }

    /// Atomically write the store to `path`
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        persist::save_results(path, self)
    }

    pub fn get(&self, id: OperationId) -> Option<&ResultRecord> {
        self.records.get(&id)
    }

    pub fn put(&mut self, id: OperationId, record: ResultRecord) {
        self.records.insert(id, record);
    }

    pub fn remove(&mut self, id: OperationId) -> Option<ResultRecord> {
        self.records.remove(&id)
    }

    /// Records in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (OperationId, &ResultRecord)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Re-key results recorded against `previous` for a newly generated `next` graph.
    ///
    /// Operations are matched by command, so an operation keeps its history
    /// even if regeneration handed it a different id. Results for operations
    /// that no longer exist are dropped.
    pub fn carry_over(&self, previous: &OperationGraph, next: &OperationGraph) -> Self {
        let mut carried = Self::new();
        let mut dropped = 0usize;

        for operation in next.operations() {
            let record = previous
                .try_find_operation_info(&operation.command)
                .and_then(|old| self.records.get(&old.id));
            match record {
                Some(record) => carried.put(operation.id, record.clone()),
                None => dropped += 1,
            }
        }

        tracing::debug!(
            carried = carried.len(),
            without_history = dropped,
            "Carried operation results into regenerated graph"
        );
        carried
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_state::FileId;
    use crate::graph::{CommandInfo, FileIdSet, OperationInfo};
    use chrono::DateTime;
    use tempfile::TempDir;

    fn record(seconds: i64, success: bool) -> ResultRecord {
        ResultRecord {
            evaluate_time: DateTime::from_timestamp(seconds, 0).unwrap(),
            was_successful_run: success,
            observed_input: FileIdSet::from([FileId(1), FileId(4)]),
            observed_output: FileIdSet::from([FileId(2)]),
        }
    }

    fn graph(entries: &[(u32, &str)]) -> OperationGraph {
        let mut graph = OperationGraph::new();
        for (id, args) in entries {
            graph
                .add_operation(OperationInfo::new(
                    OperationId(*id),
                    args.to_string(),
                    CommandInfo::new("/work", "cc", *args),
                    FileIdSet::new(),
                    FileIdSet::new(),
                ))
                .unwrap();
        }
        graph
    }

    #[test]
    fn test_get_put_remove() {
        let mut results = OperationResults::new();
        results.put(OperationId(3), record(10, true));

        assert_eq!(results.get(OperationId(3)), Some(&record(10, true)));
        assert!(results.get(OperationId(4)).is_none());

        results.put(OperationId(3), record(20, false));
        assert_eq!(results.len(), 1);
        assert!(!results.get(OperationId(3)).unwrap().was_successful_run);

        assert!(results.remove(OperationId(3)).is_some());
        assert!(results.is_empty());
    }

    #[test]
    fn test_carry_over_follows_commands() {
        let previous = graph(&[(1, "-c a.c"), (2, "-c b.c"), (3, "-c gone.c")]);
        let next = graph(&[(1, "-c b.c"), (2, "-c a.c"), (3, "-c new.c")]);

        let mut results = OperationResults::new();
        results.put(OperationId(1), record(1, true));
        results.put(OperationId(2), record(2, true));
        results.put(OperationId(3), record(3, true));

        let carried = results.carry_over(&previous, &next);

        assert_eq!(carried.len(), 2);
        assert_eq!(carried.get(OperationId(1)), Some(&record(2, true)));
        assert_eq!(carried.get(OperationId(2)), Some(&record(1, true)));
        assert!(carried.get(OperationId(3)).is_none());
    }

    #[test]
    fn test_save_and_try_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("OperationResults.boh");

        let mut results = OperationResults::new();
        results.put(OperationId(5), record(100, true));
        results.save(&path).unwrap();

        assert_eq!(OperationResults::try_load(&path), Some(results));
    }

    #[test]
    fn test_try_load_missing_or_corrupt_is_cold_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("OperationResults.boh");
        assert!(OperationResults::try_load(&path).is_none());

        std::fs::write(&path, b"BOH2\x01\x00\x00\x00").unwrap();
        assert!(OperationResults::try_load(&path).is_none());
    }
}
