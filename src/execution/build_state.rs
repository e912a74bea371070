//! Everything one evaluation pass reads and writes.

use std::sync::Arc;

use crate::error::PersistError;
use crate::fs_state::{FileId, FileSystem, FileSystemState};
use crate::graph::OperationGraph;
use crate::persist::{Loaded, StateDirectory, ValueTable};
use crate::results::OperationResults;

/// In-memory build state owned by a single pass
pub struct BuildState {
    pub graph: OperationGraph,
    /// Shared with running operations for id and write time lookups
    pub fs_state: Arc<FileSystemState>,
    pub results: OperationResults,
    /// Untyped state owned by the graph generator
    pub shared_state: ValueTable,
}

impl BuildState {
    /// Fresh state with nothing known
    pub fn empty(file_system: Arc<dyn FileSystem>) -> Self {
        Self {
            graph: OperationGraph::new(),
            fs_state: Arc::new(FileSystemState::new(file_system)),
            results: OperationResults::new(),
            shared_state: ValueTable::new(),
        }
    }

    /// Load whatever previous state is usable. Never fails: missing or
    /// corrupt files degrade to empty state and a cold rebuild.
    pub fn load(directory: &StateDirectory, file_system: Arc<dyn FileSystem>) -> Self {
        let shared_state = directory.load_shared_state().unwrap_or_default();

        // Graph and results are meaningless without the file table their ids refer to
        let table = match directory.load_file_table() {
            Loaded::Found(table) => table,
            Loaded::Missing | Loaded::Corrupt(_) => {
                return Self {
                    shared_state,
                    ..Self::empty(file_system)
                };
            }
        };

        let fs_state = Arc::new(FileSystemState::from_table(table, file_system));
        let mut graph = directory.load_graph().unwrap_or_default();
        let mut results = directory.load_results().unwrap_or_default();

        let unknown = |id: &&FileId| fs_state.try_get_file_path(**id).is_none();
        let dangling = graph
            .operations()
            .find_map(|operation| {
                operation
                    .declared_input
                    .iter()
                    .chain(&operation.declared_output)
                    .chain(&operation.observed_input)
                    .chain(&operation.observed_output)
                    .find(unknown)
                    .copied()
            })
            .or_else(|| {
                results.iter().find_map(|(_, record)| {
                    record
                        .observed_input
                        .iter()
                        .chain(&record.observed_output)
                        .find(unknown)
                        .copied()
                })
            });
        if let Some(file_id) = dangling {
            tracing::error!(
                file_id = file_id.0,
                "Build state references a file unknown to the file system state, discarding it"
            );
            graph = OperationGraph::new();
            results = OperationResults::new();
        }

        tracing::info!(
            operations = graph.len(),
            files = fs_state.file_count(),
            results = results.len(),
            "Loaded previous build state"
        );

        Self {
            graph,
            fs_state,
            results,
            shared_state,
        }
    }

    /// Swap in a regenerated graph, carrying history over by command.
    ///
    /// Carried results are also baked into the new graph's nodes so a
    /// skipped operation keeps its observed files when the graph is saved.
    pub fn replace_graph(&mut self, mut next: OperationGraph) {
        let results = self.results.carry_over(&self.graph, &next);
        for (id, record) in results.iter() {
            next.record_execution(
                id,
                record.was_successful_run,
                record.observed_input.clone(),
                record.observed_output.clone(),
            );
        }

        tracing::debug!(
            previous = self.graph.len(),
            next = next.len(),
            carried = results.len(),
            "Replaced operation graph"
        );
        self.graph = next;
        self.results = results;
    }

    /// Persist all four stores
    pub fn save(&self, directory: &StateDirectory) -> Result<(), PersistError> {
        directory.ensure_dir()?;
        directory.save_file_table(&self.fs_state.to_table())?;
        directory.save_graph(&self.graph)?;
        directory.save_results(&self.results)?;
        directory.save_shared_state(&self.shared_state)?;
        tracing::debug!(path = %directory.root().display(), "Saved build state");
        Ok(())
    }
}
