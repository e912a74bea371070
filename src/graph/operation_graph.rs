//! The operation graph container.

use std::collections::{BTreeMap, HashMap};

use crate::error::GraphError;

use super::operation::{CommandInfo, FileIdSet, OperationId, OperationInfo};

/// Operations addressed by id, with edges stored as plain id lists.
///
/// Mutated only through `add_operation` / `set_root_operation_ids` while a
/// graph is being built. During evaluation the only change is recording
/// execution outcomes via `record_execution`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationGraph {
    root_operation_ids: Vec<OperationId>,
    operations: BTreeMap<OperationId, OperationInfo>,
    command_lookup: HashMap<CommandInfo, OperationId>,
}

impl OperationGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry points the scheduler starts from
    pub fn root_operation_ids(&self) -> &[OperationId] {
        &self.root_operation_ids
    }

    pub fn set_root_operation_ids(&mut self, ids: Vec<OperationId>) {
        self.root_operation_ids = ids;
    }

    /// Insert an operation keyed by its id
    pub fn add_operation(&mut self, info: OperationInfo) -> Result<(), GraphError> {
        if self.operations.contains_key(&info.id) {
            return Err(GraphError::DuplicateId(info.id));
        }

        // The first operation with a command owns the lookup entry;
        // validation rejects graphs where a command appears twice
        self.command_lookup
            .entry(info.command.clone())
            .or_insert(info.id);
        self.operations.insert(info.id, info);
        Ok(())
    }

    /// Find the operation that runs `command`
    pub fn try_find_operation_info(&self, command: &CommandInfo) -> Option<&OperationInfo> {
        self.command_lookup
            .get(command)
            .and_then(|id| self.operations.get(id))
    }

    pub fn try_get_operation_info(&self, id: OperationId) -> Option<&OperationInfo> {
        self.operations.get(&id)
    }

    /// # Panics
    /// If `id` is not part of this graph; callers only hold ids taken from it.
    pub fn get_operation_info(&self, id: OperationId) -> &OperationInfo {
        self.operations
            .get(&id)
            .unwrap_or_else(|| panic!("the provided operation id does not exist: {}", id))
    }

    /// Operations in ascending id order
    pub fn operations(&self) -> impl Iterator<Item = &OperationInfo> {
        self.operations.values()
    }

    pub fn contains(&self, id: OperationId) -> bool {
        self.operations.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Bake the outcome of running an operation into its node.
    ///
    /// Returns `false` if the id is unknown.
    pub fn record_execution(
        &mut self,
        id: OperationId,
        was_successful_run: bool,
        observed_input: FileIdSet,
        observed_output: FileIdSet,
    ) -> bool {
        match self.operations.get_mut(&id) {
            Some(operation) => {
                operation.was_successful_run = was_successful_run;
                operation.observed_input = observed_input;
                operation.observed_output = observed_output;
                true
            }
            None => false,
        }
    }
}
