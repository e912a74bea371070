//! Structural validation for operation graphs.
//!
//! Rejects graphs that cannot be evaluated safely:
//! - Edges or roots pointing at operations that do not exist
//! - Two operations declaring the same output file (they would race)
//! - Two operations running the same command
//! - Stored dependency counts that disagree with the edge set
//! - Root sets that are not exactly the operations without parents
//! - Dependency cycles

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::GraphError;
use crate::fs_state::FileId;

use super::operation::{CommandInfo, OperationId};
use super::operation_graph::OperationGraph;

impl OperationGraph {
    /// Run every structural check once, before any operation executes.
    ///
    /// # Returns
    /// * `Ok(())` if the graph can be scheduled
    /// * `Err(GraphError)` describing the first problem found
    pub fn validate(&self) -> Result<(), GraphError> {
        self.check_references()?;
        self.check_duplicate_outputs()?;
        self.check_duplicate_commands()?;
        let derived = self.check_dependency_counts()?;
        self.check_root_set(&derived)?;
        self.topological_order().map(|_| ())
    }

    /// Number of distinct parents for every operation, derived from `children`
    pub fn derive_dependency_counts(&self) -> BTreeMap<OperationId, u32> {
        let mut counts: BTreeMap<OperationId, u32> =
            self.operations().map(|op| (op.id, 0)).collect();

        for operation in self.operations() {
            let distinct: BTreeSet<OperationId> = operation.children.iter().copied().collect();
            for child in distinct {
                if let Some(count) = counts.get_mut(&child) {
                    *count += 1;
                }
            }
        }

        counts
    }

    /// Kahn's algorithm over the derived dependency counts.
    ///
    /// # Returns
    /// * `Ok(order)` with every operation listed after all of its parents
    /// * `Err(GraphError::Cycle)` listing the operations that never became ready
    pub fn topological_order(&self) -> Result<Vec<OperationId>, GraphError> {
        let mut remaining = self.derive_dependency_counts();
        let mut ready: Vec<OperationId> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        // Pop from the back, so reverse to visit low ids first
        ready.reverse();

        let mut order = Vec::with_capacity(remaining.len());
        while let Some(id) = ready.pop() {
            order.push(id);
            let distinct: BTreeSet<OperationId> = self
                .get_operation_info(id)
                .children
                .iter()
                .copied()
                .collect();
            for child in distinct.into_iter().rev() {
                if let Some(count) = remaining.get_mut(&child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(child);
                    }
                }
            }
        }

        if order.len() != self.len() {
            let blocked: Vec<OperationId> = remaining
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(id, _)| id)
                .collect();
            return Err(GraphError::Cycle(blocked));
        }

        Ok(order)
    }

    fn check_references(&self) -> Result<(), GraphError> {
        for root in self.root_operation_ids() {
            if !self.contains(*root) {
                return Err(GraphError::UnknownRoot(*root));
            }
        }

        for operation in self.operations() {
            for child in &operation.children {
                if !self.contains(*child) {
                    return Err(GraphError::UnknownId {
                        id: *child,
                        referenced_by: operation.id,
                    });
                }
            }
        }

        Ok(())
    }

    fn check_duplicate_outputs(&self) -> Result<(), GraphError> {
        let mut writers: HashMap<FileId, OperationId> = HashMap::new();
        for operation in self.operations() {
            for file in &operation.declared_output {
                if let Some(first) = writers.insert(*file, operation.id) {
                    return Err(GraphError::DuplicateOutput {
                        file: *file,
                        first,
                        second: operation.id,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_duplicate_commands(&self) -> Result<(), GraphError> {
        let mut seen: HashMap<&CommandInfo, OperationId> = HashMap::new();
        for operation in self.operations() {
            if let Some(first) = seen.insert(&operation.command, operation.id) {
                return Err(GraphError::DuplicateCommand {
                    first,
                    second: operation.id,
                });
            }
        }
        Ok(())
    }

    fn check_dependency_counts(&self) -> Result<BTreeMap<OperationId, u32>, GraphError> {
        let derived = self.derive_dependency_counts();
        for operation in self.operations() {
            let count = derived.get(&operation.id).copied().unwrap_or(0);
            if operation.dependency_count != count {
                return Err(GraphError::DependencyCountMismatch {
                    id: operation.id,
                    stored: operation.dependency_count,
                    derived: count,
                });
            }
        }
        Ok(derived)
    }

    fn check_root_set(&self, derived: &BTreeMap<OperationId, u32>) -> Result<(), GraphError> {
        let expected: Vec<OperationId> = derived
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut actual = self.root_operation_ids().to_vec();
        actual.sort();

        if expected != actual {
            return Err(GraphError::RootSetMismatch { expected, actual });
        }
        Ok(())
    }
}
