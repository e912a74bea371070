//! Graph generator
//!
//! The producer-side facade handed to whatever declares build operations
//! (a script host, a task registry, a test). Callers declare operations in
//! terms of paths; the generator interns them, derives edges from the
//! output -> input relation, and returns a validated graph.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use crate::error::GraphError;
use crate::fs_state::{FileId, FileSystemState};

use super::operation::{CommandInfo, FileIdSet, OperationId, OperationInfo};
use super::operation_graph::OperationGraph;

/// One operation as declared by the graph-construction collaborator
#[derive(Debug, Clone)]
pub struct OperationDeclaration {
    pub title: String,
    pub command: CommandInfo,
    /// Relative paths are resolved against the command's working directory
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

/// Builds an `OperationGraph` from declarations
pub struct GraphGenerator<'a> {
    file_system_state: &'a FileSystemState,
    operations: Vec<OperationInfo>,
}

impl<'a> GraphGenerator<'a> {
    pub fn new(file_system_state: &'a FileSystemState) -> Self {
        Self {
            file_system_state,
            operations: Vec::new(),
        }
    }

    /// Intern a path the same way declarations are interned
    pub fn to_file_id(&self, path: impl Into<PathBuf>, working_directory: impl Into<PathBuf>) -> FileId {
        self.file_system_state
            .to_file_id(path.into(), working_directory.into())
    }

    /// Declare an operation; ids are handed out sequentially from 1
    pub fn declare(&mut self, declaration: OperationDeclaration) -> OperationId {
        let id = OperationId(self.operations.len() as u32 + 1);
        let working_directory = &declaration.command.working_directory;

        let declared_input: FileIdSet = declaration
            .inputs
            .iter()
            .map(|path| self.file_system_state.to_file_id(path, working_directory))
            .collect();
        let declared_output: FileIdSet = declaration
            .outputs
            .iter()
            .map(|path| self.file_system_state.to_file_id(path, working_directory))
            .collect();

        tracing::debug!(
            operation = %declaration.title,
            id = id.0,
            inputs = declared_input.len(),
            outputs = declared_output.len(),
            "Declared operation"
        );

        self.operations.push(OperationInfo::new(
            id,
            declaration.title,
            declaration.command,
            declared_input,
            declared_output,
        ));
        id
    }

    /// Derive edges, dependency counts and roots, then validate.
    pub fn finish(self) -> Result<OperationGraph, GraphError> {
        let mut producers: HashMap<FileId, OperationId> = HashMap::new();
        for operation in &self.operations {
            for file in &operation.declared_output {
                if let Some(first) = producers.insert(*file, operation.id) {
                    return Err(GraphError::DuplicateOutput {
                        file: *file,
                        first,
                        second: operation.id,
                    });
                }
            }
        }

        let mut children: BTreeMap<OperationId, BTreeSet<OperationId>> = BTreeMap::new();
        let mut parents: BTreeMap<OperationId, BTreeSet<OperationId>> = BTreeMap::new();
        for operation in &self.operations {
            for file in &operation.declared_input {
                if let Some(producer) = producers.get(file) {
                    children.entry(*producer).or_default().insert(operation.id);
                    parents.entry(operation.id).or_default().insert(*producer);
                }
            }
        }

        let mut graph = OperationGraph::new();
        let mut roots = Vec::new();
        for mut operation in self.operations {
            operation.children = children
                .remove(&operation.id)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default();
            operation.dependency_count = parents
                .get(&operation.id)
                .map(|set| set.len() as u32)
                .unwrap_or(0);
            if operation.dependency_count == 0 {
                roots.push(operation.id);
            }
            graph.add_operation(operation)?;
        }
        graph.set_root_operation_ids(roots);

        graph.validate()?;

        tracing::debug!(
            operations = graph.len(),
            roots = graph.root_operation_ids().len(),
            "Generated operation graph"
        );
        Ok(graph)
    }
}
