//! Operation graph file format.
//!
//! ```text
//! "BOG\0" version:u32
//! "ROP\0" count:u32 { id:u32 }
//! "OPS\0" count:u32 {
//!     id:u32 title:str
//!     working_directory:str executable:str arguments:str
//!     declared_input:ids declared_output:ids children:ids
//!     dependency_count:u32 was_successful_run:bool
//!     observed_input:ids observed_output:ids
//! }
//! ```
//! where `ids` is a `u32` count followed by `u32` values.

use std::path::PathBuf;

use crate::error::PersistError;
use crate::graph::{CommandInfo, OperationGraph, OperationId, OperationInfo};

use super::binary::{BinaryReader, BinaryWriter};

pub const GRAPH_MAGIC: &[u8; 4] = b"BOG\0";
pub const GRAPH_VERSION: u32 = 5;
const ROOT_OPERATIONS_SECTION: &[u8; 4] = b"ROP\0";
const OPERATIONS_SECTION: &[u8; 4] = b"OPS\0";
const KIND: &str = "operation graph";

/// Encode a graph into its on-disk form
pub fn serialize_graph(graph: &OperationGraph) -> Result<Vec<u8>, PersistError> {
    let mut writer = BinaryWriter::new(KIND);
    writer.write_tag(GRAPH_MAGIC);
    writer.write_u32(GRAPH_VERSION);

    writer.write_tag(ROOT_OPERATIONS_SECTION);
    writer.write_len(graph.root_operation_ids().len());
    for id in graph.root_operation_ids() {
        writer.write_u32(id.0);
    }

    writer.write_tag(OPERATIONS_SECTION);
    writer.write_len(graph.len());
    for operation in graph.operations() {
        write_operation(&mut writer, operation);
    }

    writer.into_bytes()
}

/// Decode a graph, rejecting anything that is not exactly one well-formed file
pub fn deserialize_graph(bytes: &[u8]) -> Result<OperationGraph, PersistError> {
    let mut reader = BinaryReader::new(KIND, bytes);
    reader.expect_magic(GRAPH_MAGIC)?;
    reader.expect_version(GRAPH_VERSION)?;

    reader.expect_section(ROOT_OPERATIONS_SECTION, "ROP")?;
    let root_count = reader.read_u32()?;
    let mut roots = Vec::new();
    for _ in 0..root_count {
        roots.push(OperationId(reader.read_u32()?));
    }

    reader.expect_section(OPERATIONS_SECTION, "OPS")?;
    let operation_count = reader.read_u32()?;
    let mut graph = OperationGraph::new();
    for _ in 0..operation_count {
        let operation = read_operation(&mut reader)?;
        let id = operation.id.0;
        graph
            .add_operation(operation)
            .map_err(|_| PersistError::DuplicateEntry { kind: KIND, id })?;
    }
    graph.set_root_operation_ids(roots);

    reader.finish()?;
    Ok(graph)
}

fn write_operation(writer: &mut BinaryWriter, operation: &OperationInfo) {
    writer.write_u32(operation.id.0);
    writer.write_string(&operation.title);
    writer.write_string(&operation.command.working_directory.to_string_lossy());
    writer.write_string(&operation.command.executable.to_string_lossy());
    writer.write_string(&operation.command.arguments);
    writer.write_file_id_set(&operation.declared_input);
    writer.write_file_id_set(&operation.declared_output);
    writer.write_len(operation.children.len());
    for child in &operation.children {
        writer.write_u32(child.0);
    }
    writer.write_u32(operation.dependency_count);
    writer.write_bool(operation.was_successful_run);
    writer.write_file_id_set(&operation.observed_input);
    writer.write_file_id_set(&operation.observed_output);
}

fn read_operation(reader: &mut BinaryReader<'_>) -> Result<OperationInfo, PersistError> {
    let id = OperationId(reader.read_u32()?);
    let title = reader.read_string()?;
    let command = CommandInfo {
        working_directory: PathBuf::from(reader.read_string()?),
        executable: PathBuf::from(reader.read_string()?),
        arguments: reader.read_string()?,
    };
    let declared_input = reader.read_file_id_set()?;
    let declared_output = reader.read_file_id_set()?;
    let child_count = reader.read_u32()?;
    let mut children = Vec::new();
    for _ in 0..child_count {
        children.push(OperationId(reader.read_u32()?));
    }

    Ok(OperationInfo {
        id,
        title,
        command,
        declared_input,
        declared_output,
        children,
        dependency_count: reader.read_u32()?,
        was_successful_run: reader.read_bool()?,
        observed_input: reader.read_file_id_set()?,
        observed_output: reader.read_file_id_set()?,
    })
}
