//! Operation Graph Module
//!
//! Operations live in an id-addressed map; edges are plain `OperationId`
//! lists, so the graph never holds pointers into itself.
//!
//! - `operation`: ids, `CommandInfo`, `OperationInfo`
//! - `operation_graph`: the container with its command lookup
//! - `validation`: structural checks and Kahn ordering
//! - `generator`: builds graphs from path-based declarations

mod generator;
mod operation;
mod operation_graph;
mod validation;

pub use generator::*;
pub use operation::*;
pub use operation_graph::*;
