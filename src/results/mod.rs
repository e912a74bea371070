//! Operation results module for incremental decisions across invocations.
//!
//! This module provides:
//! - `entry`: the per-operation `ResultRecord`
//! - `store`: `OperationResults`, the keyed cache with load/save and carry-over

mod entry;
mod store;

pub use entry::*;
pub use store::*;
