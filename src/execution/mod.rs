//! Execution Module
//!
//! Runs the stale part of an operation graph. Independent ready operations
//! execute in parallel on tokio tasks, bounded by `EngineConfig::max_workers`.
//!
//! - `collaborators`: process runner and access monitor traits plus the real implementations
//! - `build_state`: the graph, file table, results and shared state of one pass
//! - `engine`: the scheduler and the load, evaluate, save pass
//! - `summary`: what a pass reports back

pub mod build_state;
pub mod collaborators;
pub mod engine;
pub mod summary;

pub use build_state::*;
pub use collaborators::*;
pub use engine::*;
pub use summary::*;
