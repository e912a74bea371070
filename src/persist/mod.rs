//! Persistence of build state between passes.
//!
//! All formats are little-endian, length-prefixed and exact: a reader must
//! consume every byte, so any deviation is reported as corruption.

pub mod binary;
pub mod fs_state_format;
pub mod graph_format;
pub mod results_format;
pub mod state_dir;
pub mod value_table;

pub use fs_state_format::{deserialize_file_table, serialize_file_table};
pub use graph_format::{deserialize_graph, serialize_graph};
pub use results_format::{deserialize_results, serialize_results};
pub use state_dir::{atomic_write, load_results, save_results, Loaded, StateDirectory, StateLock};
pub use value_table::{deserialize_value_table, serialize_value_table, Value, ValueTable};
