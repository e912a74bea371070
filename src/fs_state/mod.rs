//! File System State Module
//!
//! Interns file paths to stable integer ids and caches last write times for
//! the duration of one evaluation pass.
//!
//! - `path`: lexical path normalization shared by every lookup
//! - `filesystem`: the external file system collaborator (`exists` + `last_write_time`)
//! - `state`: `FileSystemState`, the id table plus the per-pass write time cache

mod filesystem;
mod path;
mod state;

pub use filesystem::*;
pub use path::*;
pub use state::*;
