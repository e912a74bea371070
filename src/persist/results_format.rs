//! Operation history file format.
//!
//! ```text
//! "BOH\0" version:u32
//! "OPS\0" count:u32 {
//!     id:u32 evaluate_seconds:i64 evaluate_nanos:u32 was_successful_run:bool
//!     observed_input:ids observed_output:ids
//! }
//! ```

use crate::error::PersistError;
use crate::graph::OperationId;
use crate::results::{OperationResults, ResultRecord};

use super::binary::{BinaryReader, BinaryWriter};

pub const RESULTS_MAGIC: &[u8; 4] = b"BOH\0";
pub const RESULTS_VERSION: u32 = 1;
const OPERATIONS_SECTION: &[u8; 4] = b"OPS\0";
const KIND: &str = "operation history";

pub fn serialize_results(results: &OperationResults) -> Result<Vec<u8>, PersistError> {
    let mut writer = BinaryWriter::new(KIND);
    writer.write_tag(RESULTS_MAGIC);
    writer.write_u32(RESULTS_VERSION);

    writer.write_tag(OPERATIONS_SECTION);
    writer.write_len(results.len());
    for (id, record) in results.iter() {
        writer.write_u32(id.0);
        writer.write_timestamp(&record.evaluate_time);
        writer.write_bool(record.was_successful_run);
        writer.write_file_id_set(&record.observed_input);
        writer.write_file_id_set(&record.observed_output);
    }

    writer.into_bytes()
}

pub fn deserialize_results(bytes: &[u8]) -> Result<OperationResults, PersistError> {
    let mut reader = BinaryReader::new(KIND, bytes);
    reader.expect_magic(RESULTS_MAGIC)?;
    reader.expect_version(RESULTS_VERSION)?;

    reader.expect_section(OPERATIONS_SECTION, "OPS")?;
    let count = reader.read_u32()?;
    let mut results = OperationResults::new();
    for _ in 0..count {
        let id = reader.read_u32()?;
        let record = ResultRecord {
            evaluate_time: reader.read_timestamp()?,
            was_successful_run: reader.read_bool()?,
            observed_input: reader.read_file_id_set()?,
            observed_output: reader.read_file_id_set()?,
        };
        if results.get(OperationId(id)).is_some() {
            return Err(PersistError::DuplicateEntry { kind: KIND, id });
        }
        results.put(OperationId(id), record);
    }

    reader.finish()?;
    Ok(results)
}
