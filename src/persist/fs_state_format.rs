//! File system state file format.
//!
//! ```text
//! "BFS\0" version:u32 max_file_id:u32
//! "FIS\0" count:u32 { id:u32 path:str }
//! ```
//! Write times are never persisted; they are re-read every pass.

use crate::error::PersistError;
use crate::fs_state::{FileId, FileTable};

use super::binary::{BinaryReader, BinaryWriter};

pub const FILE_SYSTEM_STATE_MAGIC: &[u8; 4] = b"BFS\0";
pub const FILE_SYSTEM_STATE_VERSION: u32 = 1;
const FILES_SECTION: &[u8; 4] = b"FIS\0";
const KIND: &str = "file system state";

pub fn serialize_file_table(table: &FileTable) -> Result<Vec<u8>, PersistError> {
    let mut writer = BinaryWriter::new(KIND);
    writer.write_tag(FILE_SYSTEM_STATE_MAGIC);
    writer.write_u32(FILE_SYSTEM_STATE_VERSION);
    writer.write_u32(table.max_file_id);

    writer.write_tag(FILES_SECTION);
    writer.write_len(table.files.len());
    for (id, path) in &table.files {
        writer.write_u32(id.0);
        writer.write_string(path);
    }

    writer.into_bytes()
}

pub fn deserialize_file_table(bytes: &[u8]) -> Result<FileTable, PersistError> {
    let mut reader = BinaryReader::new(KIND, bytes);
    reader.expect_magic(FILE_SYSTEM_STATE_MAGIC)?;
    reader.expect_version(FILE_SYSTEM_STATE_VERSION)?;
    let max_file_id = reader.read_u32()?;
    // The next allocation must still fit
    if max_file_id == u32::MAX {
        return Err(PersistError::InvalidFileId {
            kind: KIND,
            id: max_file_id,
            max: max_file_id,
        });
    }

    reader.expect_section(FILES_SECTION, "FIS")?;
    let count = reader.read_u32()?;
    let mut table = FileTable {
        max_file_id,
        ..FileTable::default()
    };
    for _ in 0..count {
        let id = reader.read_u32()?;
        let path = reader.read_string()?;
        // Id 0 is never allocated and nothing may sit above the high-water mark
        if id == 0 || id > max_file_id || table.files.insert(FileId(id), path).is_some() {
            return Err(PersistError::InvalidFileId {
                kind: KIND,
                id,
                max: max_file_id,
            });
        }
    }

    reader.finish()?;
    Ok(table)
}
