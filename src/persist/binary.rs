//! Little-endian primitives shared by every state file format.
//!
//! Every file is a 4 byte magic tag, a `u32` version, then tagged sections.
//! Strings are a `u32` byte length followed by raw UTF-8 with no terminator.
//! Booleans are a `u32` that must be 0 or 1.

use crate::error::PersistError;
use crate::fs_state::{FileId, Timestamp};
use crate::graph::FileIdSet;

use chrono::DateTime;

/// Cursor over a complete state file held in memory
pub struct BinaryReader<'a> {
    kind: &'static str,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BinaryReader<'a> {
    /// `kind` names the file format in error messages ("operation graph", ...)
    pub fn new(kind: &'static str, bytes: &'a [u8]) -> Self {
        Self {
            kind,
            bytes,
            offset: 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PersistError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(PersistError::Truncated {
                kind: self.kind,
                offset: self.offset,
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], PersistError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    /// Check the 4 byte file header
    pub fn expect_magic(&mut self, magic: &[u8; 4]) -> Result<(), PersistError> {
        let kind = self.kind;
        let found = self
            .take_array::<4>()
            .map_err(|_| PersistError::BadMagic { kind })?;
        if &found != magic {
            return Err(PersistError::BadMagic { kind });
        }
        Ok(())
    }

    /// Check the format version that follows the header
    pub fn expect_version(&mut self, expected: u32) -> Result<(), PersistError> {
        let found = self.read_u32()?;
        if found != expected {
            return Err(PersistError::BadVersion {
                kind: self.kind,
                found,
                expected,
            });
        }
        Ok(())
    }

    /// Check a 4 byte section tag; `name` is only used for the error message
    pub fn expect_section(&mut self, tag: &[u8; 4], name: &'static str) -> Result<(), PersistError> {
        let found = self.take_array::<4>()?;
        if &found != tag {
            return Err(PersistError::BadSection {
                kind: self.kind,
                expected: name,
            });
        }
        Ok(())
    }

    pub fn read_u32(&mut self) -> Result<u32, PersistError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, PersistError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, PersistError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, PersistError> {
        match self.read_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(PersistError::InvalidBoolean {
                kind: self.kind,
                value,
            }),
        }
    }

    pub fn read_string(&mut self) -> Result<String, PersistError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PersistError::InvalidUtf8 { kind: self.kind })
    }

    /// Seconds (`i64`) then nanoseconds (`u32`) since the unix epoch
    pub fn read_timestamp(&mut self) -> Result<Timestamp, PersistError> {
        let seconds = self.read_i64()?;
        let nanoseconds = self.read_u32()?;
        DateTime::from_timestamp(seconds, nanoseconds)
            .ok_or(PersistError::InvalidTimestamp { kind: self.kind })
    }

    /// `u32` count followed by that many `u32` file ids
    pub fn read_file_id_set(&mut self) -> Result<FileIdSet, PersistError> {
        let count = self.read_u32()?;
        let mut set = FileIdSet::new();
        for _ in 0..count {
            let id = self.read_u32()?;
            if !set.insert(FileId(id)) {
                return Err(PersistError::DuplicateEntry {
                    kind: self.kind,
                    id,
                });
            }
        }
        Ok(set)
    }

    /// Fail unless every byte has been consumed
    pub fn finish(self) -> Result<(), PersistError> {
        let remaining = self.bytes.len() - self.offset;
        if remaining != 0 {
            return Err(PersistError::TrailingData {
                kind: self.kind,
                remaining,
            });
        }
        Ok(())
    }
}

/// Growable output buffer, the structural inverse of `BinaryReader`
#[derive(Debug)]
pub struct BinaryWriter {
    kind: &'static str,
    bytes: Vec<u8>,
    oversized: Option<usize>,
}

impl BinaryWriter {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            bytes: Vec::new(),
            oversized: None,
        }
    }

    /// Write a 4 byte magic or section tag
    pub fn write_tag(&mut self, tag: &[u8; 4]) {
        self.bytes.extend_from_slice(tag);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u32(u32::from(value));
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_len(value.len());
        self.bytes.extend_from_slice(value.as_bytes());
    }

    pub fn write_timestamp(&mut self, value: &Timestamp) {
        self.write_i64(value.timestamp());
        self.write_u32(value.timestamp_subsec_nanos());
    }

    pub fn write_file_id_set(&mut self, set: &FileIdSet) {
        self.write_len(set.len());
        for id in set {
            self.write_u32(id.0);
        }
    }

    /// Element counts and string lengths are `u32` on disk. A longer one
    /// is remembered and reported by `into_bytes`.
    pub fn write_len(&mut self, len: usize) {
        match u32::try_from(len) {
            Ok(len) => self.write_u32(len),
            Err(_) => {
                self.oversized.get_or_insert(len);
                self.write_u32(u32::MAX);
            }
        }
    }

    /// The encoded file, or `TooLarge` if any length overflowed the format
    pub fn into_bytes(self) -> Result<Vec<u8>, PersistError> {
        match self.oversized {
            Some(len) => Err(PersistError::TooLarge {
                kind: self.kind,
                len,
            }),
            None => Ok(self.bytes),
        }
    }
}
