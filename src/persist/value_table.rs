//! Value tables: untyped key/value state shared with the graph generator.
//!
//! ```text
//! "BVT\0" version:u32 "TBL\0" table
//! table := count:u32 { key:str value }
//! value := type:u32 payload
//! ```
//! Type tags: 1 table, 2 list, 3 string, 4 integer (`i64`), 5 float (`f64`),
//! 6 boolean. A list payload is a `u32` count followed by values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PersistError;

use super::binary::{BinaryReader, BinaryWriter};

pub const VALUE_TABLE_MAGIC: &[u8; 4] = b"BVT\0";
pub const VALUE_TABLE_VERSION: u32 = 2;
const TABLE_SECTION: &[u8; 4] = b"TBL\0";
const KIND: &str = "value table";
const MAX_DEPTH: usize = 64;

const TYPE_TABLE: u32 = 1;
const TYPE_LIST: u32 = 2;
const TYPE_STRING: u32 = 3;
const TYPE_INTEGER: u32 = 4;
const TYPE_FLOAT: u32 = 5;
const TYPE_BOOLEAN: u32 = 6;

/// Ordered string-keyed table of values
pub type ValueTable = BTreeMap<String, Value>;

/// A single untyped value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Table(ValueTable),
    List(Vec<Value>),
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&ValueTable> {
        match self {
            Value::Table(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(value) => Some(value),
            _ => None,
        }
    }
}

pub fn serialize_value_table(table: &ValueTable) -> Result<Vec<u8>, PersistError> {
    let mut writer = BinaryWriter::new(KIND);
    writer.write_tag(VALUE_TABLE_MAGIC);
    writer.write_u32(VALUE_TABLE_VERSION);
    writer.write_tag(TABLE_SECTION);
    write_table(&mut writer, table);
    writer.into_bytes()
}

pub fn deserialize_value_table(bytes: &[u8]) -> Result<ValueTable, PersistError> {
    let mut reader = BinaryReader::new(KIND, bytes);
    reader.expect_magic(VALUE_TABLE_MAGIC)?;
    reader.expect_version(VALUE_TABLE_VERSION)?;
    reader.expect_section(TABLE_SECTION, "TBL")?;
    let table = read_table(&mut reader, 0)?;
    reader.finish()?;
    Ok(table)
}

fn write_table(writer: &mut BinaryWriter, table: &ValueTable) {
    writer.write_len(table.len());
    for (key, value) in table {
        writer.write_string(key);
        write_value(writer, value);
    }
}

fn write_value(writer: &mut BinaryWriter, value: &Value) {
    match value {
        Value::Table(table) => {
            writer.write_u32(TYPE_TABLE);
            write_table(writer, table);
        }
        Value::List(list) => {
            writer.write_u32(TYPE_LIST);
            writer.write_len(list.len());
            for item in list {
                write_value(writer, item);
            }
        }
        Value::String(value) => {
            writer.write_u32(TYPE_STRING);
            writer.write_string(value);
        }
        Value::Integer(value) => {
            writer.write_u32(TYPE_INTEGER);
            writer.write_i64(*value);
        }
        Value::Float(value) => {
            writer.write_u32(TYPE_FLOAT);
            writer.write_f64(*value);
        }
        Value::Boolean(value) => {
            writer.write_u32(TYPE_BOOLEAN);
            writer.write_bool(*value);
        }
    }
}

fn read_table(reader: &mut BinaryReader<'_>, depth: usize) -> Result<ValueTable, PersistError> {
    let count = reader.read_u32()?;
    let mut table = ValueTable::new();
    for _ in 0..count {
        let key = reader.read_string()?;
        if table.contains_key(&key) {
            return Err(PersistError::DuplicateKey {
                kind: reader.kind(),
                key,
            });
        }
        let value = read_value(reader, depth)?;
        table.insert(key, value);
    }
    Ok(table)
}

fn read_value(reader: &mut BinaryReader<'_>, depth: usize) -> Result<Value, PersistError> {
    if depth >= MAX_DEPTH {
        return Err(PersistError::NestingTooDeep {
            kind: reader.kind(),
            limit: MAX_DEPTH,
        });
    }

    let value = match reader.read_u32()? {
        TYPE_TABLE => Value::Table(read_table(reader, depth + 1)?),
        TYPE_LIST => {
            let count = reader.read_u32()?;
            let mut list = Vec::new();
            for _ in 0..count {
                list.push(read_value(reader, depth + 1)?);
            }
            Value::List(list)
        }
        TYPE_STRING => Value::String(reader.read_string()?),
        TYPE_INTEGER => Value::Integer(reader.read_i64()?),
        TYPE_FLOAT => Value::Float(reader.read_f64()?),
        TYPE_BOOLEAN => Value::Boolean(reader.read_bool()?),
        other => {
            return Err(PersistError::InvalidValueType {
                kind: reader.kind(),
                value: other,
            })
        }
    };
    Ok(value)
}
