//! xlread core library for decoding EEG recording files.
//!
//! A recording is a family of binary files (study info, delta-coded sample
//! stream, table of contents, event log, sync map, segment table, video index).
//! Each file is decoded by walking a declarative JSON template over an
//! in-memory byte buffer: a generic header stage selects the body template
//! through its `file_schema` discriminant, then the body stage reads the rest.
//! The sample stream is decoded by the packet codec, attached to the schema
//! engine as a special field.
//!
//! Layers, leaf-first:
//! - `cursor`: monotonic read cursor over an immutable byte buffer
//! - `tree`: parser for the parenthesized key/value text embedded in files
//! - `expr`: closed expression evaluator for counts and conversion tables
//! - `schema`: template model, template stores and the two-stage engine
//! - `codec`: delta/absolute packet stream decoding
//! - `files`: per-file-kind wiring and index cross-validation
//!
//! Invariants:
//! - The read cursor never moves backwards and never passes the buffer end.
//! - Checkpoints and requirements are enforced at the point they are declared.
//! - Per-channel decode state belongs to exactly one decode call.
//!
//! Version française (résumé):
//! Cette crate décode les fichiers d'enregistrement EEG à partir de gabarits
//! JSON : en-tête générique, puis corps choisi par `file_schema`. Le flux
//! d'échantillons (deltas/absolus, sous-échantillonnage) est décodé par le
//! `codec`. Aucune E/S hors de `schema::store` et `files`.
//!
//! # Examples
//! ```no_run
//! use std::path::Path;
//!
//! use xlread_core::{FileKind, decode_path};
//!
//! let decoded = decode_path(FileKind::Erd, Path::new("study.erd"), Path::new("data_templates"))?;
//! if let Some(packets) = &decoded.packets {
//!     println!("packets: {}", packets.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

pub mod codec;
pub mod conversion;
pub mod cursor;
mod error;
pub mod expr;
pub mod files;
mod filetime;
mod report;
pub mod schema;
pub mod tree;

pub use codec::{ChannelLayout, Packet, PacketStream};
pub use conversion::ConversionTable;
pub use cursor::{ByteCursor, CursorError};
pub use error::{DecodeError, FileError};
pub use files::{
    ChannelInfo, DecodeOptions, DecodedFile, FileKind, PacketStreamField, UnknownFileKind,
    decode_bytes, decode_path, validate_toc,
};
pub use filetime::{FILETIME_UNIX_EPOCH, filetime_to_rfc3339};
pub use report::{
    DecodeReport, InputInfo, PacketSummary, REPORT_VERSION, TimeRange, ToolInfo, build_report,
};
pub use schema::{
    DirTemplateStore, MemoryTemplateStore, SchemaEngine, SpecialContext, SpecialFieldHandler,
    SpecialFields, Template, TemplateStore,
};

/// Field name to value, in read order.
pub type ValueMap = IndexMap<String, Value>;

/// A decoded scalar, sequence or nested mapping.
///
/// Numbers keep the signedness they were read with; comparisons across
/// numeric variants go through [`Value::loosely_eq`].
///
/// # Examples
/// ```
/// use xlread_core::Value;
///
/// let value = Value::Int(2);
/// assert!(value.loosely_eq(&Value::Float(2.0)));
/// assert_eq!(value.as_i64(), Some(2));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    /// Wrap an unsigned read, preferring `Int` when it fits.
    pub fn from_u64(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(value) => Value::Int(value),
            Err(_) => Value::UInt(value),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::UInt(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::UInt(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key in a mapping value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Short variant name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Python-style truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::UInt(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::Text(text) => !text.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    /// Equality that treats `1`, `1u64`, `1.0` and `true` as equal.
    pub fn loosely_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .all(|(key, va)| b.get(key).is_some_and(|vb| va.loosely_eq(vb)))
            }
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
                u64::try_from(*a).is_ok_and(|a| a == *b)
            }
            _ => match (self.numeric(), other.numeric()) {
                (Some(a), Some(b)) => a == b,
                _ => self == other,
            },
        }
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            Value::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            other => other.as_f64(),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(flag) => Value::Bool(*flag),
            serde_json::Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Value::Int(int)
                } else if let Some(uint) = number.as_u64() {
                    Value::UInt(uint)
                } else {
                    Value::Float(number.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(text) => Value::Text(text.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(key, value)| (key.clone(), Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str(self.type_name()),
        }
    }
}

/// Nested decode result: section or block name to value.
///
/// Entries keep the order they were decoded in. Sections are `Value::Map`s of field values; Repeat blocks are maps of
/// per-field sequences; bare top-level fields sit directly under their name.
///
/// # Examples
/// ```
/// use xlread_core::{Record, Value, ValueMap};
///
/// let mut record = Record::new();
/// let mut header = ValueMap::new();
/// header.insert("file_schema".to_string(), Value::Int(8));
/// record.insert("generic_file_header", Value::Map(header));
/// assert_eq!(
///     record.field("generic_file_header", "file_schema"),
///     Some(&Value::Int(8))
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    entries: ValueMap,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.entries.get_mut(name)
    }

    /// Field `field` of section (or Repeat block) `section`.
    pub fn field(&self, section: &str, field: &str) -> Option<&Value> {
        self.get(section).and_then(|value| value.get(field))
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(name.into(), value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
