//! Runtime value model
//! -------------------
//! A record is a map from field names to [`Value`]. The enum is a tagged
//! union over the ten field kinds; `data.json` documents are decoded into it
//! per the table schema rather than by inspecting the JSON shape alone.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{NaiveDateTime, Timelike, Utc};
use serde_json::Value as JsonValue;

use crate::error::{FsdbError, Result};
use crate::field::DATETIME_FORMAT;

/// Field map of a single record, keyed by field name.
pub type Values = BTreeMap<String, Value>;

/// A single binary attachment of a `file` or `file_list` field.
///
/// On write, `data` must hold the bytes to persist. On read, `data` is left
/// empty and `path` points at the on-disk file so callers can load the bytes
/// lazily via [`FileValue::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileValue {
    pub name: String,
    pub data: Option<Vec<u8>>,
    pub path: Option<PathBuf>,
}

impl FileValue {
    pub fn new<S: Into<String>, B: Into<Vec<u8>>>(name: S, data: B) -> Self {
        FileValue { name: name.into(), data: Some(data.into()), path: None }
    }

    /// Load the attachment bytes from disk. Prefers the in-memory `data`
    /// when present.
    pub fn load(&self) -> Result<Vec<u8>> {
        if let Some(data) = &self.data {
            return Ok(data.clone());
        }
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| FsdbError::generic(format!("file value \"{}\" has no path to load from", self.name)))?;
        Ok(std::fs::read(path)?)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    Datetime(NaiveDateTime),
    File(FileValue),
    FileList(Vec<FileValue>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Datetime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileValue> {
        match self {
            Value::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_files(&self) -> Option<&[FileValue]> {
        match self {
            Value::FileList(fs) => Some(fs),
            _ => None,
        }
    }

    /// Decode an arbitrary JSON value without schema direction. Numbers that
    /// fit an `i64` become `Int`, all others `Float`.
    pub fn from_json(raw: &JsonValue) -> Value {
        match raw {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => {
                Value::Dict(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
            }
        }
    }

    /// Encode into JSON. Datetimes render through the wire format; file
    /// values are not JSON-representable and error out.
    pub fn to_json(&self) -> Result<JsonValue> {
        Ok(match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => JsonValue::from(*f),
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::List(items) | Value::Tuple(items) => {
                JsonValue::Array(items.iter().map(Value::to_json).collect::<Result<Vec<_>>>()?)
            }
            Value::Dict(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                JsonValue::Object(out)
            }
            Value::Datetime(dt) => JsonValue::String(dt.format(DATETIME_FORMAT).to_string()),
            Value::File(_) | Value::FileList(_) => {
                return Err(FsdbError::generic("file values can't be encoded as JSON"));
            }
        })
    }

    /// Partial comparison used by the search domain. Numeric kinds coerce
    /// against each other; sequences compare lexicographically; values of
    /// unrelated kinds are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Datetime(a), Value::Datetime(b)) => Some(a.cmp(b)),
            (Value::List(a) | Value::Tuple(a), Value::List(b) | Value::Tuple(b)) => {
                compare_sequences(a, b)
            }
            (Value::Dict(a), Value::Dict(b)) => (a == b).then_some(Ordering::Equal),
            (Value::File(a), Value::File(b)) => (a == b).then_some(Ordering::Equal),
            (Value::FileList(a), Value::FileList(b)) => (a == b).then_some(Ordering::Equal),
            _ => None,
        }
    }

    /// Equality with numeric coercion (`1 == 1.0`).
    pub fn equals(&self, other: &Value) -> bool {
        matches!(self.compare(other), Some(Ordering::Equal))
    }

    /// Total order for sorting search results. `Null` sorts before any
    /// non-null value; values of unrelated kinds fall back to a fixed kind
    /// rank so the sort never panics.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        self.compare(other).unwrap_or_else(|| self.kind_rank().cmp(&other.kind_rank()))
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::List(_) => 4,
            Value::Tuple(_) => 5,
            Value::Dict(_) => 6,
            Value::Datetime(_) => 7,
            Value::File(_) => 8,
            Value::FileList(_) => 9,
        }
    }
}

fn compare_sequences(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.compare(y)? {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(a.len().cmp(&b.len()))
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Datetime(v)
    }
}

impl From<FileValue> for Value {
    fn from(v: FileValue) -> Self {
        Value::File(v)
    }
}

/// Current UTC instant truncated to microseconds. The wire format carries
/// six fractional digits, so anything finer would not survive a round-trip
/// through a record directory name.
pub(crate) fn utc_now_micro() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000).unwrap_or(now)
}
