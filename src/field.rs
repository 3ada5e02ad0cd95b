//! Typed field system
//! ------------------
//! Every record of a table shares the table's field set. A [`Field`] knows
//! how to move one named value between its user-visible [`Value`] form and
//! the persisted shape: scalars live inside the record's `data.json`, a
//! `file` field keeps its bytes in a sibling file whose name is recorded in
//! the document, and a `file_list` field owns a subdirectory of attachments
//! (its document key stays `null`).

use std::fmt;
use std::fs;
use std::sync::Weak;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::database::DatabaseCore;
use crate::error::{FsdbError, Result};
use crate::ident::{sanitize_filename, DATA_FNAME};
use crate::record::Record;
use crate::value::{FileValue, Value};

/// Wire format for datetime values. Doubles as a record directory name when
/// a table uses a datetime id, so it must never contain path-illegal
/// characters.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.6f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Bool,
    Str,
    Int,
    Float,
    List,
    Tuple,
    Dict,
    Datetime,
    File,
    FileList,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Str => "str",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::List => "list",
            FieldType::Tuple => "tuple",
            FieldType::Dict => "dict",
            FieldType::Datetime => "datetime",
            FieldType::File => "file",
            FieldType::FileList => "file_list",
        }
    }

    pub fn parse(token: &str) -> Option<FieldType> {
        match token.trim().to_lowercase().as_str() {
            "bool" => Some(FieldType::Bool),
            "str" => Some(FieldType::Str),
            "int" => Some(FieldType::Int),
            "float" => Some(FieldType::Float),
            "list" => Some(FieldType::List),
            "tuple" => Some(FieldType::Tuple),
            "dict" => Some(FieldType::Dict),
            "datetime" => Some(FieldType::Datetime),
            "file" => Some(FieldType::File),
            "file_list" => Some(FieldType::FileList),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted shape of one field in a table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
}

impl FieldDescriptor {
    pub fn new<S: Into<String>>(name: S, field_type: FieldType) -> Self {
        FieldDescriptor { name: name.into(), field_type, default: None, required: false, unique: false }
    }

    pub fn with_default(mut self, default: JsonValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A typed, named attribute of every record in a table.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    field_type: FieldType,
    default: Option<JsonValue>,
    required: bool,
    unique: bool,
    database: Weak<DatabaseCore>,
}

impl Field {
    pub(crate) fn from_descriptor(database: Weak<DatabaseCore>, desc: &FieldDescriptor) -> Result<Field> {
        let field = Field {
            name: desc.name.trim().to_lowercase(),
            field_type: desc.field_type,
            default: desc.default.clone(),
            required: desc.required,
            unique: desc.unique,
            database,
        };
        field.validate()?;
        Ok(field)
    }

    pub fn to_descriptor(&self) -> FieldDescriptor {
        FieldDescriptor {
            name: self.name.clone(),
            field_type: self.field_type,
            default: self.default.clone(),
            required: self.required,
            unique: self.unique,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(FsdbError::generic("field name can't be empty"));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    // Fields only hold a read-only back-reference to their database; the
    // guard consults its lifecycle flags before any operation.
    fn guard(&self) -> Result<()> {
        let db = self.database.upgrade().ok_or(FsdbError::DatabaseClosed)?;
        if db.deleted.load(std::sync::atomic::Ordering::Acquire) {
            return Err(FsdbError::ObjectDeleted("database"));
        }
        if db.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(FsdbError::DatabaseClosed);
        }
        Ok(())
    }

    /// Default for an unset field: the descriptor default decoded per the
    /// field type, `Null` when none is declared.
    pub fn default_value(&self) -> Result<Value> {
        match (&self.default, self.field_type) {
            (None, _) | (_, FieldType::File) | (_, FieldType::FileList) => Ok(Value::Null),
            (Some(raw), _) if raw.is_null() => Ok(Value::Null),
            (Some(raw), _) => self.decode_json(raw),
        }
    }

    pub(crate) fn default_json(&self) -> JsonValue {
        self.default.clone().unwrap_or(JsonValue::Null)
    }

    /// Produce the user-visible value from the persisted document (and, for
    /// file kinds, the record directory).
    pub fn read(&self, record: &Record, data_values: &JsonMap<String, JsonValue>) -> Result<Value> {
        self.guard()?;
        match self.field_type {
            FieldType::File => {
                let filename = match data_values.get(&self.name).and_then(JsonValue::as_str) {
                    Some(filename) => filename,
                    None => return Ok(Value::Null),
                };
                let path = record.record_path().join(filename);
                if !path.is_file() {
                    return Ok(Value::Null);
                }
                Ok(Value::File(FileValue { name: filename.to_string(), data: None, path: Some(path) }))
            }
            FieldType::FileList => {
                let dir = record.record_path().join(&self.name);
                if !dir.is_dir() {
                    return Ok(Value::FileList(Vec::new()));
                }
                let mut files = Vec::new();
                for entry in fs::read_dir(&dir)? {
                    let entry = entry?;
                    let path = entry.path();
                    if !path.is_file() {
                        continue;
                    }
                    let name = entry.file_name().to_string_lossy().into_owned();
                    files.push(FileValue { name, data: None, path: Some(path) });
                }
                files.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(Value::FileList(files))
            }
            _ => match data_values.get(&self.name) {
                None | Some(JsonValue::Null) => Ok(Value::Null),
                Some(raw) => self.decode_json(raw),
            },
        }
    }

    /// Write a new value: scalars are encoded into the document, file kinds
    /// also touch the record directory.
    pub fn write(
        &self,
        record: &Record,
        value: &Value,
        data_values: &mut JsonMap<String, JsonValue>,
    ) -> Result<()> {
        self.guard()?;
        match self.field_type {
            FieldType::File => self.write_file(record, value, data_values),
            FieldType::FileList => self.write_file_list(record, value, data_values),
            _ => {
                let encoded = self.encode_json(value)?;
                data_values.insert(self.name.clone(), encoded);
                Ok(())
            }
        }
    }

    fn write_file(
        &self,
        record: &Record,
        value: &Value,
        data_values: &mut JsonMap<String, JsonValue>,
    ) -> Result<()> {
        // remove the prior attachment first; a null write ends here
        if let Some(old_name) = data_values.get(&self.name).and_then(JsonValue::as_str) {
            let old_path = record.record_path().join(old_name);
            if old_path.is_file() {
                fs::remove_file(&old_path)?;
            }
        }

        let file = match value {
            Value::Null => {
                data_values.insert(self.name.clone(), JsonValue::Null);
                return Ok(());
            }
            Value::File(file) => file,
            _ => {
                return Err(FsdbError::generic(format!(
                    "invalid value for file field \"{}\"",
                    self.name
                )));
            }
        };
        let data = file.data.as_ref().ok_or_else(|| {
            FsdbError::generic(format!("file value for field \"{}\" carries no data", self.name))
        })?;
        if file.name.is_empty() {
            return Err(FsdbError::generic(format!("file value for field \"{}\" has no name", self.name)));
        }
        if file.name != sanitize_filename(&file.name) {
            return Err(FsdbError::generic(format!(
                "filename \"{}\" is not equal to its sanitized form",
                file.name
            )));
        }

        let fields = record.table_fields()?;
        if file.name == DATA_FNAME || fields.contains_key(file.name.as_str()) {
            return Err(FsdbError::generic(format!("filename \"{}\" is a reserved name", file.name)));
        }
        for (other_name, other) in &fields {
            if other_name == &self.name || other.field_type != FieldType::File {
                continue;
            }
            if data_values.get(other_name).and_then(JsonValue::as_str) == Some(file.name.as_str()) {
                return Err(FsdbError::generic(format!(
                    "filename \"{}\" is in conflict with the value of field \"{}\"",
                    file.name, other_name
                )));
            }
        }

        fs::write(record.record_path().join(&file.name), data)?;
        data_values.insert(self.name.clone(), JsonValue::String(file.name.clone()));
        Ok(())
    }

    fn write_file_list(
        &self,
        record: &Record,
        value: &Value,
        data_values: &mut JsonMap<String, JsonValue>,
    ) -> Result<()> {
        let files: &[FileValue] = match value {
            Value::Null => &[],
            Value::FileList(files) => files,
            _ => {
                return Err(FsdbError::generic(format!(
                    "invalid value for file_list field \"{}\"",
                    self.name
                )));
            }
        };

        // validate the whole batch before touching the directory
        let mut batch: Vec<(&str, &[u8])> = Vec::with_capacity(files.len());
        for file in files {
            let data = file.data.as_ref().ok_or_else(|| {
                FsdbError::generic(format!(
                    "file value for field \"{}\" carries no data",
                    self.name
                ))
            })?;
            if file.name.is_empty() {
                return Err(FsdbError::generic(format!(
                    "file value for field \"{}\" has no name",
                    self.name
                )));
            }
            if file.name != sanitize_filename(&file.name) {
                return Err(FsdbError::generic(format!(
                    "filename \"{}\" is not equal to its sanitized form",
                    file.name
                )));
            }
            if batch.iter().any(|(name, _)| *name == file.name) {
                return Err(FsdbError::generic(format!(
                    "conflicting filename \"{}\" in file_list field \"{}\"",
                    file.name, self.name
                )));
            }
            batch.push((file.name.as_str(), data.as_slice()));
        }

        let dir = record.record_path().join(&self.name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        for (name, data) in batch {
            fs::write(dir.join(name), data)?;
        }

        // the document key of a file_list field always stays null
        data_values.insert(self.name.clone(), JsonValue::Null);
        Ok(())
    }

    /// Schema-directed decoding of a document value.
    fn decode_json(&self, raw: &JsonValue) -> Result<Value> {
        let decoded = match self.field_type {
            FieldType::Bool => raw.as_bool().map(Value::Bool),
            FieldType::Str => raw.as_str().map(|s| Value::Str(s.to_string())),
            FieldType::Int => raw.as_i64().map(Value::Int),
            FieldType::Float => raw.as_f64().map(Value::Float),
            FieldType::List => raw.as_array().map(|items| Value::List(items.iter().map(Value::from_json).collect())),
            FieldType::Tuple => raw.as_array().map(|items| Value::Tuple(items.iter().map(Value::from_json).collect())),
            FieldType::Dict => raw.as_object().map(|map| {
                Value::Dict(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
            }),
            FieldType::Datetime => raw
                .as_str()
                .and_then(|s| NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok())
                .map(Value::Datetime),
            FieldType::File | FieldType::FileList => None,
        };
        decoded.ok_or_else(|| {
            FsdbError::generic(format!(
                "field \"{}\" holds a malformed value for type \"{}\": {}",
                self.name, self.field_type, raw
            ))
        })
    }

    /// Typed encoding into the document. `Null` is legal for every kind;
    /// integers widen into float fields; tuples and lists are
    /// interchangeable on write.
    fn encode_json(&self, value: &Value) -> Result<JsonValue> {
        let encoded = match (self.field_type, value) {
            (_, Value::Null) => Some(JsonValue::Null),
            (FieldType::Bool, Value::Bool(b)) => Some(JsonValue::Bool(*b)),
            (FieldType::Str, Value::Str(s)) => Some(JsonValue::String(s.clone())),
            (FieldType::Int, Value::Int(i)) => Some(JsonValue::from(*i)),
            (FieldType::Float, Value::Float(f)) => Some(JsonValue::from(*f)),
            (FieldType::Float, Value::Int(i)) => Some(JsonValue::from(*i as f64)),
            (FieldType::List | FieldType::Tuple, Value::List(_) | Value::Tuple(_)) => {
                Some(value.to_json()?)
            }
            (FieldType::Dict, Value::Dict(_)) => Some(value.to_json()?),
            (FieldType::Datetime, Value::Datetime(dt)) => {
                Some(JsonValue::String(dt.format(DATETIME_FORMAT).to_string()))
            }
            _ => None,
        };
        encoded.ok_or_else(|| {
            FsdbError::generic(format!(
                "unsupported value for {} field \"{}\"",
                self.field_type, self.name
            ))
        })
    }

    /// Serialize a value into its string form. Only types whose string form
    /// is a legal directory name support this.
    pub fn val2str(&self, value: &Value) -> Result<String> {
        self.guard()?;
        match (self.field_type, value) {
            (FieldType::Str, Value::Str(s)) => Ok(s.clone()),
            (FieldType::Int, Value::Int(i)) => Ok(i.to_string()),
            (FieldType::Float, Value::Float(f)) => Ok(f.to_string()),
            (FieldType::Datetime, Value::Datetime(dt)) => Ok(dt.format(DATETIME_FORMAT).to_string()),
            _ => Err(FsdbError::generic(format!(
                "unsupported val2str for type \"{}\" of field \"{}\"",
                self.field_type, self.name
            ))),
        }
    }

    /// Parse a value back from its string form.
    pub fn str2val(&self, raw: &str) -> Result<Value> {
        self.guard()?;
        match self.field_type {
            FieldType::Str => Ok(Value::Str(raw.to_string())),
            FieldType::Int => raw
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| FsdbError::generic(format!("can't parse \"{}\" as int", raw))),
            FieldType::Float => raw
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| FsdbError::generic(format!("can't parse \"{}\" as float", raw))),
            FieldType::Datetime => NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
                .map(Value::Datetime)
                .map_err(|_| FsdbError::generic(format!("can't parse \"{}\" as datetime", raw))),
            _ => Err(FsdbError::generic(format!(
                "unsupported str2val for type \"{}\" of field \"{}\"",
                self.field_type, self.name
            ))),
        }
    }
}

/// Field names that can never be declared by a user schema. `id` is special
/// cased: declaring it only chooses the id type.
pub(crate) const RESERVED_FIELD_NAMES: [&str; 5] =
    [DATA_FNAME, "id", "id_str", "create_datetime", "modify_datetime"];
