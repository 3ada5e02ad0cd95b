//! Record handles
//! --------------
//! A record is a directory named by the string form of its id, holding the
//! `data.json` document with every scalar field plus any binary
//! attachments. Handles carry a back-reference to their table for schema
//! and cache lookup; a deleted handle fails on any further access.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{info, warn};

use crate::database::DatabaseCore;
use crate::error::{FsdbError, Result};
use crate::field::Field;
use crate::ident::DATA_FNAME;
use crate::table::Table;
use crate::value::{utc_now_micro, Value, Values};

pub struct Record {
    table: Table,
    id: Value,
    id_str: String,
    record_path: PathBuf,
    data_path: PathBuf,
    cache_key: String,
    deleted: AtomicBool,
}

impl Record {
    /// Build a handle for an id of the given table. Fails when the id can't
    /// be rendered as a directory name or the owning chain is gone.
    pub(crate) fn new(table: &Table, id: Value) -> Result<Record> {
        let id_str = table.core().field("id")?.val2str(&id)?;
        let record_path = table.core().table_path.join(&id_str);
        let data_path = record_path.join(DATA_FNAME);
        let cache_key = format!("{}-{}", table.core().name, id_str);
        Ok(Record {
            table: table.clone(),
            id,
            id_str,
            record_path,
            data_path,
            cache_key,
            deleted: AtomicBool::new(false),
        })
    }

    fn guard(&self) -> Result<Arc<DatabaseCore>> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(FsdbError::ObjectDeleted("record"));
        }
        self.table.core().guard()
    }

    pub fn id(&self) -> Result<Value> {
        self.guard()?;
        Ok(self.id.clone())
    }

    pub fn id_str(&self) -> Result<String> {
        self.guard()?;
        Ok(self.id_str.clone())
    }

    pub fn cache_key(&self) -> Result<String> {
        self.guard()?;
        Ok(self.cache_key.clone())
    }

    pub(crate) fn record_path(&self) -> &Path {
        &self.record_path
    }

    pub(crate) fn table_fields(&self) -> Result<BTreeMap<String, Field>> {
        Ok(self.table.core().fields_snapshot())
    }

    /// Create a record. A supplied non-null `id` is honored (and must be
    /// unique); otherwise the table generates one. `create_datetime` and
    /// `modify_datetime` are stamped with the current UTC instant, declared
    /// fields missing from `values` take their defaults, and unknown keys
    /// are dropped with a warning.
    pub fn create(table: &Table, mut values: Values) -> Result<Record> {
        table.core().guard()?;
        info!(target: "fsdb::record", "create record in table \"{}\"", table.core().name);

        let fields = table.core().fields_snapshot();

        let id = match values.get("id") {
            Some(id) if !id.is_null() => id.clone(),
            _ => table.get_new_id()?,
        };
        values.insert("id".to_string(), id.clone());

        let now = utc_now_micro();
        values.insert("create_datetime".to_string(), Value::Datetime(now));
        values.insert("modify_datetime".to_string(), Value::Datetime(now));

        for (name, field) in &fields {
            if !values.contains_key(name) {
                values.insert(name.clone(), field.default_value()?);
            }
        }
        values.retain(|name, _| {
            let known = fields.contains_key(name);
            if !known {
                warn!(target: "fsdb::record", "dropping unknown field \"{}\" on create in table \"{}\"", name, table.core().name);
            }
            known
        });

        let record = Record::new(table, id.clone())?;
        if record.record_path.exists() {
            return Err(FsdbError::generic(format!(
                "record id \"{}\" already exists in table \"{}\"",
                record.id_str,
                table.core().name
            )));
        }
        fs::create_dir_all(&record.record_path)?;

        let mut data_values = JsonMap::new();
        for (name, field) in &fields {
            let value = values.get(name).cloned().unwrap_or(Value::Null);
            field.write(&record, &value, &mut data_values)?;
        }
        record.save_data_values(&fields, data_values)?;

        table.core().register_record_id(id);
        Ok(record)
    }

    /// Update field values. The id is immutable; unknown keys are dropped
    /// with a warning. The cache entry is invalidated before the document
    /// is touched, and `modify_datetime` is refreshed.
    pub fn write(&self, mut values: Values) -> Result<()> {
        let db = self.guard()?;
        info!(target: "fsdb::record", "update record \"{}\" in table \"{}\"", self.id_str, self.table.core().name);

        if values.contains_key("id") || values.contains_key("id_str") {
            return Err(FsdbError::generic("changing record id is not allowed"));
        }

        let fields = self.table_fields()?;
        values.retain(|name, _| {
            let known = fields.contains_key(name);
            if !known {
                warn!(target: "fsdb::record", "write to unknown field \"{}\" in table \"{}\"", name, self.table.core().name);
            }
            known
        });

        db.cache.del_cache(&self.cache_key);

        values.insert("modify_datetime".to_string(), Value::Datetime(utc_now_micro()));

        let mut data_values = self.load_data_values()?;
        // merge defaults for fields added to the schema since the last
        // write, and prune keys that are no longer declared
        for (name, field) in &fields {
            if !data_values.contains_key(name) {
                data_values.insert(name.clone(), field.default_json());
            }
        }
        let stale: Vec<String> =
            data_values.keys().filter(|key| !fields.contains_key(*key)).cloned().collect();
        for key in stale {
            warn!(target: "fsdb::record", "pruning stale key \"{}\" from record \"{}\"", key, self.id_str);
            data_values.remove(&key);
        }

        for (name, value) in &values {
            if let Some(field) = fields.get(name) {
                field.write(self, value, &mut data_values)?;
            }
        }
        self.save_data_values(&fields, data_values)
    }

    /// Read field values, all of them when `field_names` is `None`.
    /// Unknown names are dropped with a warning. Reads are answered from
    /// the database cache when possible; a disk read repopulates the cache
    /// with the full field map.
    pub fn read(&self, field_names: Option<&[&str]>) -> Result<Values> {
        let db = self.guard()?;

        let fields = self.table_fields()?;
        let requested: Vec<String> = match field_names {
            None => fields.keys().cloned().collect(),
            Some(names) => names
                .iter()
                .filter(|name| {
                    let known = fields.contains_key(**name);
                    if !known {
                        warn!(target: "fsdb::record", "read from unknown field \"{}\" in table \"{}\"", name, self.table.core().name);
                    }
                    known
                })
                .map(|name| name.to_string())
                .collect(),
        };

        let mut values = db.cache.from_cache(&self.cache_key).unwrap_or_default();
        let missing = requested.iter().any(|name| !values.contains_key(name));
        if missing {
            let mut data_values = self.load_data_values()?;
            for (name, field) in &fields {
                if !data_values.contains_key(name) {
                    data_values.insert(name.clone(), field.default_json());
                }
            }
            for (name, field) in &fields {
                if !values.contains_key(name) {
                    values.insert(name.clone(), field.read(self, &data_values)?);
                }
            }
            db.cache.to_cache(&self.cache_key, &values);
        }

        Ok(requested
            .into_iter()
            .map(|name| {
                let value = values.get(&name).cloned().unwrap_or(Value::Null);
                (name, value)
            })
            .collect())
    }

    /// Delete the record: cache entry, table id registration and directory
    /// go, then the handle is poisoned.
    pub fn delete(&self) -> Result<()> {
        let db = self.guard()?;
        info!(target: "fsdb::record", "delete record \"{}\" in table \"{}\"", self.id_str, self.table.core().name);

        db.cache.del_cache(&self.cache_key);
        self.table.core().unregister_record_id(&self.id);
        if self.record_path.exists() {
            fs::remove_dir_all(&self.record_path)?;
        }
        self.deleted.store(true, Ordering::Release);
        Ok(())
    }

    fn load_data_values(&self) -> Result<JsonMap<String, JsonValue>> {
        let raw = fs::read_to_string(&self.data_path)?;
        match serde_json::from_str::<JsonValue>(&raw)? {
            JsonValue::Object(map) => Ok(map),
            _ => Err(FsdbError::generic(format!(
                "record document \"{}\" is not a JSON object",
                self.data_path.display()
            ))),
        }
    }

    // The document always contains exactly the declared field keys, sorted,
    // with 2-space indentation.
    fn save_data_values(
        &self,
        fields: &BTreeMap<String, Field>,
        mut data_values: JsonMap<String, JsonValue>,
    ) -> Result<()> {
        let mut document = JsonMap::new();
        for name in fields.keys() {
            document.insert(name.clone(), data_values.remove(name).unwrap_or(JsonValue::Null));
        }
        fs::write(&self.data_path, serde_json::to_string_pretty(&JsonValue::Object(document))?)?;
        Ok(())
    }
}
