//! Tables
//! ------
//! A table is a directory holding a `data.json` schema document and one
//! subdirectory per record. The schema carries the user fields plus the
//! three system fields `id`, `create_datetime` and `modify_datetime`; the
//! id field is always required and unique, its type selectable as `int`
//! (default) or `datetime`. The in-memory `record_ids` list is rebuilt from
//! the directory on load and is the only index the engine keeps.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::database::{Database, DatabaseCore};
use crate::domain::{self, DomainItem, DomainToken};
use crate::error::{FsdbError, Result};
use crate::field::{Field, FieldDescriptor, FieldType, RESERVED_FIELD_NAMES};
use crate::ident::{sanitize_filename, DATA_FNAME};
use crate::record::Record;
use crate::value::{utc_now_micro, Value, Values};

pub(crate) struct TableCore {
    pub(crate) name: String,
    pub(crate) table_path: PathBuf,
    pub(crate) data_path: PathBuf,
    pub(crate) database: Weak<DatabaseCore>,
    pub(crate) fields: RwLock<BTreeMap<String, Field>>,
    pub(crate) record_ids: RwLock<Vec<Value>>,
    pub(crate) deleted: AtomicBool,
}

impl TableCore {
    pub(crate) fn guard(&self) -> Result<Arc<DatabaseCore>> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(FsdbError::ObjectDeleted("table"));
        }
        let db = self.database.upgrade().ok_or(FsdbError::DatabaseClosed)?;
        db.guard()?;
        Ok(db)
    }

    pub(crate) fn field(&self, name: &str) -> Result<Field> {
        self.fields.read().get(name).cloned().ok_or_else(|| {
            FsdbError::generic(format!("table \"{}\" has no field \"{}\"", self.name, name))
        })
    }

    pub(crate) fn fields_snapshot(&self) -> BTreeMap<String, Field> {
        self.fields.read().clone()
    }

    // ids are appended in generation order; generated ids are monotone so
    // the list stays sorted unless a caller injected a custom id
    pub(crate) fn register_record_id(&self, id: Value) {
        let mut ids = self.record_ids.write();
        if !ids.iter().any(|existing| existing == &id) {
            ids.push(id);
        }
    }

    pub(crate) fn unregister_record_id(&self, id: &Value) {
        let mut ids = self.record_ids.write();
        if let Some(pos) = ids.iter().position(|existing| existing == id) {
            ids.remove(pos);
        }
    }
}

/// Schema document shape persisted as the table's `data.json`.
#[derive(Serialize, Deserialize)]
struct TableData {
    name: String,
    fields: Vec<FieldDescriptor>,
}

#[derive(Clone)]
pub struct Table {
    core: Arc<TableCore>,
}

impl Table {
    pub(crate) fn core(&self) -> &TableCore {
        &self.core
    }

    fn new_core(database: &Arc<DatabaseCore>, name: &str) -> Arc<TableCore> {
        let name = sanitize_filename(name);
        let table_path = database.db_path.join(&name);
        Arc::new(TableCore {
            data_path: table_path.join(DATA_FNAME),
            table_path,
            name,
            database: Arc::downgrade(database),
            fields: RwLock::new(BTreeMap::new()),
            record_ids: RwLock::new(Vec::new()),
            deleted: AtomicBool::new(false),
        })
    }

    /// Create a table under the database and register it. The name must
    /// survive sanitization unchanged and the directory must not exist yet.
    /// A user-supplied `id` field only selects the id type; any other
    /// reserved field name is rejected. The three system fields are
    /// appended automatically.
    pub fn create(database: &Database, name: &str, fields: Vec<FieldDescriptor>) -> Result<Table> {
        let db = database.core();
        db.guard()?;
        info!(target: "fsdb::table", "create table \"{}\"", name);

        if sanitize_filename(name) != name {
            return Err(FsdbError::generic(format!("\"{}\" is not a valid table name", name)));
        }
        if db.db_path.join(name).exists() {
            return Err(FsdbError::generic(format!("table \"{}\" already exists", name)));
        }

        let mut id_type = FieldType::Int;
        let mut descriptors = Vec::with_capacity(fields.len() + 3);
        for desc in fields {
            let field_name = desc.name.trim().to_lowercase();
            if field_name == "id" {
                match desc.field_type {
                    FieldType::Int | FieldType::Datetime => id_type = desc.field_type,
                    other => {
                        return Err(FsdbError::generic(format!(
                            "\"id\" field can't be of type \"{}\"",
                            other
                        )));
                    }
                }
                continue;
            }
            if RESERVED_FIELD_NAMES.contains(&field_name.as_str()) {
                return Err(FsdbError::generic(format!(
                    "field name \"{}\" is a reserved name",
                    field_name
                )));
            }
            descriptors.push(desc);
        }
        descriptors.push(FieldDescriptor::new("id", id_type).required().unique());
        descriptors.push(FieldDescriptor::new("create_datetime", FieldType::Datetime));
        descriptors.push(FieldDescriptor::new("modify_datetime", FieldType::Datetime));

        let table = Table { core: Table::new_core(db, name) };
        {
            let mut field_map = BTreeMap::new();
            for desc in &descriptors {
                let field = Field::from_descriptor(table.core.database.clone(), desc)?;
                field_map.insert(field.name().to_string(), field);
            }
            *table.core.fields.write() = field_map;
        }
        table.validate()?;

        fs::create_dir_all(&table.core.table_path)?;
        table.save_data()?;
        table.load_record_ids()?;

        db.tables.write().insert(table.core.name.clone(), table.clone());
        Ok(table)
    }

    /// Open an existing table directory: parse the schema and rebuild the
    /// record id list.
    pub(crate) fn open(database: &Database, name: &str) -> Result<Table> {
        let table = Table { core: Table::new_core(database.core(), name) };
        table.load_data()?;
        table.load_record_ids()?;
        Ok(table)
    }

    pub fn name(&self) -> Result<String> {
        self.core.guard()?;
        Ok(self.core.name.clone())
    }

    pub fn fields(&self) -> Result<BTreeMap<String, Field>> {
        self.core.guard()?;
        Ok(self.core.fields_snapshot())
    }

    pub fn record_ids(&self) -> Result<Vec<Value>> {
        self.core.guard()?;
        Ok(self.core.record_ids.read().clone())
    }

    /// Persist the schema document (sorted keys, 2-space indent).
    pub fn save_data(&self) -> Result<()> {
        self.core.guard()?;
        self.validate()?;
        let data = TableData {
            name: self.core.name.clone(),
            fields: self.core.fields_snapshot().values().map(Field::to_descriptor).collect(),
        };
        // round-trip through a Value so the document keys come out sorted
        fs::write(&self.core.data_path, serde_json::to_string_pretty(&serde_json::to_value(&data)?)?)?;
        Ok(())
    }

    /// Reload the schema document and rebuild the field map.
    pub fn load_data(&self) -> Result<()> {
        self.core.guard()?;
        let raw = fs::read_to_string(&self.core.data_path)?;
        let data: TableData = serde_json::from_str(&raw)?;
        let mut field_map = BTreeMap::new();
        for desc in &data.fields {
            let field = Field::from_descriptor(self.core.database.clone(), desc)?;
            field_map.insert(field.name().to_string(), field);
        }
        *self.core.fields.write() = field_map;
        self.validate()
    }

    /// The system fields must be present and `id_str` must not be declared.
    pub fn validate(&self) -> Result<()> {
        self.core.guard()?;
        let fields = self.core.fields.read();
        for required in ["id", "create_datetime", "modify_datetime"] {
            if !fields.contains_key(required) {
                return Err(FsdbError::generic(format!(
                    "table \"{}\" is missing \"{}\" field",
                    self.core.name, required
                )));
            }
        }
        if fields.contains_key("id_str") {
            return Err(FsdbError::generic(format!(
                "table \"{}\" declares reserved field \"id_str\"",
                self.core.name
            )));
        }
        Ok(())
    }

    /// Scan the table directory and rebuild `record_ids`. A child directory
    /// without a valid `data.json` is an orphan of an interrupted write and
    /// is removed.
    pub fn load_record_ids(&self) -> Result<Vec<Value>> {
        self.core.guard()?;
        let id_field = self.core.field("id")?;
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.core.table_path)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if !path.join(DATA_FNAME).is_file() {
                warn!(target: "fsdb::table", "removing orphaned record directory \"{}\"", path.display());
                fs::remove_dir_all(&path)?;
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            ids.push(id_field.str2val(&name)?);
        }
        ids.sort_by(Value::sort_cmp);
        *self.core.record_ids.write() = ids.clone();
        Ok(ids)
    }

    /// Next id for a created record: `max + 1` for integer ids, the current
    /// UTC instant for datetime ids.
    pub fn get_new_id(&self) -> Result<Value> {
        self.core.guard()?;
        let id_field = self.core.field("id")?;
        match id_field.field_type() {
            FieldType::Int => {
                let last = self
                    .core
                    .record_ids
                    .read()
                    .iter()
                    .filter_map(Value::as_i64)
                    .max()
                    .unwrap_or(0);
                Ok(Value::Int(last + 1))
            }
            FieldType::Datetime => Ok(Value::Datetime(utc_now_micro())),
            other => Err(FsdbError::generic(format!(
                "unable to generate a new id of type \"{}\" for table \"{}\"",
                other, self.core.name
            ))),
        }
    }

    pub fn id2str(&self, id: &Value) -> Result<String> {
        self.core.guard()?;
        self.core.field("id")?.val2str(id)
    }

    pub fn ids2str(&self, ids: &[Value]) -> Result<Vec<String>> {
        ids.iter().map(|id| self.id2str(id)).collect()
    }

    pub fn str2id(&self, id_str: &str) -> Result<Value> {
        self.core.guard()?;
        self.core.field("id")?.str2val(id_str)
    }

    pub fn str2ids(&self, id_strs: &[&str]) -> Result<Vec<Value>> {
        id_strs.iter().map(|id_str| self.str2id(id_str)).collect()
    }

    /// Handle for a single id, `None` when the id is not registered.
    pub fn browse_record(&self, id: &Value) -> Result<Option<Record>> {
        self.core.guard()?;
        if !self.core.record_ids.read().iter().any(|existing| existing == id) {
            return Ok(None);
        }
        Ok(Some(Record::new(self, id.clone())?))
    }

    /// Handles for a list of ids; unknown ids are silently skipped.
    pub fn browse_records(&self, ids: &[Value]) -> Result<Vec<Record>> {
        self.core.guard()?;
        let known = self.core.record_ids.read().clone();
        let mut records = Vec::new();
        for id in ids {
            if known.iter().any(|existing| existing == id) {
                records.push(Record::new(self, id.clone())?);
            }
        }
        Ok(records)
    }

    /// Create a record in this table.
    pub fn create_record(&self, values: Values) -> Result<Record> {
        Record::create(self, values)
    }

    /// Filter records with a search domain, optionally ordering and bounding
    /// the result. An empty domain selects every record; `limit` (when
    /// positive) bounds the result after filtering.
    pub fn search_records(
        &self,
        search_domain: &[DomainItem],
        order: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        self.core.guard()?;
        let limit = limit.filter(|bound| *bound > 0);
        let ids = self.core.record_ids.read().clone();

        let mut records = Vec::new();
        if search_domain.is_empty() {
            let slice = match limit {
                Some(bound) => &ids[..bound.min(ids.len())],
                None => &ids[..],
            };
            for id in slice {
                records.push(Record::new(self, id.clone())?);
            }
        } else {
            domain::validate_domain(search_domain, &self.core.fields_snapshot())?;
            if search_domain.iter().any(|item| matches!(item, DomainItem::Filter(f) if f.field != "id")) {
                warn!(target: "fsdb::table", "search domain on non-id fields reads every record of table \"{}\"", self.core.name);
            }

            for id in &ids {
                let record = Record::new(self, id.clone())?;

                let mut processed = Vec::with_capacity(search_domain.len());
                for item in search_domain {
                    match item {
                        DomainItem::Op(op) => processed.push(DomainToken::Op(*op)),
                        DomainItem::Filter(filter) => {
                            // the id is answered from the id itself, other
                            // fields require a record read
                            let field_value = if filter.field == "id" {
                                id.clone()
                            } else {
                                record
                                    .read(Some(&[filter.field.as_str()]))?
                                    .remove(&filter.field)
                                    .unwrap_or(Value::Null)
                            };
                            processed
                                .push(DomainToken::Bool(domain::filter_matches(filter, &field_value)?));
                        }
                    }
                }

                if domain::evaluate_domain(&processed)? {
                    records.push(record);
                    if limit.map(|bound| records.len() >= bound).unwrap_or(false) {
                        break;
                    }
                }
            }
        }

        if let Some(order) = order {
            let keys = domain::validate_order(order)?;
            let fields = self.core.fields_snapshot();
            for key in &keys {
                if !fields.contains_key(&key.field) {
                    return Err(FsdbError::order(format!("invalid field name \"{}\"", key.field)));
                }
            }
            // stable-sort by keys in reverse specification order so the
            // leftmost clause ends up as the primary key
            for key in keys.iter().rev() {
                let mut decorated = Vec::with_capacity(records.len());
                for record in records {
                    let value = record
                        .read(Some(&[key.field.as_str()]))?
                        .remove(&key.field)
                        .unwrap_or(Value::Null);
                    decorated.push((value, record));
                }
                if key.descending {
                    decorated.sort_by(|a, b| b.0.sort_cmp(&a.0));
                } else {
                    decorated.sort_by(|a, b| a.0.sort_cmp(&b.0));
                }
                records = decorated.into_iter().map(|(_, record)| record).collect();
            }
        }

        Ok(records)
    }

    /// Delete the table: clear the shared cache, remove the directory tree
    /// and poison the handle. The database registry entry is the owner's
    /// concern.
    pub fn delete(&self) -> Result<()> {
        let db = self.core.guard()?;
        info!(target: "fsdb::table", "delete table \"{}\"", self.core.name);
        db.cache.clear();
        if self.core.table_path.exists() {
            fs::remove_dir_all(&self.core.table_path)?;
        }
        self.core.deleted.store(true, Ordering::Release);
        Ok(())
    }
}
