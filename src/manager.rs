//! Root-level façade
//! -----------------
//! A [`Manager`] owns a root directory and at most one open database, and
//! forwards table and record operations to it. Every forwarding call fails
//! with `DatabaseClosed` when nothing is open.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::database::Database;
use crate::domain::DomainItem;
use crate::error::{FsdbError, Result};
use crate::field::FieldDescriptor;
use crate::record::Record;
use crate::table::Table;
use crate::value::{Value, Values};

pub struct Manager {
    root_path: PathBuf,
    database: Option<Database>,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(root_path: P) -> Manager {
        Manager { root_path: root_path.as_ref().to_path_buf(), database: None }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    fn opened(&self) -> Result<&Database> {
        self.database.as_ref().ok_or(FsdbError::DatabaseClosed)
    }

    // databases

    pub fn is_database(&self, name: &str) -> bool {
        self.root_path.join(name).is_dir()
    }

    pub fn create_database(&self, name: &str) -> Result<()> {
        Database::create(&self.root_path, name)?;
        Ok(())
    }

    /// Open a database, closing any previously open one.
    pub fn open_database(&mut self, name: &str) -> Result<()> {
        if let Some(previous) = self.database.take() {
            previous.close()?;
        }
        self.database = Some(Database::open(&self.root_path, name)?);
        Ok(())
    }

    pub fn close_database(&mut self) -> Result<()> {
        if let Some(database) = self.database.take() {
            database.close()?;
        }
        Ok(())
    }

    pub fn delete_database(&mut self, name: &str) -> Result<()> {
        if !self.is_database(name) {
            return Err(FsdbError::not_found(format!("database \"{}\" does not exist", name)));
        }
        let open_here = self
            .database
            .as_ref()
            .map(|db| db.name().map(|open| open == name).unwrap_or(false))
            .unwrap_or(false);
        if open_here {
            warn!(target: "fsdb::manager", "deleting database \"{}\" opened in manager", name);
            self.close_database()?;
        }
        Database::open(&self.root_path, name)?.delete()
    }

    // tables

    pub fn is_table(&self, name: &str) -> Result<bool> {
        self.opened()?.has_table(name)
    }

    pub fn create_table(&self, name: &str, fields: Vec<FieldDescriptor>) -> Result<Table> {
        Table::create(self.opened()?, name, fields)
    }

    pub fn delete_table(&self, name: &str) -> Result<()> {
        let database = self.opened()?;
        let table = database.table(name)?;
        table.delete()?;
        database.unregister_table(name);
        Ok(())
    }

    // records

    pub fn create_record(&self, table_name: &str, values: Values) -> Result<Record> {
        self.opened()?.table(table_name)?.create_record(values)
    }

    pub fn browse_record(&self, table_name: &str, id: &Value) -> Result<Option<Record>> {
        self.opened()?.table(table_name)?.browse_record(id)
    }

    pub fn browse_records(&self, table_name: &str, ids: &[Value]) -> Result<Vec<Record>> {
        self.opened()?.table(table_name)?.browse_records(ids)
    }

    pub fn search_records(
        &self,
        table_name: &str,
        domain: &[DomainItem],
        order: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        self.opened()?.table(table_name)?.search_records(domain, order, limit)
    }

    /// Write the same values to every record matched by the domain.
    pub fn write_records(
        &self,
        table_name: &str,
        values: &Values,
        domain: &[DomainItem],
    ) -> Result<Vec<Record>> {
        let records = self.search_records(table_name, domain, None, None)?;
        for record in &records {
            record.write(values.clone())?;
        }
        Ok(records)
    }

    /// Delete every record matched by the domain; returns how many went.
    pub fn delete_records(&self, table_name: &str, domain: &[DomainItem]) -> Result<usize> {
        let records = self.search_records(table_name, domain, None, None)?;
        for record in &records {
            record.delete()?;
        }
        Ok(records.len())
    }
}
