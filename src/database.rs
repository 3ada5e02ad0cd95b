//! Databases
//! ---------
//! A database is a directory under the caller's root holding a `data.json`
//! config document and one subdirectory per table. The database owns the
//! record cache shared by every record below it. Lifecycle is explicit:
//! created or opened handles work until `close` or `delete` poisons them,
//! after which every access fails with the corresponding typed error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::Cache;
use crate::error::{FsdbError, Result};
use crate::ident::{sanitize_filename, DATA_FNAME};
use crate::table::Table;

pub(crate) struct DatabaseCore {
    pub(crate) name: String,
    pub(crate) root_path: PathBuf,
    pub(crate) db_path: PathBuf,
    pub(crate) data_path: PathBuf,
    pub(crate) cache: Cache,
    pub(crate) tables: RwLock<HashMap<String, Table>>,
    pub(crate) closed: AtomicBool,
    pub(crate) deleted: AtomicBool,
}

impl DatabaseCore {
    pub(crate) fn guard(&self) -> Result<()> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(FsdbError::ObjectDeleted("database"));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(FsdbError::DatabaseClosed);
        }
        Ok(())
    }
}

/// Config document shape persisted as the database's `data.json`.
#[derive(Serialize, Deserialize)]
struct DatabaseConfig {
    name: String,
    cache_size: u64,
    cache_size_limit: u64,
}

#[derive(Clone)]
pub struct Database {
    core: Arc<DatabaseCore>,
}

impl Database {
    pub(crate) fn core(&self) -> &Arc<DatabaseCore> {
        &self.core
    }

    fn new_core(root_path: &Path, name: &str) -> Arc<DatabaseCore> {
        let name = sanitize_filename(name);
        let db_path = root_path.join(&name);
        Arc::new(DatabaseCore {
            data_path: db_path.join(DATA_FNAME),
            db_path,
            name,
            root_path: root_path.to_path_buf(),
            cache: Cache::new(),
            tables: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        })
    }

    /// Create a database directory under the root and persist its config.
    /// The name must survive sanitization unchanged and must not exist yet.
    pub fn create<P: AsRef<Path>>(root_path: P, name: &str) -> Result<Database> {
        info!(target: "fsdb::database", "create database \"{}\"", name);
        let root = root_path.as_ref();

        if sanitize_filename(name) != name {
            return Err(FsdbError::generic(format!("\"{}\" is not a valid database name", name)));
        }
        if root.join(name).exists() {
            return Err(FsdbError::generic(format!("database \"{}\" already exists", name)));
        }

        let database = Database { core: Database::new_core(root, name) };
        fs::create_dir_all(&database.core.db_path)?;
        database.save_data()?;
        Ok(database)
    }

    /// Open an existing database: read its config into the cache settings
    /// and instantiate a table for every subdirectory.
    pub fn open<P: AsRef<Path>>(root_path: P, name: &str) -> Result<Database> {
        info!(target: "fsdb::database", "open database \"{}\"", name);
        let root = root_path.as_ref();

        if !root.join(name).exists() {
            return Err(FsdbError::not_found(format!("database \"{}\" does not exist", name)));
        }

        let database = Database { core: Database::new_core(root, name) };
        if database.core.data_path.is_file() {
            database.load_data()?;
        }
        database.load_tables()?;
        Ok(database)
    }

    pub fn name(&self) -> Result<String> {
        self.core.guard()?;
        Ok(self.core.name.clone())
    }

    pub fn path(&self) -> Result<PathBuf> {
        self.core.guard()?;
        Ok(self.core.db_path.clone())
    }

    /// Persist the config document (sorted keys, 2-space indent).
    pub fn save_data(&self) -> Result<()> {
        self.core.guard()?;
        let (cache_size, cache_size_limit) = self.core.cache.get_cache_size();
        let config =
            DatabaseConfig { name: self.core.name.clone(), cache_size, cache_size_limit };
        fs::write(
            &self.core.data_path,
            serde_json::to_string_pretty(&serde_json::to_value(&config)?)?,
        )?;
        Ok(())
    }

    /// Reload the config document and apply the cache sizing.
    pub fn load_data(&self) -> Result<()> {
        self.core.guard()?;
        let raw = fs::read_to_string(&self.core.data_path)?;
        let config: DatabaseConfig = serde_json::from_str(&raw)?;
        if config.cache_size > 0 {
            self.core.cache.set_cache_size(config.cache_size, Some(config.cache_size_limit));
        }
        Ok(())
    }

    /// Rebuild the table registry from the directory. Subdirectories
    /// without a table document are skipped with a warning.
    pub fn load_tables(&self) -> Result<()> {
        self.core.guard()?;
        let mut tables = HashMap::new();
        for entry in fs::read_dir(&self.core.db_path)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !path.join(DATA_FNAME).is_file() {
                warn!(target: "fsdb::database", "skipping directory \"{}\" without a table document", path.display());
                continue;
            }
            tables.insert(name.clone(), Table::open(self, &name)?);
        }
        *self.core.tables.write() = tables;
        Ok(())
    }

    pub fn has_table(&self, name: &str) -> Result<bool> {
        self.core.guard()?;
        Ok(self.core.tables.read().contains_key(name))
    }

    /// Look up a registered table handle.
    pub fn table(&self, name: &str) -> Result<Table> {
        self.core.guard()?;
        self.core.tables.read().get(name).cloned().ok_or_else(|| {
            FsdbError::not_found(format!("table \"{}\" does not exist", name))
        })
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        self.core.guard()?;
        let mut names: Vec<String> = self.core.tables.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub(crate) fn unregister_table(&self, name: &str) {
        self.core.tables.write().remove(name);
    }

    /// Cache sizing passthrough; `save_data` persists it.
    pub fn set_cache_size(&self, cache_size: u64, cache_size_limit: Option<u64>) -> Result<()> {
        self.core.guard()?;
        self.core.cache.set_cache_size(cache_size, cache_size_limit);
        Ok(())
    }

    pub fn get_cache_size(&self) -> Result<(u64, u64)> {
        self.core.guard()?;
        Ok(self.core.cache.get_cache_size())
    }

    /// Close the database. Every handle reached through it fails with
    /// `DatabaseClosed` from here on.
    pub fn close(&self) -> Result<()> {
        self.core.guard()?;
        info!(target: "fsdb::database", "close database \"{}\"", self.core.name);
        self.core.closed.store(true, Ordering::Release);
        Ok(())
    }

    /// Delete the database tree. Every handle reached through it fails with
    /// `ObjectDeleted` from here on.
    pub fn delete(&self) -> Result<()> {
        self.core.guard()?;
        info!(target: "fsdb::database", "delete database \"{}\"", self.core.name);
        self.core.cache.clear();
        if self.core.db_path.exists() {
            fs::remove_dir_all(&self.core.db_path)?;
        }
        self.core.deleted.store(true, Ordering::Release);
        Ok(())
    }
}
