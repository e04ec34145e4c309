//! Main Store struct tying all components together.

use crate::backups::{preserve_corrupt, BackupInfo, BackupManager, DEFAULT_BACKUP_KEEP};
use crate::error::{Result, StoreError};
use crate::persist::{write_durable, DebounceState, Persister, SaveTarget, DEFAULT_DEBOUNCE};
use crate::records::{DeleteOutcome, Query, Tables};
use crate::types::{
    default_tables, LoadOutcome, Record, RefusalCause, SaveStats, TableDef, Timestamp,
    UpsertOutcome,
};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Data directory holding the document, its lock file and `backups/`.
    pub path: PathBuf,

    /// Document file name inside `path`.
    pub file_name: String,

    /// Known tables. These always exist, even after a failed load.
    pub tables: Vec<TableDef>,

    /// Delay between a mutation and the write it triggers.
    pub debounce: Duration,

    /// Number of backups retained.
    pub backup_keep: usize,

    /// Backup directory name inside `path`.
    pub backup_dir_name: String,

    /// Snapshot the document before every debounced save.
    pub backup_before_save: bool,

    /// Whether to create the data directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data"),
            file_name: "database.json".to_string(),
            tables: default_tables(),
            debounce: DEFAULT_DEBOUNCE,
            backup_keep: DEFAULT_BACKUP_KEEP,
            backup_dir_name: "backups".to_string(),
            backup_before_save: false,
            create_if_missing: true,
        }
    }
}

impl StoreConfig {
    /// Configuration rooted at `<platform data dir>/<app_name>`, creating
    /// the directory if needed.
    pub fn in_user_data_dir(app_name: &str) -> Result<Self> {
        let path = dirs::data_dir().ok_or(StoreError::NoDataDir)?.join(app_name);
        fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            ..Default::default()
        })
    }

    pub fn document_path(&self) -> PathBuf {
        self.path.join(&self.file_name)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.path.join(&self.backup_dir_name)
    }
}

/// State shared between the store handle and the persistence actor.
struct Inner {
    document_path: PathBuf,
    table_defs: Vec<TableDef>,

    tables: RwLock<Tables>,

    /// Serializes every touch of the document file. Always taken before `tables`.
    io: Mutex<()>,

    backups: BackupManager,
    stats: Mutex<SaveStats>,

    /// Set when a refused load could not copy the original aside.
    blocked: AtomicBool,
}

impl Inner {
    fn write_document(&self, backup_first: bool) -> Result<()> {
        if self.blocked.load(Ordering::SeqCst) {
            return Err(StoreError::PersistenceBlocked(self.document_path.clone()));
        }

        let _io = self.io.lock();

        if backup_first {
            if let Err(e) = self.backups.create(&self.document_path, "before-save") {
                warn!(error = %e, "backup before save failed, saving anyway");
            }
        }

        let bytes = {
            let tables = self.tables.read();
            serde_json::to_vec_pretty(&tables.to_document())?
        };

        match write_durable(&self.document_path, &bytes) {
            Ok(size) => {
                let mut stats = self.stats.lock();
                stats.writes += 1;
                stats.last_size = size;
                debug!(path = %self.document_path.display(), size, "document saved");
                Ok(())
            }
            Err(e) => {
                self.stats.lock().failures += 1;
                error!(path = %self.document_path.display(), error = %e, "failed to save document");
                Err(e)
            }
        }
    }
}

impl SaveTarget for Inner {
    fn save(&self, backup_first: bool) -> Result<()> {
        self.write_document(backup_first)
    }
}

/// The document store.
///
/// Mutations apply to memory immediately and schedule a debounced save.
/// Reads only ever see memory, never the file.
pub struct Store {
    config: StoreConfig,

    inner: Arc<Inner>,

    /// Debounce actor; holds its own handle on `inner`.
    persister: Persister,

    load_outcome: LoadOutcome,

    /// Lock file for exclusive access.
    _lock_file: File,
}

impl Store {
    /// Open the store at `config.path`, loading or creating its document.
    ///
    /// A corrupt or unreadable document never fails the open: it is left
    /// on disk untouched and the store starts with empty tables. Check
    /// [`Store::load_outcome`] to see which path was taken.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if !config.path.exists() {
            if config.create_if_missing {
                fs::create_dir_all(&config.path)?;
            } else {
                return Err(StoreError::NotInitialized);
            }
        }

        let lock_file = Self::acquire_lock(&config.path)?;
        let document_path = config.document_path();
        let (tables, load_outcome) = Self::load(&document_path, &config.tables);

        let blocked = matches!(
            load_outcome,
            LoadOutcome::Refused {
                corrupt_copy: None,
                ..
            }
        );

        let inner = Arc::new(Inner {
            document_path,
            table_defs: config.tables.clone(),
            tables: RwLock::new(tables),
            io: Mutex::new(()),
            backups: BackupManager::new(config.backup_dir(), config.backup_keep),
            stats: Mutex::new(SaveStats::default()),
            blocked: AtomicBool::new(blocked),
        });

        if load_outcome == LoadOutcome::Created {
            // Failure here is already logged; the next save retries.
            let _ = inner.write_document(false);
        }

        let persister = Persister::spawn(Arc::clone(&inner), config.debounce)?;

        Ok(Self {
            config,
            inner,
            persister,
            load_outcome,
            _lock_file: lock_file,
        })
    }

    fn load(path: &Path, defs: &[TableDef]) -> (Tables, LoadOutcome) {
        if !path.exists() {
            info!(path = %path.display(), "no document found, initializing empty store");
            return (Tables::new(defs), LoadOutcome::Created);
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(path = %path.display(), error = %e, "document exists but cannot be read");
                let corrupt_copy = Self::copy_aside(path);
                return (
                    Tables::new(defs),
                    LoadOutcome::Refused {
                        cause: RefusalCause::Unreadable(e.to_string()),
                        corrupt_copy,
                    },
                );
            }
        };

        let document: Value = match serde_json::from_slice(&bytes) {
            Ok(document) => document,
            Err(e) => {
                error!(path = %path.display(), error = %e, "document is corrupt, refusing to load");
                let corrupt_copy = Self::copy_aside(path);
                return (
                    Tables::new(defs),
                    LoadOutcome::Refused {
                        cause: RefusalCause::Corruption(e.to_string()),
                        corrupt_copy,
                    },
                );
            }
        };

        let (tables, healed) = Tables::from_document(document, defs);
        if healed.is_empty() {
            info!(
                path = %path.display(),
                records = tables.record_count(),
                "document loaded"
            );
            (tables, LoadOutcome::Clean)
        } else {
            warn!(
                path = %path.display(),
                tables = ?healed,
                "document loaded with missing or malformed tables reset to empty"
            );
            (tables, LoadOutcome::Healed { tables: healed })
        }
    }

    fn copy_aside(path: &Path) -> Option<PathBuf> {
        match preserve_corrupt(path) {
            Ok(copy) => {
                warn!(original = %path.display(), copy = %copy.display(), "preserved unreadable document");
                Some(copy)
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "could not copy document aside, saves are blocked until a restore"
                );
                None
            }
        }
    }

    // --- Table Operations ---

    /// All records of `table` in insertion order. Empty for unknown tables.
    pub fn get(&self, table: &str) -> Vec<Record> {
        self.inner.tables.read().get(table).to_vec()
    }

    /// Records of `table` matching `query`.
    pub fn query(&self, table: &str, query: &Query) -> Vec<Record> {
        query.apply(self.inner.tables.read().get(table))
    }

    pub fn get_by_id(&self, table: &str, id: &str) -> Option<Record> {
        self.inner.tables.read().find(table, id).cloned()
    }

    /// Insert a record with a fresh id and timestamps.
    pub fn create(&self, table: &str, fields: Value) -> Result<Record> {
        let fields = Record::from_value(fields)?;
        let record = self
            .inner
            .tables
            .write()
            .create(table, fields, Timestamp::now());
        self.schedule_save();
        Ok(record)
    }

    /// Merge `partial` into the record. `Ok(None)` if the id is unknown.
    pub fn update(&self, table: &str, id: &str, partial: Value) -> Result<Option<Record>> {
        let partial = match partial {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::InvalidOperation(
                    "update fields must be a JSON object".into(),
                ))
            }
        };

        let updated = self
            .inner
            .tables
            .write()
            .update(table, id, partial, Timestamp::now());
        if updated.is_some() {
            self.schedule_save();
        }
        Ok(updated)
    }

    /// Remove the record, or deactivate it for soft-delete tables.
    /// Unknown ids are a silent no-op.
    pub fn delete(&self, table: &str, id: &str) -> DeleteOutcome {
        let outcome = self
            .inner
            .tables
            .write()
            .delete(table, id, Timestamp::now());
        if outcome.changed() {
            self.schedule_save();
        }
        outcome
    }

    /// Replace every record of `table`.
    pub fn replace_table(&self, table: &str, records: Vec<Value>) -> Result<usize> {
        let records = records
            .into_iter()
            .map(Record::from_value)
            .collect::<Result<Vec<_>>>()?;
        let count = self
            .inner
            .tables
            .write()
            .replace(table, records, Timestamp::now());
        self.schedule_save();
        Ok(count)
    }

    /// Update the record matching `fields` on every `match_fields` entry,
    /// or create it.
    pub fn upsert(&self, table: &str, match_fields: &[&str], fields: Value) -> Result<UpsertOutcome> {
        let fields = Record::from_value(fields)?;
        let outcome = self
            .inner
            .tables
            .write()
            .upsert(table, match_fields, fields, Timestamp::now());
        self.schedule_save();
        Ok(outcome)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.inner.tables.read().table_names()
    }

    // --- Persistence ---

    fn schedule_save(&self) {
        self.persister.schedule(self.config.backup_before_save);
    }

    /// Save the document.
    ///
    /// Debounced saves return immediately and report failures only in the
    /// log. Immediate saves cancel any pending timer, write synchronously
    /// and return the write's result.
    pub fn persist(&self, backup_first: bool, immediate: bool) -> Result<()> {
        if immediate {
            self.persister.flush(backup_first)
        } else {
            self.persister.schedule(backup_first);
            Ok(())
        }
    }

    /// Write now, bypassing the debounce window.
    pub fn force_save(&self) -> Result<()> {
        self.persist(false, true)
    }

    /// Whether a debounced save is due but not yet written.
    pub fn has_pending_save(&self) -> bool {
        self.persister.is_pending()
    }

    pub fn debounce_state(&self) -> DebounceState {
        self.persister.state()
    }

    pub fn save_stats(&self) -> SaveStats {
        *self.inner.stats.lock()
    }

    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.load_outcome
    }

    /// Flush anything pending and stop the persistence actor. Mutations
    /// after this point stay in memory only.
    pub fn shutdown(&self) -> Result<()> {
        self.persister.shutdown()
    }

    // --- Backups ---

    /// Snapshot the document file tagged with `reason`. `None` if no
    /// document has been written yet.
    pub fn create_backup(&self, reason: &str) -> Result<Option<PathBuf>> {
        let _io = self.inner.io.lock();
        self.inner.backups.create(&self.inner.document_path, reason)
    }

    /// Snapshot taken before a bulk import of `kind` records.
    pub fn begin_import(&self, kind: &str) -> Result<Option<PathBuf>> {
        self.create_backup(&format!("before-import-{kind}"))
    }

    /// All backups, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        self.inner.backups.list()
    }

    /// Roll the store back to `backup_path`.
    ///
    /// The current document is snapshotted as `before-restore` first, so a
    /// restore can itself be undone. The backup must parse; otherwise
    /// nothing is touched.
    pub fn restore_from_backup(&self, backup_path: impl AsRef<Path>) -> Result<()> {
        let backup_path = backup_path.as_ref();
        let _io = self.inner.io.lock();

        let bytes = self.inner.backups.read(backup_path)?;
        let document: Value = serde_json::from_slice(&bytes).map_err(|e| {
            StoreError::Corruption(format!("backup {} is unreadable: {}", backup_path.display(), e))
        })?;

        self.inner
            .backups
            .create(&self.inner.document_path, "before-restore")?;
        write_durable(&self.inner.document_path, &bytes)?;

        let (tables, healed) = Tables::from_document(document, &self.inner.table_defs);
        if !healed.is_empty() {
            warn!(tables = ?healed, "restored backup had missing or malformed tables");
        }
        *self.inner.tables.write() = tables;
        self.inner.blocked.store(false, Ordering::SeqCst);

        info!(backup = %backup_path.display(), "store restored from backup");
        Ok(())
    }

    // --- Store Operations ---

    /// Get the data directory.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn document_path(&self) -> &Path {
        &self.inner.document_path
    }

    pub fn backup_dir(&self) -> &Path {
        self.inner.backups.dir()
    }

    // --- Private Helpers ---

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort final flush before the lock is released
        if let Err(e) = self.persister.shutdown() {
            error!(error = %e, "final save on close failed");
        }
    }
}
