//! Backup creation, retention and listing.

use crate::error::{Result, StoreError};
use crate::types::Timestamp;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// File name prefix shared by every backup.
pub const BACKUP_PREFIX: &str = "database-backup-";

/// Number of backups retained by default.
pub const DEFAULT_BACKUP_KEEP: usize = 20;

/// A backup file on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupInfo {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub created: Timestamp,
}

/// Length of `Timestamp::to_file_safe` output, e.g. `2025-03-04T10-15-00-000Z`.
const NAME_STAMP_LEN: usize = 24;

/// Manages the backup directory.
#[derive(Clone, Debug)]
pub struct BackupManager {
    dir: PathBuf,
    keep: usize,

    /// Millisecond stamp of the last backup name handed out. Names are
    /// strictly increasing so they order backups even when mtimes tie.
    last_stamp: Arc<Mutex<i64>>,
}

impl BackupManager {
    pub fn new(dir: impl AsRef<Path>, keep: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            keep: keep.max(1),
            last_stamp: Arc::new(Mutex::new(i64::MIN)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Copy `source` into the backup directory tagged with `reason`.
    ///
    /// Returns `None` when `source` does not exist yet. Prunes old
    /// backups after a successful copy.
    pub fn create(&self, source: &Path, reason: &str) -> Result<Option<PathBuf>> {
        if !source.exists() {
            warn!(path = %source.display(), reason, "no document file yet, skipping backup");
            return Ok(None);
        }

        fs::create_dir_all(&self.dir)?;
        let target = self.next_backup_path(reason);

        fs::copy(source, &target)?;
        File::open(&target)?.sync_all()?;
        info!(path = %target.display(), reason, "backup created");

        self.prune()?;
        Ok(Some(target))
    }

    /// All backups, newest first. Empty if the directory does not exist.
    ///
    /// Ordered by mtime; equal mtimes fall back to the creation stamp
    /// embedded in the file name.
    pub fn list(&self) -> Result<Vec<BackupInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !is_backup_name(&file_name) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let created = meta.created().unwrap_or(modified);
            entries.push((
                modified,
                BackupInfo {
                    file_name,
                    path: entry.path(),
                    size: meta.len(),
                    created: Timestamp(created.into()),
                },
            ));
        }

        entries.sort_by(|(ma, a), (mb, b)| {
            let key_a = (Reverse(*ma), Reverse(name_stamp(&a.file_name)), Reverse(&a.file_name));
            let key_b = (Reverse(*mb), Reverse(name_stamp(&b.file_name)), Reverse(&b.file_name));
            key_a.cmp(&key_b)
        });
        Ok(entries.into_iter().map(|(_, info)| info).collect())
    }

    /// Delete every backup beyond the newest `keep`. Individual failures
    /// are logged and do not stop the rest.
    pub fn prune(&self) -> Result<usize> {
        let backups = self.list()?;
        let mut removed = 0;

        for stale in backups.iter().skip(self.keep) {
            match fs::remove_file(&stale.path) {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %stale.path.display(), "pruned backup");
                }
                Err(e) => {
                    warn!(path = %stale.path.display(), error = %e, "failed to prune backup");
                }
            }
        }

        if removed > 0 {
            info!(removed, keep = self.keep, "backup retention applied");
        }
        Ok(removed)
    }

    /// Read a backup's bytes for restore.
    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        if !path.is_file() {
            return Err(StoreError::BackupNotFound(path.to_path_buf()));
        }
        Ok(fs::read(path)?)
    }

    fn next_backup_path(&self, reason: &str) -> PathBuf {
        let stem = format!(
            "{}{}-{}",
            BACKUP_PREFIX,
            self.next_stamp().to_file_safe(),
            sanitize_reason(reason)
        );
        let mut candidate = self.dir.join(format!("{stem}.json"));
        let mut n = 2;
        while candidate.exists() {
            candidate = self.dir.join(format!("{stem}-{n}.json"));
            n += 1;
        }
        candidate
    }

    // Now, or one millisecond past the previous stamp if the clock has not
    // moved on.
    fn next_stamp(&self) -> Timestamp {
        let now = Timestamp::now();
        let mut last = self.last_stamp.lock();
        let millis = now.0.timestamp_millis();
        if millis > *last {
            *last = millis;
            return now;
        }
        *last += 1;
        Utc.timestamp_millis_opt(*last)
            .single()
            .map(Timestamp)
            .unwrap_or(now)
    }
}

/// The fixed-width timestamp following the prefix; sorts chronologically.
fn name_stamp(name: &str) -> &str {
    name.get(BACKUP_PREFIX.len()..BACKUP_PREFIX.len() + NAME_STAMP_LEN)
        .unwrap_or("")
}

fn is_backup_name(name: &str) -> bool {
    name.starts_with(BACKUP_PREFIX) && name.ends_with(".json")
}

/// Reduce a reason tag to characters safe in a file name.
fn sanitize_reason(reason: &str) -> String {
    let cleaned: String = reason
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "manual".to_string()
    } else {
        cleaned
    }
}

/// Copy an unreadable or unparsable document to `<file>.backup.<ts>`
/// next to it, leaving the original in place.
pub(crate) fn preserve_corrupt(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database.json".to_string());
    let target = path.with_file_name(format!(
        "{}.backup.{}",
        file_name,
        Timestamp::now().to_file_safe()
    ));

    fs::copy(path, &target)?;
    File::open(&target)?.sync_all()?;
    Ok(target)
}
