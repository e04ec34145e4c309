//! Timestamped snapshots of the document file.
//!
//! Snapshots are plain copies of the live file taken *before* a risky
//! write, so they never contain half-written state. Retention keeps the
//! newest `keep` files and deletes the rest eagerly.

mod manager;

pub use manager::{BackupInfo, BackupManager, BACKUP_PREFIX, DEFAULT_BACKUP_KEEP};
pub(crate) use manager::preserve_corrupt;
