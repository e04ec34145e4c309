//! Durable single-file writes.

use crate::error::{Result, StoreError};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Write `bytes` to `path` so that a successful return means the data
/// is on stable storage.
///
/// The bytes go to a sibling temp file which is fsynced and renamed over
/// `path`; a crash mid-write leaves the previous document intact. The
/// final file's length is checked against `bytes.len()`; on mismatch the
/// write is retried once before reporting `SizeMismatch`.
pub fn write_durable(path: &Path, bytes: &[u8]) -> Result<u64> {
    let expected = bytes.len() as u64;

    match write_and_verify(path, bytes)? {
        actual if actual == expected => Ok(actual),
        actual => {
            warn!(
                path = %path.display(),
                expected,
                actual,
                "size mismatch after write, retrying once"
            );
            match write_and_verify(path, bytes)? {
                actual if actual == expected => Ok(actual),
                actual => {
                    error!(path = %path.display(), expected, actual, "size mismatch persists");
                    Err(StoreError::SizeMismatch { expected, actual })
                }
            }
        }
    }
}

fn write_and_verify(path: &Path, bytes: &[u8]) -> Result<u64> {
    let tmp = temp_path(path);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    sync_parent(path);

    Ok(fs::metadata(path)?.len())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// Makes the rename itself durable.
#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_durable_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("database.json");
        fs::write(&path, "old content that is longer").unwrap();

        let written = write_durable(&path, b"{\"uren\": []}").unwrap();

        assert_eq!(written, 12);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"uren\": []}");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_write_into_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("database.json");
        assert!(matches!(write_durable(&path, b"{}"), Err(StoreError::Io(_))));
    }
}
