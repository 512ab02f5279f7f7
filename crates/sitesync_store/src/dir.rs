//! Store directory management.
//!
//! On-disk layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK           # Advisory lock for single-writer access
//! ├─ journal.log    # Committed-transaction frames since last checkpoint
//! └─ snapshot.dat   # Full state at last checkpoint (may be absent)
//! ```
//!
//! The LOCK file ensures only one process writes a store at a time. The
//! snapshot is replaced atomically through a write-then-rename, so a crash
//! during checkpoint leaves either the old snapshot or the new one, never
//! a torn file.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";
const SNAPSHOT_FILE: &str = "snapshot.dat";
const SNAPSHOT_TEMP: &str = "snapshot.tmp";

/// Holds the store directory and its exclusive lock.
///
/// Only one `StoreDir` can exist per directory at a time; the lock is
/// released when the value drops.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens the store directory, creating it if missing, and acquires the
    /// exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the lock.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the journal file path.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Returns the snapshot file path.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.path.join(SNAPSHOT_FILE)
    }

    /// Reads the snapshot file, or `None` for a store that has never been
    /// checkpointed.
    pub fn read_snapshot(&self) -> StoreResult<Option<Vec<u8>>> {
        read_snapshot_at(&self.path)
    }

    /// Replaces the snapshot atomically: write to a temp file, sync it,
    /// rename over the old snapshot, fsync the directory.
    pub fn write_snapshot(&self, data: &[u8]) -> StoreResult<()> {
        let temp_path = self.path.join(SNAPSHOT_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.snapshot_path())?;
        sync_directory(&self.path)
    }
}

/// Journal path inside a store directory, without taking the lock.
///
/// For read-only inspection tooling.
#[must_use]
pub fn journal_path_of(store_path: &Path) -> PathBuf {
    store_path.join(JOURNAL_FILE)
}

/// Reads a store's snapshot without taking the lock.
pub fn read_snapshot_at(store_path: &Path) -> StoreResult<Option<Vec<u8>>> {
    let snapshot_path = store_path.join(SNAPSHOT_FILE);
    if !snapshot_path.exists() {
        return Ok(None);
    }

    let mut file = File::open(&snapshot_path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some(data))
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> StoreResult<()> {
    // On Unix, fsync on a directory makes the entries durable.
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> StoreResult<()> {
    // NTFS journaling covers metadata durability; directory fsync is not
    // available in the same form.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("new_store");
        assert!(!store_path.exists());

        let dir = StoreDir::open(&store_path).unwrap();
        assert!(store_path.is_dir());
        assert_eq!(dir.journal_path(), store_path.join("journal.log"));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("locked");

        let _dir1 = StoreDir::open(&store_path).unwrap();
        let result = StoreDir::open(&store_path);
        assert!(matches!(result, Err(StoreError::Locked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("reopen");

        {
            let _dir = StoreDir::open(&store_path).unwrap();
        }
        let _dir2 = StoreDir::open(&store_path).unwrap();
    }

    #[test]
    fn snapshot_roundtrip() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(&temp.path().join("snap")).unwrap();

        assert!(dir.read_snapshot().unwrap().is_none());

        dir.write_snapshot(b"state bytes").unwrap();
        assert_eq!(dir.read_snapshot().unwrap().unwrap(), b"state bytes");

        dir.write_snapshot(b"newer").unwrap();
        assert_eq!(dir.read_snapshot().unwrap().unwrap(), b"newer");
    }
}
