//! File-backed store: one JSON object of string values per file.

use crate::error::{StorageError, StorageResult};
use crate::KeyValueStore;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// A [`KeyValueStore`] persisted as a JSON file.
///
/// The whole map is held in memory and the file is rewritten through a
/// temporary sibling plus rename on every mutation, so a crash leaves either
/// the old or the new contents. One process owns the file at a time.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens the store at `path`, creating an empty one if the file does not
    /// exist yet.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let entries = match fs::read(path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no store at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp_path = self.path.with_extension("tmp");

        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        };

        write().map_err(|e| {
            warn!("failed to persist store {}: {e}", self.path.display());
            let _ = fs::remove_file(&tmp_path);
            StorageError::Io(e)
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            // Keep memory consistent with disk.
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }
}
