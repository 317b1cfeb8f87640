use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fieldnode_core::hal::Namespaces;
use fieldnode_core::{KvStore, KvValue, StorageError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreFile {
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub namespaces: Namespaces,
}

/// Key-value store persisted as one JSON document. Writes stay in memory
/// until `commit`, which replaces the file atomically.
pub struct JsonFileStore {
    path: PathBuf,
    working: Mutex<Namespaces>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let namespaces = match fs::read(&path) {
            Ok(bytes) => read_store(&bytes)?.namespaces,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no store yet, starting empty");
                Namespaces::new()
            }
            Err(err) => return Err(StorageError::Io(format!("{}: {err}", path.display()))),
        };
        Ok(Self {
            path,
            working: Mutex::new(namespaces),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Namespaces {
        self.working().clone()
    }

    fn working(&self) -> MutexGuard<'_, Namespaces> {
        self.working.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn read_store(bytes: &[u8]) -> Result<StoreFile, StorageError> {
    serde_json::from_slice(bytes).map_err(|err| StorageError::Io(format!("corrupt store: {err}")))
}

impl KvStore for JsonFileStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<KvValue>, StorageError> {
        Ok(self
            .working()
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: KvValue) -> Result<(), StorageError> {
        self.working()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn erase(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        if let Some(entries) = self.working().get_mut(namespace) {
            entries.remove(key);
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), StorageError> {
        let file = StoreFile {
            saved_at: Some(Utc::now()),
            namespaces: self.snapshot(),
        };
        let io = |err: std::io::Error| StorageError::Io(format!("{}: {err}", self.path.display()));

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&file).map_err(|err| StorageError::Io(err.to_string()))?;
        let mut out = fs::File::create(&tmp).map_err(io)?;
        out.write_all(&bytes).map_err(io)?;
        out.sync_all().map_err(io)?;
        fs::rename(&tmp, &self.path).map_err(io)?;
        debug!(path = %self.path.display(), "store committed");
        Ok(())
    }
}
