use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sp_core::PlayerError;
use sp_runtime::StatePersistence;
use tokio::fs;
use tokio::sync::Mutex;

use crate::{map_cli_state_read, map_cli_state_write};

/// Key under which the CLI saves the state it resumes from.
pub(crate) const RESUME_KEY: &str = "resume";

/// All saved states of one session in a single JSON object file.
#[derive(Debug)]
pub(crate) struct FileStateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStateStore {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<BTreeMap<String, JsonValue>, PlayerError> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(error) => Err(map_cli_state_read(error)),
        }
    }

    async fn write_entries(&self, entries: &BTreeMap<String, JsonValue>) -> Result<(), PlayerError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).await.map_err(map_cli_state_write)?;
        let payload = serde_json::to_vec_pretty(entries)?;
        fs::write(&self.path, payload)
            .await
            .map_err(map_cli_state_write)
    }
}

#[async_trait]
impl StatePersistence for FileStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PlayerError> {
        let _guard = self.lock.lock().await;
        match self.read_entries().await?.get(key) {
            Some(value) => Ok(Some(serde_json::to_vec(value)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), PlayerError> {
        let _guard = self.lock.lock().await;
        let value: JsonValue = serde_json::from_slice(&value)?;
        let mut entries = self.read_entries().await?;
        entries.insert(key.to_string(), value);
        self.write_entries(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<(), PlayerError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries).await?;
        }
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, PlayerError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_entries().await?.into_keys().collect())
    }

    fn name(&self) -> &str {
        "file"
    }
}
