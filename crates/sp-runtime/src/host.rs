//! Collaborator seams and their in-memory implementations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sp_core::{ContentKind, PlayerError};
use tokio_util::sync::CancellationToken;

use crate::script::Script;

/// Resolves scripts by name. Called again on every call and return, so
/// implementations must be idempotent.
#[async_trait]
pub trait ScriptLoader: Send + Sync + fmt::Debug {
    async fn load_script(&self, name: &str) -> Result<Arc<Script>, PlayerError>;
}

/// Dialogue and narration sink. May suspend for the presentation.
#[async_trait]
pub trait TextRenderer: Send + Sync + fmt::Debug {
    async fn render_text(
        &self,
        speaker: Option<&str>,
        text: &str,
        kind: ContentKind,
        cancel: CancellationToken,
    ) -> Result<(), PlayerError>;
}

/// Byte-oriented key/value store for saved execution states.
#[async_trait]
pub trait StatePersistence: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PlayerError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), PlayerError>;

    async fn delete(&self, key: &str) -> Result<(), PlayerError>;

    async fn list_keys(&self) -> Result<Vec<String>, PlayerError>;

    fn name(&self) -> &str;
}

pub async fn store_get_json<T: DeserializeOwned>(
    store: &dyn StatePersistence,
    key: &str,
) -> Result<Option<T>, PlayerError> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn store_set_json<T: Serialize>(
    store: &dyn StatePersistence,
    key: &str,
    value: &T,
) -> Result<(), PlayerError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.set(key, bytes).await
}

#[derive(Debug, Default)]
pub struct MemoryScriptLoader {
    scripts: RwLock<HashMap<String, Arc<Script>>>,
}

impl MemoryScriptLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scripts(scripts: impl IntoIterator<Item = Arc<Script>>) -> Self {
        let loader = Self::new();
        for script in scripts {
            loader.insert(script);
        }
        loader
    }

    pub fn insert(&self, script: Arc<Script>) {
        self.scripts
            .write()
            .insert(script.name().to_string(), script);
    }
}

#[async_trait]
impl ScriptLoader for MemoryScriptLoader {
    async fn load_script(&self, name: &str) -> Result<Arc<Script>, PlayerError> {
        self.scripts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PlayerError::ScriptNotFound(name.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentTextRenderer;

#[async_trait]
impl TextRenderer for SilentTextRenderer {
    async fn render_text(
        &self,
        _speaker: Option<&str>,
        _text: &str,
        _kind: ContentKind,
        _cancel: CancellationToken,
    ) -> Result<(), PlayerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedText {
    pub speaker: Option<String>,
    pub text: String,
    pub kind: ContentKind,
}

/// Keeps every rendered line, mostly for tests and headless hosts.
#[derive(Debug, Default)]
pub struct RecordingTextRenderer {
    rendered: Mutex<Vec<RenderedText>>,
}

impl RecordingTextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> Vec<RenderedText> {
        self.rendered.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.rendered
            .lock()
            .iter()
            .map(|entry| entry.text.clone())
            .collect()
    }
}

#[async_trait]
impl TextRenderer for RecordingTextRenderer {
    async fn render_text(
        &self,
        speaker: Option<&str>,
        text: &str,
        kind: ContentKind,
        _cancel: CancellationToken,
    ) -> Result<(), PlayerError> {
        self.rendered.lock().push(RenderedText {
            speaker: speaker.map(ToString::to_string),
            text: text.to_string(),
            kind,
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatePersistence for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PlayerError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), PlayerError> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PlayerError> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, PlayerError> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
