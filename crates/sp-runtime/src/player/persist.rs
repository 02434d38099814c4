use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sp_core::{ExecutionSnapshot, PlaybackState, PlayerError};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::ScriptPlayer;
use crate::host::{store_get_json, store_set_json, StatePersistence};

/// Envelope stored for every saved execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedExecutionState {
    pub key: String,
    pub saved_at: DateTime<Utc>,
    pub state: PlaybackState,
    pub snapshot: ExecutionSnapshot,
}

impl ScriptPlayer {
    fn persistence(&self) -> Result<&dyn StatePersistence, PlayerError> {
        self.persistence
            .as_deref()
            .ok_or_else(|| PlayerError::Persistence("no state persistence configured".to_string()))
    }

    /// Saves the context under `key`, or under a fresh uuid. Returns the key.
    pub async fn save_execution_state(&self, key: Option<String>) -> Result<String, PlayerError> {
        let store = self.persistence()?;
        let key = key.unwrap_or_else(|| Uuid::new_v4().to_string());
        let snapshot = self.snapshot().await;
        let saved = SavedExecutionState {
            key: key.clone(),
            saved_at: Utc::now(),
            state: self.playback.state(),
            snapshot,
        };
        store_set_json(store, &key, &saved).await?;
        info!(
            key = %key,
            store = store.name(),
            line = saved.snapshot.current_line_index,
            "execution state saved"
        );
        Ok(key)
    }

    /// Restores a saved state. The script is re-resolved by name; the player
    /// is left idle at the saved position.
    pub async fn load_execution_state(&self, key: &str) -> Result<SavedExecutionState, PlayerError> {
        let store = self.persistence()?;
        let _permit = self.try_play_guard()?;
        let saved: SavedExecutionState = store_get_json(store, key)
            .await?
            .ok_or_else(|| PlayerError::Persistence(format!("no saved state under \"{}\"", key)))?;
        saved.snapshot.validate()?;

        let script = match &saved.snapshot.script_name {
            Some(name) => Some(self.loader.load_script(name).await?),
            None => None,
        };

        let mut context = self.context.lock().await;
        context.restore_from_snapshot(saved.snapshot.clone(), script)?;
        let applied = self.playback.set_playback_speed(context.playback_speed());
        context.set_playback_speed(applied);
        if self.playback.state().is_terminal() {
            self.playback.reset_to_idle();
        }
        self.publish_position(&context);
        info!(key = %key, line = context.current_line_index(), "execution state loaded");
        Ok(saved)
    }

    pub(super) async fn auto_save_if_due(&self) {
        let Some(interval) = self.config.auto_save_interval() else {
            return;
        };
        if self.persistence.is_none() {
            return;
        }
        {
            let mut last = self.last_auto_save.lock();
            if last.elapsed() < interval {
                return;
            }
            *last = Instant::now();
        }
        if let Err(error) = self
            .save_execution_state(Some(self.config.auto_save_key.clone()))
            .await
        {
            warn!(code = error.code(), "auto-save failed: {}", error);
        }
    }
}
