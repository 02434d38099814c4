mod flow;
mod persist;
mod run_loop;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use sp_core::{ExecutionSnapshot, PlaybackState, PlayerError, Value};
use tokio::sync::{broadcast, watch, Mutex, Semaphore, SemaphorePermit, TryAcquireError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{ConcurrentPlayPolicy, PlayerConfig};
use crate::context::ExecutionContext;
use crate::engine::ExecutionEngine;
use crate::events::{EventBus, PlayerEvent};
use crate::host::{ScriptLoader, SilentTextRenderer, StatePersistence, TextRenderer};
use crate::playback::PlaybackStateManager;
use crate::recovery::{DefaultRecoveryPolicy, ErrorRecoveryPolicy};
use crate::registry::CommandRegistry;
use crate::timeout::TimeoutManager;

pub use persist::SavedExecutionState;

pub struct PlayerOptions {
    pub config: PlayerConfig,
    pub loader: Arc<dyn ScriptLoader>,
    pub renderer: Arc<dyn TextRenderer>,
    pub persistence: Option<Arc<dyn StatePersistence>>,
    pub registry: CommandRegistry,
    pub recovery: Option<Arc<dyn ErrorRecoveryPolicy>>,
}

impl PlayerOptions {
    pub fn new(loader: Arc<dyn ScriptLoader>) -> Self {
        Self {
            config: PlayerConfig::default(),
            loader,
            renderer: Arc::new(SilentTextRenderer),
            persistence: None,
            registry: CommandRegistry::new(),
            recovery: None,
        }
    }
}

/// Drives scripts line by line.
///
/// One play runs at a time. Host calls such as `pause`, `stop` and the
/// variable setters may come from other tasks while a play is running; the
/// ones touching the context wait for the current line to finish.
#[derive(Debug)]
pub struct ScriptPlayer {
    config: PlayerConfig,
    context: Mutex<ExecutionContext>,
    playback: Arc<PlaybackStateManager>,
    engine: ExecutionEngine,
    loader: Arc<dyn ScriptLoader>,
    renderer: Arc<dyn TextRenderer>,
    persistence: Option<Arc<dyn StatePersistence>>,
    events: EventBus,
    play_guard: Semaphore,
    run_token: SyncMutex<Option<CancellationToken>>,
    position: AtomicUsize,
    last_auto_save: SyncMutex<Instant>,
}

impl ScriptPlayer {
    pub fn new(options: PlayerOptions) -> Result<Self, PlayerError> {
        options.config.validate()?;
        let config = options.config;
        let events = EventBus::new();
        let playback = Arc::new(PlaybackStateManager::new(
            config.max_fast_forward_speed,
            events.clone(),
        ));
        let recovery = options
            .recovery
            .unwrap_or_else(|| Arc::new(DefaultRecoveryPolicy::default()));
        let engine = ExecutionEngine::new(
            Arc::new(options.registry),
            Arc::new(TimeoutManager::new(config.timeouts.clone())),
            recovery,
            Arc::clone(&playback),
            events.clone(),
        );

        Ok(Self {
            context: Mutex::new(ExecutionContext::new(config.max_call_stack_depth)),
            config,
            playback,
            engine,
            loader: options.loader,
            renderer: options.renderer,
            persistence: options.persistence,
            events,
            play_guard: Semaphore::new(1),
            run_token: SyncMutex::new(None),
            position: AtomicUsize::new(0),
            last_auto_save: SyncMutex::new(Instant::now()),
        })
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn timeouts(&self) -> &Arc<TimeoutManager> {
        self.engine.timeouts()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.playback.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.playback.state()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    pub fn is_paused(&self) -> bool {
        self.playback.is_paused()
    }

    /// Last line index published by the player; readable without waiting
    /// for the running line.
    pub fn current_line_index(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    pub fn playback_speed(&self) -> f64 {
        self.playback.playback_speed()
    }

    pub fn pause(&self) -> bool {
        self.playback.pause()
    }

    pub fn resume(&self) -> bool {
        self.playback.resume()
    }

    /// Stops the running play, if any. The play returns `Stopped`.
    pub fn stop(&self) -> bool {
        let stopped = self.playback.stop();
        if let Some(token) = self.run_token.lock().as_ref() {
            token.cancel();
        }
        stopped
    }

    /// Applies a clamped speed and returns it. Speeds above 1.0 skip the
    /// inter-line delay.
    pub fn fast_forward(&self, speed: f64) -> f64 {
        let applied = self.playback.set_playback_speed(speed);
        debug!(speed = applied, "playback speed changed");
        applied
    }

    /// Stops any play and clears the whole context.
    pub async fn reset(&self) -> Result<(), PlayerError> {
        self.stop();
        let _permit = self
            .play_guard
            .acquire()
            .await
            .map_err(|_| PlayerError::Internal("play guard closed".to_string()))?;
        let mut context = self.context.lock().await;
        context.reset();
        self.playback.reset_to_idle();
        self.playback.set_playback_speed(1.0);
        self.publish_position(&context);
        Ok(())
    }

    pub async fn snapshot(&self) -> ExecutionSnapshot {
        let mut context = self.context.lock().await;
        context.set_playback_speed(self.playback.playback_speed());
        context.create_snapshot()
    }

    pub async fn script_name(&self) -> Option<String> {
        self.context
            .lock()
            .await
            .script_name()
            .map(ToString::to_string)
    }

    pub async fn call_depth(&self) -> usize {
        self.context.lock().await.call_depth()
    }

    pub async fn step_backward(&self) -> Result<usize, PlayerError> {
        let mut context = self.context.lock().await;
        if context.script().is_none() {
            return Err(PlayerError::validation("no script is loaded"));
        }
        let index = context.current_line_index().saturating_sub(1);
        context.set_current_line_index(index)?;
        self.publish_position(&context);
        Ok(index)
    }

    pub async fn skip_to_line(&self, index: usize) -> Result<(), PlayerError> {
        let mut context = self.context.lock().await;
        let len = context.line_count();
        if index >= len {
            return Err(PlayerError::InvalidJumpTarget { target: index, len });
        }
        context.set_current_line_index(index)?;
        self.publish_position(&context);
        Ok(())
    }

    /// Moves to the line after the label, like a jump does.
    pub async fn skip_to_label(&self, label: &str) -> Result<usize, PlayerError> {
        let mut context = self.context.lock().await;
        let index = context
            .label_line_index(label)
            .ok_or_else(|| PlayerError::MissingLabel(label.to_string()))?;
        context.set_current_line_index(index + 1)?;
        self.publish_position(&context);
        Ok(index + 1)
    }

    pub async fn variable(&self, name: &str) -> Option<Value> {
        self.context.lock().await.variable(name).cloned()
    }

    pub async fn variables(&self) -> BTreeMap<String, Value> {
        self.context.lock().await.variables().clone()
    }

    pub async fn has_variable(&self, name: &str) -> bool {
        self.context.lock().await.has_variable(name)
    }

    pub async fn set_variable(
        &self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), PlayerError> {
        let name = name.into();
        self.context
            .lock()
            .await
            .set_variable(name.clone(), value.clone())?;
        self.events.publish(PlayerEvent::VariableChanged {
            name,
            value: Some(value),
        });
        Ok(())
    }

    pub async fn remove_variable(&self, name: &str) -> Option<Value> {
        let removed = self.context.lock().await.remove_variable(name);
        if removed.is_some() {
            self.events.publish(PlayerEvent::VariableChanged {
                name: name.to_string(),
                value: None,
            });
        }
        removed
    }

    pub async fn clear_variables(&self) {
        let names: Vec<String> = {
            let mut context = self.context.lock().await;
            let names = context.variables().keys().cloned().collect();
            context.clear_variables();
            names
        };
        for name in names {
            self.events
                .publish(PlayerEvent::VariableChanged { name, value: None });
        }
    }

    pub async fn add_breakpoint(&self, line: usize) -> bool {
        self.context.lock().await.add_breakpoint(line)
    }

    pub async fn remove_breakpoint(&self, line: usize) -> bool {
        self.context.lock().await.remove_breakpoint(line)
    }

    pub async fn clear_breakpoints(&self) {
        self.context.lock().await.clear_breakpoints();
    }

    pub async fn has_breakpoint(&self, line: usize) -> bool {
        self.context.lock().await.has_breakpoint(line)
    }

    pub async fn breakpoints(&self) -> BTreeSet<usize> {
        self.context.lock().await.breakpoints().clone()
    }

    async fn acquire_play_guard(&self) -> Result<SemaphorePermit<'_>, PlayerError> {
        match self.play_guard.try_acquire() {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::NoPermits) => match self.config.concurrent_play {
                ConcurrentPlayPolicy::Reject => Err(PlayerError::AlreadyPlaying),
                ConcurrentPlayPolicy::Preempt => {
                    debug!("preempting running play");
                    self.stop();
                    self.play_guard
                        .acquire()
                        .await
                        .map_err(|_| PlayerError::Internal("play guard closed".to_string()))
                }
            },
            Err(TryAcquireError::Closed) => {
                Err(PlayerError::Internal("play guard closed".to_string()))
            }
        }
    }

    fn try_play_guard(&self) -> Result<SemaphorePermit<'_>, PlayerError> {
        self.play_guard.try_acquire().map_err(|error| match error {
            TryAcquireError::NoPermits => PlayerError::AlreadyPlaying,
            TryAcquireError::Closed => PlayerError::Internal("play guard closed".to_string()),
        })
    }

    fn publish_position(&self, context: &ExecutionContext) {
        self.position
            .store(context.current_line_index(), Ordering::Release);
        self.events.publish(PlayerEvent::ProgressChanged {
            fraction: context.progress(),
        });
    }
}

#[cfg(test)]
mod tests;
