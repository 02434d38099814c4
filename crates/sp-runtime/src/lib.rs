pub mod config;
pub mod context;
pub mod engine;
pub mod events;
pub mod host;
pub mod playback;
pub mod player;
pub mod preprocess;
pub mod recovery;
pub mod registry;
mod rng;
pub mod script;
pub mod timeout;

#[cfg(test)]
mod test_support;

pub use config::{
    ConcurrentPlayPolicy, PlayerConfig, ReturnAtRoot, TimeoutConfig, TimeoutStrategy,
};
pub use context::{ExecutionContext, DEFAULT_MAX_CALL_STACK_DEPTH};
pub use engine::ExecutionEngine;
pub use events::{EventBus, PlayerEvent};
pub use host::{
    store_get_json, store_set_json, MemoryScriptLoader, MemoryStateStore, RecordingTextRenderer,
    RenderedText, ScriptLoader, SilentTextRenderer, StatePersistence, TextRenderer,
};
pub use playback::{PlaybackStateManager, MAX_SCALED_LINE_DELAY};
pub use player::{PlayerOptions, SavedExecutionState, ScriptPlayer};
pub use recovery::{BackoffConfig, DefaultRecoveryPolicy, ErrorRecoveryPolicy, RecoveryDecision};
pub use registry::{CommandMetadata, CommandRegistry};
pub use script::{Command, CommandScope, Script, ScriptLine, TextMetadata};
pub use timeout::{TimeoutManager, TimeoutStatistics};

pub use sp_core::*;
