pub mod builtins;
pub mod document;
pub mod expr;
pub mod loader;

use std::path::PathBuf;
use std::sync::Arc;

use sp_core::PlayerError;
use sp_runtime::{
    ErrorRecoveryPolicy, PlayerConfig, PlayerOptions, ScriptPlayer, SilentTextRenderer,
    StatePersistence, TextRenderer,
};

pub use builtins::builtin_registry;
pub use document::{parse_document, parse_script, CommandFactory, LineDocument, ScriptDocument};
pub use loader::{DirScriptLoader, SCRIPT_FILE_SUFFIX};

#[derive(Debug, Clone)]
pub struct CreatePlayerOptions {
    pub scripts_dir: PathBuf,
    pub config: PlayerConfig,
    pub renderer: Option<Arc<dyn TextRenderer>>,
    pub persistence: Option<Arc<dyn StatePersistence>>,
    pub recovery: Option<Arc<dyn ErrorRecoveryPolicy>>,
}

impl CreatePlayerOptions {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            config: PlayerConfig::default(),
            renderer: None,
            persistence: None,
            recovery: None,
        }
    }
}

/// Builds a player over a directory of script documents with the built-in
/// commands registered.
pub fn create_player(options: CreatePlayerOptions) -> Result<ScriptPlayer, PlayerError> {
    let loader = DirScriptLoader::open(&options.scripts_dir, CommandFactory::with_builtins())?;
    let mut player_options = PlayerOptions::new(Arc::new(loader));
    player_options.config = options.config;
    player_options.registry = builtin_registry();
    player_options.renderer = options
        .renderer
        .unwrap_or_else(|| Arc::new(SilentTextRenderer));
    player_options.persistence = options.persistence;
    player_options.recovery = options.recovery;
    ScriptPlayer::new(player_options)
}
