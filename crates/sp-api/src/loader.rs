use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sp_core::PlayerError;
use sp_runtime::{Script, ScriptLoader};
use tracing::debug;
use walkdir::WalkDir;

use crate::document::{parse_script, CommandFactory};

pub const SCRIPT_FILE_SUFFIX: &str = ".script.json";

/// Loads `*.script.json` documents from a directory tree, keyed by the
/// document's `name`.
#[derive(Debug)]
pub struct DirScriptLoader {
    root: PathBuf,
    factory: CommandFactory,
    scripts: RwLock<BTreeMap<String, Arc<Script>>>,
}

impl DirScriptLoader {
    /// Scans `root` once. Fails on unreadable files, invalid documents and
    /// duplicate names.
    pub fn open(root: impl Into<PathBuf>, factory: CommandFactory) -> Result<Self, PlayerError> {
        let root = root.into();
        let scripts = scan_scripts(&root, &factory)?;
        Ok(Self {
            root,
            factory,
            scripts: RwLock::new(scripts),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn names(&self) -> Vec<String> {
        self.scripts.read().keys().cloned().collect()
    }

    /// Re-scans the directory. The previous index stays in place on failure.
    pub fn reload(&self) -> Result<usize, PlayerError> {
        let scripts = scan_scripts(&self.root, &self.factory)?;
        let count = scripts.len();
        *self.scripts.write() = scripts;
        Ok(count)
    }
}

#[async_trait]
impl ScriptLoader for DirScriptLoader {
    async fn load_script(&self, name: &str) -> Result<Arc<Script>, PlayerError> {
        self.scripts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PlayerError::ScriptNotFound(name.to_string()))
    }
}

fn scan_scripts(
    root: &Path,
    factory: &CommandFactory,
) -> Result<BTreeMap<String, Arc<Script>>, PlayerError> {
    if !root.is_dir() {
        return Err(PlayerError::validation(format!(
            "scripts directory does not exist: {}",
            root.display()
        )));
    }

    let mut scripts = BTreeMap::new();
    let mut origins: BTreeMap<String, PathBuf> = BTreeMap::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !path.to_string_lossy().ends_with(SCRIPT_FILE_SUFFIX) {
            continue;
        }

        let source = fs::read_to_string(path).map_err(|error| {
            PlayerError::validation(format!("cannot read {}: {}", path.display(), error))
        })?;
        let script = parse_script(&source, factory).map_err(|error| match error {
            PlayerError::Serialization(message) => {
                PlayerError::Serialization(format!("{}: {}", path.display(), message))
            }
            other => other,
        })?;

        let name = script.name().to_string();
        if let Some(previous) = origins.insert(name.clone(), path.to_path_buf()) {
            return Err(PlayerError::validation(format!(
                "script \"{}\" is defined in both {} and {}",
                name,
                previous.display(),
                path.display()
            )));
        }
        debug!(script = %name, lines = script.len(), path = %path.display(), "script indexed");
        scripts.insert(name, Arc::new(script));
    }

    Ok(scripts)
}
