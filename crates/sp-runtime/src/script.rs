use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sp_core::{CommandResult, PlayerError, Value};
use tokio_util::sync::CancellationToken;

use crate::context::ExecutionContext;

/// An executable script line.
///
/// Implementations are looked up by `kind()` in the `CommandRegistry` for their
/// timeout and retry metadata.
#[async_trait]
pub trait Command: Send + Sync + fmt::Debug {
    fn kind(&self) -> &str;

    /// Cheap structural check run once during preprocessing.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    async fn execute(
        &self,
        scope: &mut CommandScope<'_>,
        cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError>;
}

/// The slice of the execution context a command may touch.
pub struct CommandScope<'a> {
    context: &'a mut ExecutionContext,
    changed: Vec<String>,
}

impl<'a> CommandScope<'a> {
    pub fn new(context: &'a mut ExecutionContext) -> Self {
        Self {
            context,
            changed: Vec::new(),
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.context.variable(name)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.context.has_variable(name)
    }

    pub fn variables(&self) -> &std::collections::BTreeMap<String, Value> {
        self.context.variables()
    }

    pub fn set_variable(
        &mut self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), PlayerError> {
        let name = name.into();
        self.context.set_variable(name.clone(), value)?;
        self.mark_changed(name);
        Ok(())
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Value> {
        let removed = self.context.remove_variable(name);
        if removed.is_some() {
            self.mark_changed(name.to_string());
        }
        removed
    }

    fn mark_changed(&mut self, name: String) {
        if !self.changed.contains(&name) {
            self.changed.push(name);
        }
    }

    pub fn line_index(&self) -> usize {
        self.context.current_line_index()
    }

    pub fn script_name(&self) -> Option<&str> {
        self.context.script_name()
    }

    pub fn label_line(&self, label: &str) -> Option<usize> {
        self.context.label_line_index(label)
    }

    /// Names written through this scope, in first-write order.
    pub fn take_changes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.changed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextMetadata {
    pub speaker: Option<String>,
    pub source_line: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum ScriptLine {
    Command(Arc<dyn Command>),
    Text {
        content: String,
        metadata: TextMetadata,
    },
    Unknown,
}

impl ScriptLine {
    pub fn command(command: impl Command + 'static) -> Self {
        Self::Command(Arc::new(command))
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            metadata: TextMetadata::default(),
        }
    }

    pub fn dialogue(speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            metadata: TextMetadata {
                speaker: Some(speaker.into()),
                source_line: None,
            },
        }
    }
}

/// Immutable, ordered list of lines identified by name.
#[derive(Debug)]
pub struct Script {
    name: String,
    lines: Vec<ScriptLine>,
}

impl Script {
    pub fn new(name: impl Into<String>, lines: Vec<ScriptLine>) -> Self {
        Self {
            name: name.into(),
            lines,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lines(&self) -> &[ScriptLine] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> Option<&ScriptLine> {
        self.lines.get(index)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
