use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use sp_core::PlayerError;
use sp_runtime::{Command, Script, ScriptLine, TextMetadata};
use tracing::warn;

use crate::builtins::{
    CallCommand, EchoCommand, GotoCommand, JumpCommand, ReturnCommand, SetCommand, StopCommand,
    WaitCommand,
};

/// On-disk form of a script: already-split lines, no source syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDocument {
    pub name: String,
    #[serde(default)]
    pub lines: Vec<LineDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LineDocument {
    Command {
        command: String,
        #[serde(flatten)]
        args: JsonMap<String, JsonValue>,
    },
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speaker: Option<String>,
    },
    Plain(String),
}

type Constructor = fn(&JsonMap<String, JsonValue>) -> Result<Arc<dyn Command>, String>;

/// Maps command kinds to constructors. Kinds without a constructor load as
/// `Unknown` lines.
#[derive(Clone)]
pub struct CommandFactory {
    constructors: BTreeMap<String, Constructor>,
}

impl fmt::Debug for CommandFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandFactory")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for CommandFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CommandFactory {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut factory = Self::empty();
        factory
            .register("jump", build_jump)
            .register("goto", build_goto)
            .register("call", build_call)
            .register("return", build_return)
            .register("stop", build_stop)
            .register("set", build_set)
            .register("wait", build_wait)
            .register("echo", build_echo);
        factory
    }

    pub fn register(&mut self, kind: impl Into<String>, constructor: Constructor) -> &mut Self {
        self.constructors.insert(kind.into(), constructor);
        self
    }

    pub fn knows(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Builds one line. `index` is only used in messages.
    pub fn build_line(&self, line: &LineDocument, index: usize) -> Result<ScriptLine, String> {
        match line {
            LineDocument::Command { command, args } => match self.constructors.get(command) {
                Some(constructor) => constructor(args)
                    .map(ScriptLine::Command)
                    .map_err(|message| format!("line {}: {} {}", index, command, message)),
                None => {
                    warn!(line = index, kind = %command, "unknown command kind");
                    Ok(ScriptLine::Unknown)
                }
            },
            LineDocument::Text { text, speaker } => Ok(ScriptLine::Text {
                content: text.clone(),
                metadata: TextMetadata {
                    speaker: speaker.clone(),
                    source_line: Some(index),
                },
            }),
            LineDocument::Plain(text) => Ok(ScriptLine::Text {
                content: text.clone(),
                metadata: TextMetadata {
                    speaker: None,
                    source_line: Some(index),
                },
            }),
        }
    }

    pub fn build_script(&self, document: &ScriptDocument) -> Result<Script, PlayerError> {
        if document.name.trim().is_empty() {
            return Err(PlayerError::validation("script document has no name"));
        }
        let mut lines = Vec::with_capacity(document.lines.len());
        let mut errors = Vec::new();
        for (index, line) in document.lines.iter().enumerate() {
            match self.build_line(line, index) {
                Ok(line) => lines.push(line),
                Err(message) => errors.push(message),
            }
        }
        if !errors.is_empty() {
            return Err(PlayerError::Preprocessing {
                script: document.name.clone(),
                errors,
            });
        }
        Ok(Script::new(document.name.clone(), lines))
    }
}

pub fn parse_document(source: &str) -> Result<ScriptDocument, PlayerError> {
    Ok(serde_json::from_str(source)?)
}

/// Parses JSON and builds the script in one go.
pub fn parse_script(source: &str, factory: &CommandFactory) -> Result<Script, PlayerError> {
    factory.build_script(&parse_document(source)?)
}

fn build_jump(args: &JsonMap<String, JsonValue>) -> Result<Arc<dyn Command>, String> {
    Ok(Arc::new(JumpCommand {
        label: required_str(args, "label")?,
        when: optional_str(args, "when")?,
    }))
}

fn build_goto(args: &JsonMap<String, JsonValue>) -> Result<Arc<dyn Command>, String> {
    let line = usize::try_from(required_u64(args, "line")?)
        .map_err(|_| "argument \"line\" is out of range".to_string())?;
    Ok(Arc::new(GotoCommand { line }))
}

fn build_call(args: &JsonMap<String, JsonValue>) -> Result<Arc<dyn Command>, String> {
    Ok(Arc::new(CallCommand {
        script: required_str(args, "script")?,
    }))
}

fn build_return(_: &JsonMap<String, JsonValue>) -> Result<Arc<dyn Command>, String> {
    Ok(Arc::new(ReturnCommand))
}

fn build_stop(_: &JsonMap<String, JsonValue>) -> Result<Arc<dyn Command>, String> {
    Ok(Arc::new(StopCommand))
}

fn build_set(args: &JsonMap<String, JsonValue>) -> Result<Arc<dyn Command>, String> {
    Ok(Arc::new(SetCommand {
        name: required_str(args, "name")?,
        expr: required_str(args, "expr")?,
    }))
}

fn build_wait(args: &JsonMap<String, JsonValue>) -> Result<Arc<dyn Command>, String> {
    Ok(Arc::new(WaitCommand {
        ms: required_u64(args, "ms")?,
    }))
}

fn build_echo(args: &JsonMap<String, JsonValue>) -> Result<Arc<dyn Command>, String> {
    Ok(Arc::new(EchoCommand {
        text: required_str(args, "text")?,
    }))
}

fn required_str(args: &JsonMap<String, JsonValue>, key: &str) -> Result<String, String> {
    match args.get(key) {
        Some(JsonValue::String(value)) => Ok(value.clone()),
        Some(_) => Err(format!("argument \"{}\" must be a string", key)),
        None => Err(format!("needs argument \"{}\"", key)),
    }
}

fn optional_str(args: &JsonMap<String, JsonValue>, key: &str) -> Result<Option<String>, String> {
    match args.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(_) => required_str(args, key).map(Some),
    }
}

fn required_u64(args: &JsonMap<String, JsonValue>, key: &str) -> Result<u64, String> {
    match args.get(key) {
        Some(value) => value
            .as_u64()
            .ok_or_else(|| format!("argument \"{}\" must be a non-negative integer", key)),
        None => Err(format!("needs argument \"{}\"", key)),
    }
}

#[cfg(test)]
mod document_tests {
    use super::*;

    const MAIN: &str = r##"{
        "name": "main",
        "lines": [
            "#start",
            { "text": "Welcome.", "speaker": "Guide" },
            { "command": "set", "name": "gold", "expr": "10" },
            { "command": "jump", "label": "start", "when": "gold > 100" },
            { "command": "teleport", "to": "moon" },
            { "command": "wait", "ms": 5 },
            "Narration line"
        ]
    }"##;

    #[test]
    fn parses_every_line_shape() {
        let script = parse_script(MAIN, &CommandFactory::with_builtins()).expect("parse should pass");
        assert_eq!(script.name(), "main");
        assert_eq!(script.len(), 7);

        match script.line(1) {
            Some(ScriptLine::Text { content, metadata }) => {
                assert_eq!(content, "Welcome.");
                assert_eq!(metadata.speaker.as_deref(), Some("Guide"));
                assert_eq!(metadata.source_line, Some(1));
            }
            other => panic!("expected dialogue, got {:?}", other),
        }
        match script.line(2) {
            Some(ScriptLine::Command(command)) => assert_eq!(command.kind(), "set"),
            other => panic!("expected set, got {:?}", other),
        }
        assert!(matches!(script.line(4), Some(ScriptLine::Unknown)));
        assert!(matches!(script.line(6), Some(ScriptLine::Text { .. })));
    }

    #[test]
    fn bad_arguments_are_collected() {
        let source = r#"{
            "name": "broken",
            "lines": [
                { "command": "goto", "line": -1 },
                { "command": "call" },
                { "command": "set", "name": 3, "expr": "1" }
            ]
        }"#;
        let error = parse_script(source, &CommandFactory::with_builtins())
            .expect_err("bad arguments should fail");
        assert_eq!(error.code(), "PREPROCESS_FAILED");
        match error {
            PlayerError::Preprocessing { script, errors } => {
                assert_eq!(script, "broken");
                assert_eq!(errors.len(), 3);
                assert!(errors[1].contains("needs argument \"script\""));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let error = parse_script("{\"name\":", &CommandFactory::default())
            .expect_err("truncated json should fail");
        assert_eq!(error.code(), "SERIALIZATION");
    }

    #[test]
    fn empty_factory_turns_commands_into_unknown_lines() {
        let script = parse_script(MAIN, &CommandFactory::empty()).expect("parse should pass");
        assert!(matches!(script.line(2), Some(ScriptLine::Unknown)));
        assert!(!CommandFactory::empty().knows("set"));
        assert!(CommandFactory::default().knows("set"));
    }

    #[test]
    fn nameless_documents_are_rejected() {
        let error = parse_script(r#"{"name": " ", "lines": []}"#, &CommandFactory::default())
            .expect_err("blank name should fail");
        assert_eq!(error.code(), "VALIDATION");
    }
}
