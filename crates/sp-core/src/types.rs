use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PlayerError;
use crate::value::Value;

pub const SNAPSHOT_SCHEMA_V1: &str = "execution-snapshot.v1";

/// Where the interpreter goes after a line finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FlowAction {
    Continue,
    JumpToLine { line: usize },
    JumpToLabel { label: String },
    Stop,
    Return,
    CallScript { script: String },
}

impl FlowAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::JumpToLine { .. } => "jumpToLine",
            Self::JumpToLabel { .. } => "jumpToLabel",
            Self::Stop => "stop",
            Self::Return => "return",
            Self::CallScript { .. } => "callScript",
        }
    }
}

/// Outcome of executing one line.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub is_success: bool,
    pub flow: FlowAction,
    pub error_message: Option<String>,
    pub error: Option<PlayerError>,
    pub return_value: Option<Value>,
}

impl CommandResult {
    fn with_flow(flow: FlowAction) -> Self {
        Self {
            is_success: true,
            flow,
            error_message: None,
            error: None,
            return_value: None,
        }
    }

    pub fn ok() -> Self {
        Self::with_flow(FlowAction::Continue)
    }

    pub fn value(value: Value) -> Self {
        Self {
            return_value: Some(value),
            ..Self::ok()
        }
    }

    pub fn jump_to_line(line: usize) -> Self {
        Self::with_flow(FlowAction::JumpToLine { line })
    }

    pub fn jump_to_label(label: impl Into<String>) -> Self {
        Self::with_flow(FlowAction::JumpToLabel {
            label: label.into(),
        })
    }

    pub fn stop() -> Self {
        Self::with_flow(FlowAction::Stop)
    }

    pub fn return_to_caller() -> Self {
        Self::with_flow(FlowAction::Return)
    }

    pub fn call_script(script: impl Into<String>) -> Self {
        Self::with_flow(FlowAction::CallScript {
            script: script.into(),
        })
    }

    /// A failed line; the player still advances with `Continue`.
    pub fn failure(error: PlayerError) -> Self {
        Self {
            is_success: false,
            flow: FlowAction::Continue,
            error_message: Some(error.to_string()),
            error: Some(error),
            return_value: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Waiting,
    Stopped,
    Completed,
    Failed,
}

impl PlaybackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Waiting => "waiting",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameType {
    ScriptCall,
    SubroutineCall,
    Loop,
    Conditional,
    TryCatch,
}

/// Call-site record pushed when control enters another script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFrame {
    pub frame_type: FrameType,
    pub script_name: String,
    pub call_line_index: usize,
    pub return_line_index: usize,
    pub variables: BTreeMap<String, Value>,
}

/// Classification of a text line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentKind {
    Label,
    Comment,
    Empty,
    Dialogue,
    Narration,
}

impl ContentKind {
    pub fn is_rendered(self) -> bool {
        matches!(self, Self::Dialogue | Self::Narration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayStatus {
    Success,
    Stopped,
    Cancelled,
    Failure,
}

/// Record returned by every play request.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayResult {
    pub status: PlayStatus,
    pub lines_executed: u64,
    pub commands_executed: u64,
    pub elapsed_seconds: f64,
    pub error: Option<PlayerError>,
}

impl PlayResult {
    pub fn is_success(&self) -> bool {
        self.status == PlayStatus::Success
    }
}

/// Serializable projection of the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub schema_version: String,
    pub script_name: Option<String>,
    pub current_line_index: usize,
    pub variables: BTreeMap<String, Value>,
    pub breakpoints: Vec<usize>,
    pub labels: BTreeMap<String, usize>,
    pub playback_speed: f64,
    pub lines_executed: u64,
    pub commands_executed: u64,
    pub execution_time_secs: f64,
    pub call_stack: Vec<ExecutionFrame>,
}

impl ExecutionSnapshot {
    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.schema_version != SNAPSHOT_SCHEMA_V1 {
            return Err(PlayerError::validation(format!(
                "unsupported snapshot schema \"{}\"",
                self.schema_version
            )));
        }
        if !(self.execution_time_secs >= 0.0) {
            return Err(PlayerError::validation(
                "snapshot execution time must be non-negative",
            ));
        }
        if !(self.playback_speed > 0.0) {
            return Err(PlayerError::validation(
                "snapshot playback speed must be positive",
            ));
        }
        Ok(())
    }
}
