use std::time::Duration;

use thiserror::Error;

/// Every failure the player can surface.
///
/// Variants map onto stable `code()` strings so hosts can branch on them without
/// matching on message text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlayerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("preprocessing failed for script \"{script}\": {}", errors.join("; "))]
    Preprocessing { script: String, errors: Vec<String> },

    #[error("label \"{0}\" is already registered")]
    DuplicateLabel(String),

    #[error("label \"{0}\" is not registered")]
    MissingLabel(String),

    #[error("jump target line {target} is outside 0..{len}")]
    InvalidJumpTarget { target: usize, len: usize },

    #[error("call stack depth {depth} reached the limit of {max}")]
    StackOverflow { depth: usize, max: usize },

    #[error("script \"{0}\" was not found")]
    ScriptNotFound(String),

    #[error("command \"{kind}\" timed out after {after:?}")]
    Timeout { kind: String, after: Duration },

    #[error("command \"{kind}\" failed: {message}")]
    Command {
        kind: String,
        message: String,
        retryable: bool,
    },

    #[error("execution was cancelled")]
    Cancelled,

    #[error("a play request is already active")]
    AlreadyPlaying,

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlayerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn command(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            kind: kind.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable_command(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            kind: kind.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Preprocessing { .. } => "PREPROCESS_FAILED",
            Self::DuplicateLabel(_) => "CONTEXT_DUPLICATE_LABEL",
            Self::MissingLabel(_) => "FLOW_MISSING_LABEL",
            Self::InvalidJumpTarget { .. } => "FLOW_INVALID_JUMP_TARGET",
            Self::StackOverflow { .. } => "CONTEXT_STACK_OVERFLOW",
            Self::ScriptNotFound(_) => "LOADER_SCRIPT_NOT_FOUND",
            Self::Timeout { .. } => "TIMEOUT_EXCEEDED",
            Self::Command { .. } => "COMMAND_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::AlreadyPlaying => "PLAYER_BUSY",
            Self::Persistence(_) => "PERSISTENCE",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Timeouts and commands that flag themselves as transient may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Command { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Structural flow errors leave the player running at a well-defined position.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::MissingLabel(_)
                | Self::InvalidJumpTarget { .. }
                | Self::StackOverflow { .. }
                | Self::ScriptNotFound(_)
        )
    }
}

impl From<serde_json::Error> for PlayerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
