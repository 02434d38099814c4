use std::fmt::{self, Display};

use sp_core::PlayerError;

/// Error reported through the `RESULT:ERROR` protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CliError {
    pub(crate) code: &'static str,
    pub(crate) message: String,
}

impl CliError {
    pub(crate) fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<PlayerError> for CliError {
    fn from(error: PlayerError) -> Self {
        Self::new(error.code(), error.to_string())
    }
}

fn map_error(code: &'static str, error: impl Display) -> CliError {
    CliError::new(code, error.to_string())
}

pub(crate) fn emit_error(error: CliError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    println!(
        "ERROR_MSG_JSON:{}",
        serde_json::to_string(&error.message).unwrap_or_else(|_| "\"Unknown error\"".to_string())
    );
    1
}

pub(crate) fn map_cli_runtime(error: std::io::Error) -> CliError {
    map_error("CLI_RUNTIME", error)
}

pub(crate) fn map_cli_state_read(error: std::io::Error) -> PlayerError {
    PlayerError::Persistence(format!("cannot read state file: {}", error))
}

pub(crate) fn map_cli_state_write(error: std::io::Error) -> PlayerError {
    PlayerError::Persistence(format!("cannot write state file: {}", error))
}
