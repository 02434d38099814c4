use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sp_core::{CommandResult, PlayerError, Value};
use tokio_util::sync::CancellationToken;

use crate::script::{Command, CommandScope, Script, ScriptLine};

/// Returns a fixed result.
#[derive(Debug)]
pub(crate) struct FixedCommand {
    pub(crate) kind: String,
    pub(crate) result: CommandResult,
}

pub(crate) fn fixed(kind: &str, result: CommandResult) -> ScriptLine {
    ScriptLine::command(FixedCommand {
        kind: kind.to_string(),
        result,
    })
}

#[async_trait]
impl Command for FixedCommand {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(
        &self,
        _scope: &mut CommandScope<'_>,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        Ok(self.result.clone())
    }
}

/// Sleeps, observing the boundary token.
#[derive(Debug)]
pub(crate) struct SleepCommand {
    pub(crate) duration: Duration,
}

pub(crate) fn sleep(duration: Duration) -> ScriptLine {
    ScriptLine::command(SleepCommand { duration })
}

#[async_trait]
impl Command for SleepCommand {
    fn kind(&self) -> &str {
        "sleep"
    }

    async fn execute(
        &self,
        _scope: &mut CommandScope<'_>,
        cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(PlayerError::Cancelled),
            _ = tokio::time::sleep(self.duration) => Ok(CommandResult::ok()),
        }
    }
}

/// Fails with `error` for the first `failures` calls, then succeeds.
#[derive(Debug)]
pub(crate) struct FlakyCommand {
    pub(crate) kind: String,
    pub(crate) failures: u32,
    pub(crate) error: PlayerError,
    pub(crate) calls: Arc<AtomicU32>,
}

impl FlakyCommand {
    pub(crate) fn new(kind: &str, failures: u32, error: PlayerError) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                kind: kind.to_string(),
                failures,
                error,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl Command for FlakyCommand {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(
        &self,
        _scope: &mut CommandScope<'_>,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(self.error.clone());
        }
        Ok(CommandResult::ok())
    }
}

/// Writes one variable.
#[derive(Debug)]
pub(crate) struct SetCommand {
    pub(crate) name: String,
    pub(crate) value: Value,
}

pub(crate) fn set(name: &str, value: impl Into<Value>) -> ScriptLine {
    ScriptLine::command(SetCommand {
        name: name.to_string(),
        value: value.into(),
    })
}

#[async_trait]
impl Command for SetCommand {
    fn kind(&self) -> &str {
        "set"
    }

    async fn execute(
        &self,
        scope: &mut CommandScope<'_>,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        scope.set_variable(self.name.clone(), self.value.clone())?;
        Ok(CommandResult::ok())
    }
}

/// Always rejected by preprocessing.
#[derive(Debug)]
pub(crate) struct InvalidCommand;

#[async_trait]
impl Command for InvalidCommand {
    fn kind(&self) -> &str {
        "invalid"
    }

    fn validate(&self) -> Result<(), String> {
        Err("missing required argument".to_string())
    }

    async fn execute(
        &self,
        _scope: &mut CommandScope<'_>,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        Ok(CommandResult::ok())
    }
}

pub(crate) fn jump(label: &str) -> ScriptLine {
    fixed("jump", CommandResult::jump_to_label(label))
}

pub(crate) fn goto(line: usize) -> ScriptLine {
    fixed("goto", CommandResult::jump_to_line(line))
}

pub(crate) fn call(script: &str) -> ScriptLine {
    fixed("call", CommandResult::call_script(script))
}

pub(crate) fn stop() -> ScriptLine {
    fixed("stop", CommandResult::stop())
}

pub(crate) fn ret() -> ScriptLine {
    fixed("return", CommandResult::return_to_caller())
}

pub(crate) fn script(name: &str, lines: Vec<ScriptLine>) -> Arc<Script> {
    Arc::new(Script::new(name, lines))
}

pub(crate) fn narration(count: usize) -> Vec<ScriptLine> {
    (0..count)
        .map(|index| ScriptLine::text(format!("line {}", index)))
        .collect()
}
