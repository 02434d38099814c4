use std::time::Duration;

use async_trait::async_trait;
use sp_core::{CommandResult, PlayerError};
use sp_runtime::preprocess::{interpolate, is_valid_label_name};
use sp_runtime::{Command, CommandMetadata, CommandRegistry, CommandScope};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::expr::{check_syntax, evaluate, evaluate_condition};

/// Upper bound on a single `wait`; longer waits are split into several lines.
pub const MAX_WAIT_MS: u64 = 600_000;

/// Registry with metadata for every built-in kind.
pub fn builtin_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry
        .register("jump", CommandMetadata::default().no_retry().critical())
        .register("goto", CommandMetadata::default().no_retry().critical())
        .register("call", CommandMetadata::default().no_retry().critical())
        .register("return", CommandMetadata::default().no_retry().critical())
        .register("stop", CommandMetadata::default().no_retry())
        .register("set", CommandMetadata::default().no_retry())
        .register("echo", CommandMetadata::default().no_retry())
        .register(
            "wait",
            CommandMetadata::with_timeout(Duration::from_millis(MAX_WAIT_MS + 5_000))
                .waiting()
                .no_retry(),
        );
    registry
}

/// `jump {label, when?}`: jumps to a label, optionally only when `when` holds.
#[derive(Debug, Clone)]
pub struct JumpCommand {
    pub label: String,
    pub when: Option<String>,
}

#[async_trait]
impl Command for JumpCommand {
    fn kind(&self) -> &str {
        "jump"
    }

    fn validate(&self) -> Result<(), String> {
        if !is_valid_label_name(&self.label) {
            return Err(format!("has an invalid label \"{}\"", self.label));
        }
        match &self.when {
            Some(when) => check_syntax(when),
            None => Ok(()),
        }
    }

    async fn execute(
        &self,
        scope: &mut CommandScope<'_>,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        if let Some(when) = &self.when {
            if !evaluate_condition(when, scope.variables())? {
                return Ok(CommandResult::ok());
            }
        }
        Ok(CommandResult::jump_to_label(self.label.clone()))
    }
}

/// `goto {line}`: absolute jump inside the current script.
#[derive(Debug, Clone)]
pub struct GotoCommand {
    pub line: usize,
}

#[async_trait]
impl Command for GotoCommand {
    fn kind(&self) -> &str {
        "goto"
    }

    async fn execute(
        &self,
        _scope: &mut CommandScope<'_>,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        Ok(CommandResult::jump_to_line(self.line))
    }
}

#[derive(Debug, Clone)]
pub struct CallCommand {
    pub script: String,
}

#[async_trait]
impl Command for CallCommand {
    fn kind(&self) -> &str {
        "call"
    }

    fn validate(&self) -> Result<(), String> {
        if self.script.trim().is_empty() {
            return Err("needs a script name".to_string());
        }
        Ok(())
    }

    async fn execute(
        &self,
        _scope: &mut CommandScope<'_>,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        Ok(CommandResult::call_script(self.script.clone()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReturnCommand;

#[async_trait]
impl Command for ReturnCommand {
    fn kind(&self) -> &str {
        "return"
    }

    async fn execute(
        &self,
        _scope: &mut CommandScope<'_>,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        Ok(CommandResult::return_to_caller())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StopCommand;

#[async_trait]
impl Command for StopCommand {
    fn kind(&self) -> &str {
        "stop"
    }

    async fn execute(
        &self,
        _scope: &mut CommandScope<'_>,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        Ok(CommandResult::stop())
    }
}

/// `set {name, expr}`: evaluates `expr` with rhai and stores the result.
#[derive(Debug, Clone)]
pub struct SetCommand {
    pub name: String,
    pub expr: String,
}

#[async_trait]
impl Command for SetCommand {
    fn kind(&self) -> &str {
        "set"
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("needs a variable name".to_string());
        }
        check_syntax(&self.expr)
    }

    async fn execute(
        &self,
        scope: &mut CommandScope<'_>,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        let value = evaluate(&self.expr, scope.variables())?;
        scope.set_variable(self.name.clone(), value.clone())?;
        Ok(CommandResult::value(value))
    }
}

/// `wait {ms}`: sleeps unless the boundary is cancelled first.
#[derive(Debug, Clone, Copy)]
pub struct WaitCommand {
    pub ms: u64,
}

#[async_trait]
impl Command for WaitCommand {
    fn kind(&self) -> &str {
        "wait"
    }

    fn validate(&self) -> Result<(), String> {
        if self.ms > MAX_WAIT_MS {
            return Err(format!("waits longer than {} ms", MAX_WAIT_MS));
        }
        Ok(())
    }

    async fn execute(
        &self,
        _scope: &mut CommandScope<'_>,
        cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(PlayerError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(self.ms)) => Ok(CommandResult::ok()),
        }
    }
}

/// `echo {text}`: logs the interpolated text; no effect on the script.
#[derive(Debug, Clone)]
pub struct EchoCommand {
    pub text: String,
}

#[async_trait]
impl Command for EchoCommand {
    fn kind(&self) -> &str {
        "echo"
    }

    async fn execute(
        &self,
        scope: &mut CommandScope<'_>,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        let text = interpolate(&self.text, scope.variables());
        info!(
            script = scope.script_name().unwrap_or_default(),
            line = scope.line_index(),
            "echo: {}",
            text
        );
        Ok(CommandResult::ok())
    }
}
