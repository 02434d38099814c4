use std::sync::Arc;

use sp_core::{CommandResult, PlayerError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::context::ExecutionContext;
use crate::events::{EventBus, PlayerEvent};
use crate::playback::PlaybackStateManager;
use crate::recovery::{ErrorRecoveryPolicy, RecoveryDecision};
use crate::registry::CommandRegistry;
use crate::script::{Command, CommandScope};
use crate::timeout::TimeoutManager;

/// Runs single commands through the timeout boundary and recovery policy.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    registry: Arc<CommandRegistry>,
    timeouts: Arc<TimeoutManager>,
    recovery: Arc<dyn ErrorRecoveryPolicy>,
    playback: Arc<PlaybackStateManager>,
    events: EventBus,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<CommandRegistry>,
        timeouts: Arc<TimeoutManager>,
        recovery: Arc<dyn ErrorRecoveryPolicy>,
        playback: Arc<PlaybackStateManager>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            timeouts,
            recovery,
            playback,
            events,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn timeouts(&self) -> &Arc<TimeoutManager> {
        &self.timeouts
    }

    /// Executes `command` at the context's current line.
    ///
    /// `Ok` carries either the command's own result or, when the policy
    /// skips a failure, a failed result that continues. `Err` means the
    /// failure escalated or the run was cancelled.
    pub async fn execute_command(
        &self,
        command: &Arc<dyn Command>,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, PlayerError> {
        let kind = command.kind().to_string();
        let metadata = self.registry.metadata(&kind).clone();
        let line = context.current_line_index();

        self.events.publish(PlayerEvent::CommandExecuting {
            kind: kind.clone(),
            line,
        });
        context.record_command();
        let waiting = metadata.wait_for_completion && self.playback.begin_waiting();

        let mut attempt = 0u32;
        let outcome = loop {
            let started = Instant::now();
            let mut scope = CommandScope::new(&mut *context);
            let result = {
                let scope = &mut scope;
                self.timeouts
                    .execute_with_timeout(&kind, metadata.base_timeout, cancel, move |boundary| {
                        command.execute(scope, boundary)
                    })
                    .await
            };
            let changed = scope.take_changes();
            let elapsed = started.elapsed();
            context.add_execution_time(elapsed);
            for name in changed {
                let value = context.variable(&name).cloned();
                self.events
                    .publish(PlayerEvent::VariableChanged { name, value });
            }

            let error = match result {
                Ok(result) if result.is_success => {
                    self.events.publish(PlayerEvent::CommandExecuted {
                        kind: kind.clone(),
                        line,
                        elapsed,
                    });
                    break Ok(result);
                }
                Ok(result) => result
                    .error
                    .clone()
                    .unwrap_or_else(|| {
                        PlayerError::command(
                            kind.clone(),
                            result
                                .error_message
                                .clone()
                                .unwrap_or_else(|| "command reported failure".to_string()),
                        )
                    }),
                Err(error) => error,
            };

            self.events.publish(PlayerEvent::CommandFailed {
                kind: kind.clone(),
                line,
                error: error.clone(),
            });

            match self.recovery.decide(&kind, &metadata, &error, attempt) {
                RecoveryDecision::Retry { delay } => {
                    attempt += 1;
                    warn!(
                        kind = %kind,
                        line,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        code = error.code(),
                        "retrying command"
                    );
                    self.events.publish(PlayerEvent::CommandRetrying {
                        kind: kind.clone(),
                        attempt,
                        delay,
                    });
                    tokio::select! {
                        _ = cancel.cancelled() => break Err(PlayerError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RecoveryDecision::Skip => {
                    warn!(kind = %kind, line, code = error.code(), "skipping failed command");
                    break Ok(CommandResult::failure(error));
                }
                RecoveryDecision::Escalate => {
                    if !matches!(error, PlayerError::Cancelled) {
                        error!(kind = %kind, line, code = error.code(), "command failure escalated");
                    }
                    break Err(error);
                }
            }
        };

        if waiting {
            self.playback.end_waiting();
        }
        outcome
    }
}
