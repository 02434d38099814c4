use std::sync::Arc;

use sp_core::{CommandResult, PlayResult, PlayStatus, PlaybackState, PlayerError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::flow::FlowOutcome;
use super::ScriptPlayer;
use crate::context::ExecutionContext;
use crate::events::PlayerEvent;
use crate::preprocess::{classify_text, interpolate, preprocess};
use crate::script::{Script, ScriptLine};

enum LoopExit {
    Completed,
    Stopped,
}

/// What one executed line asks of the loop.
pub(super) enum StepOutcome {
    Continue,
    Stop,
    Complete,
}

impl ScriptPlayer {
    /// Plays `script` from line 0. Position, labels and call stack are reset;
    /// variables, breakpoints and counters carry over.
    pub async fn play(
        &self,
        script: Arc<Script>,
        cancel: CancellationToken,
    ) -> Result<PlayResult, PlayerError> {
        let _permit = self.acquire_play_guard().await?;
        self.begin_run();

        let preprocessed = {
            let mut context = self.context.lock().await;
            context.clear_call_stack();
            context.load_script(script);
            self.publish_position(&context);
            preprocess(
                &mut context,
                self.config.continue_on_error,
                self.config.max_preprocessing_errors,
            )
        };
        if let Err(error) = preprocessed {
            return Ok(self.fail_before_run(error));
        }
        Ok(self.run(cancel).await)
    }

    pub async fn play_named(
        &self,
        name: &str,
        cancel: CancellationToken,
    ) -> Result<PlayResult, PlayerError> {
        let script = self.loader.load_script(name).await?;
        self.play(script, cancel).await
    }

    /// Continues the loaded script from `index` without resetting anything.
    pub async fn play_from_line(
        &self,
        index: usize,
        cancel: CancellationToken,
    ) -> Result<PlayResult, PlayerError> {
        let _permit = self.acquire_play_guard().await?;
        let preprocessed = {
            let mut context = self.context.lock().await;
            let len = context.line_count();
            if context.script().is_none() {
                return Err(PlayerError::validation("no script is loaded"));
            }
            if index > len {
                return Err(PlayerError::validation(format!(
                    "line {} is outside 0..={}",
                    index, len
                )));
            }
            self.begin_run();
            context.set_current_line_index(index)?;
            self.publish_position(&context);
            if context.labels().is_empty() {
                preprocess(
                    &mut context,
                    self.config.continue_on_error,
                    self.config.max_preprocessing_errors,
                )
                .map(|_| ())
            } else {
                Ok(())
            }
        };
        if let Err(error) = preprocessed {
            return Ok(self.fail_before_run(error));
        }
        Ok(self.run(cancel).await)
    }

    /// Loads and preprocesses `script` at line 0 without running it, for
    /// stepping.
    pub async fn load(&self, script: Arc<Script>) -> Result<(), PlayerError> {
        let _permit = self.try_play_guard()?;
        let mut context = self.context.lock().await;
        context.clear_call_stack();
        context.load_script(script);
        self.publish_position(&context);
        preprocess(
            &mut context,
            self.config.continue_on_error,
            self.config.max_preprocessing_errors,
        )?;
        Ok(())
    }

    /// Executes exactly one line while no play is running. Returns `false`
    /// when there was nothing left to execute.
    pub async fn step_forward(&self) -> Result<bool, PlayerError> {
        let _permit = self.try_play_guard()?;
        let cancel = CancellationToken::new();
        let mut context = self.context.lock().await;
        if context.script().is_none() {
            return Err(PlayerError::validation("no script is loaded"));
        }
        if !context.can_continue() {
            if context.call_depth() == 0 {
                return Ok(false);
            }
            self.return_from_call(&mut context).await?;
            self.publish_position(&context);
            return Ok(true);
        }
        self.execute_line(&mut context, &cancel).await?;
        self.publish_position(&context);
        Ok(true)
    }

    fn begin_run(&self) {
        if self.playback.state().is_terminal() {
            self.playback.reset_to_idle();
        }
        self.playback.begin_loading();
    }

    fn fail_before_run(&self, error: PlayerError) -> PlayResult {
        error!(code = error.code(), "play aborted before the first line: {}", error);
        self.playback.fail();
        self.events.publish(PlayerEvent::PlayFinished {
            status: PlayStatus::Failure,
        });
        PlayResult {
            status: PlayStatus::Failure,
            lines_executed: 0,
            commands_executed: 0,
            elapsed_seconds: 0.0,
            error: Some(error),
        }
    }

    async fn run(&self, cancel: CancellationToken) -> PlayResult {
        let run_token = cancel.child_token();
        *self.run_token.lock() = Some(run_token.clone());
        *self.last_auto_save.lock() = Instant::now();
        let started = Instant::now();

        let (lines_before, commands_before, script_name) = {
            let context = self.context.lock().await;
            (
                context.lines_executed(),
                context.commands_executed(),
                context.script_name().unwrap_or_default().to_string(),
            )
        };

        let outcome = if self.playback.start_playing() {
            info!(script = %script_name, "play started");
            self.events.publish(PlayerEvent::ScriptStarted {
                script: script_name.clone(),
            });
            self.main_loop(&run_token).await
        } else {
            Ok(LoopExit::Stopped)
        };
        *self.run_token.lock() = None;

        let (status, error) = match outcome {
            Ok(LoopExit::Completed) => {
                self.playback.complete();
                (PlayStatus::Success, None)
            }
            Ok(LoopExit::Stopped) | Err(PlayerError::Cancelled) => {
                self.playback.stop();
                if cancel.is_cancelled() {
                    (PlayStatus::Cancelled, None)
                } else {
                    (PlayStatus::Stopped, None)
                }
            }
            Err(error) => {
                error!(script = %script_name, code = error.code(), "play failed: {}", error);
                self.playback.fail();
                (PlayStatus::Failure, Some(error))
            }
        };

        let (lines_after, commands_after) = {
            let context = self.context.lock().await;
            self.publish_position(&context);
            (context.lines_executed(), context.commands_executed())
        };
        let elapsed = started.elapsed();
        info!(
            script = %script_name,
            status = ?status,
            lines = lines_after - lines_before,
            elapsed_ms = elapsed.as_millis() as u64,
            "play finished"
        );
        self.events.publish(PlayerEvent::PlayFinished { status });

        PlayResult {
            status,
            lines_executed: lines_after - lines_before,
            commands_executed: commands_after - commands_before,
            elapsed_seconds: elapsed.as_secs_f64(),
            error,
        }
    }

    async fn main_loop(&self, cancel: &CancellationToken) -> Result<LoopExit, PlayerError> {
        let mut released_breakpoint: Option<usize> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(LoopExit::Stopped);
            }
            match self.playback.state() {
                PlaybackState::Paused => {
                    if !self.playback.wait_while_paused(cancel).await {
                        return Ok(LoopExit::Stopped);
                    }
                    continue;
                }
                PlaybackState::Stopped => return Ok(LoopExit::Stopped),
                PlaybackState::Failed => {
                    return Err(PlayerError::Internal(
                        "playback failed outside the run loop".to_string(),
                    ))
                }
                _ => {}
            }

            let outcome = {
                let mut context = self.context.lock().await;
                if !context.can_continue() {
                    if context.call_depth() == 0 {
                        return Ok(LoopExit::Completed);
                    }
                    self.return_from_call(&mut context).await?;
                    self.publish_position(&context);
                    continue;
                }

                let index = context.current_line_index();
                if self.config.pause_on_breakpoints
                    && context.has_breakpoint(index)
                    && released_breakpoint != Some(index)
                {
                    released_breakpoint = Some(index);
                    info!(line = index, "breakpoint hit");
                    self.events.publish(PlayerEvent::BreakpointHit { line: index });
                    self.playback.pause();
                    continue;
                }
                released_breakpoint = None;

                let outcome = self.execute_line(&mut context, cancel).await?;
                self.publish_position(&context);
                outcome
            };

            match outcome {
                StepOutcome::Continue => {}
                StepOutcome::Stop => return Ok(LoopExit::Stopped),
                StepOutcome::Complete => return Ok(LoopExit::Completed),
            }

            if !self.inter_line_delay(cancel).await {
                return Ok(LoopExit::Stopped);
            }
            self.auto_save_if_due().await;
        }
    }

    /// Dispatches the current line and applies its flow action.
    pub(super) async fn execute_line(
        &self,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, PlayerError> {
        let index = context.current_line_index();
        let Some(line) = context.current_line().cloned() else {
            return Ok(StepOutcome::Complete);
        };

        let result = match line {
            ScriptLine::Command(command) => {
                self.engine
                    .execute_command(&command, context, cancel)
                    .await?
            }
            ScriptLine::Text { content, metadata } => {
                let classified = classify_text(&content, metadata.speaker.as_deref());
                if classified.kind.is_rendered() {
                    let text = interpolate(classified.body, context.variables());
                    self.renderer
                        .render_text(classified.speaker, &text, classified.kind, cancel.clone())
                        .await?;
                    self.events.publish(PlayerEvent::TextRendered { line: index });
                }
                CommandResult::ok()
            }
            ScriptLine::Unknown => {
                warn!(line = index, "skipping unknown line");
                CommandResult::ok()
            }
        };
        context.record_line();

        match self.apply_flow(context, &result.flow).await {
            Ok(FlowOutcome::Advance) => {
                context.advance();
                Ok(StepOutcome::Continue)
            }
            Ok(FlowOutcome::Moved) => Ok(StepOutcome::Continue),
            Ok(FlowOutcome::Stop) => {
                context.advance();
                Ok(StepOutcome::Stop)
            }
            Ok(FlowOutcome::Complete) => Ok(StepOutcome::Complete),
            Err(error) if error.is_structural() => {
                warn!(
                    line = index,
                    action = result.flow.name(),
                    code = error.code(),
                    "flow action failed: {}",
                    error
                );
                self.events.publish(PlayerEvent::FlowError { line: index, error });
                context.advance();
                Ok(StepOutcome::Continue)
            }
            Err(error) => Err(error),
        }
    }

    /// Sleeps the configured delay scaled by speed. Returns `false` when
    /// cancelled during the wait.
    async fn inter_line_delay(&self, cancel: &CancellationToken) -> bool {
        let delay = self.config.line_delay();
        if delay.is_zero() || self.playback.is_fast_forwarding() {
            return !cancel.is_cancelled();
        }
        let scaled = self.playback.scaled_delay(delay);
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(scaled) => true,
        }
    }
}
