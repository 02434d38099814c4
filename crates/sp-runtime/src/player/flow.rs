use sp_core::{ExecutionFrame, FlowAction, FrameType, PlayerError};
use tracing::{debug, info};

use super::ScriptPlayer;
use crate::config::ReturnAtRoot;
use crate::context::ExecutionContext;
use crate::events::PlayerEvent;
use crate::preprocess::preprocess;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FlowOutcome {
    /// Position untouched; the loop moves to the next line.
    Advance,
    /// Position or stack already changed.
    Moved,
    Stop,
    Complete,
}

impl ScriptPlayer {
    /// Interprets one flow action. Errors leave the position and stack as
    /// they were.
    pub(super) async fn apply_flow(
        &self,
        context: &mut ExecutionContext,
        flow: &FlowAction,
    ) -> Result<FlowOutcome, PlayerError> {
        match flow {
            FlowAction::Continue => Ok(FlowOutcome::Advance),
            FlowAction::JumpToLine { line } => {
                let len = context.line_count();
                if *line >= len {
                    return Err(PlayerError::InvalidJumpTarget { target: *line, len });
                }
                context.set_current_line_index(*line)?;
                Ok(FlowOutcome::Moved)
            }
            FlowAction::JumpToLabel { label } => {
                let index = context
                    .label_line_index(label)
                    .ok_or_else(|| PlayerError::MissingLabel(label.clone()))?;
                // label lines render nothing, so land after them
                context.set_current_line_index(index + 1)?;
                Ok(FlowOutcome::Moved)
            }
            FlowAction::Stop => {
                self.playback.stop();
                Ok(FlowOutcome::Stop)
            }
            FlowAction::Return => {
                if context.call_depth() == 0 {
                    return match self.config.return_at_root {
                        ReturnAtRoot::Complete => Ok(FlowOutcome::Complete),
                        ReturnAtRoot::Error => Err(PlayerError::validation(
                            "return with an empty call stack",
                        )),
                    };
                }
                self.return_from_call(context).await?;
                Ok(FlowOutcome::Moved)
            }
            FlowAction::CallScript { script } => {
                self.call_script(context, script).await?;
                Ok(FlowOutcome::Moved)
            }
        }
    }

    pub(super) async fn call_script(
        &self,
        context: &mut ExecutionContext,
        name: &str,
    ) -> Result<(), PlayerError> {
        let depth = context.call_depth();
        let max = context.max_call_stack_depth();
        if depth >= max {
            return Err(PlayerError::StackOverflow { depth, max });
        }
        let Some(caller) = context.script().cloned() else {
            return Err(PlayerError::validation("no script is loaded"));
        };
        let target = self.loader.load_script(name).await?;

        let call_line_index = context.current_line_index();
        let saved_labels = context.labels().clone();
        context.push_frame(ExecutionFrame {
            frame_type: FrameType::ScriptCall,
            script_name: caller.name().to_string(),
            call_line_index,
            return_line_index: call_line_index + 1,
            variables: context.variables().clone(),
        })?;
        context.load_script(target);

        if let Err(error) = preprocess(
            context,
            self.config.continue_on_error,
            self.config.max_preprocessing_errors,
        ) {
            context.pop_frame();
            context.load_script(caller);
            for (label, index) in saved_labels {
                context.register_label(label, index)?;
            }
            context.set_current_line_index(call_line_index)?;
            return Err(error);
        }

        info!(
            from = caller.name(),
            to = name,
            depth = context.call_depth(),
            "entered script"
        );
        self.events.publish(PlayerEvent::ScriptStarted {
            script: name.to_string(),
        });
        Ok(())
    }

    /// Pops the top frame and resumes its caller with the caller's variables.
    pub(super) async fn return_from_call(
        &self,
        context: &mut ExecutionContext,
    ) -> Result<(), PlayerError> {
        let Some(frame) = context.pop_frame() else {
            return Err(PlayerError::Internal("return with an empty call stack".to_string()));
        };
        let script = match self.loader.load_script(&frame.script_name).await {
            Ok(script) => script,
            Err(error) => {
                context.push_frame(frame)?;
                return Err(error);
            }
        };

        let from = context.script_name().unwrap_or_default().to_string();
        context.load_script(script);
        preprocess(context, true, self.config.max_preprocessing_errors)?;
        context.set_current_line_index(frame.return_line_index)?;
        context.replace_variables(frame.variables);

        debug!(
            from = %from,
            to = %frame.script_name,
            line = frame.return_line_index,
            depth = context.call_depth(),
            "returned to caller"
        );
        Ok(())
    }
}
