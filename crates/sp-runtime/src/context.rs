use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use sp_core::{ExecutionFrame, ExecutionSnapshot, PlayerError, Value, SNAPSHOT_SCHEMA_V1};

use crate::script::{Script, ScriptLine};

pub const DEFAULT_MAX_CALL_STACK_DEPTH: usize = 32;

/// Interpreter bookkeeping: position, variables, labels, breakpoints and the
/// call stack. Owned by one player.
#[derive(Debug)]
pub struct ExecutionContext {
    script: Option<Arc<Script>>,
    current_line_index: usize,
    variables: BTreeMap<String, Value>,
    labels: BTreeMap<String, usize>,
    breakpoints: BTreeSet<usize>,
    call_stack: Vec<ExecutionFrame>,
    max_call_stack_depth: usize,
    lines_executed: u64,
    commands_executed: u64,
    execution_time: Duration,
    playback_speed: f64,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALL_STACK_DEPTH)
    }
}

impl ExecutionContext {
    pub fn new(max_call_stack_depth: usize) -> Self {
        Self {
            script: None,
            current_line_index: 0,
            variables: BTreeMap::new(),
            labels: BTreeMap::new(),
            breakpoints: BTreeSet::new(),
            call_stack: Vec::new(),
            max_call_stack_depth,
            lines_executed: 0,
            commands_executed: 0,
            execution_time: Duration::ZERO,
            playback_speed: 1.0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.max_call_stack_depth);
    }

    pub fn script(&self) -> Option<&Arc<Script>> {
        self.script.as_ref()
    }

    pub fn script_name(&self) -> Option<&str> {
        self.script.as_deref().map(Script::name)
    }

    pub fn line_count(&self) -> usize {
        self.script.as_deref().map(Script::len).unwrap_or(0)
    }

    /// Switches to `script` at line 0. Labels belong to a single script, so the
    /// table is cleared; variables and the call stack are left alone.
    pub fn load_script(&mut self, script: Arc<Script>) {
        self.script = Some(script);
        self.current_line_index = 0;
        self.labels.clear();
    }

    pub fn current_line_index(&self) -> usize {
        self.current_line_index
    }

    pub fn set_current_line_index(&mut self, index: usize) -> Result<(), PlayerError> {
        let len = self.line_count();
        if index > len {
            return Err(PlayerError::InvalidJumpTarget { target: index, len });
        }
        self.current_line_index = index;
        Ok(())
    }

    pub fn current_line(&self) -> Option<&ScriptLine> {
        self.script
            .as_deref()
            .and_then(|script| script.line(self.current_line_index))
    }

    pub fn can_continue(&self) -> bool {
        match self.script.as_deref() {
            Some(script) => self.current_line_index < script.len(),
            None => false,
        }
    }

    /// Moves to the next line, never past the end of the script.
    pub fn advance(&mut self) {
        if self.current_line_index < self.line_count() {
            self.current_line_index += 1;
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    /// Rejects NaN and infinities, which a snapshot could not carry.
    pub fn set_variable(
        &mut self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<Option<Value>, PlayerError> {
        let name = name.into();
        if !value.is_finite() {
            return Err(PlayerError::validation(format!(
                "variable \"{}\" cannot hold a non-finite number",
                name
            )));
        }
        Ok(self.variables.insert(name, value))
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(name)
    }

    pub fn clear_variables(&mut self) {
        self.variables.clear();
    }

    pub fn replace_variables(&mut self, variables: BTreeMap<String, Value>) {
        self.variables = variables;
    }

    pub fn register_label(&mut self, name: impl Into<String>, index: usize) -> Result<(), PlayerError> {
        let name = name.into();
        if self.labels.contains_key(&name) {
            return Err(PlayerError::DuplicateLabel(name));
        }
        self.labels.insert(name, index);
        Ok(())
    }

    pub fn label_line_index(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    pub fn labels(&self) -> &BTreeMap<String, usize> {
        &self.labels
    }

    pub fn clear_labels(&mut self) {
        self.labels.clear();
    }

    pub fn add_breakpoint(&mut self, line: usize) -> bool {
        self.breakpoints.insert(line)
    }

    pub fn remove_breakpoint(&mut self, line: usize) -> bool {
        self.breakpoints.remove(&line)
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub fn has_breakpoint(&self, line: usize) -> bool {
        self.breakpoints.contains(&line)
    }

    pub fn breakpoints(&self) -> &BTreeSet<usize> {
        &self.breakpoints
    }

    pub fn push_frame(&mut self, frame: ExecutionFrame) -> Result<(), PlayerError> {
        if self.call_stack.len() >= self.max_call_stack_depth {
            return Err(PlayerError::StackOverflow {
                depth: self.call_stack.len(),
                max: self.max_call_stack_depth,
            });
        }
        self.call_stack.push(frame);
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Option<ExecutionFrame> {
        self.call_stack.pop()
    }

    pub fn clear_call_stack(&mut self) {
        self.call_stack.clear();
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn call_stack(&self) -> &[ExecutionFrame] {
        &self.call_stack
    }

    pub fn max_call_stack_depth(&self) -> usize {
        self.max_call_stack_depth
    }

    pub fn record_line(&mut self) {
        self.lines_executed += 1;
    }

    pub fn record_command(&mut self) {
        self.commands_executed += 1;
    }

    pub fn add_execution_time(&mut self, elapsed: Duration) {
        self.execution_time += elapsed;
    }

    pub fn lines_executed(&self) -> u64 {
        self.lines_executed
    }

    pub fn commands_executed(&self) -> u64 {
        self.commands_executed
    }

    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    pub fn playback_speed(&self) -> f64 {
        self.playback_speed
    }

    pub fn set_playback_speed(&mut self, speed: f64) {
        self.playback_speed = speed;
    }

    /// Fraction of the current script already passed, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        let len = self.line_count();
        if len == 0 {
            return 0.0;
        }
        self.current_line_index as f64 / len as f64
    }

    pub fn create_snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            schema_version: SNAPSHOT_SCHEMA_V1.to_string(),
            script_name: self.script_name().map(ToString::to_string),
            current_line_index: self.current_line_index,
            variables: self.variables.clone(),
            breakpoints: self.breakpoints.iter().copied().collect(),
            labels: self.labels.clone(),
            playback_speed: self.playback_speed,
            lines_executed: self.lines_executed,
            commands_executed: self.commands_executed,
            execution_time_secs: self.execution_time.as_secs_f64(),
            call_stack: self.call_stack.clone(),
        }
    }

    /// Restores every field from `snapshot`. The script is not part of the
    /// snapshot and must be resolved by name by the caller.
    pub fn restore_from_snapshot(
        &mut self,
        snapshot: ExecutionSnapshot,
        script: Option<Arc<Script>>,
    ) -> Result<(), PlayerError> {
        snapshot.validate()?;

        match (&snapshot.script_name, &script) {
            (Some(name), None) => return Err(PlayerError::ScriptNotFound(name.clone())),
            (Some(name), Some(script)) if script.name() != name => {
                return Err(PlayerError::validation(format!(
                    "snapshot script \"{}\" does not match resolved script \"{}\"",
                    name,
                    script.name()
                )));
            }
            (None, Some(_)) => {
                return Err(PlayerError::validation(
                    "snapshot has no script but one was supplied",
                ));
            }
            _ => {}
        }

        let len = script.as_deref().map(Script::len).unwrap_or(0);
        if snapshot.current_line_index > len {
            return Err(PlayerError::validation(format!(
                "snapshot line {} is past the end of a {}-line script",
                snapshot.current_line_index, len
            )));
        }
        if snapshot.call_stack.len() > self.max_call_stack_depth {
            return Err(PlayerError::validation(format!(
                "snapshot call stack depth {} exceeds the limit of {}",
                snapshot.call_stack.len(),
                self.max_call_stack_depth
            )));
        }

        self.script = script;
        self.current_line_index = snapshot.current_line_index;
        self.variables = snapshot.variables;
        self.labels = snapshot.labels;
        self.breakpoints = snapshot.breakpoints.into_iter().collect();
        self.call_stack = snapshot.call_stack;
        self.lines_executed = snapshot.lines_executed;
        self.commands_executed = snapshot.commands_executed;
        self.execution_time = Duration::from_secs_f64(snapshot.execution_time_secs);
        self.playback_speed = snapshot.playback_speed;
        Ok(())
    }
}
