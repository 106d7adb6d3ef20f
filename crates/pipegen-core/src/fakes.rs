//! Scripted executor fake (testing only)
//!
//! `RecordingExecutor` records every command it is asked to run and answers
//! from a list of argv-prefix rules, so callers that shell out can be tested
//! without spawning processes.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::command::{Command, CommandExecutor, CommandOutput};
use crate::error::ExecResult;

#[derive(Debug, Default)]
pub struct RecordingExecutor {
    rules: Mutex<Vec<(Vec<String>, CommandOutput)>>,
    calls: Mutex<Vec<Command>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands whose argv starts with `prefix` with `output`.
    ///
    /// Later rules take precedence over earlier ones. Unmatched commands
    /// succeed with empty output.
    pub fn on<I, S>(&self, prefix: I, output: CommandOutput) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix = prefix.into_iter().map(Into::into).collect();
        self.rules.lock().unwrap().push((prefix, output));
        self
    }

    /// Commands run so far in call order.
    pub fn calls(&self) -> Vec<Command> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run(&self, command: &Command) -> ExecResult<CommandOutput> {
        self.calls.lock().unwrap().push(command.clone());
        let rules = self.rules.lock().unwrap();
        let output = rules
            .iter()
            .rev()
            .find(|(prefix, _)| command.argv.starts_with(prefix))
            .map(|(_, output)| output.clone())
            .unwrap_or_default();
        Ok(output)
    }
}
