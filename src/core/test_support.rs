use crate::domain::ports::{command_line, CommandOutput, CommandRunner};
use crate::utils::error::{PortshiftError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

pub fn output(status: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        status: Some(status),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failure(status: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        status: Some(status),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Replays scripted outputs per command line. Responses are consumed in order and the
/// last one repeats; unscripted commands succeed with empty output.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<HashMap<String, VecDeque<CommandOutput>>>>,
    missing: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
    spawn_pid: u32,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            spawn_pid: 4242,
            ..Default::default()
        }
    }

    pub fn on(&self, command: &str, response: CommandOutput) {
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn missing(&self, program: &str) {
        self.missing.lock().unwrap().insert(program.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == command).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        self.calls.lock().unwrap().push(line.clone());

        if self.missing.lock().unwrap().contains(program) {
            return Err(PortshiftError::ToolUnavailable {
                tool: program.to_string(),
            });
        }

        let mut responses = self.responses.lock().unwrap();
        let response = match responses.get_mut(&line) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(response.unwrap_or_else(|| output(0, "")))
    }

    async fn spawn(&self, program: &str, args: &[&str]) -> Result<u32> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("spawn {}", command_line(program, args)));

        if self.missing.lock().unwrap().contains(program) {
            return Err(PortshiftError::ToolUnavailable {
                tool: program.to_string(),
            });
        }
        Ok(self.spawn_pid)
    }
}
