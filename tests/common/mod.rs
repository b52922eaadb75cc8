#![allow(dead_code)]

use async_trait::async_trait;
use portshift::domain::ports::{command_line, CommandOutput, CommandRunner};
use portshift::Result;
use std::collections::{HashMap, VecDeque};
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

/// `ss -H -lntup` line for a tcp listener.
pub fn ss_line(port: u16, process: &str, pid: u32) -> String {
    format!(
        "tcp   LISTEN 0      511          0.0.0.0:{}        0.0.0.0:*    users:((\"{}\",pid={},fd=6))\n",
        port, process, pid
    )
}

/// Host double: scripted outputs per command line, consumed in order with the last one
/// repeating. Unscripted commands succeed silently.
#[derive(Clone, Default)]
pub struct MockHost {
    responses: Arc<Mutex<HashMap<String, VecDeque<CommandOutput>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, command: &str, response: CommandOutput) {
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == command).count()
    }
}

#[async_trait]
impl CommandRunner for MockHost {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        self.calls.lock().unwrap().push(line.clone());

        let mut responses = self.responses.lock().unwrap();
        let response = match responses.get_mut(&line) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(response.unwrap_or_else(|| output(0, "")))
    }

    async fn spawn(&self, program: &str, args: &[&str]) -> Result<u32> {
        let line = command_line(program, args);
        self.calls.lock().unwrap().push(format!("spawn {}", line));
        Ok(31337)
    }
}
