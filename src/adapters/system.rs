use crate::domain::ports::{command_line, CommandOutput, CommandRunner};
use crate::utils::error::{PortshiftError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::process::Command;

/// Runs host tools through `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> PortshiftError {
    if e.kind() == ErrorKind::NotFound {
        PortshiftError::ToolUnavailable {
            tool: program.to_string(),
        }
    } else {
        PortshiftError::IoError(e)
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        tracing::debug!("$ {}", command_line(program, args));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error(program, e))?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            tracing::debug!(
                "{} exited with {:?}: {}",
                program,
                result.status,
                result.stderr.trim()
            );
        }

        Ok(result)
    }

    async fn spawn(&self, program: &str, args: &[&str]) -> Result<u32> {
        tracing::debug!("$ {} &", command_line(program, args));

        // Own process group so the daemon survives the operator's terminal closing.
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| spawn_error(program, e))?;

        child.id().ok_or_else(|| PortshiftError::CommandFailed {
            command: command_line(program, args),
            status: None,
            stderr: "process exited before its pid could be read".to_string(),
        })
    }
}
