use crate::utils::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Every external tool goes through this seam.
///
/// Implementations return `PortshiftError::ToolUnavailable` when the program
/// itself cannot be found, and `Ok` with a non-zero status when it ran and
/// failed. Callers rely on that distinction.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Starts a long-lived background process and returns its pid without waiting.
    async fn spawn(&self, program: &str, args: &[&str]) -> Result<u32>;
}

pub fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
