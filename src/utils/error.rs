use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortshiftError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid rewrite pattern: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Required tool '{tool}' is not available on this host")]
    ToolUnavailable { tool: String },

    #[error("Command `{command}` failed (status {status:?}): {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Configuration check `{command}` rejected the rewritten configuration: {output}")]
    ValidationFailed { command: String, output: String },
}

impl PortshiftError {
    pub fn user_friendly_message(&self) -> String {
        match self {
            PortshiftError::ValidationFailed { command, .. } => format!(
                "Rewritten proxy configuration did not pass `{}`; original files were restored",
                command
            ),
            PortshiftError::ToolUnavailable { tool } => {
                format!("'{}' is not installed or not on PATH", tool)
            }
            PortshiftError::TomlError(_)
            | PortshiftError::ConfigError { .. }
            | PortshiftError::InvalidConfigValueError { .. } => {
                format!("Configuration problem: {}", self)
            }
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            PortshiftError::ValidationFailed { .. } => {
                "Run the configuration check by hand, fix the reported line, then re-run portshift"
            }
            PortshiftError::ToolUnavailable { .. } => {
                "Install the missing tool or adjust the command in the configuration file"
            }
            PortshiftError::TomlError(_)
            | PortshiftError::ConfigError { .. }
            | PortshiftError::InvalidConfigValueError { .. } => {
                "Check the configuration file against the documented [ports]/[services]/[proxy]/[demux]/[timing] sections"
            }
            PortshiftError::IoError(_) => "Check file permissions; portshift normally runs as root",
            PortshiftError::PatternError(_) => "Escape special characters in custom rewrite rules",
            _ => "Re-run with --verbose for the full command log",
        }
    }

    /// Process exit code: 1 for the validation hard-fail, 2 for unusable configuration.
    pub fn exit_code(&self) -> i32 {
        match self {
            PortshiftError::TomlError(_)
            | PortshiftError::ConfigError { .. }
            | PortshiftError::InvalidConfigValueError { .. }
            | PortshiftError::PatternError(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, PortshiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let validation = PortshiftError::ValidationFailed {
            command: "nginx -t".to_string(),
            output: "unexpected \"}\"".to_string(),
        };
        assert_eq!(validation.exit_code(), 1);

        let config = PortshiftError::ConfigError {
            message: "bad".to_string(),
        };
        assert_eq!(config.exit_code(), 2);
    }

    #[test]
    fn test_validation_message_mentions_restore() {
        let e = PortshiftError::ValidationFailed {
            command: "nginx -t".to_string(),
            output: String::new(),
        };
        assert!(e.user_friendly_message().contains("restored"));
    }
}
