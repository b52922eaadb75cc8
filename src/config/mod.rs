pub mod toml_config;

pub use toml_config::PortshiftConfig;

#[cfg(feature = "cli")]
use clap::{Parser, ValueEnum};

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "portshift")]
#[command(about = "Move the reverse proxy off the public port and put sslh in front of it")]
pub struct CliConfig {
    /// Optional TOML file overriding the built-in deployment constants
    #[arg(short, long)]
    pub config: Option<String>,

    /// Show what would change without stopping services or writing files
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub format: ReportFormat,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    pub fn load(&self) -> crate::Result<PortshiftConfig> {
        match &self.config {
            Some(path) => PortshiftConfig::from_file(path),
            None => Ok(PortshiftConfig::default()),
        }
    }
}
