pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, ReportFormat};

pub use adapters::SystemRunner;
pub use config::PortshiftConfig;
pub use crate::core::{remediation::Remediator, report::Report};
pub use utils::error::{PortshiftError, Result};
