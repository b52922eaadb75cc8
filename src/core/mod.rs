pub mod config_rewriter;
pub mod demux;
pub mod port_inspector;
pub mod readiness;
pub mod remediation;
pub mod report;
pub mod service_controller;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::domain::model::{PortBinding, PortStatus, ProcedureState, ServiceOutcome};
pub use crate::domain::ports::{CommandOutput, CommandRunner};
pub use crate::utils::error::Result;
