use crate::core::verifier::Verification;
use crate::domain::model::{DemuxActivation, PortStatus, ProbeResult, ProcedureState};
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortReport {
    pub role: String,
    pub port: u16,
    pub status: PortStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub states: Vec<ProcedureState>,
    pub actions: Vec<String>,
    pub rewritten_files: Vec<PathBuf>,
    pub ports: Vec<PortReport>,
    pub demux_service: String,
    pub demux_active: bool,
    pub demux_activation: Option<DemuxActivation>,
    pub probes: Vec<ProbeResult>,
    pub warnings: Vec<String>,
    /// Dry-run only: what a real run would do.
    pub plan: Vec<String>,
}

impl Report {
    pub fn new(dry_run: bool, demux_service: impl Into<String>) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            states: vec![ProcedureState::Start],
            actions: Vec::new(),
            rewritten_files: Vec::new(),
            ports: Vec::new(),
            demux_service: demux_service.into(),
            demux_active: false,
            demux_activation: None,
            probes: Vec::new(),
            warnings: Vec::new(),
            plan: Vec::new(),
        }
    }

    pub fn state(&self) -> ProcedureState {
        self.states.last().copied().unwrap_or(ProcedureState::Start)
    }

    pub fn advance(&mut self, state: ProcedureState) {
        tracing::debug!("state: {:?} -> {:?}", self.state(), state);
        self.states.push(state);
    }

    pub fn note(&mut self, action: impl Into<String>) {
        self.actions.push(action.into());
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!("⚠️ {}", warning);
        self.warnings.push(warning);
    }

    pub fn apply_verification(&mut self, verification: Verification) {
        self.ports = verification.ports;
        self.demux_active = verification.demux_active;
        self.probes = verification.probes;
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let title = if self.dry_run {
            "portshift plan (dry run)"
        } else {
            "portshift report"
        };
        let _ = writeln!(out, "==== {} ====", title);
        let _ = writeln!(out, "started:  {}", self.started_at.to_rfc3339());
        if let Some(finished) = self.finished_at {
            let _ = writeln!(out, "finished: {}", finished.to_rfc3339());
        }
        let path: Vec<String> = self.states.iter().map(|s| format!("{:?}", s)).collect();
        let _ = writeln!(out, "state:    {}", path.join(" -> "));

        if !self.plan.is_empty() {
            out.push_str("\nplan:\n");
            for step in &self.plan {
                for (i, line) in step.lines().enumerate() {
                    let prefix = if i == 0 { "  - " } else { "      " };
                    let _ = writeln!(out, "{}{}", prefix, line);
                }
            }
        }

        if !self.actions.is_empty() {
            out.push_str("\nactions:\n");
            for action in &self.actions {
                let _ = writeln!(out, "  - {}", action);
            }
        }

        if !self.ports.is_empty() {
            out.push_str("\nports:\n");
            for port in &self.ports {
                let protocols: Vec<String> =
                    port.status.protocols().iter().map(|p| p.to_string()).collect();
                let protocols = if protocols.is_empty() {
                    "tcp".to_string()
                } else {
                    protocols.join("+")
                };
                let _ = writeln!(
                    out,
                    "  {:<10} {:>5}/{:<7}  {}",
                    port.role, port.port, protocols, port.status
                );
            }
        }

        if !self.dry_run {
            let state = if self.demux_active { "active" } else { "inactive" };
            let _ = write!(out, "\ndemux {}: {}", self.demux_service, state);
            if let Some(activation) = &self.demux_activation {
                let _ = write!(out, " (started via {})", activation);
            }
            out.push('\n');
        }

        if !self.probes.is_empty() {
            out.push_str("\nprobes:\n");
            for probe in &self.probes {
                let verdict = if probe.success { "ok" } else { "FAILED" };
                let _ = writeln!(
                    out,
                    "  {} {}: {} ({})",
                    probe.kind, probe.target, verdict, probe.detail
                );
            }
        }

        if !self.warnings.is_empty() {
            out.push_str("\nwarnings:\n");
            for warning in &self.warnings {
                let _ = writeln!(out, "  - {}", warning);
            }
        }

        out
    }
}
