use crate::config::PortshiftConfig;
use crate::core::config_rewriter::{ConfigRewriter, SyntaxCheck};
use crate::core::demux::{DemuxConfigurator, DemuxSettings};
use crate::core::port_inspector::PortInspector;
use crate::core::readiness::Readiness;
use crate::core::report::Report;
use crate::core::service_controller::ServiceController;
use crate::core::verifier::Verifier;
use crate::domain::model::{DemuxActivation, PortStatus, ProcedureState, ServiceOutcome};
use crate::domain::ports::CommandRunner;
use crate::utils::error::{PortshiftError, Result};
use std::sync::Arc;

/// Drives the procedure:
/// Start → ServicesStopped → PortFreed → ConfigRewritten → ServiceRelocated →
/// DemuxConfigured → DemuxActive | DemuxFallback → Verified.
///
/// Only a rejected proxy configuration aborts; every other failure ends up as a
/// report warning.
pub struct Remediator<R: CommandRunner> {
    config: PortshiftConfig,
    inspector: PortInspector<R>,
    services: ServiceController<R>,
    rewriter: ConfigRewriter,
    check: SyntaxCheck<R>,
    demux: DemuxConfigurator<R>,
    verifier: Verifier<R>,
}

impl<R: CommandRunner> Remediator<R> {
    pub fn new(config: PortshiftConfig, runner: Arc<R>) -> Result<Self> {
        let readiness = Readiness::from_timing(&config.timing);
        let rewriter = ConfigRewriter::from_config(&config)?;

        let (program, args) = config
            .check_program()
            .ok_or_else(|| PortshiftError::ConfigError {
                message: "proxy.check_command is empty".to_string(),
            })?;
        let check = SyntaxCheck::new(
            runner.clone(),
            program,
            args.into_iter().map(str::to_string).collect(),
        );

        let demux = DemuxConfigurator::new(
            runner.clone(),
            DemuxSettings::from_config(&config),
            readiness,
        );

        let verifier = Verifier::new(
            PortInspector::new(runner.clone(), readiness),
            ServiceController::new(runner.clone()),
            config.services.demux.clone(),
            vec![
                ("public".to_string(), config.ports.public),
                ("relocated".to_string(), config.ports.relocated),
                ("ssh".to_string(), config.ports.ssh),
            ],
            config.timing.probe_host.clone(),
            config.timing.probe_timeout(),
        );

        Ok(Self {
            inspector: PortInspector::new(runner.clone(), readiness),
            services: ServiceController::new(runner),
            rewriter,
            check,
            demux,
            verifier,
            config,
        })
    }

    pub async fn run(&self) -> Result<Report> {
        let mut report = Report::new(false, self.config.services.demux.clone());
        tracing::info!(
            "🚀 Moving {} from port {} to {} behind {}",
            self.config.services.relocated,
            self.config.ports.public,
            self.config.ports.relocated,
            self.config.services.demux
        );

        let previously_active = self.stop_conflicting(&mut report).await;
        report.advance(ProcedureState::ServicesStopped);

        self.free_public_port(&mut report).await;
        report.advance(ProcedureState::PortFreed);

        self.rewrite_proxy_config(&mut report, &previously_active)
            .await?;
        report.advance(ProcedureState::ConfigRewritten);

        self.relocate_service(&mut report).await;
        report.advance(ProcedureState::ServiceRelocated);

        let written = self.demux.write_configs();
        for path in &written.written {
            report.note(format!("wrote {}", path.display()));
        }
        for (path, reason) in &written.failures {
            report.warn(format!("could not write {}: {}", path.display(), reason));
        }
        report.advance(ProcedureState::DemuxConfigured);

        let activation = self.demux.activate().await;
        match &activation {
            DemuxActivation::ServiceManager => report.advance(ProcedureState::DemuxActive),
            DemuxActivation::Fallback { pid } => {
                report.note(format!(
                    "started {} manually (pid {})",
                    self.config.services.demux, pid
                ));
                report.advance(ProcedureState::DemuxFallback);
            }
            DemuxActivation::Failed { reason } => report.warn(format!(
                "{} is not serving port {}: {}",
                self.config.services.demux, self.config.ports.public, reason
            )),
        }
        report.demux_activation = Some(activation);

        let verification = self.verifier.verify().await;
        report.apply_verification(verification);
        report.advance(ProcedureState::Verified);
        report.finish();

        tracing::info!("✅ Remediation finished with {} warning(s)", report.warnings.len());
        Ok(report)
    }

    /// Dry run: inspects and renders, never stops a service or writes a file.
    pub async fn plan(&self) -> Result<Report> {
        let mut report = Report::new(true, self.config.services.demux.clone());
        let settings = self.demux.settings();

        report.plan.push(format!(
            "stop services: {}",
            self.config.services.conflicting.join(", ")
        ));

        let public = self.inspector.inspect(self.config.ports.public).await;
        let free_step = match &public {
            PortStatus::Free => format!("port {} is already free", self.config.ports.public),
            PortStatus::Bound(_) => format!(
                "port {} is held by {}; it will be force-freed if still bound after the stops",
                self.config.ports.public, public
            ),
            PortStatus::Unknown(reason) => {
                format!("port {} state unknown: {}", self.config.ports.public, reason)
            }
        };
        report.plan.push(free_step);

        let rules: Vec<&str> = self.rewriter.rules().iter().map(|r| r.description()).collect();
        report.plan.push(format!("rewrite rules: {}", rules.join("; ")));

        let preview = self.rewriter.preview(&self.config.proxy.config_dirs)?;
        if preview.is_empty() {
            report.plan.push(format!(
                "no files to rewrite ({} scanned)",
                preview.files_scanned
            ));
        }
        for change in &preview.changes {
            report.plan.push(format!(
                "rewrite {} ({} replacement(s))",
                change.path.display(),
                change.replacements
            ));
        }
        report.plan.push(format!("validate with `{}`", self.check.command()));
        report.plan.push(format!(
            "restart {} (expected on port {})",
            self.config.services.relocated, self.config.ports.relocated
        ));
        report.plan.push(format!(
            "write {}:\n{}",
            settings.legacy_config.display(),
            settings.render_legacy()
        ));
        report.plan.push(format!(
            "write {}:\n{}",
            settings.structured_config.display(),
            settings.render_structured()
        ));
        report.plan.push(format!(
            "restart {}; fallback: {} --foreground {}",
            settings.service,
            settings.binary.display(),
            settings.daemon_args().join(" ")
        ));

        report.ports = self.verifier.inspect_ports().await;
        report.finish();
        Ok(report)
    }

    /// Returns the services that were running before the stop, for restoration.
    async fn stop_conflicting(&self, report: &mut Report) -> Vec<String> {
        let mut previously_active = Vec::new();
        for name in &self.config.services.conflicting {
            if self.services.is_active(name).await {
                previously_active.push(name.clone());
            }
            match self.services.stop(name).await {
                ServiceOutcome::Done => report.note(format!("stopped {}", name)),
                ServiceOutcome::Missing => report.note(format!("{} not installed, skipped", name)),
                ServiceOutcome::Failed(reason) => {
                    report.warn(format!("could not stop {}: {}", name, reason))
                }
            }
        }
        previously_active
    }

    async fn free_public_port(&self, report: &mut Report) {
        let port = self.config.ports.public;
        let status = self.inspector.inspect_tcp(port).await;
        match &status {
            PortStatus::Free => tracing::info!("🔓 Port {} is free", port),
            PortStatus::Unknown(reason) => {
                report.warn(format!("cannot tell whether port {} is free: {}", port, reason))
            }
            PortStatus::Bound(_) => {
                tracing::info!("🔒 Port {} still held by {}, forcing it free", port, status);
                self.inspector.force_free(port, &status).await;
                if self.inspector.wait_until_free(port).await {
                    report.note(format!("force-freed port {} (was {})", port, status));
                } else {
                    report.warn(format!("port {} is still bound after force-free", port));
                }
            }
        }
    }

    async fn rewrite_proxy_config(
        &self,
        report: &mut Report,
        previously_active: &[String],
    ) -> Result<()> {
        let outcome = match self.rewriter.rewrite(&self.config.proxy.config_dirs) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("❌ Rewriting proxy configuration failed: {}", e);
                self.restore_services(previously_active).await;
                return Err(e);
            }
        };

        if outcome.is_empty() {
            tracing::info!(
                "📄 No listen directives on port {} in {} file(s), nothing to rewrite",
                self.config.ports.public,
                outcome.files_scanned
            );
            return Ok(());
        }

        if let Err(e) = self.check.check().await {
            tracing::error!("❌ {}", e);
            if let Err(restore_err) = outcome.restore() {
                tracing::error!("❌ Could not restore original configuration: {}", restore_err);
            }
            self.restore_services(previously_active).await;
            return Err(e);
        }

        report.note(format!(
            "relocated {} listen directive(s) in {} file(s)",
            outcome.total_replacements(),
            outcome.changes.len()
        ));
        report.rewritten_files = outcome.changed_files();
        Ok(())
    }

    async fn restore_services(&self, names: &[String]) {
        for name in names {
            match self.services.start(name).await {
                ServiceOutcome::Done => tracing::info!("↩️ Restarted {}", name),
                other => tracing::error!("❌ Could not restart {}: {:?}", name, other),
            }
        }
    }

    async fn relocate_service(&self, report: &mut Report) {
        let name = &self.config.services.relocated;
        let port = self.config.ports.relocated;
        match self.services.restart(name).await {
            ServiceOutcome::Done => report.note(format!("restarted {}", name)),
            ServiceOutcome::Missing => {
                report.warn(format!("{} is not installed; nothing will answer port {}", name, port));
                return;
            }
            ServiceOutcome::Failed(reason) => {
                report.warn(format!("could not restart {}: {}", name, reason));
                return;
            }
        }

        if !self.inspector.wait_until_bound(port).await {
            report.warn(format!("{} did not bind port {} in time", name, port));
        }
    }
}
