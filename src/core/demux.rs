use crate::config::PortshiftConfig;
use crate::core::port_inspector::PortInspector;
use crate::core::readiness::Readiness;
use crate::core::service_controller::ServiceController;
use crate::domain::model::{DemuxActivation, RouteMatch, RouteRule, ServiceOutcome};
use crate::domain::ports::CommandRunner;
use crate::utils::error::Result;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything needed to render sslh configuration or its command line.
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxSettings {
    pub service: String,
    pub binary: PathBuf,
    pub legacy_config: PathBuf,
    pub structured_config: PathBuf,
    pub pid_file: PathBuf,
    pub user: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub probe_timeout_secs: u32,
    /// Ordered, first match wins.
    pub routes: Vec<RouteRule>,
}

impl DemuxSettings {
    pub fn from_config(config: &PortshiftConfig) -> Self {
        let demux = &config.demux;
        Self {
            service: config.services.demux.clone(),
            binary: demux.binary.clone(),
            legacy_config: demux.legacy_config.clone(),
            structured_config: demux.structured_config.clone(),
            pid_file: demux.pid_file.clone(),
            user: demux.user.clone(),
            listen_host: demux.listen_host.clone(),
            listen_port: config.ports.public,
            probe_timeout_secs: demux.probe_timeout_secs,
            routes: vec![
                RouteRule::new(RouteMatch::Ssh, demux.ssh_host.clone(), config.ports.ssh),
                RouteRule::new(
                    RouteMatch::Fallback,
                    demux.tls_host.clone(),
                    config.ports.relocated,
                ),
            ],
        }
    }

    pub fn listen(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// Command-line form shared by the legacy file and the manual spawn.
    pub fn daemon_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.user.is_empty() {
            args.push("--user".to_string());
            args.push(self.user.clone());
        }
        args.push("--listen".to_string());
        args.push(self.listen());
        args.push("--timeout".to_string());
        args.push(self.probe_timeout_secs.to_string());
        for route in &self.routes {
            args.push(format!("--{}", route.matcher.protocol_name()));
            args.push(route.destination());
        }
        args
    }

    /// `/etc/default/sslh` style, read by older init scripts and units.
    pub fn render_legacy(&self) -> String {
        let mut opts = self.daemon_args();
        opts.push("--pidfile".to_string());
        opts.push(self.pid_file.display().to_string());

        format!(
            "# Generated by portshift\nRUN=yes\nDAEMON={}\nDAEMON_OPTS=\"{}\"\n",
            self.binary.display(),
            opts.join(" ")
        )
    }

    /// libconfig style (`sslh -F`), read by newer releases.
    pub fn render_structured(&self) -> String {
        let mut out = String::new();
        out.push_str("# Generated by portshift. Protocols are tried in order.\n");
        out.push_str("verbose: false;\n");
        out.push_str("foreground: true;\n");
        out.push_str("inetd: false;\n");
        out.push_str("numeric: false;\n");
        out.push_str("transparent: false;\n");
        let _ = writeln!(out, "timeout: {};", self.probe_timeout_secs);
        if !self.user.is_empty() {
            let _ = writeln!(out, "user: \"{}\";", self.user);
        }
        let _ = writeln!(out, "pidfile: \"{}\";", self.pid_file.display());
        out.push('\n');

        out.push_str("listen:\n(\n");
        let _ = writeln!(
            out,
            "    {{ host: \"{}\"; port: \"{}\"; }}",
            self.listen_host, self.listen_port
        );
        out.push_str(");\n\n");

        out.push_str("protocols:\n(\n");
        let entries: Vec<String> = self
            .routes
            .iter()
            .map(|route| {
                let service = match route.matcher {
                    RouteMatch::Ssh => " service: \"ssh\";",
                    RouteMatch::Fallback => "",
                };
                format!(
                    "    {{ name: \"{}\";{} host: \"{}\"; port: \"{}\"; }}",
                    route.matcher.protocol_name(),
                    service,
                    route.host,
                    route.port
                )
            })
            .collect();
        out.push_str(&entries.join(",\n"));
        out.push_str("\n);\n");
        out
    }
}

#[derive(Debug, Default)]
pub struct ConfigWrite {
    pub written: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

pub struct DemuxConfigurator<R: CommandRunner> {
    runner: Arc<R>,
    settings: DemuxSettings,
    services: ServiceController<R>,
    inspector: PortInspector<R>,
    readiness: Readiness,
}

impl<R: CommandRunner> DemuxConfigurator<R> {
    pub fn new(runner: Arc<R>, settings: DemuxSettings, readiness: Readiness) -> Self {
        Self {
            services: ServiceController::new(runner.clone()),
            inspector: PortInspector::new(runner.clone(), readiness),
            runner,
            settings,
            readiness,
        }
    }

    pub fn settings(&self) -> &DemuxSettings {
        &self.settings
    }

    /// Writes the legacy file, then the structured one, whichever the installed
    /// version reads. A failure on one does not skip the other.
    pub fn write_configs(&self) -> ConfigWrite {
        let mut result = ConfigWrite::default();
        let targets = [
            (&self.settings.legacy_config, self.settings.render_legacy()),
            (&self.settings.structured_config, self.settings.render_structured()),
        ];

        for (path, content) in targets {
            match write_file(path, &content) {
                Ok(()) => {
                    tracing::info!("📝 Wrote {}", path.display());
                    result.written.push(path.clone());
                }
                Err(e) => {
                    tracing::warn!("⚠️ Could not write {}: {}", path.display(), e);
                    result.failures.push((path.clone(), e.to_string()));
                }
            }
        }
        result
    }

    /// Restart through the service manager; if the unit fails or never comes up on the
    /// public port, run the binary directly.
    pub async fn activate(&self) -> DemuxActivation {
        let service = self.settings.service.as_str();
        let port = self.settings.listen_port;

        match self.services.restart(service).await {
            ServiceOutcome::Done => {
                let services = &self.services;
                let inspector = &self.inspector;
                let ready = self
                    .readiness
                    .wait_until(move || async move {
                        services.is_active(service).await && inspector.inspect_tcp(port).await.is_bound()
                    })
                    .await;
                if ready {
                    tracing::info!("✅ {} is active on port {}", service, port);
                    return DemuxActivation::ServiceManager;
                }
                tracing::warn!(
                    "⚠️ {} restarted but is not serving port {}, falling back to manual start",
                    service,
                    port
                );
                // keep a crash-looping unit from racing the manual process for the port
                self.services.stop(service).await;
            }
            ServiceOutcome::Missing => {
                tracing::info!("{} has no service unit, starting it manually", service);
            }
            ServiceOutcome::Failed(reason) => {
                tracing::warn!("⚠️ {} failed to restart ({}), starting it manually", service, reason);
            }
        }

        self.spawn_fallback().await
    }

    async fn spawn_fallback(&self) -> DemuxActivation {
        let binary = self.settings.binary.to_string_lossy().into_owned();
        let mut args = vec!["--foreground".to_string()];
        args.extend(self.settings.daemon_args());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let pid = match self.runner.spawn(&binary, &args).await {
            Ok(pid) => pid,
            Err(e) => {
                tracing::warn!("⚠️ Could not start {}: {}", binary, e);
                return DemuxActivation::Failed {
                    reason: e.to_string(),
                };
            }
        };
        tracing::info!("🚀 Started {} manually (pid {})", binary, pid);

        if let Err(e) = write_file(&self.settings.pid_file, &format!("{}\n", pid)) {
            tracing::warn!(
                "⚠️ Could not write pid file {}: {}",
                self.settings.pid_file.display(),
                e
            );
        }

        if self.inspector.wait_until_bound(self.settings.listen_port).await {
            DemuxActivation::Fallback { pid }
        } else {
            let reason = format!(
                "pid {} did not bind port {} within {:?}",
                pid, self.settings.listen_port, self.readiness.timeout
            );
            tracing::warn!("⚠️ {}", reason);
            DemuxActivation::Failed { reason }
        }
    }
}
