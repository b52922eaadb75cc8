use crate::core::port_inspector::PortInspector;
use crate::core::report::PortReport;
use crate::core::service_controller::ServiceController;
use crate::domain::model::{ProbeKind, ProbeResult};
use crate::domain::ports::CommandRunner;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

const PROBE_IDENT: &str = "SSH-2.0-portshift_probe\r\n";

#[derive(Debug, Clone)]
pub struct Verification {
    pub ports: Vec<PortReport>,
    pub demux_active: bool,
    pub probes: Vec<ProbeResult>,
}

pub struct Verifier<R: CommandRunner> {
    inspector: PortInspector<R>,
    services: ServiceController<R>,
    demux_service: String,
    /// (role, port) in report order.
    ports: Vec<(String, u16)>,
    probe_host: String,
    probe_timeout: Duration,
}

impl<R: CommandRunner> Verifier<R> {
    pub fn new(
        inspector: PortInspector<R>,
        services: ServiceController<R>,
        demux_service: impl Into<String>,
        ports: Vec<(String, u16)>,
        probe_host: impl Into<String>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            inspector,
            services,
            demux_service: demux_service.into(),
            ports,
            probe_host: probe_host.into(),
            probe_timeout,
        }
    }

    pub async fn inspect_ports(&self) -> Vec<PortReport> {
        let mut reports = Vec::with_capacity(self.ports.len());
        for (role, port) in &self.ports {
            reports.push(PortReport {
                role: role.clone(),
                port: *port,
                status: self.inspector.inspect(*port).await,
            });
        }
        reports
    }

    /// Probes: SSH handshake through the first (public) port, plain connect to the second.
    pub async fn verify(&self) -> Verification {
        let ports = self.inspect_ports().await;
        let demux_active = self.services.is_active(&self.demux_service).await;

        let mut probes = Vec::new();
        if let Some((_, public)) = self.ports.first() {
            probes.push(probe_ssh(&self.probe_host, *public, self.probe_timeout).await);
        }
        if let Some((_, relocated)) = self.ports.get(1) {
            probes.push(probe_tcp(&self.probe_host, *relocated, self.probe_timeout).await);
        }

        for probe in &probes {
            if probe.success {
                tracing::info!("🔎 {} {}: ok", probe.kind, probe.target);
            } else {
                tracing::warn!("🔎 {} {}: {}", probe.kind, probe.target, probe.detail);
            }
        }

        Verification {
            ports,
            demux_active,
            probes,
        }
    }
}

/// Sends an SSH identification string and expects the server's `SSH-` banner back.
/// Speaking first makes the demux route immediately instead of waiting out its timeout.
pub async fn probe_ssh(host: &str, port: u16, limit: Duration) -> ProbeResult {
    let target = format!("{}:{}", host, port);
    let attempt = async {
        let mut stream = TcpStream::connect(&target).await?;
        stream.write_all(PROBE_IDENT.as_bytes()).await?;
        let mut reader = BufReader::new(stream);
        let mut banner = String::new();
        reader.read_line(&mut banner).await?;
        Ok::<String, std::io::Error>(banner.trim_end().to_string())
    };

    let (success, detail) = match timeout(limit, attempt).await {
        Ok(Ok(banner)) if banner.starts_with("SSH-") => (true, banner),
        Ok(Ok(banner)) if banner.is_empty() => (false, "connection closed without a banner".to_string()),
        Ok(Ok(banner)) => (false, format!("unexpected reply: {}", banner)),
        Ok(Err(e)) => (false, e.to_string()),
        Err(_) => (false, format!("no answer within {:?}", limit)),
    };

    ProbeResult {
        kind: ProbeKind::SshHandshake,
        target,
        success,
        detail,
    }
}

pub async fn probe_tcp(host: &str, port: u16, limit: Duration) -> ProbeResult {
    let target = format!("{}:{}", host, port);
    let (success, detail) = match timeout(limit, TcpStream::connect(&target)).await {
        Ok(Ok(_)) => (true, "connected".to_string()),
        Ok(Err(e)) => (false, e.to_string()),
        Err(_) => (false, format!("no answer within {:?}", limit)),
    };

    ProbeResult {
        kind: ProbeKind::TcpConnect,
        target,
        success,
        detail,
    }
}
