use crate::core::readiness::Readiness;
use crate::domain::model::{status_from, PortBinding, PortStatus, Protocol};
use crate::domain::ports::CommandRunner;
use crate::utils::error::PortshiftError;
use regex::Regex;
use std::sync::{Arc, OnceLock};

pub struct PortInspector<R: CommandRunner> {
    runner: Arc<R>,
    readiness: Readiness,
}

fn users_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"\("([^"]*)",pid=(\d+)"#).expect("static pattern compiles"))
}

/// Parses `ss -H -lntup` output, keeping sockets whose local port is `port`.
///
/// Lines look like
/// `tcp LISTEN 0 511 0.0.0.0:443 0.0.0.0:* users:(("nginx",pid=1234,fd=6))`;
/// the users column is missing when ss runs unprivileged.
pub fn parse_ss_output(output: &str, port: u16) -> Vec<PortBinding> {
    let mut bindings = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            continue;
        }

        let protocol = match fields[0] {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            _ => continue,
        };

        let local_port = fields[4]
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse::<u16>().ok());
        if local_port != Some(port) {
            continue;
        }

        let mut found_process = false;
        for caps in users_pattern().captures_iter(line) {
            found_process = true;
            bindings.push(PortBinding {
                port,
                protocol,
                pid: caps[2].parse().ok(),
                process: Some(caps[1].to_string()),
            });
        }

        if !found_process {
            bindings.push(PortBinding {
                port,
                protocol,
                pid: None,
                process: None,
            });
        }
    }

    dedup_bindings(bindings)
}

/// Parses `lsof -Fpc` field output (`p<pid>` then `c<command>` per process).
pub fn parse_lsof_output(output: &str, port: u16) -> Vec<PortBinding> {
    let mut bindings: Vec<PortBinding> = Vec::new();

    for line in output.lines() {
        if let Some(pid) = line.strip_prefix('p') {
            bindings.push(PortBinding {
                port,
                protocol: Protocol::Tcp,
                pid: pid.parse().ok(),
                process: None,
            });
        } else if let Some(command) = line.strip_prefix('c') {
            if let Some(last) = bindings.last_mut() {
                last.process = Some(command.to_string());
            }
        }
    }

    dedup_bindings(bindings)
}

// IPv4 and IPv6 sockets of the same process show up as separate lines.
fn dedup_bindings(bindings: Vec<PortBinding>) -> Vec<PortBinding> {
    let mut unique: Vec<PortBinding> = Vec::with_capacity(bindings.len());
    for binding in bindings {
        if !unique.contains(&binding) {
            unique.push(binding);
        }
    }
    unique
}

impl<R: CommandRunner> PortInspector<R> {
    pub fn new(runner: Arc<R>, readiness: Readiness) -> Self {
        Self { runner, readiness }
    }

    /// Read-only. Falls back from `ss` to `lsof`; if neither answers the port is `Unknown`.
    pub async fn inspect(&self, port: u16) -> PortStatus {
        match self.runner.run("ss", &["-H", "-lntup"]).await {
            Ok(out) if out.success() => return status_from(parse_ss_output(&out.stdout, port)),
            Ok(out) => tracing::debug!("ss exited with {:?}, trying lsof", out.status),
            Err(e) => tracing::debug!("ss unavailable ({}), trying lsof", e),
        }

        let selector = format!("-iTCP:{}", port);
        match self
            .runner
            .run("lsof", &["-nP", &selector, "-sTCP:LISTEN", "-Fpc"])
            .await
        {
            Ok(out) if out.success() => status_from(parse_lsof_output(&out.stdout, port)),
            // lsof exits 1 with no output when nothing matches
            Ok(out) if out.status == Some(1) && out.stdout.trim().is_empty() => PortStatus::Free,
            Ok(out) => PortStatus::Unknown(format!(
                "lsof exited with {:?}: {}",
                out.status,
                out.stderr.trim()
            )),
            Err(PortshiftError::ToolUnavailable { .. }) => {
                PortStatus::Unknown("neither ss nor lsof is available".to_string())
            }
            Err(e) => PortStatus::Unknown(e.to_string()),
        }
    }

    /// `inspect` narrowed to TCP listeners. Every free/bound decision goes through here.
    pub async fn inspect_tcp(&self, port: u16) -> PortStatus {
        self.inspect(port).await.tcp()
    }

    /// Kills whatever listens on TCP `port`: `fuser -k`, or `kill` per pid when fuser is absent.
    /// UDP sockets on the same port are left alone.
    pub async fn force_free(&self, port: u16, status: &PortStatus) {
        let port_arg = port.to_string();
        match self
            .runner
            .run("fuser", &["-k", "-n", "tcp", &port_arg])
            .await
        {
            Ok(out) => {
                tracing::debug!("fuser -k on port {} exited with {:?}", port, out.status);
                return;
            }
            Err(PortshiftError::ToolUnavailable { .. }) => {
                tracing::debug!("fuser unavailable, killing owners of port {} by pid", port);
            }
            Err(e) => {
                tracing::warn!("⚠️ fuser failed on port {}: {}", port, e);
            }
        }

        for pid in status.tcp().pids() {
            let pid_arg = pid.to_string();
            match self.runner.run("kill", &[&pid_arg]).await {
                Ok(out) if out.success() => tracing::info!("🔪 Killed pid {} on port {}", pid, port),
                Ok(out) => tracing::warn!("⚠️ kill {} failed: {}", pid, out.stderr.trim()),
                Err(e) => tracing::warn!("⚠️ kill {} failed: {}", pid, e),
            }
        }
    }

    pub async fn wait_until_free(&self, port: u16) -> bool {
        let this = self;
        self.readiness
            .wait_until(move || async move { this.inspect_tcp(port).await.is_free() })
            .await
    }

    pub async fn wait_until_bound(&self, port: u16) -> bool {
        let this = self;
        self.readiness
            .wait_until(move || async move { this.inspect_tcp(port).await.is_bound() })
            .await
    }
}
