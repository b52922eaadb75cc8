use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// One listening socket as reported by the host. Queried, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub port: u16,
    pub protocol: Protocol,
    pub pid: Option<u32>,
    pub process: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum PortStatus {
    Free,
    Bound(Vec<PortBinding>),
    /// The query tool was missing or failed. Never read this as free.
    Unknown(String),
}

impl PortStatus {
    pub fn is_free(&self) -> bool {
        matches!(self, PortStatus::Free)
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, PortStatus::Bound(_))
    }

    /// Keeps only TCP listeners; a port held only by UDP sockets is free for TCP.
    pub fn tcp(&self) -> PortStatus {
        match self {
            PortStatus::Bound(bindings) => status_from(
                bindings
                    .iter()
                    .filter(|b| b.protocol == Protocol::Tcp)
                    .cloned()
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Distinct protocols among the bindings, TCP first.
    pub fn protocols(&self) -> Vec<Protocol> {
        [Protocol::Tcp, Protocol::Udp]
            .into_iter()
            .filter(|p| self.bindings().iter().any(|b| b.protocol == *p))
            .collect()
    }

    pub fn bindings(&self) -> &[PortBinding] {
        match self {
            PortStatus::Bound(bindings) => bindings,
            _ => &[],
        }
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.bindings().iter().filter_map(|b| b.pid).collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }

    /// Distinct owning process names, in first-seen order.
    pub fn owners(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.bindings().iter().filter_map(|b| b.process.clone()) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

pub fn status_from(bindings: Vec<PortBinding>) -> PortStatus {
    if bindings.is_empty() {
        PortStatus::Free
    } else {
        PortStatus::Bound(bindings)
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortStatus::Free => write!(f, "free"),
            PortStatus::Unknown(reason) => write!(f, "unknown ({})", reason),
            PortStatus::Bound(_) => {
                let owners = self.owners();
                let pids = self
                    .pids()
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                let who = if owners.is_empty() {
                    "unnamed process".to_string()
                } else {
                    owners.join(", ")
                };
                if pids.is_empty() {
                    write!(f, "{}", who)
                } else {
                    write!(f, "{} (pid {})", who, pids)
                }
            }
        }
    }
}

/// Result of a service-manager mutation. `Missing` counts as stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum ServiceOutcome {
    Done,
    Missing,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMatch {
    /// Connection opens with an SSH identification string.
    Ssh,
    /// Anything else; forwarded as TLS.
    Fallback,
}

impl RouteMatch {
    pub fn protocol_name(&self) -> &'static str {
        match self {
            RouteMatch::Ssh => "ssh",
            RouteMatch::Fallback => "tls",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub matcher: RouteMatch,
    pub host: String,
    pub port: u16,
}

impl RouteRule {
    pub fn new(matcher: RouteMatch, host: impl Into<String>, port: u16) -> Self {
        Self {
            matcher,
            host: host.into(),
            port,
        }
    }

    pub fn destination(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcedureState {
    Start,
    ServicesStopped,
    PortFreed,
    ConfigRewritten,
    ServiceRelocated,
    DemuxConfigured,
    DemuxActive,
    DemuxFallback,
    Verified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DemuxActivation {
    ServiceManager,
    Fallback { pid: u32 },
    Failed { reason: String },
}

impl fmt::Display for DemuxActivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemuxActivation::ServiceManager => write!(f, "service manager"),
            DemuxActivation::Fallback { pid } => write!(f, "manual spawn, pid {}", pid),
            DemuxActivation::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    SshHandshake,
    TcpConnect,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::SshHandshake => write!(f, "ssh-handshake"),
            ProbeKind::TcpConnect => write!(f, "tcp-connect"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub kind: ProbeKind,
    pub target: String,
    pub success: bool,
    pub detail: String,
}
