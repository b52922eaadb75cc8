use crate::utils::error::{PortshiftError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// 部署參數。所有欄位都有預設值，無參數執行即使用這些固定值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortshiftConfig {
    pub ports: PortsConfig,
    pub services: ServicesConfig,
    pub proxy: ProxyConfig,
    pub demux: DemuxConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    /// The contested port the demux takes over.
    pub public: u16,
    /// Where the reverse proxy is moved to.
    pub relocated: u16,
    pub ssh: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            public: 443,
            relocated: 8443,
            ssh: 22,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Stopped before the public port is freed, in this order.
    pub conflicting: Vec<String>,
    pub relocated: String,
    pub demux: String,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            conflicting: vec![
                "sslh".to_string(),
                "nginx".to_string(),
                "apache2".to_string(),
            ],
            relocated: "nginx".to_string(),
            demux: "sslh".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralRule {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub config_dirs: Vec<PathBuf>,
    /// Program followed by its arguments.
    pub check_command: Vec<String>,
    pub extra_rules: Vec<LiteralRule>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            config_dirs: vec![
                PathBuf::from("/etc/nginx/sites-enabled"),
                PathBuf::from("/etc/nginx/conf.d"),
            ],
            check_command: vec!["nginx".to_string(), "-t".to_string()],
            extra_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    pub binary: PathBuf,
    pub legacy_config: PathBuf,
    pub structured_config: PathBuf,
    pub pid_file: PathBuf,
    pub user: String,
    pub listen_host: String,
    pub ssh_host: String,
    pub tls_host: String,
    /// Seconds sslh waits for the first bytes before picking the first protocol.
    pub probe_timeout_secs: u32,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/sbin/sslh"),
            legacy_config: PathBuf::from("/etc/default/sslh"),
            structured_config: PathBuf::from("/etc/sslh.cfg"),
            pid_file: PathBuf::from("/var/run/sslh/sslh.pid"),
            user: "sslh".to_string(),
            listen_host: "0.0.0.0".to_string(),
            ssh_host: "127.0.0.1".to_string(),
            tls_host: "127.0.0.1".to_string(),
            probe_timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub readiness_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Host the verifier's probes connect to.
    pub probe_host: String,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_ms: 5_000,
            poll_interval_ms: 250,
            probe_timeout_ms: 3_000,
            probe_host: "127.0.0.1".to_string(),
        }
    }
}

impl TimingConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static pattern compiles"))
}

impl PortshiftConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| PortshiftError::ConfigError {
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);
        Ok(toml::from_str(&processed_content)?)
    }

    /// 替換環境變數 (例如 ${SSH_PORT})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        env_var_pattern()
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    pub fn check_program(&self) -> Option<(&str, Vec<&str>)> {
        let (program, args) = self.proxy.check_command.split_first()?;
        Some((program.as_str(), args.iter().map(String::as_str).collect()))
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_range("ports.public", self.ports.public, 1, u16::MAX)?;
        validation::validate_range("ports.relocated", self.ports.relocated, 1, u16::MAX)?;
        validation::validate_range("ports.ssh", self.ports.ssh, 1, u16::MAX)?;
        validation::validate_distinct_ports(&[
            ("ports.public", self.ports.public),
            ("ports.relocated", self.ports.relocated),
            ("ports.ssh", self.ports.ssh),
        ])?;

        validation::validate_non_empty_string("services.relocated", &self.services.relocated)?;
        validation::validate_non_empty_string("services.demux", &self.services.demux)?;
        for name in &self.services.conflicting {
            validation::validate_non_empty_string("services.conflicting", name)?;
        }

        if self.proxy.check_command.is_empty() {
            return Err(PortshiftError::InvalidConfigValueError {
                field: "proxy.check_command".to_string(),
                value: "[]".to_string(),
                reason: "A configuration check command is required".to_string(),
            });
        }
        for dir in &self.proxy.config_dirs {
            validation::validate_path("proxy.config_dirs", &dir.to_string_lossy())?;
        }
        for rule in &self.proxy.extra_rules {
            validation::validate_non_empty_string("proxy.extra_rules.from", &rule.from)?;
            if rule.to.contains(&rule.from) {
                return Err(PortshiftError::InvalidConfigValueError {
                    field: "proxy.extra_rules.to".to_string(),
                    value: rule.to.clone(),
                    reason: "Replacement contains its own pattern and would never settle"
                        .to_string(),
                });
            }
        }

        validation::validate_path("demux.binary", &self.demux.binary.to_string_lossy())?;
        validation::validate_path(
            "demux.legacy_config",
            &self.demux.legacy_config.to_string_lossy(),
        )?;
        validation::validate_path(
            "demux.structured_config",
            &self.demux.structured_config.to_string_lossy(),
        )?;
        validation::validate_path("demux.pid_file", &self.demux.pid_file.to_string_lossy())?;
        validation::validate_non_empty_string("demux.listen_host", &self.demux.listen_host)?;

        validation::validate_positive_number(
            "timing.readiness_timeout_ms",
            self.timing.readiness_timeout_ms,
            1,
        )?;
        validation::validate_positive_number("timing.poll_interval_ms", self.timing.poll_interval_ms, 1)?;
        validation::validate_positive_number("timing.probe_timeout_ms", self.timing.probe_timeout_ms, 1)?;

        Ok(())
    }
}

impl Validate for PortshiftConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
