mod common;

use common::{failure, output, ss_line, MockHost};
use portshift::domain::model::{DemuxActivation, ProcedureState};
use portshift::{PortshiftConfig, PortshiftError, Remediator};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

const SITE_TEMPLATE: &str = "\
server {
    listen PUBLIC ssl http2;
    listen [::]:PUBLIC ssl http2;
    server_name example.com;
    ssl_certificate /etc/letsencrypt/live/example.com/fullchain.pem;
}
server {
    listen 80;
    return 301 https://$host$request_uri;
}
";

/// Stands in for sslh forwarding SSH to sshd: answers every connection with a banner.
async fn ssh_through_demux() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.write_all(b"SSH-2.0-OpenSSH_9.6p1 Ubuntu-3ubuntu13\r\n").await;
        }
    });
    port
}

async fn relocated_proxy() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { while listener.accept().await.is_ok() {} });
    port
}

fn config_for(dir: &Path, public: u16, relocated: u16) -> PortshiftConfig {
    let toml_content = format!(
        r#"
[ports]
public = {public}
relocated = {relocated}

[proxy]
config_dirs = ["{sites}"]

[demux]
legacy_config = "{root}/default/sslh"
structured_config = "{root}/sslh.cfg"
pid_file = "{root}/run/sslh/sslh.pid"

[timing]
readiness_timeout_ms = 200
poll_interval_ms = 5
probe_timeout_ms = 2000
"#,
        public = public,
        relocated = relocated,
        sites = dir.join("sites-enabled").display(),
        root = dir.display(),
    );
    PortshiftConfig::from_toml_str(&toml_content).unwrap()
}

fn site_for(public: u16) -> String {
    SITE_TEMPLATE.replace("PUBLIC", &public.to_string())
}

fn seed_sites(dir: &Path, public: u16) -> PathBuf {
    let sites = dir.join("sites-enabled");
    fs::create_dir_all(&sites).unwrap();
    let site = sites.join("example.com");
    fs::write(&site, site_for(public)).unwrap();
    site
}

/// Scripts `ss` through the run: public port free after the stops, then the proxy on
/// the relocated port, then the demux up in front of it.
fn script_healthy_host(host: &MockHost, public: u16, relocated: u16) {
    let proxy = ss_line(relocated, "nginx", 2001);
    let demux = ss_line(public, "sslh", 3001);
    let sshd = ss_line(22, "sshd", 801);

    host.on("ss -H -lntup", output(0, &sshd));
    host.on("ss -H -lntup", output(0, &format!("{}{}", sshd, proxy)));
    host.on("ss -H -lntup", output(0, &format!("{}{}{}", sshd, proxy, demux)));
}

#[tokio::test]
async fn test_demux_takes_over_contested_port() {
    let temp_dir = TempDir::new().unwrap();
    let public = ssh_through_demux().await;
    let relocated = relocated_proxy().await;
    let site = seed_sites(temp_dir.path(), public);

    let host = MockHost::new();
    script_healthy_host(&host, public, relocated);

    let remediator = Remediator::new(config_for(temp_dir.path(), public, relocated), Arc::new(host.clone())).unwrap();
    let report = remediator.run().await.unwrap();

    assert_eq!(
        report.states,
        vec![
            ProcedureState::Start,
            ProcedureState::ServicesStopped,
            ProcedureState::PortFreed,
            ProcedureState::ConfigRewritten,
            ProcedureState::ServiceRelocated,
            ProcedureState::DemuxConfigured,
            ProcedureState::DemuxActive,
            ProcedureState::Verified,
        ]
    );
    assert_eq!(report.demux_activation, Some(DemuxActivation::ServiceManager));
    assert!(report.demux_active);

    assert_eq!(report.ports[0].status.owners(), vec!["sslh".to_string()]);
    assert_eq!(report.ports[1].status.owners(), vec!["nginx".to_string()]);
    assert_eq!(report.ports[2].status.owners(), vec!["sshd".to_string()]);

    assert!(report.probes[0].success, "{}", report.probes[0].detail);
    assert!(report.probes[0].detail.starts_with("SSH-2.0-OpenSSH"));
    assert!(report.probes[1].success);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    let rewritten = fs::read_to_string(&site).unwrap();
    assert!(rewritten.contains(&format!("    listen {} ssl http2;", relocated)));
    assert!(rewritten.contains(&format!("    listen [::]:{} ssl http2;", relocated)));
    assert!(rewritten.contains("    listen 80;"));

    let legacy = fs::read_to_string(temp_dir.path().join("default/sslh")).unwrap();
    assert!(legacy.contains(&format!("--listen 0.0.0.0:{}", public)));
    let structured = fs::read_to_string(temp_dir.path().join("sslh.cfg")).unwrap();
    assert!(structured.contains(&format!("port: \"{}\"", relocated)));

    let calls = host.calls();
    let position = |cmd: &str| calls.iter().position(|c| c == cmd).unwrap();
    assert!(position("systemctl stop nginx") < position("nginx -t"));
    assert!(position("nginx -t") < position("systemctl restart nginx"));
    assert!(position("systemctl restart nginx") < position("systemctl restart sslh"));
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let public = ssh_through_demux().await;
    let relocated = relocated_proxy().await;
    let site = seed_sites(temp_dir.path(), public);
    let config = config_for(temp_dir.path(), public, relocated);

    let first = MockHost::new();
    script_healthy_host(&first, public, relocated);
    Remediator::new(config.clone(), Arc::new(first)).unwrap().run().await.unwrap();
    let after_first = fs::read_to_string(&site).unwrap();

    let second = MockHost::new();
    script_healthy_host(&second, public, relocated);
    let report = Remediator::new(config, Arc::new(second.clone()))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(report.rewritten_files.is_empty());
    assert_eq!(second.count("nginx -t"), 0);
    assert_eq!(fs::read_to_string(&site).unwrap(), after_first);
}

#[tokio::test]
async fn test_rejected_config_keeps_original_service() {
    let temp_dir = TempDir::new().unwrap();
    let site = seed_sites(temp_dir.path(), 443);

    let host = MockHost::new();
    host.on("systemctl is-active --quiet sslh", failure(3, ""));
    host.on("systemctl is-active --quiet apache2", failure(4, ""));
    host.on(
        "nginx -t",
        failure(1, "nginx: [emerg] duplicate listen options for 0.0.0.0:8443"),
    );

    let remediator = Remediator::new(config_for(temp_dir.path(), 443, 8443), Arc::new(host.clone())).unwrap();
    let err = remediator.run().await.unwrap_err();

    assert!(matches!(err, PortshiftError::ValidationFailed { .. }));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(fs::read_to_string(&site).unwrap(), site_for(443));
    assert_eq!(host.count("systemctl start nginx"), 1);
    assert_eq!(host.count("systemctl restart sslh"), 0);
    assert!(!temp_dir.path().join("default/sslh").exists());
}

#[tokio::test]
async fn test_unit_failure_uses_manual_spawn() {
    let temp_dir = TempDir::new().unwrap();
    let public = ssh_through_demux().await;
    let relocated = relocated_proxy().await;
    seed_sites(temp_dir.path(), public);

    let host = MockHost::new();
    script_healthy_host(&host, public, relocated);
    host.on(
        "systemctl restart sslh",
        failure(1, "Job for sslh.service failed because the control process exited with error code."),
    );
    host.on("systemctl is-active --quiet sslh", failure(3, ""));

    let remediator = Remediator::new(config_for(temp_dir.path(), public, relocated), Arc::new(host.clone())).unwrap();
    let report = remediator.run().await.unwrap();

    assert_eq!(report.demux_activation, Some(DemuxActivation::Fallback { pid: 31337 }));
    assert!(report.states.contains(&ProcedureState::DemuxFallback));
    assert_eq!(report.state(), ProcedureState::Verified);
    assert!(!report.demux_active);
    assert!(report.probes[0].success);

    let pid = fs::read_to_string(temp_dir.path().join("run/sslh/sslh.pid")).unwrap();
    assert_eq!(pid.trim(), "31337");
    assert!(host.calls().iter().any(|c| c.starts_with("spawn /usr/sbin/sslh --foreground")));
}

#[tokio::test]
async fn test_missing_units_are_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let public = ssh_through_demux().await;
    let relocated = relocated_proxy().await;
    seed_sites(temp_dir.path(), public);

    let host = MockHost::new();
    script_healthy_host(&host, public, relocated);
    host.on("systemctl is-active --quiet apache2", failure(4, ""));
    host.on(
        "systemctl stop apache2",
        failure(5, "Failed to stop apache2.service: Unit apache2.service not loaded."),
    );

    let remediator = Remediator::new(config_for(temp_dir.path(), public, relocated), Arc::new(host)).unwrap();
    let report = remediator.run().await.unwrap();

    assert!(report.actions.contains(&"apache2 not installed, skipped".to_string()));
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}
