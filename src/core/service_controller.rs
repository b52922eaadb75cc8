use crate::domain::model::ServiceOutcome;
use crate::domain::ports::{CommandOutput, CommandRunner};
use std::sync::Arc;

/// systemctl exit status for "unit not loaded / does not exist".
const SYSTEMCTL_UNIT_NOT_FOUND: i32 = 5;

/// Thin `systemctl` wrapper. A unit that is not installed counts as stopped.
pub struct ServiceController<R: CommandRunner> {
    runner: Arc<R>,
}

fn is_missing_unit(out: &CommandOutput) -> bool {
    if out.status == Some(SYSTEMCTL_UNIT_NOT_FOUND) {
        return true;
    }
    let stderr = out.stderr.to_lowercase();
    ["not loaded", "not found", "could not be found", "does not exist"]
        .iter()
        .any(|needle| stderr.contains(needle))
}

impl<R: CommandRunner> ServiceController<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self { runner }
    }

    pub async fn stop(&self, name: &str) -> ServiceOutcome {
        self.systemctl("stop", name).await
    }

    pub async fn start(&self, name: &str) -> ServiceOutcome {
        self.systemctl("start", name).await
    }

    pub async fn restart(&self, name: &str) -> ServiceOutcome {
        self.systemctl("restart", name).await
    }

    pub async fn is_active(&self, name: &str) -> bool {
        match self
            .runner
            .run("systemctl", &["is-active", "--quiet", name])
            .await
        {
            Ok(out) => out.success(),
            Err(e) => {
                tracing::debug!("cannot query {}: {}", name, e);
                false
            }
        }
    }

    async fn systemctl(&self, verb: &str, name: &str) -> ServiceOutcome {
        match self.runner.run("systemctl", &[verb, name]).await {
            Ok(out) if out.success() => {
                tracing::info!("⚙️ systemctl {} {}", verb, name);
                ServiceOutcome::Done
            }
            Ok(out) if is_missing_unit(&out) => {
                tracing::info!("⏭️ {} is not installed, skipping {}", name, verb);
                ServiceOutcome::Missing
            }
            Ok(out) => {
                let reason = match out.stderr.trim() {
                    "" => format!("systemctl {} {} exited with {:?}", verb, name, out.status),
                    stderr => stderr.to_string(),
                };
                tracing::warn!("⚠️ systemctl {} {} failed: {}", verb, name, reason);
                ServiceOutcome::Failed(reason)
            }
            Err(e) => {
                tracing::warn!("⚠️ systemctl {} {} failed: {}", verb, name, e);
                ServiceOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{failure, ScriptedRunner};

    #[tokio::test]
    async fn test_stop_running_service() {
        let runner = Arc::new(ScriptedRunner::new());
        let controller = ServiceController::new(runner.clone());

        assert_eq!(controller.stop("nginx").await, ServiceOutcome::Done);
        assert_eq!(runner.calls(), vec!["systemctl stop nginx"]);
    }

    #[tokio::test]
    async fn test_missing_unit_is_not_an_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            "systemctl stop apache2",
            failure(5, "Failed to stop apache2.service: Unit apache2.service not loaded."),
        );
        let controller = ServiceController::new(runner.clone());

        assert_eq!(controller.stop("apache2").await, ServiceOutcome::Missing);
    }

    #[tokio::test]
    async fn test_restart_failure_is_reported() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            "systemctl restart sslh",
            failure(1, "Job for sslh.service failed because the control process exited"),
        );
        let controller = ServiceController::new(runner.clone());

        let outcome = controller.restart("sslh").await;
        assert!(matches!(outcome, ServiceOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_without_systemctl() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.missing("systemctl");
        let controller = ServiceController::new(runner.clone());

        assert!(matches!(controller.start("sslh").await, ServiceOutcome::Failed(_)));
        assert!(!controller.is_active("sslh").await);
    }

    #[tokio::test]
    async fn test_is_active() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("systemctl is-active --quiet sslh", failure(3, ""));
        let controller = ServiceController::new(runner.clone());

        assert!(!controller.is_active("sslh").await);
        assert!(controller.is_active("nginx").await);
    }
}
