use crate::config::toml_config::TimingConfig;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Poll-until-true with a hard deadline. Replaces fixed "give it a second" sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Readiness {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self::new(timing.readiness_timeout(), timing.poll_interval())
    }

    /// Returns as soon as `check` yields true; false once the deadline passes.
    /// `check` always runs at least once.
    pub async fn wait_until<F, Fut>(&self, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            if check().await {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(self.interval.min(deadline - now)).await;
        }
    }
}
