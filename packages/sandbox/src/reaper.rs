// ABOUTME: Idle reaper destroying sandboxes with no recent activity
// ABOUTME: Periodic tokio task; one failed teardown never stops the sweep

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::providers::SandboxProvider;
use crate::settings::LifecycleSettings;
use crate::types::SandboxStatus;

/// `tokio::time::interval` panics on a zero period
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub destroyed: Vec<String>,
    /// (sandbox id, error message)
    pub failed: Vec<(String, String)>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.destroyed.is_empty() && self.failed.is_empty()
    }
}

pub struct IdleReaper {
    provider: Arc<dyn SandboxProvider>,
    idle_timeout: Duration,
    interval: Duration,
}

impl IdleReaper {
    pub fn new(provider: Arc<dyn SandboxProvider>, idle_timeout: Duration, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Reaper interval too small, using {}s",
                MIN_INTERVAL.as_secs()
            );
        }
        Self {
            provider,
            idle_timeout,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn from_settings(provider: Arc<dyn SandboxProvider>, lifecycle: &LifecycleSettings) -> Self {
        Self::new(provider, lifecycle.idle_timeout, lifecycle.reaper_interval)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Destroy every non-busy instance idle past the threshold
    pub async fn sweep(&self) -> ReapReport {
        let now = Utc::now();
        let mut report = ReapReport::default();

        for instance in self.provider.list_instances().await {
            if instance.status == SandboxStatus::Busy {
                continue;
            }
            let idle = instance.idle_for(now);
            if idle < self.idle_timeout {
                continue;
            }

            debug!(sandbox_id = %instance.id, idle_secs = idle.as_secs(), "Reaping idle sandbox");
            match self.provider.destroy(&instance.id).await {
                Ok(()) => report.destroyed.push(instance.id),
                Err(e) => {
                    warn!(sandbox_id = %instance.id, error = %e, "Failed to reap idle sandbox");
                    report.failed.push((instance.id, e.to_string()));
                }
            }
        }

        if !report.is_empty() {
            info!(
                destroyed = report.destroyed.len(),
                failed = report.failed.len(),
                "Idle sweep finished"
            );
        }
        report
    }

    /// Run `sweep` every interval until the handle is stopped or dropped
    pub fn spawn(self) -> ReaperHandle {
        let interval = self.interval;
        let idle_timeout = self.idle_timeout;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        });

        info!(
            interval_secs = interval.as_secs(),
            idle_timeout_secs = idle_timeout.as_secs(),
            "Started idle reaper"
        );
        ReaperHandle { task: Some(task) }
    }
}

/// Stops the reaper task when stopped or dropped
pub struct ReaperHandle {
    task: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    pub fn stop(mut self) {
        self.abort();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Stopped idle reaper");
        }
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
