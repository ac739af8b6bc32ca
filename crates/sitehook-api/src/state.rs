//! Application state.

use futures::future::join_all;
use sitehook_config::{BasicAuth, DeployConfig};
use sitehook_runner::{BuildRunner, RunnerError, Scheduler};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state. Handlers reach runners only through this.
#[derive(Clone)]
pub struct AppState {
    pub runners: Arc<BTreeMap<String, Arc<BuildRunner>>>,
    pub webhook_secret: Option<Arc<str>>,
    pub status_auth: Option<Arc<BasicAuth>>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(
        runners: BTreeMap<String, Arc<BuildRunner>>,
        webhook_secret: Option<String>,
        status_auth: Option<BasicAuth>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            runners: Arc::new(runners),
            webhook_secret: webhook_secret.map(Arc::from),
            status_auth: status_auth.map(Arc::new),
            scheduler: Arc::new(scheduler),
        }
    }

    /// Create one runner per target, start the configured schedules and
    /// resolve the webhook secret. Must run inside a tokio runtime.
    pub fn from_config(config: &DeployConfig) -> anyhow::Result<Self> {
        let runners = build_runners(config)?;
        let webhook_secret = config
            .webhook_secret
            .as_ref()
            .map(|source| source.resolve())
            .transpose()?;
        if webhook_secret.is_none() {
            warn!("No webhook secret configured, webhook deliveries will be refused");
        }

        let scheduler = Scheduler::start(&runners, &config.schedules);
        Ok(Self::new(
            runners,
            webhook_secret,
            config.status_auth.clone(),
            scheduler,
        ))
    }

    pub fn runner(&self, name: &str) -> Option<&Arc<BuildRunner>> {
        self.runners.get(name)
    }

    /// Stop schedules, then shut every runner down concurrently. Each runner
    /// cancels its queued jobs before aborting its running build.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.scheduler.shutdown();
        join_all(self.runners.values().map(|runner| runner.shutdown())).await;
        info!("All runners stopped");
    }
}

/// One runner per configured target, keyed by target name.
pub fn build_runners(
    config: &DeployConfig,
) -> Result<BTreeMap<String, Arc<BuildRunner>>, RunnerError> {
    config
        .targets
        .iter()
        .map(|target| {
            let runner = BuildRunner::new(target.clone(), config.git_timeout)?;
            Ok((target.name.clone(), Arc::new(runner)))
        })
        .collect()
}
