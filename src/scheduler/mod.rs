pub mod tasks;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use crate::config::PollerConfig;

pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// When a background job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSchedule {
    Every(Duration),
    /// Six-field cron expression (with seconds).
    Cron(String),
}

impl JobSchedule {
    pub fn from_config(poller: &PollerConfig) -> Self {
        match poller.cron.as_deref().map(str::trim) {
            Some(expr) if !expr.is_empty() => JobSchedule::Cron(expr.to_string()),
            _ => {
                JobSchedule::Every(Duration::from_secs(poller.interval_minutes.saturating_mul(60)))
            },
        }
    }
}

impl std::fmt::Display for JobSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobSchedule::Every(interval) => write!(f, "every {}s", interval.as_secs()),
            JobSchedule::Cron(expr) => write!(f, "cron '{}'", expr),
        }
    }
}

/// Wrapper around tokio-cron-scheduler for background tasks
pub struct Scheduler {
    inner: JobScheduler,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self { inner })
    }

    /// Add a recurring job
    pub async fn add_job<F>(&self, schedule: &JobSchedule, name: &str, task: F) -> Result<()>
    where
        F: Fn() -> TaskFuture + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        let job_name = name.to_string();

        let job = match schedule {
            JobSchedule::Cron(expr) => Job::new_async(expr.as_str(), move |_uuid, _lock| {
                let name = job_name.clone();
                let fut = (*task)();
                Box::pin(async move {
                    debug!("Running scheduled task: {}", name);
                    fut.await;
                })
            }),
            JobSchedule::Every(interval) => {
                Job::new_repeated_async(*interval, move |_uuid, _lock| {
                    let name = job_name.clone();
                    let fut = (*task)();
                    Box::pin(async move {
                        debug!("Running scheduled task: {}", name);
                        fut.await;
                    })
                })
            }
        }
        .with_context(|| format!("Failed to create job: {}", name))?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        info!("Scheduled task '{}' {}", name, schedule);
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}
