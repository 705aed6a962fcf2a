pub mod tasks;

use std::future::Future;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};
use uuid::Uuid;

/// A maintenance job registered with the [`Scheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub name: String,
    pub schedule: String,
}

/// Background maintenance jobs on cron schedules (six fields, seconds first).
pub struct Scheduler {
    inner: JobScheduler,
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self {
            inner,
            jobs: Vec::new(),
        })
    }

    /// Register `task` under `name`. Names are unique per scheduler.
    pub async fn schedule<F, Fut>(&mut self, name: &str, schedule: &str, task: F) -> Result<Uuid>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.jobs.iter().any(|job| job.name == name) {
            anyhow::bail!("Job '{}' is already scheduled", name);
        }

        let job_name = name.to_string();
        let job = Job::new_async(schedule, move |run_id, _scheduler| {
            let name = job_name.clone();
            let run = task();
            Box::pin(async move {
                debug!(job = %name, %run_id, "Running maintenance job");
                run.await;
            })
        })
        .with_context(|| format!("Invalid schedule '{}' for job {}", schedule, name))?;

        let id = self
            .inner
            .add(job)
            .await
            .with_context(|| format!("Failed to register job {}", name))?;

        self.jobs.push(ScheduledJob {
            id,
            name: name.to_string(),
            schedule: schedule.to_string(),
        });
        info!(job = name, schedule, "Scheduled maintenance job");
        Ok(id)
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!(jobs = self.jobs.len(), "Scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shut down scheduler")?;
        self.jobs.clear();
        info!("Scheduler stopped");
        Ok(())
    }
}
