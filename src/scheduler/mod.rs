pub mod tasks;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

/// Recurring upkeep of the bot's own state
#[async_trait]
pub trait MaintenanceJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Six-field cron expression, seconds first
    fn schedule(&self) -> &'static str;

    /// One pass, returning how many items were cleaned up
    async fn run(&self) -> Result<usize>;
}

/// Run one pass of `job`. Failures are logged and never reach the scheduler.
pub async fn run_job(job: &dyn MaintenanceJob) -> Option<usize> {
    match job.run().await {
        Ok(0) => {
            debug!("{}: nothing to clean up", job.name());
            Some(0)
        }
        Ok(n) => {
            info!("{}: cleaned up {} item(s)", job.name(), n);
            Some(n)
        }
        Err(e) => {
            warn!("{} failed: {:#}", job.name(), e);
            None
        }
    }
}

/// Cron runner for [`MaintenanceJob`]s
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

    pub async fn register(&self, job: Arc<dyn MaintenanceJob>) -> Result<()> {
        let (name, schedule) = (job.name(), job.schedule());
        let cron = Job::new_async(schedule, move |_uuid, _lock| {
            let job = Arc::clone(&job);
            Box::pin(async move {
                run_job(job.as_ref()).await;
            })
        })
        .with_context(|| format!("Invalid schedule '{}' for {}", schedule, name))?;

        self.inner
            .add(cron)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        info!("Scheduled {} with cron: {}", name, schedule);
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

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct Failing;

    #[async_trait]
    impl MaintenanceJob for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn schedule(&self) -> &'static str {
            "0 * * * * *"
        }

        async fn run(&self) -> Result<usize> {
            bail!("store is locked")
        }
    }

    struct BadSchedule;

    #[async_trait]
    impl MaintenanceJob for BadSchedule {
        fn name(&self) -> &'static str {
            "bad-schedule"
        }

        fn schedule(&self) -> &'static str {
            "every minute"
        }

        async fn run(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_failing_job_is_contained() {
        assert_eq!(run_job(&Failing).await, None);
    }

    #[tokio::test]
    async fn test_jobs_register_by_schedule() {
        let scheduler = Scheduler::new().await.unwrap();

        assert!(scheduler.register(Arc::new(Failing)).await.is_ok());
        assert!(scheduler.register(Arc::new(BadSchedule)).await.is_err());
    }
}
