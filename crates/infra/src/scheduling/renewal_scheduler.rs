//! Watch channel renewal scheduler.
//!
//! Cron-driven wrapper around the renewal sweep: join handles are tracked,
//! cancellation is explicit, and every asynchronous operation is wrapped in
//! a timeout. The sweep itself isolates per-user failures, so a job run
//! only logs its aggregate outcome.

use std::sync::Arc;
use std::time::Duration;

use calbridge_core::WatchChannelService;
use chrono::Duration as ChronoDuration;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// Configuration for the renewal scheduler.
#[derive(Debug, Clone)]
pub struct RenewalSchedulerConfig {
    /// Cron expression describing the execution schedule.
    pub cron_expression: String,
    /// How far ahead of expiry a channel becomes eligible for renewal.
    pub lookahead: ChronoDuration,
    /// Timeout applied to a single sweep execution.
    pub job_timeout: Duration,
    /// Timeout for starting the underlying scheduler.
    pub start_timeout: Duration,
    /// Timeout for stopping the scheduler.
    pub stop_timeout: Duration,
    /// Timeout for awaiting the monitor task join handle.
    pub join_timeout: Duration,
}

impl Default for RenewalSchedulerConfig {
    fn default() -> Self {
        Self {
            cron_expression: "0 0 * * * *".into(), // hourly
            lookahead: ChronoDuration::hours(2),
            job_timeout: Duration::from_secs(300),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Renewal sweep scheduler with explicit lifecycle management.
pub struct RenewalScheduler {
    scheduler: Option<JobScheduler>,
    config: RenewalSchedulerConfig,
    monitor_handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
    watch_service: Arc<WatchChannelService>,
}

impl RenewalScheduler {
    /// Create a scheduler with the default configuration.
    pub fn new(watch_service: Arc<WatchChannelService>) -> Self {
        Self::with_config(RenewalSchedulerConfig::default(), watch_service)
    }

    /// Create a scheduler with a custom configuration.
    pub fn with_config(
        config: RenewalSchedulerConfig,
        watch_service: Arc<WatchChannelService>,
    ) -> Self {
        Self {
            scheduler: None,
            config,
            monitor_handle: None,
            cancellation: CancellationToken::new(),
            watch_service,
        }
    }

    /// Start the scheduler, spawning the monitoring task.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();

        let scheduler_instance = self.build_scheduler().await?;
        let start_timeout = self.config.start_timeout;

        let start_result = tokio::time::timeout(start_timeout, scheduler_instance.start())
            .await
            .map_err(|source| SchedulerError::Timeout { duration: start_timeout, source })?;

        start_result.map_err(|source| SchedulerError::StartFailed { source })?;

        self.scheduler = Some(scheduler_instance);

        let cancel = self.cancellation.clone();
        let handle = tokio::spawn(async move {
            Self::monitor_task(cancel).await;
        });

        self.monitor_handle = Some(handle);
        info!(cron = %self.config.cron_expression, "renewal scheduler started");
        Ok(())
    }

    /// Stop the scheduler and wait for the monitor task to finish.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation.cancel();

        let mut scheduler = match self.scheduler.take() {
            Some(scheduler) => scheduler,
            None => return Err(SchedulerError::NotRunning),
        };

        let stop_timeout = self.config.stop_timeout;
        let stop_result =
            tokio::time::timeout(stop_timeout, async move { scheduler.shutdown().await })
                .await
                .map_err(|source| SchedulerError::Timeout { duration: stop_timeout, source })?;

        stop_result.map_err(|source| SchedulerError::StopFailed { source })?;

        if let Some(handle) = self.monitor_handle.take() {
            let join_timeout = self.config.join_timeout;
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|source| SchedulerError::Timeout { duration: join_timeout, source })??
        }

        info!("renewal scheduler stopped");
        self.cancellation = CancellationToken::new();
        Ok(())
    }

    /// Returns true when a scheduler instance is active.
    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    async fn build_scheduler(&self) -> SchedulerResult<JobScheduler> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|source| SchedulerError::CreationFailed { source })?;
        let cron_expr = self.config.cron_expression.clone();
        let watch_service = Arc::clone(&self.watch_service);
        let job_timeout = self.config.job_timeout;
        let lookahead = self.config.lookahead;

        let job_definition = Job::new_async(cron_expr.as_str(), move |_id, _lock| {
            let watch_service = Arc::clone(&watch_service);

            Box::pin(async move {
                match tokio::time::timeout(job_timeout, watch_service.renewal_sweep(lookahead))
                    .await
                {
                    Ok(Ok(report)) => {
                        if report.failed > 0 {
                            warn!(
                                processed = report.processed,
                                successful = report.successful,
                                failed = report.failed,
                                "renewal sweep completed with failures"
                            );
                        } else {
                            debug!(processed = report.processed, "renewal sweep completed");
                        }
                    }
                    Ok(Err(err)) => {
                        error!(error = %err, "renewal sweep failed");
                    }
                    Err(elapsed) => {
                        warn!(
                            timeout_secs = job_timeout.as_secs(),
                            "renewal sweep timed out; remaining channels retry next sweep"
                        );
                        debug!(elapsed = ?elapsed, "timeout details");
                    }
                }
            })
        })
        .map_err(|source| SchedulerError::JobRegistrationFailed { source })?;

        let job_id = job_definition.guid();
        scheduler
            .add(job_definition)
            .await
            .map_err(|source| SchedulerError::JobRegistrationFailed { source })?;

        debug!(cron = %self.config.cron_expression, job_id = %job_id, "registered renewal sweep job");
        Ok(scheduler)
    }

    async fn monitor_task(cancel: CancellationToken) {
        cancel.cancelled().await;
        debug!("renewal scheduler monitor cancelled");
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("RenewalScheduler dropped while running; cancelling tasks");
            self.cancellation.cancel();
        }
    }
}
