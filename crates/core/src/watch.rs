//! Watch channel lifecycle
//!
//! Registers provider webhook subscriptions, tracks their expirations, and
//! renews them ahead of expiry. Renewal ordering is the load-bearing part:
//! the replacement channel is opened and swapped in *before* the old one is
//! stopped, so there is never a window with zero active channels.

use calbridge_domain::{Result, SweepReport, SyncItemError, WatchChannel};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::batch::BatchProcessor;
use crate::ports::{ChannelRepository, RemoteCalendar};

/// Manages webhook subscriptions and drives the renewal sweep
pub struct WatchChannelService {
    remote: Arc<dyn RemoteCalendar>,
    channels: Arc<dyn ChannelRepository>,
    callback_url: String,
    batch: BatchProcessor,
}

impl WatchChannelService {
    pub fn new(
        remote: Arc<dyn RemoteCalendar>,
        channels: Arc<dyn ChannelRepository>,
        callback_url: String,
        batch: BatchProcessor,
    ) -> Self {
        Self { remote, channels, callback_url, batch }
    }

    /// Open a webhook subscription for the calendar and persist it as the
    /// active channel for the (user, calendar) pair.
    #[instrument(skip(self))]
    pub async fn register(&self, user_id: &str, calendar_id: &str) -> Result<WatchChannel> {
        let channel = self.remote.watch(user_id, calendar_id, &self.callback_url).await?;
        self.channels.swap_active(&channel).await?;

        info!(
            user_id,
            calendar_id,
            channel_id = %channel.id,
            expiration = %channel.expiration,
            "watch channel registered"
        );

        Ok(channel)
    }

    /// Active channels expiring within the lookahead window
    pub async fn list_expiring_within(
        &self,
        lookahead: ChronoDuration,
    ) -> Result<Vec<WatchChannel>> {
        self.channels.list_expiring_before(Utc::now() + lookahead).await
    }

    /// Replace the active channel for (user, calendar) with a fresh one.
    ///
    /// Order matters: open the new channel, atomically swap the active
    /// pointer, and only then stop the old channel. Stopping is best-effort;
    /// a channel we fail to stop simply expires on the provider side.
    #[instrument(skip(self))]
    pub async fn renew(&self, user_id: &str, calendar_id: &str) -> Result<WatchChannel> {
        let old = self.channels.find_active(user_id, calendar_id).await?;

        let new_channel = self.remote.watch(user_id, calendar_id, &self.callback_url).await?;
        self.channels.swap_active(&new_channel).await?;

        if let Some(old) = old {
            match self.remote.stop(user_id, &old.id, &old.resource_id).await {
                Ok(()) => debug!(channel_id = %old.id, "stopped superseded watch channel"),
                Err(err) => {
                    warn!(
                        channel_id = %old.id,
                        error = %err,
                        "failed to stop superseded channel, it will expire on its own"
                    );
                }
            }
        }

        info!(
            user_id,
            calendar_id,
            channel_id = %new_channel.id,
            expiration = %new_channel.expiration,
            "watch channel renewed"
        );

        Ok(new_channel)
    }

    /// Renew every channel expiring within the lookahead window, batched so
    /// one slow or broken account neither blocks the rest nor trips the
    /// provider rate limit.
    #[instrument(skip(self))]
    pub async fn renewal_sweep(&self, lookahead: ChronoDuration) -> Result<SweepReport> {
        let expiring = self.list_expiring_within(lookahead).await?;

        // One renewal per (user, calendar) pair even if several stale rows
        // linger around an earlier failed swap
        let mut seen = HashSet::new();
        let pairs: Vec<(String, String)> = expiring
            .into_iter()
            .filter(|c| seen.insert((c.user_id.clone(), c.calendar_id.clone())))
            .map(|c| (c.user_id, c.calendar_id))
            .collect();

        if pairs.is_empty() {
            debug!("no channels expiring within lookahead window");
            return Ok(SweepReport::default());
        }

        info!(count = pairs.len(), "starting renewal sweep");

        let outcomes = self
            .batch
            .process(pairs.clone(), |(user_id, calendar_id)| async move {
                self.renew(&user_id, &calendar_id).await
            })
            .await;

        let mut report = SweepReport { processed: outcomes.len(), ..Default::default() };
        for outcome in outcomes {
            match outcome.result {
                Ok(_) => report.successful += 1,
                Err(err) => {
                    report.failed += 1;
                    report.errors.push(SyncItemError::new(pairs[outcome.index].0.clone(), err));
                }
            }
        }

        info!(
            processed = report.processed,
            successful = report.successful,
            failed = report.failed,
            "renewal sweep completed"
        );

        Ok(report)
    }
}
