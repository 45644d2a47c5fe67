//! Sync coordinator.
//!
//! Owns the per-channel polling timers and the single-flight guard that keeps
//! two runs for the same channel from overlapping. A run reads the channel's
//! cursor, pulls orders from the platform, ingests each one and, if the pull
//! succeeded, moves the cursor to the moment the run started.
//!
//! Timers are cancelled through a [`CancellationToken`]. Cancelling stops
//! future ticks only; a run that already started is left to finish.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::AdapterSet;
use crate::db::AppDb;
use crate::error::{SyncError, SyncResult};
use crate::models::{Channel, ChannelStatus, OrderOrigin, SyncConfig};
use crate::stats::{self, StatsDelta};
use crate::store::{self, IngestOutcome};
use crate::{registry, sync_config};

/// Window pulled when a channel has never been synced.
const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Skip reasons kept per summary; the count is always exact.
const MAX_SKIPPED_REASONS: usize = 20;

type ChannelKey = (String, String);

fn key(tenant_id: &str, channel_id: &str) -> ChannelKey {
    (tenant_id.to_string(), channel_id.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    Scheduled,
    Manual,
}

impl SyncTrigger {
    fn origin(self) -> OrderOrigin {
        match self {
            SyncTrigger::Scheduled => OrderOrigin::Polling,
            SyncTrigger::Manual => OrderOrigin::Manual,
        }
    }
}

/// What one run did.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub trigger: SyncTrigger,
    pub started_at: DateTime<Utc>,
    pub since: DateTime<Utc>,
    pub fetched: usize,
    pub ingested: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub skipped_reasons: Vec<String>,
    /// The platform had more pages than one run pulls.
    pub truncated: bool,
    /// Where the next run starts; `None` when the run left it unchanged.
    pub cursor: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(skip)]
    newest_order_at: Option<DateTime<Utc>>,
}

impl SyncSummary {
    fn new(trigger: SyncTrigger, started_at: DateTime<Utc>, since: DateTime<Utc>) -> Self {
        Self {
            trigger,
            started_at,
            since,
            fetched: 0,
            ingested: 0,
            duplicates: 0,
            skipped: 0,
            skipped_reasons: Vec::new(),
            truncated: false,
            cursor: None,
            error: None,
            newest_order_at: None,
        }
    }

    fn skip(&mut self, index: usize, reason: &SyncError) {
        self.skipped += 1;
        if self.skipped_reasons.len() < MAX_SKIPPED_REASONS {
            self.skipped_reasons.push(format!("order #{index}: {reason}"));
        }
    }
}

/// Where the next scheduled run should start after a successful run.
///
/// - A complete pull moves the cursor to the run's start.
/// - A pull cut short by the page limit moves it to one second before the
///   newest order seen, and only forward. Pages come oldest first, and some
///   platforms filter strictly after the cursor, so orders sharing that
///   second are pulled again as duplicates rather than lost.
/// - A manual window that starts after the stored cursor covered only part
///   of the pending range, so the cursor stays put.
fn next_cursor(
    summary: &SyncSummary,
    stored: Option<DateTime<Utc>>,
    overridden: bool,
) -> Option<DateTime<Utc>> {
    if overridden && stored.is_some_and(|stored| summary.since > stored) {
        return None;
    }
    if summary.truncated {
        return summary
            .newest_order_at
            .map(|newest| newest.trunc_subsecs(0) - chrono::Duration::seconds(1))
            .filter(|newest| *newest > summary.since && *newest <= summary.started_at);
    }
    Some(summary.started_at)
}

#[derive(Debug)]
pub enum SyncOutcome {
    Completed(SyncSummary),
    /// Another run held the channel; nothing was fetched.
    Skipped,
    /// The channel was disconnected before or during the run.
    ChannelGone,
}

/// Holds a channel's running marker; dropping it releases the marker.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<ChannelKey>>,
    key: ChannelKey,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        lock(self.running).remove(&self.key);
    }
}

struct Timer {
    token: CancellationToken,
    interval_minutes: i64,
    generation: u64,
}

pub struct SyncCoordinator {
    pool: AppDb,
    adapters: AdapterSet,
    running: Mutex<HashSet<ChannelKey>>,
    timers: Mutex<HashMap<ChannelKey, Timer>>,
    last_runs: Mutex<HashMap<ChannelKey, SyncSummary>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl SyncCoordinator {
    pub fn new(pool: AppDb, adapters: AdapterSet) -> Arc<Self> {
        Arc::new(Self {
            pool,
            adapters,
            running: Mutex::new(HashSet::new()),
            timers: Mutex::new(HashMap::new()),
            last_runs: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    fn try_acquire(&self, key: &ChannelKey) -> Option<RunGuard<'_>> {
        if lock(&self.running).insert(key.clone()) {
            Some(RunGuard {
                running: &self.running,
                key: key.clone(),
            })
        } else {
            None
        }
    }

    pub fn is_running(&self, tenant_id: &str, channel_id: &str) -> bool {
        lock(&self.running).contains(&key(tenant_id, channel_id))
    }

    /// Interval of the channel's polling timer, if one is scheduled.
    pub fn scheduled_interval(&self, tenant_id: &str, channel_id: &str) -> Option<i64> {
        lock(&self.timers)
            .get(&key(tenant_id, channel_id))
            .map(|t| t.interval_minutes)
    }

    pub fn last_run(&self, tenant_id: &str, channel_id: &str) -> Option<SyncSummary> {
        lock(&self.last_runs).get(&key(tenant_id, channel_id)).cloned()
    }

    /// Run one sync for a channel.
    ///
    /// A scheduled run that finds the channel busy is skipped; a manual one
    /// fails with `SyncInProgress`. The running marker is released on every
    /// exit path.
    pub async fn run_sync(
        &self,
        tenant_id: &str,
        channel_id: &str,
        trigger: SyncTrigger,
        since_override: Option<DateTime<Utc>>,
    ) -> SyncResult<SyncOutcome> {
        let key = key(tenant_id, channel_id);
        let Some(_guard) = self.try_acquire(&key) else {
            return match trigger {
                SyncTrigger::Manual => Err(SyncError::SyncInProgress(channel_id.to_string())),
                SyncTrigger::Scheduled => {
                    debug!(
                        tenant_id,
                        channel_id,
                        outcome = "skipped",
                        "Scheduled sync skipped, a run is already in progress"
                    );
                    Ok(SyncOutcome::Skipped)
                }
            };
        };

        // SQLite keeps millisecond precision, so the cursor does too.
        let started_at = Utc::now().trunc_subsecs(3);
        let Some(channel) = registry::find(&self.pool, tenant_id, channel_id).await? else {
            warn!(tenant_id, channel_id, "Sync requested for a channel that no longer exists");
            return Ok(SyncOutcome::ChannelGone);
        };

        let since = since_override
            .or(channel.last_sync_at)
            .unwrap_or_else(|| started_at - chrono::Duration::hours(DEFAULT_LOOKBACK_HOURS));
        let mut summary = SyncSummary::new(trigger, started_at, since);
        debug!(tenant_id, channel_id, ?trigger, %since, "Sync run started");

        if let Err(e) = self.pull_and_ingest(&channel, trigger, &mut summary).await {
            self.record_failure(&channel, &e, summary).await;
            return Err(e);
        }

        summary.cursor = next_cursor(&summary, channel.last_sync_at, since_override.is_some());
        match summary.cursor {
            Some(cursor) => {
                if !registry::advance_cursor(&self.pool, tenant_id, channel_id, cursor).await? {
                    warn!(tenant_id, channel_id, "Channel removed during sync, dropping the run");
                    return Ok(SyncOutcome::ChannelGone);
                }
            }
            None => {
                if registry::find(&self.pool, tenant_id, channel_id).await?.is_none() {
                    warn!(tenant_id, channel_id, "Channel removed during sync, dropping the run");
                    return Ok(SyncOutcome::ChannelGone);
                }
                registry::set_status(&self.pool, tenant_id, channel_id, ChannelStatus::Connected, None)
                    .await?;
            }
        }
        if summary.truncated {
            warn!(
                tenant_id,
                channel_id,
                fetched = summary.fetched,
                cursor = ?summary.cursor,
                "Page limit reached, the next run continues from the newest order seen"
            );
        }

        info!(
            tenant_id,
            channel_id,
            ?trigger,
            fetched = summary.fetched,
            ingested = summary.ingested,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            truncated = summary.truncated,
            "Sync run completed"
        );
        lock(&self.last_runs).insert(key, summary.clone());
        Ok(SyncOutcome::Completed(summary))
    }

    async fn pull_and_ingest(
        &self,
        channel: &Channel,
        trigger: SyncTrigger,
        summary: &mut SyncSummary,
    ) -> SyncResult<()> {
        let adapter = self.adapters.get(channel.platform)?;
        let batch = adapter.fetch_orders_since(channel, summary.since).await?;
        summary.fetched = batch.orders.len();
        summary.truncated = batch.truncated;

        for (index, payload) in batch.orders.iter().enumerate() {
            let order = match adapter.normalize(payload) {
                Ok(order) => order,
                Err(e) => {
                    debug!(channel_id = %channel.channel_id, index, "Skipping order: {}", e);
                    summary.skip(index, &e);
                    continue;
                }
            };
            if let Some(created) = order.external_created_at {
                summary.newest_order_at = summary.newest_order_at.max(Some(created));
            }
            match store::ingest(
                &self.pool,
                &channel.tenant_id,
                &channel.channel_id,
                &order,
                trigger.origin(),
            )
            .await?
            {
                IngestOutcome::Inserted { .. } => summary.ingested += 1,
                IngestOutcome::Duplicate => summary.duplicates += 1,
            }
        }
        Ok(())
    }

    async fn record_failure(&self, channel: &Channel, err: &SyncError, mut summary: SyncSummary) {
        let (tenant_id, channel_id) = (channel.tenant_id.as_str(), channel.channel_id.as_str());
        error!(tenant_id, channel_id, "Sync run failed: {}", err);

        let message = err.to_string();
        if let Err(e) =
            registry::set_status(&self.pool, tenant_id, channel_id, ChannelStatus::Error, Some(message.as_str())).await
        {
            error!("Failed to record channel error status: {}", e);
        }
        if let Err(e) =
            stats::increment(&self.pool, tenant_id, channel_id, stats::today(), StatsDelta::sync_error()).await
        {
            error!("Failed to count sync error: {}", e);
        }

        summary.error = Some(message);
        lock(&self.last_runs).insert(key(tenant_id, channel_id), summary);
    }

    /// Read-only fetch of the last day of orders to prove the credentials work.
    ///
    /// Updates the channel's connection status either way.
    pub async fn test_connection(&self, channel: &Channel) -> SyncResult<usize> {
        let adapter = self.adapters.get(channel.platform)?;
        let since = Utc::now() - chrono::Duration::hours(DEFAULT_LOOKBACK_HOURS);
        match adapter.fetch_orders_since(channel, since).await {
            Ok(batch) => {
                registry::set_status(
                    &self.pool,
                    &channel.tenant_id,
                    &channel.channel_id,
                    ChannelStatus::Connected,
                    None,
                )
                .await?;
                Ok(batch.orders.len())
            }
            Err(e) => {
                warn!(channel_id = %channel.channel_id, "Connection test failed: {}", e);
                let message = e.to_string();
                registry::set_status(
                    &self.pool,
                    &channel.tenant_id,
                    &channel.channel_id,
                    ChannelStatus::Error,
                    Some(message.as_str()),
                )
                .await?;
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    /// Start (or replace) the polling timer for a channel.
    ///
    /// The first run fires immediately, then every `interval_minutes`.
    pub fn schedule(self: &Arc<Self>, tenant_id: &str, channel_id: &str, interval_minutes: i64) {
        let interval_minutes = interval_minutes.clamp(1, sync_config::MAX_INTERVAL_MINUTES);
        let period = Duration::from_secs(interval_minutes.unsigned_abs().saturating_mul(60));
        self.spawn_timer(tenant_id, channel_id, period, interval_minutes);
    }

    fn spawn_timer(
        self: &Arc<Self>,
        tenant_id: &str,
        channel_id: &str,
        period: Duration,
        interval_minutes: i64,
    ) {
        let key = key(tenant_id, channel_id);
        let token = self.shutdown.child_token();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let previous = lock(&self.timers).insert(
            key.clone(),
            Timer {
                token: token.clone(),
                interval_minutes,
                generation,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        info!(tenant_id, channel_id, interval_minutes, "Polling timer scheduled");
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.timer_loop(key, period, token, generation).await;
        });
    }

    async fn timer_loop(
        self: Arc<Self>,
        key: ChannelKey,
        period: Duration,
        token: CancellationToken,
        generation: u64,
    ) {
        let (tenant_id, channel_id) = (key.0.as_str(), key.1.as_str());
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_sync(tenant_id, channel_id, SyncTrigger::Scheduled, None).await {
                Ok(SyncOutcome::Completed(_)) | Ok(SyncOutcome::Skipped) => {}
                Ok(SyncOutcome::ChannelGone) => {
                    self.remove_timer(&key, generation);
                    break;
                }
                // Already logged and counted; the next tick retries the same window.
                Err(e) => debug!(tenant_id, channel_id, "Scheduled sync failed: {}", e),
            }
        }
        debug!(tenant_id, channel_id, "Polling timer stopped");
    }

    fn remove_timer(&self, key: &ChannelKey, generation: u64) {
        let mut timers = lock(&self.timers);
        if timers.get(key).is_some_and(|t| t.generation == generation) {
            if let Some(timer) = timers.remove(key) {
                timer.token.cancel();
            }
        }
    }

    /// Stop the polling timer for a channel. In-flight runs are not interrupted.
    pub fn cancel(&self, tenant_id: &str, channel_id: &str) -> bool {
        match lock(&self.timers).remove(&key(tenant_id, channel_id)) {
            Some(timer) => {
                timer.token.cancel();
                info!(tenant_id, channel_id, "Polling timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Bring the channel's timer in line with its sync config.
    ///
    /// An unchanged interval keeps the running timer.
    pub fn apply_config(self: &Arc<Self>, config: &SyncConfig) {
        let (tenant_id, channel_id) = (config.tenant_id.as_str(), config.channel_id.as_str());
        if !config.wants_polling() {
            self.cancel(tenant_id, channel_id);
            return;
        }
        if self.scheduled_interval(tenant_id, channel_id) != Some(config.interval_minutes) {
            self.schedule(tenant_id, channel_id, config.interval_minutes);
        }
    }

    /// Re-create timers for every stored polling config.
    pub async fn restore(self: &Arc<Self>) -> SyncResult<usize> {
        let configs = sync_config::list_polling(&self.pool).await?;
        for config in &configs {
            self.apply_config(config);
        }
        info!(count = configs.len(), "Polling timers restored");
        Ok(configs.len())
    }

    /// Cancel every timer. Runs already in flight finish on their own.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let cancelled = {
            let mut timers = lock(&self.timers);
            let count = timers.len();
            timers.clear();
            count
        };
        info!(cancelled, "Sync coordinator stopped");
    }
}
