//! Metrics poller - periodic, failure-tolerant network statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{ConfigError, PollError, PollResult};
use crate::metrics::record_poll;
use crate::models::MetricsSnapshot;
use crate::ports::{ChainNode, FinalizedHead, NodeHealth};
use crate::services::connection::Session;
use crate::services::registry::{Liveness, SubscriptionRegistry};

/// Timer name under which the poller registers itself.
const TIMER_NAME: &str = "metrics";

/// Metrics poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between ticks. The first tick fires immediately.
    pub interval: Duration,
    /// Reported as average block time until two distinct heights are seen.
    pub expected_block_time: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            expected_block_time: Duration::from_secs(6),
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError {
                field: "poll_interval",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// Average block time label shown before any measurement.
    pub fn expected_block_time_label(&self) -> String {
        seconds_label(self.expected_block_time)
    }
}

fn seconds_label(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

// =============================================================================
// Tracker
// =============================================================================

/// Results of one tick's queries, all taken together.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PollReading {
    finalized: FinalizedHead,
    health: NodeHealth,
    validators: u64,
}

/// Derives snapshot labels from the history of poll outcomes.
#[derive(Debug)]
struct PollTracker {
    expected_block_time: Duration,
    successes: u64,
    failures: u64,
    /// Finalized height and time of the first successful poll.
    baseline: Option<(u64, Instant)>,
}

impl PollTracker {
    fn new(expected_block_time: Duration) -> Self {
        Self {
            expected_block_time,
            successes: 0,
            failures: 0,
            baseline: None,
        }
    }

    fn record_failure(&mut self) {
        self.failures += 1;
    }

    fn record_success(&mut self, reading: &PollReading, now: Instant) -> MetricsSnapshot {
        self.successes += 1;
        let PollReading {
            finalized,
            health,
            validators,
        } = reading;

        // A lower height means the node was reset or swapped; start over.
        match self.baseline {
            Some((height, _)) if finalized.number >= height => {}
            _ => self.baseline = Some((finalized.number, now)),
        }

        MetricsSnapshot {
            finalized_height: finalized.number,
            peer_count: health.peers,
            is_syncing: health.is_syncing,
            active_validators: *validators,
            uptime_label: self.uptime_label(),
            avg_block_time_label: self.avg_block_time_label(finalized.number, now),
            last_successful_poll_at: Some(Utc::now()),
        }
    }

    fn uptime_label(&self) -> String {
        let total = self.successes + self.failures;
        if total == 0 {
            return "n/a".to_string();
        }
        format!("{:.1}%", self.successes as f64 * 100.0 / total as f64)
    }

    fn avg_block_time_label(&self, height: u64, now: Instant) -> String {
        match self.baseline {
            Some((base, since)) if height > base => {
                let elapsed = now.saturating_duration_since(since).as_secs_f64();
                format!("{:.1}s", elapsed / (height - base) as f64)
            }
            _ => seconds_label(self.expected_block_time),
        }
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Starts metrics pollers over connected sessions.
#[derive(Debug, Clone)]
pub struct MetricsPoller {
    config: PollerConfig,
}

impl MetricsPoller {
    pub fn new(config: PollerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Start polling on the session's node.
    ///
    /// The timer registers in the session registry, so tearing down the
    /// session stops the poller. On a closed session the returned handle is
    /// already inert.
    #[instrument(skip_all, fields(endpoint = %session.endpoint()))]
    pub fn start(&self, session: &Session) -> PollerHandle {
        let liveness = Liveness::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(MetricsSnapshot::empty(
            self.config.expected_block_time_label(),
        )));
        let stats = Arc::new(PollCounters::default());

        let state = Arc::new(PollState {
            node: Arc::clone(session.node()),
            registry: Arc::clone(session.registry()),
            liveness: liveness.clone(),
            tracker: Mutex::new(PollTracker::new(self.config.expected_block_time)),
            snapshot: snapshot_tx,
            busy: AtomicBool::new(false),
            stats: Arc::clone(&stats),
        });

        let task = tokio::spawn(run(state, self.config.interval));
        let abort = task.abort_handle();
        if session
            .registry()
            .register_timer(TIMER_NAME, liveness.clone(), task)
        {
            info!(interval = ?self.config.interval, "📊 Metrics poller started");
        } else {
            warn!("⚠️  Session already torn down, metrics poller not started");
        }

        PollerHandle {
            liveness,
            snapshot: snapshot_rx,
            stats,
            abort,
        }
    }
}

/// Shared state between the timer loop and its tick tasks.
struct PollState {
    node: Arc<dyn ChainNode>,
    registry: Arc<SubscriptionRegistry>,
    liveness: Liveness,
    tracker: Mutex<PollTracker>,
    snapshot: watch::Sender<Arc<MetricsSnapshot>>,
    busy: AtomicBool,
    stats: Arc<PollCounters>,
}

#[derive(Debug, Default)]
struct PollCounters {
    ticks: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

/// Clears the busy flag when a tick ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn run(state: Arc<PollState>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !state.liveness.is_live() {
            break;
        }
        state.stats.ticks.fetch_add(1, Ordering::Relaxed);

        if state.busy.swap(true, Ordering::AcqRel) {
            debug!("Previous poll still running, skipping tick");
            state.stats.skipped.fetch_add(1, Ordering::Relaxed);
            record_poll("skipped");
            continue;
        }

        tokio::spawn(tick(Arc::clone(&state)));
    }
}

async fn tick(state: Arc<PollState>) {
    let _busy = BusyGuard(&state.busy);
    let Some(_ticket) = state
        .registry
        .register_fetch(format!("poll:{TIMER_NAME}"), state.liveness.clone())
    else {
        return;
    };

    let result = poll_once(state.node.as_ref()).await;

    if !state.liveness.is_live() {
        trace!("Dropping late poll result");
        return;
    }

    match result {
        Ok(reading) => {
            let snapshot = state
                .tracker
                .lock()
                .record_success(&reading, Instant::now());
            debug!(
                finalized = snapshot.finalized_height,
                peers = snapshot.peer_count,
                validators = snapshot.active_validators,
                uptime = %snapshot.uptime_label,
                "Metrics refreshed"
            );
            state.snapshot.send_replace(Arc::new(snapshot));
            state.stats.successes.fetch_add(1, Ordering::Relaxed);
            record_poll("success");
        }
        Err(e) => {
            state.tracker.lock().record_failure();
            warn!(error = %e, "⚠️  Metrics poll failed, keeping last snapshot");
            state.stats.failures.fetch_add(1, Ordering::Relaxed);
            record_poll("failed");
        }
    }
}

/// All queries or nothing.
async fn poll_once(node: &dyn ChainNode) -> PollResult<PollReading> {
    let (finalized, health, validators) = tokio::try_join!(
        async {
            node.finalized_head()
                .await
                .map_err(|source| PollError::QueryFailed {
                    query: "finalized_head",
                    source,
                })
        },
        async {
            node.health().await.map_err(|source| PollError::QueryFailed {
                query: "health",
                source,
            })
        },
        async {
            node.validator_count()
                .await
                .map_err(|source| PollError::QueryFailed {
                    query: "validator_count",
                    source,
                })
        },
    )?;

    Ok(PollReading {
        finalized,
        health,
        validators,
    })
}

// =============================================================================
// Handle
// =============================================================================

/// Tick outcome totals since the poller started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub ticks: u64,
    pub successes: u64,
    pub failures: u64,
    pub skipped: u64,
}

/// Reader and stop switch of a running poller.
#[derive(Debug, Clone)]
pub struct PollerHandle {
    liveness: Liveness,
    snapshot: watch::Receiver<Arc<MetricsSnapshot>>,
    stats: Arc<PollCounters>,
    abort: AbortHandle,
}

impl PollerHandle {
    /// Last known-good snapshot.
    pub fn snapshot(&self) -> Arc<MetricsSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MetricsSnapshot>> {
        self.snapshot.clone()
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            successes: self.stats.successes.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
        }
    }

    pub fn is_live(&self) -> bool {
        self.liveness.is_live()
    }

    /// Cancel the timer. Outstanding queries are discarded. Idempotent.
    pub fn stop(&self) {
        if self.liveness.deactivate() {
            self.abort.abort();
            info!("🛑 Metrics poller stopped");
        }
    }
}
