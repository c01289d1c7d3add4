//! # Periodic Tasks
//!
//! Four independent loops share the [`AppState`]: the lifecycle sweep, the
//! statistics refresh, the snapshot sampler and the persister. Each one ticks
//! on its own interval and exits when the shared [`CancellationToken`] fires.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::http::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskIntervals {
    pub sweep: Duration,
    pub stats: Duration,
    pub snapshot: Duration,
    pub persist: Duration,
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self {
            sweep: Duration::from_secs(10),
            stats: Duration::from_secs(5),
            snapshot: Duration::from_secs(300),
            persist: Duration::from_secs(60),
        }
    }
}

/// Handles of the running loops.
pub struct PeriodicTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl PeriodicTasks {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every loop to return. Call after cancelling the token.
    pub async fn join(self) {
        for (name, handle) in self.handles {
            if let Err(err) = handle.await {
                warn!(task = name, error = %err, "periodic task ended abnormally");
            }
        }
    }
}

pub fn spawn_periodic_tasks(state: AppState, intervals: TaskIntervals, shutdown: CancellationToken) -> PeriodicTasks {
    let mut handles = Vec::with_capacity(4);

    let sweeper = state.clone();
    handles.push((
        "sweeper",
        spawn_loop("sweeper", intervals.sweep, true, shutdown.clone(), move || {
            let state = sweeper.clone();
            async move {
                let report = state.engine.lock().await.sweep(Utc::now());
                if !report.is_empty() {
                    info!(
                        pruned = report.pruned_readings,
                        archived = ?report.archived_devices,
                        removed_receivers = ?report.removed_receivers,
                        "lifecycle sweep"
                    );
                }
            }
        }),
    ));

    let stats = state.clone();
    handles.push((
        "stats",
        spawn_loop("stats", intervals.stats, true, shutdown.clone(), move || {
            let state = stats.clone();
            async move {
                let stats = state.engine.lock().await.refresh_stats(Utc::now());
                debug!(
                    total_steps = stats.total_steps,
                    active_devices = stats.active_devices,
                    active_receivers = stats.active_receivers,
                    "statistics refreshed"
                );
            }
        }),
    ));

    let sampler = state.clone();
    handles.push((
        "sampler",
        spawn_loop("sampler", intervals.snapshot, false, shutdown.clone(), move || {
            let state = sampler.clone();
            async move {
                let snapshot = state.engine.lock().await.record_snapshot(Utc::now());
                debug!(
                    total_steps = snapshot.total_steps,
                    offline = snapshot.offline_devices.len(),
                    "system snapshot recorded"
                );
            }
        }),
    ));

    let persister = state;
    handles.push((
        "persister",
        spawn_loop("persister", intervals.persist, false, shutdown, move || {
            let state = persister.clone();
            async move {
                if let Err(err) = state.persist().await {
                    warn!(error = %err, "periodic persistence failed, retrying next cycle");
                }
            }
        }),
    ));

    PeriodicTasks { handles }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    run_immediately: bool,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let period = period.max(Duration::from_millis(1));
        let start = if run_immediately { Instant::now() } else { Instant::now() + period };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(task = name, ?period, "periodic task started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(task = name, "periodic task received shutdown signal");
                    break;
                }
                _ = ticker.tick() => tick().await,
            }
        }
    })
}
