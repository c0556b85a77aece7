//! Pass scheduling: the interval timer and watcher-driven passes
//!
//! [`PeriodicSync`] owns two background tasks while sync is started:
//!
//! ```text
//! interval timer ──────────────────────────────────→ SyncEngine::sync_now
//! FileWatcher ──→ ChangeScheduler (debounce) ──→ SyncEngine::sync_queued
//! ```
//!
//! Timer passes coalesce with a running pass. Watcher passes queue behind it,
//! so a change that settles mid-pass is still picked up. Both tasks follow
//! configuration updates without restarting: a new interval re-arms the timer
//! and a new folder or watch flag restarts the watch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use oxisync_core::config::SyncConfig;
use oxisync_core::ignore::IgnoreMatcher;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::SyncEngine;
use crate::watcher::{relative_paths, DebouncedChangeQueue, FileWatcher, WatchEvent};
use crate::SyncError;

/// How long a path must be quiet before it triggers a pass
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

/// How often a stopping scheduler re-cancels a pass that is still running
const STOP_POLL: Duration = Duration::from_millis(50);

// ============================================================================
// ChangeScheduler
// ============================================================================

/// Turns raw watch events into batches of settled relative paths
pub struct ChangeScheduler {
    root: PathBuf,
    ignore: IgnoreMatcher,
    events: mpsc::Receiver<WatchEvent>,
    queue: DebouncedChangeQueue,
}

impl ChangeScheduler {
    pub fn new(
        root: PathBuf,
        ignore: IgnoreMatcher,
        events: mpsc::Receiver<WatchEvent>,
        quiet: Duration,
    ) -> Self {
        Self {
            root,
            ignore,
            events,
            queue: DebouncedChangeQueue::new(quiet),
        }
    }

    /// Starts a watch on the configured sync folder.
    ///
    /// The returned watcher must be kept alive for events to flow.
    pub async fn watch(config: &SyncConfig) -> anyhow::Result<(FileWatcher, Self)> {
        tokio::fs::create_dir_all(&config.sync_folder).await?;
        let ignore = IgnoreMatcher::from_config(config)?;
        let (watcher, events) = FileWatcher::start(&config.sync_folder)?;
        let scheduler = Self::new(config.sync_folder.clone(), ignore, events, DEBOUNCE_WINDOW);
        Ok((watcher, scheduler))
    }

    /// Waits for the next batch of settled paths.
    ///
    /// Returns `None` once the event channel is closed and nothing is left
    /// to report. Cancel safe.
    pub async fn next_batch(&mut self) -> Option<Vec<String>> {
        loop {
            let deadline = self.queue.next_deadline();
            let settle = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.enqueue(&event),
                    None => {
                        if self.queue.is_empty() {
                            return None;
                        }
                        let rest = self.queue.take_settled(Instant::now() + DEBOUNCE_WINDOW * 2);
                        return Some(rest);
                    }
                },
                () = settle => {
                    let settled = self.queue.take_settled(Instant::now());
                    if !settled.is_empty() {
                        return Some(settled);
                    }
                }
            }
        }
    }

    fn enqueue(&mut self, event: &WatchEvent) {
        for path in relative_paths(&self.root, event) {
            if self.ignore.is_ignored(&path) {
                continue;
            }
            debug!(path = %path, "Local change queued");
            self.queue.push(path);
        }
    }
}

// ============================================================================
// PeriodicSync
// ============================================================================

struct Running {
    stop: CancellationToken,
    config_tx: watch::Sender<Arc<SyncConfig>>,
    timer: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

/// Arms and disarms the background pass triggers
pub struct PeriodicSync {
    engine: Arc<SyncEngine>,
    running: Mutex<Option<Running>>,
}

impl PeriodicSync {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            running: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Arms the timer and the watcher. Starting twice is a no-op.
    ///
    /// The first timer pass runs immediately.
    pub async fn start(&self) -> Result<(), SyncError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Periodic sync already running");
            return Ok(());
        }

        let config = self.engine.state().config();
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(SyncError::InvalidConfig(errors));
        }

        let stop = CancellationToken::new();
        let (config_tx, config_rx) = watch::channel(config.clone());
        let timer = tokio::spawn(timer_loop(
            self.engine.clone(),
            config_rx.clone(),
            stop.clone(),
        ));
        let watcher = tokio::spawn(watch_loop(self.engine.clone(), config_rx, stop.clone()));

        info!(
            interval_secs = config.sync_interval_seconds,
            watch = config.watch_filesystem,
            "Periodic sync started"
        );
        *running = Some(Running {
            stop,
            config_tx,
            timer,
            watcher,
        });
        Ok(())
    }

    /// Disarms both triggers and cancels the running pass.
    ///
    /// Returns once the background tasks have exited.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.stop.cancel();
        self.engine.cancel_active();
        join_cancelling(&self.engine, running.timer).await;
        join_cancelling(&self.engine, running.watcher).await;
        self.engine.state().set_next_sync(None);
        info!("Periodic sync stopped");
    }

    /// Hands the current configuration to the running tasks.
    pub async fn rearm(&self) {
        if let Some(running) = self.running.lock().await.as_ref() {
            running.config_tx.send_replace(self.engine.state().config());
            debug!("Periodic sync re-armed");
        }
    }
}

/// Waits for `handle`, cancelling any pass the task starts in the meantime.
async fn join_cancelling(engine: &SyncEngine, mut handle: JoinHandle<()>) {
    let mut poll = tokio::time::interval(STOP_POLL);
    loop {
        tokio::select! {
            joined = &mut handle => {
                if let Err(e) = joined {
                    warn!(error = %e, "Scheduler task ended abnormally");
                }
                return;
            }
            _ = poll.tick() => engine.cancel_active(),
        }
    }
}

fn log_pass(trigger: &str, result: Result<oxisync_core::domain::SyncResult, SyncError>) {
    match result {
        Ok(r) if r.success => debug!(trigger, "Scheduled pass complete"),
        Ok(r) => warn!(trigger, errors = r.errors.len(), "Scheduled pass finished with errors"),
        Err(e) => warn!(trigger, error = %e, "Scheduled pass did not run"),
    }
}

// ------------------------------------------------------------------
// Timer
// ------------------------------------------------------------------

enum TimerWake {
    Stop,
    Reconfigure,
    Tick,
}

fn ticker(secs: u64, immediate: bool) -> Option<tokio::time::Interval> {
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn timer_loop(
    engine: Arc<SyncEngine>,
    mut config_rx: watch::Receiver<Arc<SyncConfig>>,
    stop: CancellationToken,
) {
    let mut secs = config_rx.borrow_and_update().sync_interval_seconds;
    let mut timer = ticker(secs, true);
    if timer.is_none() {
        info!("Sync interval is 0, timer disabled");
    }

    loop {
        let tick = async {
            match timer.as_mut() {
                Some(t) => {
                    t.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        let wake = tokio::select! {
            () = stop.cancelled() => TimerWake::Stop,
            changed = config_rx.changed() => match changed {
                Ok(()) => TimerWake::Reconfigure,
                Err(_) => TimerWake::Stop,
            },
            () = tick => TimerWake::Tick,
        };

        match wake {
            TimerWake::Stop => break,
            TimerWake::Reconfigure => {
                let next = config_rx.borrow_and_update().sync_interval_seconds;
                if next != secs {
                    info!(from = secs, to = next, "Sync interval changed");
                    secs = next;
                    timer = ticker(secs, false);
                    engine.state().set_next_sync(
                        (secs > 0).then(|| Utc::now() + chrono::Duration::seconds(secs as i64)),
                    );
                }
            }
            TimerWake::Tick => {
                engine
                    .state()
                    .set_next_sync(Some(Utc::now() + chrono::Duration::seconds(secs as i64)));
                log_pass("timer", engine.sync_now().await);
            }
        }
    }
    debug!("Timer task exited");
}

// ------------------------------------------------------------------
// Watcher
// ------------------------------------------------------------------

enum WatchWake {
    Stop,
    Reconfigure,
    Batch(Option<Vec<String>>),
}

async fn watch_loop(
    engine: Arc<SyncEngine>,
    mut config_rx: watch::Receiver<Arc<SyncConfig>>,
    stop: CancellationToken,
) {
    let mut current: Option<(PathBuf, bool, Vec<String>)> = None;
    let mut changes: Option<(FileWatcher, ChangeScheduler)> = None;

    loop {
        let config = config_rx.borrow_and_update().clone();
        let key = (
            config.sync_folder.clone(),
            config.watch_filesystem,
            config.ignore_patterns.clone(),
        );
        if current.as_ref() != Some(&key) {
            changes = None;
            if config.watch_filesystem {
                match ChangeScheduler::watch(&config).await {
                    Ok(started) => changes = Some(started),
                    Err(e) => warn!(error = %e, "File watching unavailable, relying on the timer"),
                }
            }
            current = Some(key);
        }

        loop {
            let batch = async {
                match changes.as_mut() {
                    Some((_, scheduler)) => scheduler.next_batch().await,
                    None => std::future::pending().await,
                }
            };
            let wake = tokio::select! {
                () = stop.cancelled() => WatchWake::Stop,
                changed = config_rx.changed() => match changed {
                    Ok(()) => WatchWake::Reconfigure,
                    Err(_) => WatchWake::Stop,
                },
                batch = batch => WatchWake::Batch(batch),
            };

            match wake {
                WatchWake::Stop => {
                    debug!("Watcher task exited");
                    return;
                }
                WatchWake::Reconfigure => break,
                WatchWake::Batch(None) => {
                    warn!("Watch channel closed, file watching stopped");
                    changes = None;
                }
                WatchWake::Batch(Some(paths)) => {
                    info!(count = paths.len(), "Local changes settled, queueing pass");
                    engine.note_local_changes(paths);
                    log_pass("watcher", engine.sync_queued().await);
                }
            }
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
