//! Watch lifecycle supervision.
//!
//! One cancellable polling task per (handle, direction) pair. The supervisor
//! owns the task table and guarantees the two ways a watch can end stay
//! mutually exclusive: an explicit stop cancels the task before touching the
//! registry, and a terminal detection must first retire its own table entry
//! (generation-checked, under the table lock) before it may notify. Whoever
//! gets the lock first wins; the loser does nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rand::RngExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{FetchAttempt, ProfileSource};
use crate::config::ConfigService;
use crate::notification::{Notifier, WatchOutcome, deliver};
use crate::registry::{WatchEntry, WatchRegistry};
use crate::utils::normalize_handle;
use crate::watch::{Classification, ProfileSnapshot, WatchDirection, classify, is_auth_error};
use crate::{Error, Result};

/// Consecutive auth-class errors before a watch enters cooldown.
const AUTH_ERROR_THRESHOLD: u32 = 3;

/// Cooldown bounds per direction, seconds. Recovery watches poll a banned
/// account where auth noise is routine; ban watches back off much harder.
const RECOVERY_COOLDOWN_SECS: (u64, u64) = (20, 40);
const BAN_COOLDOWN_SECS: (u64, u64) = (300, 600);

struct WatchTask {
    generation: u64,
    token: CancellationToken,
    join: JoinHandle<()>,
}

/// Owns every polling task and the two durable registries.
pub struct MonitorSupervisor {
    config: Arc<ConfigService>,
    source: Arc<dyn ProfileSource>,
    notifier: Arc<dyn Notifier>,
    ban_registry: Arc<WatchRegistry>,
    recovery_registry: Arc<WatchRegistry>,
    tasks: Mutex<HashMap<(String, WatchDirection), WatchTask>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl MonitorSupervisor {
    pub fn new(
        config: Arc<ConfigService>,
        source: Arc<dyn ProfileSource>,
        notifier: Arc<dyn Notifier>,
        ban_registry: Arc<WatchRegistry>,
        recovery_registry: Arc<WatchRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            source,
            notifier,
            ban_registry,
            recovery_registry,
            tasks: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn registry(&self, direction: WatchDirection) -> &WatchRegistry {
        match direction {
            WatchDirection::AwaitingBan => &self.ban_registry,
            WatchDirection::AwaitingRecovery => &self.recovery_registry,
        }
    }

    /// Begin watching `handle`. The registry entry is persisted before the
    /// task spawns, so a crash between the two resumes the watch on restart.
    pub fn start(
        self: &Arc<Self>,
        handle: &str,
        direction: WatchDirection,
        target: &str,
        requested_by: &str,
    ) -> Result<()> {
        let handle = normalize_handle(handle);
        if handle.is_empty() {
            return Err(Error::validation("handle must not be empty"));
        }

        let registry = self.registry(direction);
        if registry.contains(&handle) || self.is_watching(&handle, direction) {
            return Err(Error::validation(format!(
                "@{handle} is already being watched for {direction}"
            )));
        }

        let max_watch = self.config.max_watch();
        if registry.len() >= max_watch {
            return Err(Error::validation(format!(
                "watch limit reached ({max_watch})"
            )));
        }

        registry.add(&handle, WatchEntry::new(target, requested_by))?;
        self.spawn(handle, direction);
        Ok(())
    }

    /// Respawn tasks for every persisted entry in both registries.
    /// Resume skips the admission probe; the loop's first poll decides.
    pub fn resume_all(self: &Arc<Self>) -> usize {
        let mut resumed = 0;
        for direction in WatchDirection::ALL {
            for (handle, _) in self.registry(direction).entries() {
                if !self.is_watching(&handle, direction) {
                    self.spawn(handle, direction);
                    resumed += 1;
                }
            }
        }
        if resumed > 0 {
            info!(count = resumed, "Resumed persisted watches");
        }
        resumed
    }

    /// Stop watching `handle`. Cancels the task first, then drops the
    /// registry entry; returns `false` when neither existed.
    pub fn stop(&self, handle: &str, direction: WatchDirection) -> Result<bool> {
        let handle = normalize_handle(handle);

        let task = self.tasks.lock().remove(&(handle.clone(), direction));
        let had_task = match task {
            Some(task) => {
                task.token.cancel();
                true
            }
            None => false,
        };

        let had_entry = self.registry(direction).remove(&handle)?;

        if had_task || had_entry {
            info!(handle = %handle, %direction, "Watch stopped");
        }
        Ok(had_task || had_entry)
    }

    /// Stop every watch in one direction. Returns the handles removed.
    pub fn stop_all(&self, direction: WatchDirection) -> Result<Vec<String>> {
        {
            let mut tasks = self.tasks.lock();
            let keys: Vec<_> = tasks
                .keys()
                .filter(|(_, d)| *d == direction)
                .cloned()
                .collect();
            for key in keys {
                if let Some(task) = tasks.remove(&key) {
                    task.token.cancel();
                }
            }
        }
        self.registry(direction).clear()
    }

    /// Cancel everything and wait for the polling tasks to unwind.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<WatchTask> = {
            let mut table = self.tasks.lock();
            table.drain().map(|(_, task)| task).collect()
        };
        for task in tasks {
            task.token.cancel();
            if let Err(e) = task.join.await {
                error!(error = %e, "Watch task panicked during shutdown");
            }
        }
        info!("Supervisor shut down");
    }

    pub fn is_watching(&self, handle: &str, direction: WatchDirection) -> bool {
        self.tasks
            .lock()
            .contains_key(&(handle.to_string(), direction))
    }

    /// Handles with a live polling task in `direction`, sorted.
    pub fn active(&self, direction: WatchDirection) -> Vec<String> {
        let mut handles: Vec<String> = self
            .tasks
            .lock()
            .keys()
            .filter(|(_, d)| *d == direction)
            .map(|(h, _)| h.clone())
            .collect();
        handles.sort();
        handles
    }

    fn spawn(self: &Arc<Self>, handle: String, direction: WatchDirection) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();

        let join = tokio::spawn(Self::watch_loop(
            Arc::clone(self),
            handle.clone(),
            direction,
            generation,
            token.clone(),
        ));

        let previous = self.tasks.lock().insert(
            (handle.clone(), direction),
            WatchTask {
                generation,
                token,
                join,
            },
        );
        // start() checks the table first, but a stale entry from a task that
        // retired between the check and here must not keep running.
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        info!(handle = %handle, %direction, "Watch task spawned");
    }

    /// Remove this task's own table entry if it is still current.
    ///
    /// Returns `false` when the entry is gone, superseded by a newer
    /// generation, or already cancelled; the caller must then end silently.
    fn try_retire(&self, handle: &str, direction: WatchDirection, generation: u64) -> bool {
        let mut tasks = self.tasks.lock();
        let key = (handle.to_string(), direction);
        match tasks.get(&key) {
            Some(task) if task.generation == generation && !task.token.is_cancelled() => {
                tasks.remove(&key);
                true
            }
            _ => false,
        }
    }

    async fn watch_loop(
        self: Arc<Self>,
        handle: String,
        direction: WatchDirection,
        generation: u64,
        token: CancellationToken,
    ) {
        debug!(handle = %handle, %direction, "Watch loop started");
        let mut auth_errors = 0u32;

        // Fetch first, sleep last: the first observation lands right after
        // the watch starts, not a full poll interval later.
        loop {
            let attempt = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(handle = %handle, %direction, "Watch loop cancelled");
                    return;
                }
                attempt = self.source.fetch(&handle) => attempt,
            };

            if is_auth_error(attempt.status) {
                auth_errors += 1;
                if auth_errors >= AUTH_ERROR_THRESHOLD {
                    let cooldown = cooldown_delay(direction);
                    warn!(
                        handle = %handle,
                        %direction,
                        cooldown_secs = cooldown.as_secs(),
                        "Repeated auth errors, cooling down"
                    );
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(cooldown) => {}
                    }
                    auth_errors = 0;
                }
            } else {
                auth_errors = 0;

                match classify(direction, &handle, attempt.status, attempt.payload.as_ref()) {
                    Classification::Active | Classification::Indeterminate => {
                        debug!(handle = %handle, %direction, status = ?attempt.status, "Still watching");
                    }
                    Classification::Terminal => {
                        if !self.try_retire(&handle, direction, generation) {
                            debug!(handle = %handle, %direction, "Terminal detection lost to a stop");
                            return;
                        }
                        self.finish(&handle, direction, &attempt).await;
                        return;
                    }
                }
            }

            let delay = self.poll_delay();
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(handle = %handle, %direction, "Watch loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Terminal path: drop the registry entry, then notify exactly once.
    async fn finish(&self, handle: &str, direction: WatchDirection, attempt: &FetchAttempt) {
        let registry = self.registry(direction);
        let entry = registry.get(handle);
        if let Err(e) = registry.remove(handle) {
            error!(handle = %handle, %direction, error = %e, "Failed to unregister finished watch");
        }

        let outcome = WatchOutcome {
            handle: handle.to_string(),
            direction,
            target: entry.as_ref().map(|e| e.target.clone()).unwrap_or_default(),
            elapsed_secs: entry.map(|e| e.elapsed_secs()).unwrap_or(0),
            snapshot: ProfileSnapshot::from_payload(attempt.payload.as_ref()),
            render_card: self.config.generate_screenshots(),
            detected_at: Utc::now(),
        };

        info!(handle = %handle, %direction, "Terminal state detected");
        deliver(self.notifier.as_ref(), &outcome).await;
    }

    fn poll_delay(&self) -> Duration {
        let (min_secs, max_secs) = self.config.poll_window();
        if min_secs >= max_secs {
            return Duration::from_secs(min_secs);
        }
        Duration::from_secs(rand::rng().random_range(min_secs..=max_secs))
    }
}

fn cooldown_delay(direction: WatchDirection) -> Duration {
    let (min_secs, max_secs) = match direction {
        WatchDirection::AwaitingRecovery => RECOVERY_COOLDOWN_SECS,
        WatchDirection::AwaitingBan => BAN_COOLDOWN_SECS,
    };
    Duration::from_secs(rand::rng().random_range(min_secs..=max_secs))
}
