#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use igmon::Result;
use igmon::api::{FetchAttempt, ProfileSource};
use igmon::config::{AppConfig, ConfigService};
use igmon::credentials::SessionPool;
use igmon::notification::{Notifier, WatchOutcome};
use igmon::registry::WatchRegistry;
use igmon::supervisor::MonitorSupervisor;
use igmon::watch::WatchDirection;

/// Well-formed profile payload for `username`.
pub fn profile_payload(username: &str) -> serde_json::Value {
    json!({
        "data": {
            "user": {
                "username": username,
                "full_name": "Test Person",
                "edge_followed_by": {"count": 100},
                "edge_follow": {"count": 50},
                "edge_owner_to_timeline_media": {"count": 3},
            }
        }
    })
}

/// Observation of an active account.
pub fn active(username: &str) -> FetchAttempt {
    FetchAttempt {
        status: Some(200),
        payload: Some(profile_payload(username)),
        retries: 0,
    }
}

/// Observation with a bare status and no payload.
pub fn status_only(status: u16) -> FetchAttempt {
    FetchAttempt {
        status: Some(status),
        payload: None,
        retries: 0,
    }
}

/// Fetch source that replays a fixed script, then a default observation.
pub struct ScriptedSource {
    script: Mutex<VecDeque<FetchAttempt>>,
    default: FetchAttempt,
    fetches: AtomicU32,
}

impl ScriptedSource {
    pub fn new(script: Vec<FetchAttempt>, default: FetchAttempt) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            default,
            fetches: AtomicU32::new(0),
        })
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ProfileSource for ScriptedSource {
    async fn fetch(&self, _handle: &str) -> FetchAttempt {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Notifier that records every outcome it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    outcomes: Mutex<Vec<WatchOutcome>>,
}

impl RecordingNotifier {
    pub fn outcomes(&self) -> Vec<WatchOutcome> {
        self.outcomes.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.outcomes.lock().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, outcome: &WatchOutcome) -> Result<()> {
        self.outcomes.lock().push(outcome.clone());
        Ok(())
    }

    async fn send_fallback(&self, outcome: &WatchOutcome) -> Result<()> {
        self.send(outcome).await
    }
}

/// Fully wired supervisor over temp-dir state with a 1s poll window.
pub struct Harness {
    pub supervisor: Arc<MonitorSupervisor>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: Arc<ConfigService>,
    pub sessions: Arc<SessionPool>,
    pub dir: tempfile::TempDir,
}

pub fn harness(source: Arc<dyn ProfileSource>, max_watch: usize) -> Harness {
    harness_in(tempfile::tempdir().unwrap(), source, max_watch)
}

/// Like [`harness`], but over a caller-provided directory so registry
/// files can be seeded or reused across supervisor instances.
pub fn harness_in(
    dir: tempfile::TempDir,
    source: Arc<dyn ProfileSource>,
    max_watch: usize,
) -> Harness {
    let config = AppConfig {
        min_check_interval_secs: 1,
        max_check_interval_secs: 1,
        max_watch,
        require_proxy: false,
        admin_ids: vec!["admin".to_string()],
        ..AppConfig::default()
    };
    let config =
        Arc::new(ConfigService::with_config(dir.path().join("config.json"), config).unwrap());

    let sessions =
        Arc::new(SessionPool::load(dir.path().join("sessions.json"), "fallback").unwrap());

    let notifier = Arc::new(RecordingNotifier::default());

    let ban = Arc::new(
        WatchRegistry::open(dir.path().join("ban_watch.json"), WatchDirection::AwaitingBan)
            .unwrap(),
    );
    let recovery = Arc::new(
        WatchRegistry::open(
            dir.path().join("recovery_watch.json"),
            WatchDirection::AwaitingRecovery,
        )
        .unwrap(),
    );

    let supervisor = MonitorSupervisor::new(
        Arc::clone(&config),
        source,
        notifier.clone() as Arc<dyn Notifier>,
        ban,
        recovery,
    );

    Harness {
        supervisor,
        notifier,
        config,
        sessions,
        dir,
    }
}

/// Poll `cond` under paused time until it holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(3600), async {
        loop {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
