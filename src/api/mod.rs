//! Profile endpoint client.
//!
//! One [`ProfileFetcher::fetch`] call performs a bounded, classified fetch
//! attempt sequence against the profile endpoint: randomized pre-request
//! jitter, exponential backoff between retries, and status-driven credential
//! rotation. Exhausting retries is not an error: the caller receives the
//! last observed (possibly absent) status and payload and interprets it
//! through the classification heuristic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::RngExt;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::Result;
use crate::credentials::SessionPool;

/// Desktop user agents rotated per request (best-effort evasion only).
const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
];

/// App identifier header expected by the endpoint.
const APP_ID: &str = "936619743392459";

/// Per-attempt network timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff ceiling between retries.
const MAX_BACKOFF_SECS: f64 = 60.0;

/// Outcome of one classified fetch call.
#[derive(Debug, Clone, Default)]
pub struct FetchAttempt {
    /// HTTP status of the last attempt; absent on transport failure.
    pub status: Option<u16>,
    /// Decoded JSON body, when the last attempt produced one.
    pub payload: Option<Value>,
    /// Index of the last attempt performed (0 = first try).
    pub retries: u32,
}

impl FetchAttempt {
    fn empty() -> Self {
        Self::default()
    }
}

/// Seam between the supervisor/command layers and the network.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Perform one bounded fetch attempt sequence for `handle`.
    async fn fetch(&self, handle: &str) -> FetchAttempt;
}

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Base URL of the scraped endpoint.
    pub base_url: String,
    /// Retry ceiling per fetch call.
    pub max_attempts: u32,
    /// Outbound proxy URL, if configured.
    pub proxy_url: Option<String>,
    /// Refuse to fetch without a proxy.
    pub require_proxy: bool,
    /// Pre-request jitter bounds, milliseconds.
    pub jitter_ms: (u64, u64),
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.instagram.com".to_string(),
            max_attempts: 3,
            proxy_url: None,
            require_proxy: true,
            jitter_ms: (1_000, 3_000),
        }
    }
}

/// HTTP client for the profile endpoint with credential rotation.
pub struct ProfileFetcher {
    client: reqwest::Client,
    sessions: Arc<SessionPool>,
    config: FetcherConfig,
    request_count: AtomicU64,
}

impl ProfileFetcher {
    /// Build a fetcher. Fails only when the configured proxy URL is invalid.
    pub fn new(sessions: Arc<SessionPool>, config: FetcherConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);

        if let Some(ref proxy_url) = config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        let client = builder.build()?;

        Ok(Self {
            client,
            sessions,
            config,
            request_count: AtomicU64::new(0),
        })
    }

    /// Total requests issued since startup.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn profile_url(&self, handle: &str) -> String {
        format!(
            "{}/api/v1/users/web_profile_info/?username={}",
            self.config.base_url, handle
        )
    }

    async fn attempt(&self, handle: &str) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let token = self.sessions.current();
        let user_agent = random_user_agent();

        self.client
            .get(self.profile_url(handle))
            .header("User-Agent", user_agent)
            .header("Accept", "*/*")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("X-IG-App-ID", APP_ID)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Cookie", format!("sessionid={token}"))
            .header("Referer", format!("{}/", self.config.base_url))
            .header("Origin", self.config.base_url.as_str())
            .send()
            .await
    }
}

#[async_trait]
impl ProfileSource for ProfileFetcher {
    async fn fetch(&self, handle: &str) -> FetchAttempt {
        if self.config.require_proxy && self.config.proxy_url.is_none() {
            error!("No proxy configured, refusing to fetch");
            return FetchAttempt::empty();
        }

        let max_attempts = self.config.max_attempts;
        let mut last = FetchAttempt::empty();

        for attempt in 0..=max_attempts {
            last.retries = attempt;

            if attempt > 0 {
                let delay = backoff_delay(attempt);
                info!(
                    handle,
                    attempt, max_attempts, "Retrying after {:.1}s backoff", delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }

            // Anti-pattern jitter before every request.
            tokio::time::sleep(jitter(self.config.jitter_ms.0, self.config.jitter_ms.1)).await;

            let request_no = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
            info!(handle, attempt, request = request_no, "Fetching profile");

            let response = match self.attempt(handle).await {
                Ok(response) => response,
                Err(e) => {
                    error!(handle, error = %e, "Transport error");
                    last.status = None;
                    last.payload = None;
                    continue;
                }
            };

            let status = response.status().as_u16();
            last.status = Some(status);
            last.payload = None;

            match status {
                200 => match response.json::<Value>().await {
                    Ok(payload) => {
                        last.payload = Some(payload);
                        return last;
                    }
                    Err(e) => {
                        // Malformed body: retried like a transport failure,
                        // ultimately returned as a payload-less 200.
                        error!(handle, error = %e, "JSON decode error");
                        continue;
                    }
                },
                404 => {
                    // The endpoint confirms absence; success for our purposes.
                    info!(handle, "Profile not found (404)");
                    return last;
                }
                429 => {
                    warn!(handle, "Rate limited (429), rotating session");
                    self.sessions.rotate();
                }
                400 | 401 => {
                    warn!(handle, status, "Auth error, rotating session");
                    self.sessions.rotate();
                    if attempt < max_attempts {
                        tokio::time::sleep(jitter(1_000, 3_000)).await;
                    }
                }
                502 => {
                    warn!(handle, "Proxy error (502)");
                    if attempt < max_attempts {
                        tokio::time::sleep(jitter(3_000, 6_000)).await;
                    }
                }
                other => {
                    warn!(handle, status = other, "Unexpected status");
                }
            }
        }

        last
    }
}

/// Exponential backoff with jitter, bounded by [`MAX_BACKOFF_SECS`].
fn backoff_delay(attempt: u32) -> Duration {
    let base = (2u64.saturating_pow(attempt) * 5) as f64;
    let jittered = base + rand::rng().random_range(2.0..5.0);
    Duration::from_secs_f64(jittered.min(MAX_BACKOFF_SECS))
}

fn jitter(min_ms: u64, max_ms: u64) -> Duration {
    if min_ms >= max_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
}

fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    USER_AGENTS[rng.random_range(0..USER_AGENTS.len())]
}
