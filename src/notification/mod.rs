//! Terminal-outcome notification delivery.
//!
//! A watch produces exactly one [`WatchOutcome`] when it ends in its
//! watched-for state. Delivery is best effort: [`deliver`] tries the rich
//! send first, falls back to a plain-text send, and absorbs failures so a
//! broken gateway can never wedge or re-run a finished watch.

mod webhook;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

pub use webhook::{WebhookConfig, WebhookNotifier};

use crate::Result;
use crate::utils::format_elapsed;
use crate::watch::{ProfileSnapshot, WatchDirection};

/// The single terminal event a finished watch emits.
#[derive(Debug, Clone)]
pub struct WatchOutcome {
    pub handle: String,
    pub direction: WatchDirection,
    /// Notification target recorded when the watch was started.
    pub target: String,
    /// Seconds between watch start and detection.
    pub elapsed_secs: u64,
    /// Profile fields at detection time, when the payload had them.
    pub snapshot: Option<ProfileSnapshot>,
    /// Whether the gateway should render a profile card image.
    pub render_card: bool,
    pub detected_at: DateTime<Utc>,
}

impl WatchOutcome {
    /// Headline for the outcome message.
    pub fn title(&self) -> String {
        match self.direction {
            WatchDirection::AwaitingBan => {
                format!("Account Ban Detected | @{} 🚨", self.handle)
            }
            WatchDirection::AwaitingRecovery => {
                format!("Account Recovered | @{} 🏆✅", self.handle)
            }
        }
    }

    /// Body lines for the outcome message.
    pub fn description(&self) -> String {
        let mut lines = vec![format!(
            "Detected after {}",
            format_elapsed(Duration::from_secs(self.elapsed_secs))
        )];
        if let Some(ref snapshot) = self.snapshot {
            lines.push(snapshot.counts_line());
            if let Some(ref bio) = snapshot.biography {
                lines.push(bio.clone());
            }
        }
        lines.join("\n")
    }
}

/// Delivery seam for terminal outcomes.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send the rich form of the outcome message.
    async fn send(&self, outcome: &WatchOutcome) -> Result<()>;

    /// Send a degraded plain-text form of the outcome message.
    async fn send_fallback(&self, outcome: &WatchOutcome) -> Result<()>;
}

/// Deliver an outcome, degrading to the fallback form on failure.
///
/// Failures are logged and absorbed; the watch is already retired by the
/// time this runs and must not be re-run over a gateway hiccup.
pub async fn deliver(notifier: &dyn Notifier, outcome: &WatchOutcome) {
    match notifier.send(outcome).await {
        Ok(()) => {
            info!(
                handle = %outcome.handle,
                direction = %outcome.direction,
                "Outcome notification delivered"
            );
        }
        Err(e) => {
            warn!(
                handle = %outcome.handle,
                error = %e,
                "Rich notification failed, trying fallback"
            );
            if let Err(e) = notifier.send_fallback(outcome).await {
                warn!(
                    handle = %outcome.handle,
                    error = %e,
                    "Fallback notification failed, outcome dropped"
                );
            }
        }
    }
}

/// Notifier that only writes to the log. Used when no gateway is
/// configured, and by tests.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, outcome: &WatchOutcome) -> Result<()> {
        info!(
            handle = %outcome.handle,
            direction = %outcome.direction,
            target = %outcome.target,
            "{}",
            outcome.title()
        );
        Ok(())
    }

    async fn send_fallback(&self, outcome: &WatchOutcome) -> Result<()> {
        self.send(outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(direction: WatchDirection) -> WatchOutcome {
        WatchOutcome {
            handle: "alice".into(),
            direction,
            target: "chan-1".into(),
            elapsed_secs: 3725,
            snapshot: Some(ProfileSnapshot {
                username: Some("alice".into()),
                followers: 1500,
                following: 10,
                posts: 42,
                biography: Some("hello".into()),
                ..ProfileSnapshot::default()
            }),
            render_card: false,
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_titles() {
        assert_eq!(
            outcome(WatchDirection::AwaitingBan).title(),
            "Account Ban Detected | @alice 🚨"
        );
        assert_eq!(
            outcome(WatchDirection::AwaitingRecovery).title(),
            "Account Recovered | @alice 🏆✅"
        );
    }

    #[test]
    fn test_description_includes_elapsed_and_counts() {
        let description = outcome(WatchDirection::AwaitingBan).description();
        assert!(description.contains("1h 2m 5s"));
        assert!(description.contains("Followers: 1.5K"));
        assert!(description.contains("hello"));
    }

    #[test]
    fn test_description_without_snapshot() {
        let mut outcome = outcome(WatchDirection::AwaitingRecovery);
        outcome.snapshot = None;
        assert_eq!(outcome.description(), "Detected after 1h 2m 5s");
    }

    #[tokio::test]
    async fn test_deliver_absorbs_failures() {
        struct Failing;

        #[async_trait]
        impl Notifier for Failing {
            async fn send(&self, _: &WatchOutcome) -> Result<()> {
                Err(crate::Error::Other("down".into()))
            }
            async fn send_fallback(&self, _: &WatchOutcome) -> Result<()> {
                Err(crate::Error::Other("still down".into()))
            }
        }

        // Must not panic or error out.
        deliver(&Failing, &outcome(WatchDirection::AwaitingBan)).await;
    }
}
