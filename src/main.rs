use std::path::Path;
use std::sync::Arc;

use tracing::info;

use igmon::api::{FetcherConfig, ProfileFetcher, ProfileSource};
use igmon::config::ConfigService;
use igmon::credentials::SessionPool;
use igmon::logging::init_logging;
use igmon::notification::{Notifier, TracingNotifier, WebhookConfig, WebhookNotifier};
use igmon::registry::WatchRegistry;
use igmon::supervisor::MonitorSupervisor;
use igmon::watch::WatchDirection;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("IGMON_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = Arc::new(ConfigService::load(&config_path)?);

    let snapshot = config.snapshot();
    let _guard = init_logging(&snapshot.log_dir)?;
    info!(config = %config_path, "igmon starting");

    let data_dir = Path::new(&snapshot.data_dir);

    let fallback_session = std::env::var("IGMON_FALLBACK_SESSION").unwrap_or_default();
    let sessions = Arc::new(SessionPool::load(
        data_dir.join("sessions.json"),
        fallback_session,
    )?);

    let fetcher = ProfileFetcher::new(
        Arc::clone(&sessions),
        FetcherConfig {
            base_url: snapshot.api_base_url.clone(),
            max_attempts: snapshot.max_fetch_attempts,
            proxy_url: config.proxy_url(),
            require_proxy: snapshot.require_proxy,
            ..FetcherConfig::default()
        },
    )?;
    let source: Arc<dyn ProfileSource> = Arc::new(fetcher);

    let notifier: Arc<dyn Notifier> = if snapshot.gateway_url.is_empty() {
        info!("No gateway configured, outcomes will only be logged");
        Arc::new(TracingNotifier)
    } else {
        Arc::new(WebhookNotifier::new(WebhookConfig {
            gateway_url: snapshot.gateway_url.clone(),
            gateway_token: snapshot.gateway_token.clone(),
        }))
    };

    let ban_registry = Arc::new(WatchRegistry::open(
        data_dir.join("ban_watch.json"),
        WatchDirection::AwaitingBan,
    )?);
    let recovery_registry = Arc::new(WatchRegistry::open(
        data_dir.join("recovery_watch.json"),
        WatchDirection::AwaitingRecovery,
    )?);

    let supervisor = MonitorSupervisor::new(
        config,
        source,
        notifier,
        ban_registry,
        recovery_registry,
    );

    let resumed = supervisor.resume_all();
    info!(resumed, "igmon running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    supervisor.shutdown().await;

    Ok(())
}
