use outbound::{Dispatcher, DispatcherConfig, SendRateLimiter, UpstreamClient};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outbound=info".into()),
        )
        .init();

    let config = DispatcherConfig::from_env();
    tracing::info!("📓 Configuration loaded");
    tracing::info!("🔧 Upstream: {} {}", config.upstream_base_url, config.upstream_api_version);
    tracing::info!("🔧 Workers: {}", config.worker_count);

    let core = common::Core::new(Duration::from_secs(72 * 3600));
    let upstream = Arc::new(UpstreamClient::new(config.clone())?);
    let limiter = Arc::new(SendRateLimiter::new(
        config.limiter_per_number_rate,
        config.limiter_workspace_rate,
        config.limiter_global_rate,
    ));

    let handle = Dispatcher::new(core, upstream, limiter, config).spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutdown signal received");
    handle.shutdown().await;

    Ok(())
}
