pub mod config;
pub mod consumers;
pub mod handlers;
pub mod routes;
pub mod signature;
pub mod state;
pub mod types;

pub use routes::create_route;

use common::{Core, Workspace};
use std::sync::Arc;

pub async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::GatewayConfig::from_env();
    tracing::info!("📓 Configuration loaded");
    tracing::info!("🔧 Max body: {} bytes", config.max_body_bytes);
    tracing::info!("🔧 Dedupe TTL: {} h", config.dedupe_ttl_hours);

    let core = Core::new(config.dedupe_ttl());

    // Single-tenant bootstrap until workspace CRUD registers tenants.
    if let (Ok(workspace_id), Ok(secret)) = (
        std::env::var("WEBHOOK_WORKSPACE_ID"),
        std::env::var("WEBHOOK_WORKSPACE_SECRET"),
    ) {
        tracing::info!("🔧 Registering bootstrap workspace {}", workspace_id);
        core.workspaces.register(Workspace::new(workspace_id, secret));
    }

    let consumers = consumers::spawn_consumers(core.clone(), &config);

    let state = state::AppState::new(config.clone(), Arc::clone(&core));
    let app = routes::create_route(state);

    let addr = config.listen_address();
    tracing::info!("🌐 Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    consumers.shutdown().await;
    Ok(())
}
