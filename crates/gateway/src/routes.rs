use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::get,
};
use http::Method;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers, state::AppState};

pub fn create_route(state: AppState) -> Router {
    let max_body = state.config.max_body_bytes;
    Router::new()
        .route(
            "/webhook/{workspace}",
            get(handlers::webhook::verify_webhook).post(handlers::webhook::ingest_webhook),
        )
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(tower_http::cors::Any)
                        .allow_methods([Method::GET, Method::POST]),
                ),
        )
}
