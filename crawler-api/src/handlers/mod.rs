use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod auth;
pub mod crawler;
pub mod urls;

async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> impl axum::response::IntoResponse {
    state.health.get_status()
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(auth::protected_router())
        .merge(urls::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ));

    let public = Router::new()
        .merge(auth::router())
        .route("/health", get(health))
        .route("/ready", get(health));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(crawler_common::metrics::setup_metrics_router())
}
