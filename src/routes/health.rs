use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    store: &'static str,
    version: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Liveness probe. The store backend name doubles as a deployment sanity
/// check (serverless deploys should report `rest`).
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = if state.config.upstash_redis_rest_url.is_some() {
        "rest"
    } else if state.config.redis_url.is_some() {
        "redis"
    } else {
        "memory"
    };

    Json(HealthResponse {
        status: "healthy",
        store,
        version: VERSION,
    })
}
