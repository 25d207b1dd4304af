mod config;
mod error;
mod models;
mod mpc;
mod near;
mod redis;
mod routes;
mod services;
mod stores;
mod tasks;
mod utils;
mod validation;
mod webauthn;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::mpc::key_strategy::{KeyStrategy, ShareMode};
use crate::near::rpc::{HttpNearClient, NearClient};
use crate::stores::Stores;
use crate::webauthn::{HttpWebAuthnVerifier, WebAuthnVerifier};

/// Shared application state accessible in all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Arc<Stores>,
    pub strategy: Arc<KeyStrategy>,
    pub near: Arc<dyn NearClient>,
    pub webauthn: Arc<dyn WebAuthnVerifier>,
    pub http_client: reqwest::Client,
}

#[tokio::main]
async fn main() {
    // Tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threshold_relayer=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        role = ?config.node_role,
        "Starting threshold relayer on {}",
        config.addr()
    );

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to create HTTP client");

    let redis_pool = match config.redis_url.as_deref() {
        Some(url) if config.upstash_redis_rest_url.is_none() => {
            let pool = redis::connect(url).await;
            tracing::info!("Connected to Redis");
            Some(pool)
        }
        _ => None,
    };

    let stores = Arc::new(stores::build_stores(&config, &http_client, redis_pool));

    let strategy = Arc::new(
        KeyStrategy::new(
            ShareMode::parse(&config.share_mode).expect("Invalid share mode"),
            config.master_secret,
            config.client_participant_id,
            config.relayer_participant_id,
            stores.keys.clone(),
        )
        .expect("Invalid threshold key configuration"),
    );
    tracing::info!(derived = strategy.is_derived(), "Key strategy ready");

    let near: Arc<dyn NearClient> = Arc::new(HttpNearClient::new(
        http_client.clone(),
        config.near_rpc_url.clone(),
    ));

    let verify_url = config
        .webauthn_verify_url
        .clone()
        .expect("WEBAUTHN_VERIFY_URL is required");
    let webauthn: Arc<dyn WebAuthnVerifier> =
        Arc::new(HttpWebAuthnVerifier::new(http_client.clone(), verify_url));

    let state = AppState {
        config: Arc::new(config.clone()),
        stores,
        strategy,
        near,
        webauthn,
        http_client,
    };

    // Background tasks
    tasks::spawn_all(state.clone());

    // CORS
    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect::<Vec<_>>(),
        )
        .allow_methods(Any)
        .allow_headers(Any);

    // Prometheus metrics
    let metrics_handle = setup_metrics();

    // Build router
    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::threshold::router())
        .route(
            "/metrics",
            axum::routing::get(move || async move { metrics_handle.render() }),
        )
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.addr())
        .await
        .expect("Failed to bind");

    tracing::info!("Listening on {}", config.addr());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

fn setup_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
