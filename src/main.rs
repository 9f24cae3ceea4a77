mod api;
mod auth;
mod config;
mod db;
mod error;
mod listing;
mod rate_limit;
mod sanitize;
mod state;
#[cfg(test)]
mod test_support;
mod validation;

use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use chrono::{Duration, Utc};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(&config.log_level);
    config.log_startup_warnings();

    let pool = db::connect_and_migrate(&config)
        .await
        .context("failed to initialize database")?;

    if config.archive_stale {
        let cutoff = Utc::now() - Duration::days(i64::from(config.archive_after_days));
        let archived = db::queries::archive_stale_problems(&pool, cutoff)
            .await
            .context("failed to archive stale problems")?;
        info!(
            archived = archived.len(),
            after_days = config.archive_after_days,
            "archived stale problems"
        );
        return Ok(());
    }

    let identity = auth::provider_from_config(&config.identity)
        .context("failed to initialize identity provider")?;
    let port = config.port;
    let app = build_app(AppState::new(config, pool, identity));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, "solvinghub server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    Ok(())
}

pub(crate) fn build_app(state: AppState) -> Router {
    let max_request_body_bytes = state.config.rate_limits.max_request_body_bytes;
    let cors = cors_layer(state.config.cors_origin.as_deref());

    Router::new()
        .nest("/api", api::router())
        .route("/healthz", get(api::healthz))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            error::expose_internal_details,
        ))
        .layer(DefaultBodyLimit::max(max_request_body_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce_limits,
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin.and_then(|origin| HeaderValue::from_str(origin).ok()) {
        Some(origin) => layer.allow_origin(origin),
        None => layer.allow_origin(Any),
    }
}

fn init_tracing(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
