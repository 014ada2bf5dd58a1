use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use axum::{
    Extension, Router,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::server::{Config, DatabaseConfig, LogFormat};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    db::bootstrap,
    middleware::{
        auth,
        request_context::{self, RequestIdState},
    },
    routes::{self, openapi::openapi_routes},
    services::{
        relay::StreamRelay,
        store::{ConversationStore, MemoryConversationStore, PgConversationStore},
        upstream::UpstreamClient,
    },
    tracer,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).init();
    } else {
        fmt_builder.with_ansi(true).init();
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates a database connection pool from the given database settings.
///
/// # Errors
/// Returns an error if the database connection pool cannot be created.
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect(&db.url)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(db.max_connections as f64);
    Ok(pool)
}

/// Selects the conversation store. An empty database URL yields the
/// in-memory store for local development; otherwise Postgres is connected,
/// bootstrapped, and probed for readiness.
pub async fn create_store(config: &Config) -> anyhow::Result<Arc<dyn ConversationStore>> {
    if config.database.url.is_empty() {
        warn!("no database configured; using in-memory conversation store");
        return Ok(Arc::new(MemoryConversationStore::new()));
    }

    let pool = create_database_pool(&config.database).await?;
    bootstrap::ensure_liveness(&pool).await?;
    bootstrap::run(&pool).await?;
    bootstrap::ensure_readiness(&pool).await?;
    Ok(Arc::new(PgConversationStore::new(pool)))
}

/// Creates the application state: store, upstream client, and relay.
pub async fn create_app_state(config: Config) -> anyhow::Result<AppState> {
    let store = create_store(&config).await?;
    let upstream = UpstreamClient::new(&config.upstream)?;
    let relay = StreamRelay::new(
        store.clone(),
        upstream,
        config.fallback.paragraph_delay(),
        config.stream.channel_capacity,
    );
    Ok(AppState::new(config, store, relay))
}

/// Creates the CORS layer for the application.
pub fn create_cors_layer() -> CorsLayer {
    use http::Method;

    let methods = vec![Method::GET, Method::POST, Method::OPTIONS];

    CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::any())
        .allow_origin(AllowOrigin::any())
        .max_age(Duration::from_secs(3600))
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let request_id_state = RequestIdState::from_config(&state.config);

    Router::new()
        .nest("/api", routes::chat::create_chat_router())
        .merge(routes::health::create_health_router())
        .merge(openapi_routes())
        .route("/metrics", get(metrics_endpoint))
        .layer(axum::middleware::from_fn(auth::identify_user))
        .layer(tracer::create_trace_layer())
        .layer(axum::middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .layer(create_cors_layer())
        .layer(Extension(metrics_handle))
        .with_state(state)
}

/// Creates the graceful shutdown signal handler.
pub async fn create_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutting down...");
}

/// Starts the relay server and binds it to the configured port.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!("Starting server...");

    let metrics_handle = metrics_handle();
    let port = config.server.port;

    let state = create_app_state(config).await?;
    let app = create_app_router(state, metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// State backed by the in-memory store and an unroutable upstream.
    pub(crate) fn memory_state() -> AppState {
        let mut config = Config::with_defaults();
        config.database.url = String::new();
        config.upstream.base_url = "http://192.0.2.1:9".to_string();
        config.upstream.connect_timeout_ms = 100;
        config.upstream.request_timeout_ms = 200;
        config.fallback.paragraph_delay_ms = 0;

        let store: Arc<dyn ConversationStore> = Arc::new(MemoryConversationStore::new());
        let upstream = UpstreamClient::new(&config.upstream).expect("client builds");
        let relay = StreamRelay::new(
            store.clone(),
            upstream,
            config.fallback.paragraph_delay(),
            config.stream.channel_capacity,
        );
        AppState::new(config, store, relay)
    }
}
