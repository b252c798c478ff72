mod config;
mod models;
mod routes;
mod services;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::services::cache::{start_purge_task, SourceCache};
use crate::services::resolver::SourceResolver;

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub resolver: SourceResolver,
    pub cache: SourceCache,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anistream_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    let port = config.port;

    tracing::info!("Starting AniStream Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.node_env);
    tracing::info!("Upstream API: {}", config.api_url);

    // Source cache: short TTL, upstream links expire in minutes
    let cache = SourceCache::new(config.source_cache_ttl_ms, config.source_cache_max_entries);
    tracing::info!(
        "Source cache initialized (ttl={}ms, max={})",
        config.source_cache_ttl_ms,
        config.source_cache_max_entries
    );

    let resolver = SourceResolver::new(&config, cache.clone())?;
    tracing::info!("Source resolver initialized");

    // Purge expired cache entries in the background
    tokio::spawn(start_purge_task(
        cache.clone(),
        config.cache_purge_interval_secs,
    ));

    // Build application state
    let state = Arc::new(AppState {
        config,
        resolver,
        cache,
        start_time: Instant::now(),
    });

    // Build router. No compression layer: proxied bodies are video byte
    // streams and must not be re-encoded.
    let app = Router::new()
        // Health endpoints
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health_check))
        // Source resolution
        .route("/video", get(routes::video::get_video))
        // Streaming proxy
        .route("/proxy", get(routes::proxy::proxy))
        // Download remux
        .route("/api/download-video", get(routes::download::download_video))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
