use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod state;

use pricelist_backend::cache::{MemoryCache, SearchCache};
use pricelist_backend::config;
use pricelist_backend::db;
use pricelist_backend::feed::JsonFeed;
use pricelist_backend::search::SearchOrchestrator;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pricelist_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration into the global handle / 加载配置到全局句柄
    config::init_config().map_err(anyhow::Error::msg)?;
    let app_config = config::config();
    tracing::info!(
        "Server will listen on {}:{}",
        app_config.server.host,
        app_config.server.port
    );

    // Create data and snapshot directories if not exists / 创建数据目录
    let data_dir = app_config.get_data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        tracing::info!("Created data directory: {:?}", data_dir);
    }
    let snapshot_dir = app_config.get_snapshot_dir();
    if !snapshot_dir.exists() {
        std::fs::create_dir_all(&snapshot_dir)?;
        tracing::info!("Created snapshot directory: {:?}", snapshot_dir);
    }

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| app_config.get_database_url());

    let pool = db::connect(&database_url).await?;
    db::run_migrations(&pool).await?;

    let cache = SearchCache::new(
        Arc::new(MemoryCache::new(app_config.cache.max_entries)),
        app_config.cache.ttl_secs,
        app_config.cache.compress_threshold,
    );
    let feed = Arc::new(JsonFeed::new(snapshot_dir));
    let search = SearchOrchestrator::new(pool.clone(), feed, cache);

    let state = Arc::new(AppState { db: pool, search });

    let app = Router::new()
        .route("/api/health", get(api::server::health_check))
        .route("/api/search", post(api::search::search))
        .route("/api/search/suggestions", get(api::search::suggestions))
        .route("/api/products/import", post(api::products::import))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = app_config.get_bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
