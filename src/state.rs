use pricelist_backend::search::SearchOrchestrator;
use sqlx::SqlitePool;

/// Shared application state / 共享应用状态
pub struct AppState {
    pub db: SqlitePool,
    pub search: SearchOrchestrator,
}
