use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::json;

use pricelist_backend::db::upsert_products;
use pricelist_backend::models::Product;

use super::ApiResponse;
use crate::state::AppState;

/// Bulk import from the spreadsheet ingestion job / 批量导入
///
/// Rows are upserted by id; cached search results age out by TTL rather
/// than being invalidated here.
pub async fn import(
    State(state): State<Arc<AppState>>,
    Json(products): Json<Vec<Product>>,
) -> Json<ApiResponse<serde_json::Value>> {
    match upsert_products(&state.db, &products).await {
        Ok(count) => Json(ApiResponse::success(json!({ "imported": count }))),
        Err(e) => {
            tracing::error!(error = %e, "product import failed");
            Json(ApiResponse::error(&e.to_string()))
        }
    }
}
