use axum::Json;
use serde_json::json;

use super::ApiResponse;

/// Health check endpoint / 健康检查
pub async fn health_check() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "build_time": env!("BUILD_TIME"),
    })))
}
