//! JSON response helpers shared by the HTTP handlers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;

/// 200 with `data` as the JSON body.
pub fn api_success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(data))
}

/// 201 with `data` as the JSON body.
pub fn api_created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(data))
}

/// 200 with `{"success": true}`.
pub fn api_ok() -> impl IntoResponse {
    api_success(json!({ "success": true }))
}
