//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the session engine.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::response::{api_created, api_ok, api_success};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::{CrowdjamError, CrowdjamResult};
use crate::events::EndReason;
use crate::protocol_constants::SERVICE_ID;

/// Header carrying the administrative token for session deletion.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    #[serde(default)]
    session_id: Option<String>,
    host_id: String,
    host_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinSessionRequest {
    user_id: String,
    user_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndSessionQuery {
    #[serde(default)]
    host_id: Option<String>,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostTokenRequest {
    access_token: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

fn cors_layer(state: &AppState) -> CorsLayer {
    let trusted_origins = state.config.read().trusted_origins.clone();
    let origins = if trusted_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        log::info!("CORS trusted origins: {:?}", trusted_origins);
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let origin_str = origin.to_str().unwrap_or("");
            trusted_origins
                .iter()
                .any(|allowed| origin_str.starts_with(allowed))
        })
    };
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(ADMIN_TOKEN_HEADER),
        ])
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state);
    Router::new()
        .route("/health", get(health_check))
        .route("/api/sessions", post(create_session))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/sessions/{id}/join", post(join_session))
        .route(
            "/api/sessions/{id}/recommendations",
            post(request_recommendations),
        )
        .route("/api/sessions/{id}/search", get(search_tracks))
        .route(
            "/api/hosts/{host_id}/token",
            put(set_host_token).delete(remove_host_token),
        )
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "sessions": state.engine.registry().len(),
        "connections": state.ws_manager.connection_count(),
    }))
}

async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> CrowdjamResult<impl IntoResponse> {
    let outcome = state
        .engine
        .create_session(payload.session_id, &payload.host_id, &payload.host_name)
        .await?;
    Ok(api_created(outcome))
}

async fn get_session(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> CrowdjamResult<impl IntoResponse> {
    let session = state.engine.registry().get(&id).await?;
    Ok(api_success(session))
}

async fn join_session(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<JoinSessionRequest>,
) -> CrowdjamResult<impl IntoResponse> {
    let outcome = state
        .engine
        .join_session(&id, &payload.user_id, &payload.user_name)
        .await?;
    Ok(api_success(outcome))
}

/// Checks the administrative token, if the request carries one.
///
/// Returns `Ok(true)` for a valid token, `Ok(false)` when no token was sent.
fn check_admin_token(state: &AppState, headers: &HeaderMap) -> CrowdjamResult<bool> {
    let Some(sent) = headers.get(ADMIN_TOKEN_HEADER) else {
        return Ok(false);
    };
    let expected = state.config.read().admin_token.clone();
    match expected {
        Some(expected) if sent.as_bytes() == expected.as_bytes() => Ok(true),
        Some(_) => Err(CrowdjamError::Forbidden("invalid admin token".to_string())),
        None => Err(CrowdjamError::Forbidden(
            "administrative deletion is disabled".to_string(),
        )),
    }
}

/// DELETE /api/sessions/{id}
///
/// Ends the session on behalf of its host (`?hostId=`), or deletes it outright
/// with a valid `X-Admin-Token`.
async fn delete_session(
    Path(id): Path<String>,
    Query(query): Query<EndSessionQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> CrowdjamResult<impl IntoResponse> {
    if check_admin_token(&state, &headers)? {
        log::info!("[HTTP] Administrative deletion of session {}", id);
        state.engine.teardown(&id, EndReason::Deleted).await?;
        return Ok(api_ok());
    }
    let host_id = query.host_id.ok_or_else(|| {
        CrowdjamError::InvalidRequest("hostId or admin token required".to_string())
    })?;
    state.engine.end_session(&id, &host_id).await?;
    Ok(api_ok())
}

async fn request_recommendations(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> CrowdjamResult<impl IntoResponse> {
    let added = state.engine.recommend(&id).await?;
    Ok(api_success(json!({ "added": added })))
}

async fn search_tracks(
    Path(id): Path<String>,
    Query(query): Query<SearchQuery>,
    State(state): State<AppState>,
) -> CrowdjamResult<impl IntoResponse> {
    let tracks = state.engine.search(&id, &query.q).await?;
    Ok(api_success(json!({ "tracks": tracks })))
}

/// PUT /api/hosts/{hostId}/token
///
/// Registers the access token the music gateway uses for this host.
async fn set_host_token(
    Path(host_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<HostTokenRequest>,
) -> CrowdjamResult<impl IntoResponse> {
    if payload.access_token.trim().is_empty() {
        return Err(CrowdjamError::InvalidRequest(
            "accessToken must not be empty".to_string(),
        ));
    }
    state.tokens.set(&host_id, payload.access_token.trim());
    Ok(api_ok())
}

async fn remove_host_token(
    Path(host_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if state.tokens.remove(&host_id) {
        api_ok().into_response()
    } else {
        CrowdjamError::NotFound(format!("token for host {}", host_id)).into_response()
    }
}
