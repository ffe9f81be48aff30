//! REST surface over the gateway facade.
//!
//! Thin handlers: parse the route, call the facade, map the error kind
//! to a status code. Core types never leak HTTP concerns; the mapping
//! lives entirely in this module. CORS and request tracing are applied
//! as tower layers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::schema::{RawServerConfig, ValidationMode, validate};
use crate::error::GatewayError;
use crate::gateway::{ConfirmOutcome, Gateway};

/// Shared state for the REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            started_at: Instant::now(),
        }
    }
}

/// Build the REST router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/servers", get(list_servers).post(create_server))
        .route("/servers/{id}", axum::routing::delete(delete_server))
        .route("/servers/{id}/tools", get(list_tools))
        .route("/servers/{id}/tools/{name}", post(call_tool))
        .route("/servers/{id}/resources", get(list_resources))
        .route("/servers/{id}/resources/{*uri}", get(read_resource))
        .route("/servers/{id}/prompts", get(list_prompts))
        .route("/servers/{id}/prompts/{name}", post(get_prompt))
        .route("/confirmations/{cid}", post(resolve_confirmation))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("REST listener shutting down");
        })
        .await
}

// ─────────────────────────────────────────────────────────────────────────────
// Error Mapping
// ─────────────────────────────────────────────────────────────────────────────

/// REST-local error rendering; the core error kinds map onto status
/// codes here and nowhere else.
enum ApiError {
    Gateway(GatewayError),
    BadBody(String),
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self::Gateway(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadBody(reason) => (
                StatusCode::BAD_REQUEST,
                format!("invalid request body: {reason}"),
            ),
            ApiError::Gateway(e) => {
                let status = match &e {
                    GatewayError::ConfigInvalid { .. } => StatusCode::BAD_REQUEST,
                    GatewayError::Conflict { .. } => StatusCode::CONFLICT,
                    GatewayError::ServerNotFound { .. }
                    | GatewayError::ConfirmationNotFound { .. } => StatusCode::NOT_FOUND,
                    GatewayError::ConfirmationExpired { .. } => StatusCode::GONE,
                    GatewayError::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    GatewayError::HandshakeTimeout { .. }
                    | GatewayError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    GatewayError::Remote { .. } | GatewayError::BackendExited { .. } => {
                        StatusCode::BAD_GATEWAY
                    }
                    GatewayError::SpawnFailed { .. }
                    | GatewayError::BackendWrite { .. }
                    | GatewayError::ConfigFile { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

/// Parse an optional JSON request body; an empty body means `{}`.
fn parse_arguments(body: &[u8]) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadBody(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.list_servers())
}

#[derive(Debug, Deserialize)]
struct CreateServerRequest {
    id: String,
    #[serde(flatten)]
    config: RawServerConfig,
}

async fn create_server(
    State(state): State<AppState>,
    Json(body): Json<CreateServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let config = validate(&body.id, body.config, ValidationMode::Strict)?;
    state.gateway.start_server(&body.id, config).await?;

    let status = state
        .gateway
        .list_servers()
        .into_iter()
        .find(|s| s.id == body.id);
    Ok((StatusCode::CREATED, Json(json!({"server": status}))))
}

async fn delete_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.gateway.stop_server(&id).await?;
    Ok(Json(json!({"id": id, "status": "stopped"})))
}

async fn list_tools(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.gateway.call(&id, "tools/list", json!({})).await?))
}

async fn call_tool(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Result<Json<Value>, ApiError> {
    let params = json!({"name": name, "arguments": parse_arguments(&body)?});
    Ok(Json(state.gateway.call(&id, "tools/call", params).await?))
}

async fn list_resources(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(
        state.gateway.call(&id, "resources/list", json!({})).await?,
    ))
}

async fn read_resource(
    State(state): State<AppState>,
    Path((id, uri)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let params = json!({"uri": uri});
    Ok(Json(
        state.gateway.call(&id, "resources/read", params).await?,
    ))
}

async fn list_prompts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(
        state.gateway.call(&id, "prompts/list", json!({})).await?,
    ))
}

async fn get_prompt(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Result<Json<Value>, ApiError> {
    let params = json!({"name": name, "arguments": parse_arguments(&body)?});
    Ok(Json(state.gateway.call(&id, "prompts/get", params).await?))
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    confirm: bool,
}

async fn resolve_confirmation(
    State(state): State<AppState>,
    Path(cid): Path<String>,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<Value>, ApiError> {
    match state.gateway.confirm(&cid, body.confirm).await? {
        ConfirmOutcome::Executed(result) => Ok(Json(result)),
        ConfirmOutcome::Rejected { confirmation_id } => Ok(Json(json!({
            "status": "rejected",
            "confirmation_id": confirmation_id,
        }))),
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let servers = state.gateway.list_servers();
    Json(json!({
        "status": "ok",
        "uptime": state.started_at.elapsed().as_secs(),
        "serverCount": servers.len(),
        "servers": servers,
    }))
}
