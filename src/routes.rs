use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json,
    Router,
};
use data_model::ClientId;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::{
    http_objects::{IngestRequest, IngestResponse, RelayApiError, SessionInfo, SessionList},
    middleware::InstanceRequestSpan,
    sessions::SessionRegistry,
};

#[derive(Clone)]
pub struct RouteState {
    pub registry: Arc<SessionRegistry>,
}

pub fn create_routes(
    route_state: RouteState,
    request_span: InstanceRequestSpan,
    max_body_bytes: usize,
) -> Router {
    Router::new()
        .route("/", post(ingest))
        .route("/ingest", post(ingest))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{client_id}", get(get_session))
        .route("/healthz", get(healthz))
        .with_state(route_state)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

async fn healthz(State(state): State<RouteState>) -> (StatusCode, &'static str) {
    if state.registry.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down");
    }
    (StatusCode::OK, "ok")
}

/// Forwards the whole request body to the session of its `client_id`.
#[tracing::instrument(skip_all)]
async fn ingest(
    State(state): State<RouteState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, RelayApiError> {
    let request: IngestRequest = serde_json::from_slice(&body)?;
    let client_id = request.client_id;
    let accepted_bytes = state.registry.dispatch(client_id, &body).await?;
    debug!(%client_id, bytes = accepted_bytes, "chunk accepted");
    Ok(Json(IngestResponse {
        client_id,
        accepted_bytes,
    }))
}

async fn list_sessions(State(state): State<RouteState>) -> Json<SessionList> {
    let sessions = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(client_id, state)| SessionInfo { client_id, state })
        .collect();
    Json(SessionList { sessions })
}

async fn get_session(
    State(state): State<RouteState>,
    Path(client_id): Path<i64>,
) -> Result<Json<SessionInfo>, RelayApiError> {
    let client_id = ClientId::new(client_id);
    let session_state = state.registry.session_state(client_id).ok_or_else(|| {
        RelayApiError::not_found(&format!("no session for client {}", client_id))
    })?;
    Ok(Json(SessionInfo {
        client_id,
        state: session_state,
    }))
}
