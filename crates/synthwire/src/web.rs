//! HTTP signaling endpoints.
//!
//! Every session-scoped route identifies the session by the `X-Session-ID`
//! header.

use crate::error::SessionError;
use crate::negotiation::{configured_ice_servers, OfferRequest, Orchestrator};
use crate::peer::{IceCandidate, SessionDescription};
use crate::registry::SessionRegistry;
use crate::session::SessionId;
use crate::synth::SynthCatalog;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use synthconf::Environment;
use tracing::{debug, error, info, warn};

pub const SESSION_HEADER: &str = "x-session-id";

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub registry: Arc<SessionRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub catalog: SynthCatalog,
    pub environment: Environment,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/offer", post(offer))
        .route("/stop", post(stop))
        .route("/ice-candidate", post(ice_candidate))
        .route("/config", get(client_config))
        .route("/synth-code", get(synth_code))
        .route("/client-log", post(client_log))
        .route("/health", get(health))
        .with_state(state)
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            error!("request failed: {}", self);
        } else {
            debug!("request rejected ({}): {}", status, self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

async fn offer(
    State(state): State<WebState>,
    headers: HeaderMap,
    Json(request): Json<OfferRequest>,
) -> Result<Json<SessionDescription>, SessionError> {
    let session = state.registry.get_or_create(session_id(&headers))?;
    let answer = state.orchestrator.handle_offer(&session, request).await?;
    Ok(Json(answer))
}

/// The validated session id from the request headers.
fn required_session_id(headers: &HeaderMap) -> Result<SessionId, SessionError> {
    SessionId::new(session_id(headers).ok_or(SessionError::MissingIdentifier)?)
}

async fn stop(
    State(state): State<WebState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, SessionError> {
    let id = required_session_id(&headers)?;
    match state.registry.get(id.as_str()) {
        Some(session) => state.orchestrator.stop(&session).await,
        None => debug!("[{}] stop for unknown session", id),
    }
    Ok(Json(json!({ "status": "stopped" })))
}

async fn ice_candidate(
    State(state): State<WebState>,
    headers: HeaderMap,
    Json(candidate): Json<IceCandidate>,
) -> Result<Json<serde_json::Value>, SessionError> {
    let id = required_session_id(&headers)?;
    let session = state
        .registry
        .get(id.as_str())
        .ok_or_else(|| SessionError::NoConnection(id.to_string()))?;
    state.orchestrator.add_candidate(&session, candidate).await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PortRange {
    min: u16,
    max: u16,
}

/// `RTCConfiguration` for the browser, plus the server's media port range.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientConfig {
    ice_servers: Vec<crate::peer::IceServer>,
    ice_transport_policy: &'static str,
    bundle_policy: &'static str,
    rtcp_mux_policy: &'static str,
    ice_candidate_pool_size: u32,
    port_range: PortRange,
    environment: String,
}

async fn client_config(State(state): State<WebState>) -> Json<ClientConfig> {
    let ice = state.orchestrator.ice();
    Json(ClientConfig {
        ice_servers: configured_ice_servers(ice),
        ice_transport_policy: "all",
        bundle_policy: "max-bundle",
        rtcp_mux_policy: "require",
        ice_candidate_pool_size: 0,
        port_range: PortRange {
            min: ice.port_min,
            max: ice.port_max,
        },
        environment: state.environment.to_string(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthCode {
    synth_id: String,
    code: String,
}

async fn synth_code(
    State(state): State<WebState>,
    headers: HeaderMap,
) -> Result<Json<SynthCode>, SessionError> {
    let id = required_session_id(&headers)?;
    let session = state
        .registry
        .get(id.as_str())
        .ok_or_else(|| SessionError::SynthCodeNotFound(format!("no session {}", id)))?;
    let synth_id = session
        .synth()
        .current_synth()
        .ok_or_else(|| SessionError::SynthCodeNotFound(format!("nothing playing in {}", id)))?;

    let catalog = state.catalog.clone();
    let lookup = synth_id.clone();
    let code = tokio::task::spawn_blocking(move || catalog.read_source(&lookup))
        .await
        .map_err(|e| SessionError::SynthCodeNotFound(format!("{}: {}", synth_id, e)))??;

    Ok(Json(SynthCode { synth_id, code }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientLog {
    #[serde(default)]
    level: Option<String>,
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

async fn client_log(headers: HeaderMap, Json(log): Json<ClientLog>) -> Json<serde_json::Value> {
    let id = log
        .session_id
        .as_deref()
        .or_else(|| session_id(&headers))
        .unwrap_or("-");
    match log.level.as_deref().unwrap_or("info") {
        "error" => error!("🌐 [{}] client: {}", id, log.message),
        "warn" | "warning" => warn!("🌐 [{}] client: {}", id, log.message),
        "debug" => debug!("🌐 [{}] client: {}", id, log.message),
        _ => info!("🌐 [{}] client: {}", id, log.message),
    }
    Json(json!({ "status": "ok" }))
}

async fn health(State(state): State<WebState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.registry.len(),
    }))
}
