//! HTTP handlers, one per route.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use warden_core::{CircuitState, SessionId};
use warden_engine::{EngineError, SendReply};
use warden_telemetry::export::CONTENT_TYPE;
use warden_telemetry::{HealthReport, HealthStatus, LogQuery};

use crate::server::AppState;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidRequest(msg) => Self::new(StatusCode::BAD_REQUEST, msg),
            EngineError::ShutDown => Self::new(StatusCode::SERVICE_UNAVAILABLE, "shutting down"),
            other => {
                warn!(error = %other, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub caller_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub attachment: Option<String>,
}

/// `POST /v1/send`
pub async fn send(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendReply>, ApiError> {
    let send = state.orchestrator.send(
        &req.caller_id,
        &req.display_name,
        &req.message,
        req.attachment.as_deref(),
    );
    // Giving up here only drops this caller's wait; the turn still completes.
    match tokio::time::timeout(state.request_timeout, send).await {
        Ok(reply) => Ok(Json(reply?)),
        Err(_) => Err(ApiError::new(
            StatusCode::GATEWAY_TIMEOUT,
            format!("no reply within {}ms", state.request_timeout.as_millis()),
        )),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthBody {
    #[serde(flatten)]
    pub report: HealthReport,
    pub transport: String,
    pub busy: bool,
    pub queued: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_retry_after_ms: Option<u64>,
    pub session_id: SessionId,
}

/// `GET /health`. 503 when unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let dispatcher = orchestrator.dispatcher();
    let report = orchestrator.monitor().health_report();
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    let body = HealthBody {
        report,
        transport: dispatcher.transport().to_string(),
        busy: dispatcher.is_busy(),
        queued: orchestrator.queued(),
        circuit_retry_after_ms: dispatcher.circuit_retry_after().map(|d| d.as_millis() as u64),
        session_id: orchestrator.stats().session_id,
    };
    (code, Json(body))
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        state.orchestrator.monitor().export_prometheus(),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// `GET /v1/alerts`
pub async fn alerts(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    Json(state.orchestrator.monitor().recent_alerts(q.limit()))
}

/// `GET /v1/requests`
pub async fn requests(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    Json(state.orchestrator.monitor().recent_requests(q.limit()))
}

/// `GET /v1/session`
pub async fn session(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.stats())
}

/// `POST /v1/session/reset`
pub async fn reset_session(State(state): State<AppState>) -> impl IntoResponse {
    let session_id = state.orchestrator.reset_session().await;
    Json(json!({ "sessionId": session_id }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitResetBody {
    pub reset: bool,
    pub state: CircuitState,
}

/// `POST /v1/circuit/reset`
pub async fn reset_circuit(State(state): State<AppState>) -> impl IntoResponse {
    let dispatcher = state.orchestrator.dispatcher();
    let reset = dispatcher.reset_circuit();
    Json(CircuitResetBody {
        reset,
        state: dispatcher.circuit_state(),
    })
}

/// `POST /v1/metrics/reset`
pub async fn reset_metrics(State(state): State<AppState>) -> StatusCode {
    state.orchestrator.monitor().reset();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// `GET /v1/logs`: persisted warn+ logs. 404 when SQLite logging is off.
pub async fn logs(State(state): State<AppState>, Query(q): Query<LogsQuery>) -> Result<Response, ApiError> {
    let sink = state
        .telemetry
        .as_ref()
        .and_then(|t| t.logs())
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "log persistence is disabled"))?;
    let query = LogQuery {
        level: q.level,
        target: q.target,
        session_id: q.session_id,
        request_id: q.request_id,
        since: q.since,
        limit: Some(q.limit.unwrap_or(100).min(1000)),
    };
    let records = sink.query(&query).map_err(|e| {
        warn!(error = %e, "log query failed");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "log query failed")
    })?;
    Ok(Json(records).into_response())
}

pub(crate) fn request_timeout_from_ms(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}
