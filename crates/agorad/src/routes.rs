//! API routes for agorad

use crate::evaluation::EvaluationHarness;
use crate::fixtures::offline_pipeline;
use crate::server::AppState;
use agora_shared::evaluation::{builtin_case, builtin_cases};
use agora_shared::rpc::{
    ErrorBody, EvalRequest, EvalResponse, HealthResponse, SessionView, TurnRequest, TurnResponse,
};
use agora_shared::{AgoraError, EvaluationCase};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info};

type AppStateArc = Arc<AppState>;

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            code: code.to_string(),
            message: message.into(),
        }),
    )
}

fn from_agora(e: AgoraError) -> ApiError {
    let status = match e {
        AgoraError::SessionEnded(_) => StatusCode::CONFLICT,
        _ => {
            error!("  Turn failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorBody::from(e)))
}

// ============================================================================
// Turn Routes
// ============================================================================

pub fn turn_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/turn", post(handle_turn))
}

async fn handle_turn(
    State(state): State<AppStateArc>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    if req.session_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "bad_request", "session_id is required"));
    }
    if req.text.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "bad_request", "text is empty"));
    }

    let turn = state
        .pipeline
        .handle_turn(&req.session_id, &req.text)
        .await
        .map_err(from_agora)?;

    Ok(Json(TurnResponse {
        session_id: req.session_id,
        turn,
    }))
}

// ============================================================================
// Session Routes
// ============================================================================

pub fn session_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/sessions/:id", get(get_session).delete(end_session))
}

async fn get_session(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    state
        .pipeline
        .conversations()
        .view(&id)
        .await
        .map(Json)
        .ok_or_else(|| {
            api_error(StatusCode::NOT_FOUND, "not_found", format!("Session '{}' not found", id))
        })
}

async fn end_session(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let ended = state
        .pipeline
        .conversations()
        .end(&id)
        .await
        .map_err(from_agora)?;
    if ended {
        info!("  Session {} closed by client", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Session '{}' not found or already ended", id),
        ))
    }
}

// ============================================================================
// Evaluation Routes
// ============================================================================

pub fn eval_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/eval", post(run_eval))
}

/// Requested scenarios plus caller cases; everything built in when both are empty
fn select_cases(req: &EvalRequest) -> Result<Vec<EvaluationCase>, ApiError> {
    let mut cases = Vec::new();
    if req.scenarios.is_empty() && req.cases.is_empty() {
        return Ok(builtin_cases());
    }
    for id in &req.scenarios {
        let case = builtin_case(id).ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "unknown_scenario",
                format!("Unknown scenario '{}'", id),
            )
        })?;
        cases.push(case);
    }
    cases.extend(req.cases.iter().cloned());
    Ok(cases)
}

async fn run_eval(
    State(state): State<AppStateArc>,
    Json(req): Json<EvalRequest>,
) -> Result<Json<EvalResponse>, ApiError> {
    let cases = select_cases(&req)?;
    info!(
        "  Running {} evaluation case(s){}",
        cases.len(),
        if req.offline { " offline" } else { "" }
    );

    let pipeline = if req.offline {
        Arc::new(offline_pipeline(&state.config))
    } else {
        state.pipeline.clone()
    };
    let reports = EvaluationHarness::new(pipeline).run_all(&cases).await;
    Ok(Json(EvalResponse { reports }))
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        version: agora_shared::VERSION.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_sessions: state.pipeline.conversations().active_sessions().await,
    })
}
