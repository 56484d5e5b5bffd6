//! HTTP wire types shared by agorad and agoractl.

use crate::error::AgoraError;
use crate::evaluation::{CaseReport, EvaluationCase};
use crate::session::{EngagementMetrics, ScopeEntry, Session, SessionState};
use crate::turn::Turn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub session_id: String,
    pub turn: Turn,
}

/// Read-only export of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    pub turns: Vec<Turn>,
    pub scope_memory: Vec<ScopeEntry>,
    pub metrics: EngagementMetrics,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            created_at: session.created_at,
            state: session.state(),
            turns: session.turns().to_vec(),
            scope_memory: session.scope_memory().entries().cloned().collect(),
            metrics: session.metrics().clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalRequest {
    /// Run against deterministic fixtures instead of live gateways
    #[serde(default)]
    pub offline: bool,
    /// Built-in scenario ids; empty means all
    #[serde(default)]
    pub scenarios: Vec<String>,
    /// Additional caller-supplied cases
    #[serde(default)]
    pub cases: Vec<EvaluationCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResponse {
    pub reports: Vec<CaseReport>,
}

impl EvalResponse {
    pub fn total_failed(&self) -> usize {
        self.reports.iter().map(|r| r.failed()).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<AgoraError> for ErrorBody {
    fn from(e: AgoraError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}
