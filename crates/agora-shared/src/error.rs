//! Error types for Agora.
//!
//! Per-turn errors are recovered inside the pipeline and surface to the user
//! as limitation notes. Only `Configuration` is allowed to stop the process.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a model or retrieval gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GatewayError {
    #[error("rate limited by upstream service")]
    RateLimited,

    #[error("upstream call timed out")]
    Timeout,

    #[error("upstream service error: {0}")]
    ServiceError(String),
}

impl GatewayError {
    /// Short stable label used in logs and transcripts
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::ServiceError(_) => "service_error",
        }
    }
}

#[derive(Error, Debug)]
pub enum AgoraError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Scope uncertain (certainty {certainty:.2})")]
    ScopeUncertain { certainty: f32 },

    #[error("Grounding gap: {0}")]
    GroundingGap(String),

    #[error("Bias ceiling reached after {passes} revision passes")]
    BiasCeilingReached { passes: u8 },

    #[error("Session {0} has ended")]
    SessionEnded(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgoraError {
    pub fn code(&self) -> &'static str {
        match self {
            AgoraError::Gateway(_) => "gateway_error",
            AgoraError::ScopeUncertain { .. } => "scope_uncertain",
            AgoraError::GroundingGap(_) => "grounding_gap",
            AgoraError::BiasCeilingReached { .. } => "bias_ceiling_reached",
            AgoraError::SessionEnded(_) => "session_ended",
            AgoraError::Configuration(_) => "configuration_error",
            AgoraError::Io(_) => "io_error",
            AgoraError::Json(_) => "json_error",
            AgoraError::Toml(_) => "toml_error",
            AgoraError::Internal(_) => "internal_error",
        }
    }

    /// Whether the error may terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgoraError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_is_fatal() {
        assert!(AgoraError::Configuration("missing key".into()).is_fatal());
        assert!(!AgoraError::Gateway(GatewayError::Timeout).is_fatal());
        assert!(!AgoraError::BiasCeilingReached { passes: 2 }.is_fatal());
        assert!(!AgoraError::GroundingGap("no results".into()).is_fatal());
    }

    #[test]
    fn test_gateway_error_wire_format() {
        let json = serde_json::to_string(&GatewayError::ServiceError("502".into())).unwrap();
        assert!(json.contains("\"kind\":\"service_error\""));
        let back: GatewayError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GatewayError::ServiceError("502".into()));
    }
}
