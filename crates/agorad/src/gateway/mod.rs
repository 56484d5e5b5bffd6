//! External model and retrieval gateways.
//!
//! Every pipeline stage reaches the outside world only through these two
//! traits. Implementations must be safe to share across sessions.

pub mod fake;
pub mod openai;
pub mod retry;
pub mod search;

use agora_shared::{GatewayError, SourceDocument};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use fake::{FakeModelGateway, FakeRetrievalGateway};
pub use openai::OpenAiGateway;
pub use retry::with_retry;
pub use search::TavilyGateway;

/// Which pipeline step a gateway call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    QueryPlanning,
    Search,
    SourceScoring,
    Synthesis,
    SectionDraft,
    Critique,
    Revision,
    Calibration,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::QueryPlanning => "query_planning",
            Self::Search => "search",
            Self::SourceScoring => "source_scoring",
            Self::Synthesis => "synthesis",
            Self::SectionDraft => "section_draft",
            Self::Critique => "critique",
            Self::Revision => "revision",
            Self::Calibration => "calibration",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single model request
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub stage: Stage,
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(stage: Stage, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            stage,
            system: system.into(),
            user: user.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_output: u32,
    pub stop_sequences: Vec<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_output: 1500,
            stop_sequences: Vec::new(),
        }
    }
}

impl CompletionOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output(mut self, max_output: u32) -> Self {
        self.max_output = max_output;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencyBias {
    #[default]
    Any,
    /// Prefer recent publications (rapidly evolving topics)
    Recent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub max_results: usize,
    pub recency_bias: RecencyBias,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 5,
            recency_bias: RecencyBias::Any,
        }
    }
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<String, GatewayError>;
}

#[async_trait]
pub trait RetrievalGateway: Send + Sync {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SourceDocument>, GatewayError>;
}

/// Map a transport error onto the gateway taxonomy
pub(crate) fn map_reqwest_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
        GatewayError::RateLimited
    } else {
        GatewayError::ServiceError(err.to_string())
    }
}

/// Map a non-success HTTP status onto the gateway taxonomy
pub(crate) fn map_status(status: reqwest::StatusCode, body: &str) -> GatewayError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        GatewayError::RateLimited
    } else if status == reqwest::StatusCode::GATEWAY_TIMEOUT
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
    {
        GatewayError::Timeout
    } else {
        let snippet: String = body.chars().take(200).collect();
        GatewayError::ServiceError(format!("HTTP {}: {}", status.as_u16(), snippet))
    }
}
