//! Configuration management for agorad.
//!
//! Loads settings from a TOML file or uses defaults. Resolved once at
//! startup and shared read-only as `Arc<Config>`.

use agora_shared::balance::DEFAULT_BALANCE_TOLERANCE;
use agora_shared::calibration::{DEFAULT_MIN_AGGREGATE_CONFIDENCE, DEFAULT_STALE_AFTER_DAYS};
use agora_shared::reflection::DEFAULT_MAX_REVISIONS;
use agora_shared::session::DEFAULT_SCOPE_MEMORY;
use agora_shared::{AgoraError, CONFIG_PATH, DEFAULT_BIND};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "AGORA_CONFIG";

/// Model gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// OpenAI-compatible base URL
    #[serde(default = "default_model_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_model_key_env")]
    pub api_key_env: String,

    /// Temperature for analytical stages
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Lower temperature for critique and classification
    #[serde(default = "default_critique_temperature")]
    pub critique_temperature: f32,

    #[serde(default = "default_max_output")]
    pub max_output: u32,
}

fn default_model_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_model_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_critique_temperature() -> f32 {
    0.2
}

fn default_max_output() -> u32 {
    1500
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            model: default_model(),
            api_key_env: default_model_key_env(),
            temperature: default_temperature(),
            critique_temperature: default_critique_temperature(),
            max_output: default_max_output(),
        }
    }
}

/// Retrieval gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Tavily-compatible search endpoint
    #[serde(default = "default_search_url")]
    pub base_url: String,

    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// "basic" or "advanced"
    #[serde(default = "default_search_depth")]
    pub search_depth: String,
}

fn default_search_url() -> String {
    "https://api.tavily.com/search".to_string()
}

fn default_search_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}

fn default_max_results() -> usize {
    5
}

fn default_search_depth() -> String {
    "advanced".to_string()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: default_search_url(),
            api_key_env: default_search_key_env(),
            max_results: default_max_results(),
            search_depth: default_search_depth(),
        }
    }
}

/// Per-call gateway timeouts. Classification is short, synthesis is long.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_classify_ms")]
    pub classify_ms: u64,

    #[serde(default = "default_grounding_ms")]
    pub grounding_ms: u64,

    #[serde(default = "default_synthesis_ms")]
    pub synthesis_ms: u64,

    #[serde(default = "default_reflection_ms")]
    pub reflection_ms: u64,

    #[serde(default = "default_calibration_ms")]
    pub calibration_ms: u64,

    /// Wait before the single retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_classify_ms() -> u64 {
    8_000
}

fn default_grounding_ms() -> u64 {
    15_000
}

fn default_synthesis_ms() -> u64 {
    45_000
}

fn default_reflection_ms() -> u64 {
    30_000
}

fn default_calibration_ms() -> u64 {
    30_000
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            classify_ms: default_classify_ms(),
            grounding_ms: default_grounding_ms(),
            synthesis_ms: default_synthesis_ms(),
            reflection_ms: default_reflection_ms(),
            calibration_ms: default_calibration_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn classify(&self) -> Duration {
        Duration::from_millis(self.classify_ms)
    }

    pub fn grounding(&self) -> Duration {
        Duration::from_millis(self.grounding_ms)
    }

    pub fn synthesis(&self) -> Duration {
        Duration::from_millis(self.synthesis_ms)
    }

    pub fn reflection(&self) -> Duration {
        Duration::from_millis(self.reflection_ms)
    }

    pub fn calibration(&self) -> Duration {
        Duration::from_millis(self.calibration_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Reflection revision ceiling (K)
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u8,

    /// Classified topics kept in scope memory
    #[serde(default = "default_scope_memory_window")]
    pub scope_memory_window: usize,

    /// Recent turns shown to the classifier
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    /// Working-set cap after dedup (top-k by reliability x relevance)
    #[serde(default = "default_source_cap")]
    pub source_cap: usize,

    #[serde(default = "default_balance_tolerance")]
    pub balance_tolerance: f32,

    /// Verdicts below this certainty are treated as ambiguous
    #[serde(default = "default_ambiguity_threshold")]
    pub ambiguity_threshold: f32,

    #[serde(default = "default_min_aggregate_confidence")]
    pub min_aggregate_confidence: f32,

    /// Total words shared across perspective sections
    #[serde(default = "default_section_word_budget")]
    pub section_word_budget: usize,

    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,
}

fn default_max_revisions() -> u8 {
    DEFAULT_MAX_REVISIONS
}

fn default_scope_memory_window() -> usize {
    DEFAULT_SCOPE_MEMORY
}

fn default_history_window() -> usize {
    4
}

fn default_max_queries() -> usize {
    3
}

fn default_source_cap() -> usize {
    8
}

fn default_balance_tolerance() -> f32 {
    DEFAULT_BALANCE_TOLERANCE
}

fn default_ambiguity_threshold() -> f32 {
    0.6
}

fn default_min_aggregate_confidence() -> f32 {
    DEFAULT_MIN_AGGREGATE_CONFIDENCE
}

fn default_section_word_budget() -> usize {
    360
}

fn default_stale_after_days() -> i64 {
    DEFAULT_STALE_AFTER_DAYS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            scope_memory_window: default_scope_memory_window(),
            history_window: default_history_window(),
            max_queries: default_max_queries(),
            source_cap: default_source_cap(),
            balance_tolerance: default_balance_tolerance(),
            ambiguity_threshold: default_ambiguity_threshold(),
            min_aggregate_confidence: default_min_aggregate_confidence(),
            section_word_budget: default_section_word_budget(),
            stale_after_days: default_stale_after_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Ended sessions kept viewable before the oldest is dropped
    #[serde(default = "default_ended_sessions_retained")]
    pub ended_sessions_retained: usize,
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_ended_sessions_retained() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            ended_sessions_retained: default_ended_sessions_retained(),
        }
    }
}

/// Complete agorad configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load from an explicit path, then $AGORA_CONFIG, then the system path.
    /// Falls back to defaults when no file exists. A file that exists but
    /// does not parse is a configuration error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, AgoraError> {
        let candidates: Vec<PathBuf> = explicit
            .map(Path::to_path_buf)
            .into_iter()
            .chain(std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .chain(std::iter::once(PathBuf::from(CONFIG_PATH)))
            .collect();

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(AgoraError::Configuration(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
        }

        for path in candidates {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        warn!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self, AgoraError> {
        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content).map_err(|e| {
            AgoraError::Configuration(format!("{}: {}", path.display(), e))
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, AgoraError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AgoraError> {
        let p = &self.pipeline;
        if !(0.0..=1.0).contains(&p.ambiguity_threshold) {
            return Err(AgoraError::Configuration(
                "pipeline.ambiguity_threshold must be within [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&p.balance_tolerance) {
            return Err(AgoraError::Configuration(
                "pipeline.balance_tolerance must be within [0, 1]".into(),
            ));
        }
        if p.max_queries == 0 || p.source_cap == 0 {
            return Err(AgoraError::Configuration(
                "pipeline.max_queries and pipeline.source_cap must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Gateway credentials, resolved once before any session exists
#[derive(Clone)]
pub struct Credentials {
    pub model_api_key: String,
    pub retrieval_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("model_api_key", &"<redacted>")
            .field("retrieval_api_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Resolve from the process environment
    pub fn from_env(config: &Config) -> Result<Self, AgoraError> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// Resolve through `lookup`. A missing or blank key fails fast.
    pub fn resolve<F>(config: &Config, lookup: F) -> Result<Self, AgoraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fetch = |name: &str, what: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    AgoraError::Configuration(format!(
                        "{} credential missing: set {}",
                        what, name
                    ))
                })
        };
        Ok(Self {
            model_api_key: fetch(&config.model.api_key_env, "model")?,
            retrieval_api_key: fetch(&config.retrieval.api_key_env, "retrieval")?,
        })
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, model_key: Option<String>, retrieval_key: Option<String>) -> Self {
        if let Some(k) = model_key.filter(|k| !k.trim().is_empty()) {
            self.model_api_key = k;
        }
        if let Some(k) = retrieval_key.filter(|k| !k.trim().is_empty()) {
            self.retrieval_api_key = k;
        }
        self
    }
}
