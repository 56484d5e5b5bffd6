//! Pipeline stages.
//!
//! Each stage is a trait with an LLM-backed implementation. Stages never
//! fail a turn: gateway failures are retried once, then the stage degrades
//! and reports a limitation for the response to disclose.

pub mod calibration;
pub mod grounding;
pub mod json;
pub mod reflection;
pub mod scope;
pub mod synthesis;

use crate::gateway::{with_retry, CompletionOptions, ModelGateway, Prompt};
use agora_shared::calibration::CalibrationDecision;
use agora_shared::limitations::LimitationReason;
use agora_shared::reflection::ReflectionLog;
use agora_shared::session::ScopeEntry;
use agora_shared::transcript::{Actor, StageOutcome, Transcript, TranscriptEvent};
use agora_shared::turn::Role;
use agora_shared::{
    Claim, Classification, ConfidenceSummary, GatewayError, Perspective, SourceDocument,
};
use async_trait::async_trait;
use std::time::{Duration, Instant};

pub use calibration::LlmCalibrator;
pub use grounding::LlmGroundingAgent;
pub use reflection::LlmReflector;
pub use scope::LlmScopeClassifier;
pub use synthesis::LlmSynthesizer;

/// Per-turn reasoning transcript with a shared clock
#[derive(Debug)]
pub struct TurnTrace {
    started: Instant,
    transcript: Transcript,
}

impl Default for TurnTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnTrace {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            transcript: Transcript::new(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn start(&mut self, actor: Actor, stage: &str) {
        let ms = self.elapsed_ms();
        self.transcript.push(TranscriptEvent::stage_start(ms, actor, stage));
    }

    pub fn end(&mut self, actor: Actor, stage: &str, outcome: StageOutcome) {
        let ms = self.elapsed_ms();
        self.transcript
            .push(TranscriptEvent::stage_end(ms, actor, stage, outcome));
    }

    pub fn step(&mut self, actor: Actor, text: impl Into<String>, confidence: Option<f32>) {
        let ms = self.elapsed_ms();
        self.transcript
            .push(TranscriptEvent::step(ms, actor, text, confidence));
    }

    pub fn retry(&mut self, actor: Actor, stage: &str, error: &GatewayError) {
        let ms = self.elapsed_ms();
        self.transcript
            .push(TranscriptEvent::retry(ms, actor, stage, error.to_string()));
    }

    pub fn note(&mut self, text: impl Into<String>) {
        let ms = self.elapsed_ms();
        self.transcript.push(TranscriptEvent::note(ms, text));
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn into_transcript(self) -> Transcript {
        self.transcript
    }
}

/// Deadline and backoff for one kind of call
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub backoff: Duration,
}

/// Model call under the retry policy, with the retry recorded in the trace
pub(crate) async fn complete_with_retry(
    model: &dyn ModelGateway,
    prompt: &Prompt,
    options: &CompletionOptions,
    policy: CallPolicy,
    actor: Actor,
    trace: &mut TurnTrace,
) -> Result<String, GatewayError> {
    let attempted = with_retry(prompt.stage, policy.timeout, policy.backoff, || {
        model.complete(prompt, options)
    })
    .await;
    if let Some(first) = &attempted.retried_after {
        trace.retry(actor, prompt.stage.as_str(), first);
    }
    attempted.into_result()
}

// ============================================================================
// Scope classification
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ScopeInput {
    pub text: String,
    /// Recent turns, oldest first
    pub recent: Vec<(Role, String)>,
    pub scope_memory: Vec<ScopeEntry>,
}

#[async_trait]
pub trait ScopeClassifier: Send + Sync {
    /// Always produces a classification; an unreachable classifier yields
    /// the ambiguous fallback, never in-scope.
    async fn classify(&self, input: &ScopeInput, trace: &mut TurnTrace) -> Classification;
}

// ============================================================================
// Grounding
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct GroundingInput {
    pub question: String,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GroundingResult {
    pub queries: Vec<String>,
    pub failed_queries: usize,
    /// Deduplicated, reliability-scored, capped working set
    pub sources: Vec<SourceDocument>,
    pub rapidly_evolving: bool,
    pub limitations: Vec<LimitationReason>,
}

impl GroundingResult {
    pub fn is_gap(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
pub trait GroundingAgent: Send + Sync {
    async fn ground(&self, input: &GroundingInput, trace: &mut TurnTrace) -> GroundingResult;
}

// ============================================================================
// Synthesis
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SynthesisInput {
    pub question: String,
    pub sources: Vec<SourceDocument>,
    pub rapidly_evolving: bool,
    /// Some searches failed, so `sources` is known to be incomplete
    pub partial_grounding: bool,
}

/// A structured draft answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub overview: String,
    /// Whether reasonable people disagree on the question
    pub contested: bool,
    /// Sorted by `Perspective::ordering_key`
    pub perspectives: Vec<Perspective>,
    /// Word budget per perspective, parallel to `perspectives`
    pub section_budgets: Vec<usize>,
    pub claims: Vec<Claim>,
    /// Why one perspective is enough, when not contested
    pub consensus_note: Option<String>,
    /// Why sections differ in length, when budgets are asymmetric
    pub asymmetry_note: Option<String>,
    pub degraded: bool,
}

impl Draft {
    pub fn section_texts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.perspectives
            .iter()
            .map(|p| (p.label.as_str(), p.narrative.as_str()))
    }
}

#[async_trait]
pub trait PerspectiveSynthesizer: Send + Sync {
    async fn synthesize(&self, input: &SynthesisInput, trace: &mut TurnTrace) -> Draft;
}

// ============================================================================
// Reflection
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ReflectionInput {
    pub question: String,
}

#[derive(Debug, Clone)]
pub struct ReflectionOutcome {
    pub draft: Draft,
    pub log: ReflectionLog,
    pub limitations: Vec<LimitationReason>,
}

#[async_trait]
pub trait BiasReflector: Send + Sync {
    /// Critique and revise at most K times
    async fn reflect(
        &self,
        draft: Draft,
        input: &ReflectionInput,
        trace: &mut TurnTrace,
    ) -> ReflectionOutcome;
}

// ============================================================================
// Calibration
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CalibrationInput {
    pub question: String,
    pub claims: Vec<Claim>,
    pub rapidly_evolving: bool,
}

#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub claims: Vec<Claim>,
    pub unresolved: Vec<String>,
    pub summary: ConfidenceSummary,
    pub decision: CalibrationDecision,
    pub limitations: Vec<LimitationReason>,
}

#[async_trait]
pub trait UncertaintyCalibrator: Send + Sync {
    async fn calibrate(&self, input: &CalibrationInput, trace: &mut TurnTrace) -> CalibrationReport;
}

/// Numbered source list for prompts
pub(crate) fn format_sources(sources: &[SourceDocument]) -> String {
    if sources.is_empty() {
        return "(no sources were retrieved)".to_string();
    }
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let date = s
                .published
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "undated".to_string());
            format!(
                "[{}] {} ({}, {}, reliability {:.2})\n{}",
                i + 1,
                s.title,
                s.domain(),
                date,
                s.reliability,
                s.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{FakeModelGateway, Stage};

    #[tokio::test]
    async fn test_retry_recorded_in_trace() {
        let fake = FakeModelGateway::new().sequence(
            Stage::Classify,
            vec![Err(GatewayError::Timeout), Ok("{}".into())],
        );
        let mut trace = TurnTrace::new();
        let policy = CallPolicy {
            timeout: Duration::from_millis(200),
            backoff: Duration::from_millis(1),
        };
        let out = complete_with_retry(
            &fake,
            &Prompt::new(Stage::Classify, "s", "u"),
            &CompletionOptions::default(),
            policy,
            Actor::ScopeClassifier,
            &mut trace,
        )
        .await;
        assert_eq!(out.unwrap(), "{}");
        assert_eq!(trace.transcript().len(), 1);
    }

    #[test]
    fn test_format_sources_numbering() {
        let sources = vec![
            SourceDocument::new("https://apnews.com/a", "first").with_title("A"),
            SourceDocument::new("https://cbo.gov/b", "second").with_title("B"),
        ];
        let text = format_sources(&sources);
        assert!(text.starts_with("[1] A (apnews.com, undated"));
        assert!(text.contains("[2] B (cbo.gov"));
        assert_eq!(format_sources(&[]), "(no sources were retrieved)");
    }
}
