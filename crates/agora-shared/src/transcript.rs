//! Transcript event model for per-turn pipeline visibility.
//!
//! Every agent turn carries the ordered reasoning steps that produced it.
//! The transcript is capped so a pathological turn cannot grow it unbounded.

use serde::{Deserialize, Serialize};

/// Maximum events kept per turn transcript
pub const MAX_TRANSCRIPT_EVENTS: usize = 200;

/// Actor in the transcript (who is acting)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User,
    Agora,
    ScopeClassifier,
    Grounding,
    Synthesizer,
    Reflector,
    Calibrator,
    Conversation,
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agora => write!(f, "agora"),
            Self::ScopeClassifier => write!(f, "scope"),
            Self::Grounding => write!(f, "grounding"),
            Self::Synthesizer => write!(f, "synthesizer"),
            Self::Reflector => write!(f, "reflector"),
            Self::Calibrator => write!(f, "calibrator"),
            Self::Conversation => write!(f, "conversation"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Stage outcome for StageEnd events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Ok,
    /// Stage ran but fell back to its documented degraded behavior
    Degraded { reason: String },
    Skipped,
}

impl StageOutcome {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded {
            reason: reason.into(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Degraded { reason } => write!(f, "degraded({})", reason),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Kind of transcript event
///
/// `Unknown` keeps older clients from failing on newer event kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEventKind {
    StageStart { stage: String },
    StageEnd { stage: String, outcome: StageOutcome },
    /// A reasoning step with the confidence the stage attached to it
    Step { text: String, confidence: Option<f32> },
    /// Gateway call retried after a failure
    Retry { stage: String, error: String },
    Note { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// Elapsed time since the turn started (ms)
    pub elapsed_ms: u64,
    pub actor: Actor,
    pub kind: TranscriptEventKind,
}

impl TranscriptEvent {
    pub fn stage_start(elapsed_ms: u64, actor: Actor, stage: impl Into<String>) -> Self {
        Self {
            elapsed_ms,
            actor,
            kind: TranscriptEventKind::StageStart {
                stage: stage.into(),
            },
        }
    }

    pub fn stage_end(
        elapsed_ms: u64,
        actor: Actor,
        stage: impl Into<String>,
        outcome: StageOutcome,
    ) -> Self {
        Self {
            elapsed_ms,
            actor,
            kind: TranscriptEventKind::StageEnd {
                stage: stage.into(),
                outcome,
            },
        }
    }

    pub fn step(elapsed_ms: u64, actor: Actor, text: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            elapsed_ms,
            actor,
            kind: TranscriptEventKind::Step {
                text: text.into(),
                confidence,
            },
        }
    }

    pub fn retry(elapsed_ms: u64, actor: Actor, stage: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            elapsed_ms,
            actor,
            kind: TranscriptEventKind::Retry {
                stage: stage.into(),
                error: error.into(),
            },
        }
    }

    pub fn note(elapsed_ms: u64, text: impl Into<String>) -> Self {
        Self {
            elapsed_ms,
            actor: Actor::System,
            kind: TranscriptEventKind::Note { text: text.into() },
        }
    }
}

/// Ordered, capped list of events for one turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub events: Vec<TranscriptEvent>,
    /// Events dropped after the cap was reached
    #[serde(default)]
    pub dropped: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TranscriptEvent) {
        if self.events.len() >= MAX_TRANSCRIPT_EVENTS {
            self.dropped += 1;
            return;
        }
        self.events.push(event);
    }

    pub fn extend(&mut self, other: Transcript) {
        for event in other.events {
            self.push(event);
        }
        self.dropped += other.dropped;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Stages that ended degraded, in order
    pub fn degraded_stages(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match &e.kind {
                TranscriptEventKind::StageEnd { stage, outcome } if outcome.is_degraded() => {
                    Some(stage.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Whether a stage was started in this transcript
    pub fn ran_stage(&self, name: &str) -> bool {
        self.events.iter().any(|e| {
            matches!(&e.kind, TranscriptEventKind::StageStart { stage } if stage == name)
        })
    }
}
