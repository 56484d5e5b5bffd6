//! Turns and classifications.
//!
//! Turns are immutable once appended to a session.

use crate::claims::{Claim, ConfidenceLabel, Perspective};
use crate::limitations::LimitationReason;
use crate::reflection::ReflectionLog;
use crate::session::SessionState;
use crate::transcript::Transcript;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    InScope,
    OutOfScope,
    Ambiguous,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InScope => "in_scope",
            Self::OutOfScope => "out_of_scope",
            Self::Ambiguous => "ambiguous",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(&['-', ' '][..], "_").as_str() {
            "in_scope" => Some(Self::InScope),
            "out_of_scope" => Some(Self::OutOfScope),
            "ambiguous" | "borderline" => Some(Self::Ambiguous),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationOrigin {
    Model,
    /// Classifier unavailable; never treated as in-scope
    Fallback,
}

/// Scope decision for one user turn. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub verdict: Verdict,
    pub rationale: String,
    /// Certainty in [0,1]
    pub certainty: f32,
    /// Short topic label for scope memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// A related political angle worth offering when redirecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_hint: Option<String>,
    pub origin: ClassificationOrigin,
}

impl Classification {
    pub fn new(verdict: Verdict, rationale: impl Into<String>, certainty: f32) -> Self {
        Self {
            verdict,
            rationale: rationale.into(),
            certainty: certainty.clamp(0.0, 1.0),
            topic: None,
            redirect_hint: None,
            origin: ClassificationOrigin::Model,
        }
    }

    /// Fallback when the classifier cannot be reached
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Ambiguous,
            rationale: reason.into(),
            certainty: 0.0,
            topic: None,
            redirect_hint: None,
            origin: ClassificationOrigin::Fallback,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        if !topic.trim().is_empty() {
            self.topic = Some(topic.trim().to_string());
        }
        self
    }

    pub fn with_redirect_hint(mut self, hint: impl Into<String>) -> Self {
        let hint = hint.into();
        if !hint.trim().is_empty() {
            self.redirect_hint = Some(hint.trim().to_string());
        }
        self
    }

    pub fn is_fallback(&self) -> bool {
        self.origin == ClassificationOrigin::Fallback
    }

    /// First sentence of the rationale, for one-sentence explanations
    pub fn rationale_sentence(&self) -> String {
        let trimmed = self.rationale.trim();
        let end = trimmed
            .find(". ")
            .map(|i| i + 1)
            .unwrap_or(trimmed.len());
        let sentence = trimmed[..end].trim();
        if sentence.ends_with('.') || sentence.ends_with('!') || sentence.ends_with('?') {
            sentence.to_string()
        } else {
            format!("{}.", sentence)
        }
    }
}

/// Confidence counts and aggregate for an agent turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSummary {
    pub aggregate: f32,
    pub verified: usize,
    pub likely: usize,
    pub uncertain: usize,
    pub unverifiable: usize,
    pub below_threshold: bool,
}

impl ConfidenceSummary {
    pub fn total(&self) -> usize {
        self.verified + self.likely + self.uncertain + self.unverifiable
    }

    pub fn count(&self, label: ConfidenceLabel) -> usize {
        match label {
            ConfidenceLabel::Verified => self.verified,
            ConfidenceLabel::Likely => self.likely,
            ConfidenceLabel::Uncertain => self.uncertain,
            ConfidenceLabel::Unverifiable => self.unverifiable,
        }
    }
}

/// How a clarification reply was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairKind {
    /// Single ambiguous turn
    Clarify,
    /// Consecutive ambiguous turns, or the user repeated themselves
    Proactive,
    /// Classifier unavailable, generic bounded reply
    Bounded,
}

/// Pipeline record attached to an agent turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReport {
    /// Terminal response state (Responding, ClarifyingRepair or BoundaryResponding)
    pub final_state: SessionState,
    /// States visited during the turn, in order
    pub states: Vec<SessionState>,
    #[serde(default)]
    pub limitations: Vec<LimitationReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<ReflectionLog>,
    #[serde(default)]
    pub unresolved: Vec<String>,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asymmetry_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairKind>,
    /// Whether this turn came back into scope after an out-of-scope turn
    #[serde(default)]
    pub returned_to_scope: bool,
    #[serde(default)]
    pub transcript: Transcript,
}

impl TurnReport {
    pub fn new(final_state: SessionState, states: Vec<SessionState>) -> Self {
        Self {
            final_state,
            states,
            limitations: Vec::new(),
            reflection: None,
            unresolved: Vec::new(),
            queries: Vec::new(),
            asymmetry_note: None,
            repair: None,
            returned_to_scope: false,
            transcript: Transcript::new(),
        }
    }

    pub fn revisions(&self) -> u8 {
        self.reflection.as_ref().map(|r| r.revisions).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(default)]
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub perspectives: Vec<Perspective>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<TurnReport>,
}

impl Turn {
    pub fn user(text: impl Into<String>, classification: Classification) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            classification: Some(classification),
            claims: Vec::new(),
            perspectives: Vec::new(),
            confidence: None,
            report: None,
        }
    }

    pub fn agent(text: impl Into<String>, report: TurnReport) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Agent,
            text: text.into(),
            timestamp: Utc::now(),
            classification: None,
            claims: Vec::new(),
            perspectives: Vec::new(),
            confidence: None,
            report: Some(report),
        }
    }

    /// Agent turns carry the classification of the user turn they answer
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn with_claims(mut self, claims: Vec<Claim>) -> Self {
        self.claims = claims;
        self
    }

    pub fn with_perspectives(mut self, perspectives: Vec<Perspective>) -> Self {
        self.perspectives = perspectives;
        self
    }

    pub fn with_confidence(mut self, summary: ConfidenceSummary) -> Self {
        self.confidence = Some(summary);
        self
    }

    pub fn final_state(&self) -> Option<SessionState> {
        self.report.as_ref().map(|r| r.final_state)
    }
}
