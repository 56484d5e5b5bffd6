//! Limitation disclosures.
//!
//! Reason codes (not text) are collected while a turn runs and mapped to
//! stable phrasing at the edge. Nothing in a disclosure is free-form model
//! output.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Why an answer carries a disclosed limitation.
/// Priority order matters, first is shown first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitationReason {
    /// No usable sources were retrieved
    GroundingGap,
    /// Some searches failed, the rest returned sources
    PartialGrounding,
    /// Reflection revision ceiling reached with defects left
    BiasCeilingReached,
    /// Aggregate claim confidence below threshold
    LowAggregateConfidence,
    /// Perspective drafting fell back to a structural summary
    SynthesisDegraded,
    /// Self-critique could not run, only structural checks were applied
    CritiqueUnavailable,
    /// Calibration fell back to source signals only
    CalibrationDegraded,
    /// Scope classification failed
    ClassifierUnavailable,
}

impl LimitationReason {
    /// User-facing explanation (single line, lowercase start)
    pub fn explanation(&self) -> &'static str {
        match self {
            Self::GroundingGap => "no reliable sources could be retrieved for this question",
            Self::PartialGrounding => "only part of the source search succeeded",
            Self::BiasCeilingReached => "the balance review still found issues after its final revision",
            Self::LowAggregateConfidence => "most statements here could not be confirmed with confidence",
            Self::SynthesisDegraded => "the perspective summaries were shortened to their core points",
            Self::CritiqueUnavailable => "the wording review ran with structural checks only",
            Self::CalibrationDegraded => "confidence labels were assigned from source signals alone",
            Self::ClassifierUnavailable => "I could not determine whether this question is within my scope",
        }
    }

    /// Priority for display (lower = shown first)
    pub fn priority(&self) -> u8 {
        match self {
            Self::GroundingGap => 0,
            Self::BiasCeilingReached => 1,
            Self::LowAggregateConfidence => 2,
            Self::PartialGrounding => 3,
            Self::SynthesisDegraded => 4,
            Self::CritiqueUnavailable => 5,
            Self::CalibrationDegraded => 6,
            Self::ClassifierUnavailable => 7,
        }
    }

    /// Templated detail for this reason
    pub fn detail_template(&self, context: &LimitationContext) -> String {
        match self {
            Self::GroundingGap => format!(
                "{} search quer{} returned no usable sources",
                context.queries,
                if context.queries == 1 { "y" } else { "ies" }
            ),
            Self::PartialGrounding => format!(
                "{} of {} searches failed",
                context.failed_queries, context.queries
            ),
            Self::BiasCeilingReached => format!(
                "{} revision pass{} did not resolve: {}",
                context.revisions,
                if context.revisions == 1 { "" } else { "es" },
                if context.open_defects.is_empty() {
                    "unspecified".to_string()
                } else {
                    context.open_defects.join(", ")
                }
            ),
            Self::LowAggregateConfidence => format!(
                "aggregate confidence {:.0}% is below the {:.0}% threshold",
                context.aggregate_confidence * 100.0,
                context.confidence_threshold * 100.0
            ),
            Self::SynthesisDegraded => "perspective drafting was unavailable".to_string(),
            Self::CritiqueUnavailable => "wording critique was unavailable".to_string(),
            Self::CalibrationDegraded => "calibration reasoning was unavailable".to_string(),
            Self::ClassifierUnavailable => "scope classification was unavailable".to_string(),
        }
    }
}

/// Numeric facts for the detail templates
#[derive(Debug, Clone, Default)]
pub struct LimitationContext {
    pub queries: usize,
    pub failed_queries: usize,
    pub revisions: u8,
    pub open_defects: Vec<String>,
    pub aggregate_confidence: f32,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitationItem {
    pub code: LimitationReason,
    pub details: String,
}

/// Structured disclosure appended to an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disclosure {
    pub summary: String,
    pub items: Vec<LimitationItem>,
}

impl Disclosure {
    /// Build a disclosure. Returns None when there is nothing to disclose.
    pub fn build(reasons: &[LimitationReason], context: &LimitationContext) -> Option<Self> {
        if reasons.is_empty() {
            return None;
        }

        let mut codes: Vec<LimitationReason> = reasons.to_vec();
        codes.sort_by_key(|r| r.priority());
        let mut seen = HashSet::new();
        codes.retain(|r| seen.insert(*r));

        let items: Vec<LimitationItem> = codes
            .iter()
            .map(|code| LimitationItem {
                code: *code,
                details: code.detail_template(context),
            })
            .collect();

        let primary = items[0].code.explanation();
        let summary = match items.len() {
            1 => format!("Limitations: {}.", primary),
            n => format!(
                "Limitations: {} (+{} other issue{}).",
                primary,
                n - 1,
                if n == 2 { "" } else { "s" }
            ),
        };

        Some(Self { summary, items })
    }

    /// Multi-line text block for the rendered answer
    pub fn render(&self) -> String {
        let mut out = self.summary.clone();
        for item in &self.items {
            out.push_str(&format!("\n- {}: {}", item.code.explanation(), item.details));
        }
        out
    }
}
