//! Confidence calibration rules.
//!
//! The model reasons about each claim first. These functions apply the
//! guardrails that reasoning may not override, provide the signal-only
//! fallback, and aggregate labels for a draft. Every label change appends a
//! readable line to the claim's rationale.

use crate::claims::{Claim, ConfidenceLabel};
use crate::turn::ConfidenceSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default aggregate confidence below which a limitations note is added
pub const DEFAULT_MIN_AGGREGATE_CONFIDENCE: f32 = 0.55;

/// Evidence older than this is stale for rapidly evolving topics
pub const DEFAULT_STALE_AFTER_DAYS: i64 = 30;

/// Observable evidence for one claim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimSignals {
    pub source_count: usize,
    pub distinct_domains: usize,
    pub mean_reliability: f32,
    /// Age of the newest supporting source
    pub newest_age_days: Option<i64>,
    pub rapidly_evolving: bool,
}

impl ClaimSignals {
    pub fn from_claim(claim: &Claim, now: DateTime<Utc>, rapidly_evolving: bool) -> Self {
        let source_count = claim.sources.len();
        let mean_reliability = if source_count == 0 {
            0.0
        } else {
            claim.sources.iter().map(|s| s.reliability).sum::<f32>() / source_count as f32
        };
        let newest_age_days = claim.sources.iter().filter_map(|s| s.age_days(now)).min();
        Self {
            source_count,
            distinct_domains: claim.distinct_domains(),
            mean_reliability,
            newest_age_days,
            rapidly_evolving,
        }
    }

    fn is_stale(&self, stale_after_days: i64) -> bool {
        self.rapidly_evolving
            && self
                .newest_age_days
                .map(|age| age > stale_after_days)
                .unwrap_or(false)
    }
}

/// Label from evidence signals alone, with the reasoning spelled out
pub fn calibrate_from_signals(signals: &ClaimSignals, stale_after_days: i64) -> (ConfidenceLabel, String) {
    if signals.source_count == 0 {
        return (
            ConfidenceLabel::Unverifiable,
            "no supporting source was retrieved".to_string(),
        );
    }

    let mut lines = vec![format!(
        "{} source{} across {} domain{}, mean reliability {:.2}",
        signals.source_count,
        if signals.source_count == 1 { "" } else { "s" },
        signals.distinct_domains,
        if signals.distinct_domains == 1 { "" } else { "s" },
        signals.mean_reliability
    )];

    let mut label = if signals.distinct_domains >= 2 && signals.mean_reliability >= 0.7 {
        lines.push("independent reliable sources agree".to_string());
        ConfidenceLabel::Verified
    } else if signals.mean_reliability >= 0.5 {
        lines.push("supported but not independently corroborated".to_string());
        ConfidenceLabel::Likely
    } else {
        lines.push("supporting sources are of limited reliability".to_string());
        ConfidenceLabel::Uncertain
    };

    if signals.is_stale(stale_after_days) {
        label = label.downgrade();
        lines.push(format!(
            "newest source is {} days old on a fast-moving topic",
            signals.newest_age_days.unwrap_or_default()
        ));
    }

    (label, lines.join("; "))
}

/// Apply the rules no model judgment may override
pub fn apply_guardrails(claim: &mut Claim) {
    if !claim.has_source() {
        if claim.confidence != ConfidenceLabel::Unverifiable {
            claim.rationale = append_line(
                &claim.rationale,
                &format!(
                    "downgraded from {} to unverifiable: no supporting source",
                    claim.confidence
                ),
            );
        }
        claim.confidence = ConfidenceLabel::Unverifiable;
        return;
    }

    // Sourced background facts still need a perspective to stand behind them
    if claim.perspective.is_none() {
        if claim.confidence != ConfidenceLabel::Unverifiable {
            claim.rationale = append_line(
                &claim.rationale,
                &format!(
                    "downgraded from {} to unverifiable: not attributed to any perspective",
                    claim.confidence
                ),
            );
        }
        claim.confidence = ConfidenceLabel::Unverifiable;
        return;
    }

    if claim.confidence == ConfidenceLabel::Verified && claim.distinct_domains() < 2 {
        claim.confidence = ConfidenceLabel::Likely;
        claim.rationale = append_line(
            &claim.rationale,
            "downgraded from verified to likely: only one source domain",
        );
    }
}

fn append_line(rationale: &str, line: &str) -> String {
    if rationale.trim().is_empty() {
        line.to_string()
    } else {
        format!("{}; {}", rationale.trim_end_matches(|c| c == '.' || c == ';'), line)
    }
}

/// Aggregate confidence: mean of label weights, 0.0 for no claims
pub fn summarize(claims: &[Claim], threshold: f32) -> ConfidenceSummary {
    let mut summary = ConfidenceSummary::default();
    for claim in claims {
        match claim.confidence {
            ConfidenceLabel::Verified => summary.verified += 1,
            ConfidenceLabel::Likely => summary.likely += 1,
            ConfidenceLabel::Uncertain => summary.uncertain += 1,
            ConfidenceLabel::Unverifiable => summary.unverifiable += 1,
        }
    }
    summary.aggregate = if claims.is_empty() {
        0.0
    } else {
        claims.iter().map(|c| c.confidence.weight()).sum::<f32>() / claims.len() as f32
    };
    summary.below_threshold = summary.aggregate < threshold;
    summary
}

/// What the response may do with the calibrated claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationDecision {
    Answer,
    AnswerWithHedges,
    /// Nothing could be confirmed, answer only what is attributable
    PartialRefusal,
}

pub fn decide(summary: &ConfidenceSummary) -> CalibrationDecision {
    let total = summary.total();
    if total == 0 || summary.unverifiable == total {
        CalibrationDecision::PartialRefusal
    } else if summary.uncertain + summary.unverifiable > 0 {
        CalibrationDecision::AnswerWithHedges
    } else {
        CalibrationDecision::Answer
    }
}
