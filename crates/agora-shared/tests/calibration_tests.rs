//! Golden tests for confidence calibration.
//!
//! These tests lock exact behavior. Changes require explicit approval.

use agora_shared::calibration::{
    apply_guardrails, calibrate_from_signals, decide, summarize, CalibrationDecision,
    ClaimSignals, DEFAULT_STALE_AFTER_DAYS,
};
use agora_shared::claims::{Claim, ConfidenceLabel, SourceDocument};
use chrono::{Duration, TimeZone, Utc};

fn doc(url: &str, reliability: f32) -> SourceDocument {
    SourceDocument::new(url, "snippet").with_reliability(reliability)
}

// === GOLDEN TESTS: Signal fallback ===

/// GOLDEN: no sources is always unverifiable
#[test]
fn golden_no_sources_unverifiable() {
    let (label, rationale) = calibrate_from_signals(&ClaimSignals::default(), DEFAULT_STALE_AFTER_DAYS);
    assert_eq!(label, ConfidenceLabel::Unverifiable);
    assert_eq!(rationale, "no supporting source was retrieved");
}

/// GOLDEN: two reliable domains -> verified
#[test]
fn golden_two_reliable_domains_verified() {
    let signals = ClaimSignals {
        source_count: 2,
        distinct_domains: 2,
        mean_reliability: 0.85,
        ..Default::default()
    };
    let (label, rationale) = calibrate_from_signals(&signals, DEFAULT_STALE_AFTER_DAYS);
    assert_eq!(label, ConfidenceLabel::Verified);
    assert!(rationale.contains("2 sources across 2 domains"));
    assert!(rationale.contains("independent reliable sources agree"));
}

/// GOLDEN: single reliable domain -> likely
#[test]
fn golden_single_domain_likely() {
    let signals = ClaimSignals {
        source_count: 3,
        distinct_domains: 1,
        mean_reliability: 0.9,
        ..Default::default()
    };
    let (label, _) = calibrate_from_signals(&signals, DEFAULT_STALE_AFTER_DAYS);
    assert_eq!(label, ConfidenceLabel::Likely);
}

/// GOLDEN: weak sources -> uncertain
#[test]
fn golden_weak_sources_uncertain() {
    let signals = ClaimSignals {
        source_count: 2,
        distinct_domains: 2,
        mean_reliability: 0.3,
        ..Default::default()
    };
    let (label, _) = calibrate_from_signals(&signals, DEFAULT_STALE_AFTER_DAYS);
    assert_eq!(label, ConfidenceLabel::Uncertain);
}

/// GOLDEN: stale evidence on a fast-moving topic downgrades one step
#[test]
fn golden_stale_fast_topic_downgrades() {
    let signals = ClaimSignals {
        source_count: 2,
        distinct_domains: 2,
        mean_reliability: 0.85,
        newest_age_days: Some(90),
        rapidly_evolving: true,
    };
    let (label, rationale) = calibrate_from_signals(&signals, DEFAULT_STALE_AFTER_DAYS);
    assert_eq!(label, ConfidenceLabel::Likely);
    assert!(rationale.contains("90 days old"));

    let settled = ClaimSignals {
        rapidly_evolving: false,
        ..signals
    };
    let (label, _) = calibrate_from_signals(&settled, DEFAULT_STALE_AFTER_DAYS);
    assert_eq!(label, ConfidenceLabel::Verified);
}

#[test]
fn test_signals_from_claim() {
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let claim = Claim::new("c1", "The bill passed.").with_sources(vec![
        doc("https://apnews.com/a", 0.8).with_published(now - Duration::days(10)),
        doc("https://www.reuters.com/b", 0.6).with_published(now - Duration::days(3)),
    ]);
    let signals = ClaimSignals::from_claim(&claim, now, true);
    assert_eq!(signals.source_count, 2);
    assert_eq!(signals.distinct_domains, 2);
    assert!((signals.mean_reliability - 0.7).abs() < 1e-6);
    assert_eq!(signals.newest_age_days, Some(3));
}

// === GOLDEN TESTS: Guardrails ===

/// GOLDEN: model says verified but there is no source
#[test]
fn golden_guardrail_sourceless_claim() {
    let mut claim = Claim::new("c1", "Negotiators met in secret.")
        .with_confidence(ConfidenceLabel::Verified, "widely reported");
    apply_guardrails(&mut claim);
    assert_eq!(claim.confidence, ConfidenceLabel::Unverifiable);
    assert!(claim.rationale.starts_with("widely reported"));
    assert!(claim
        .rationale
        .contains("downgraded from verified to unverifiable: no supporting source"));
}

/// GOLDEN: verified needs two domains
#[test]
fn golden_guardrail_verified_needs_two_domains() {
    let mut claim = Claim::new("c1", "The vote was 314-117.")
        .with_perspective("Raise the limit")
        .with_sources(vec![
            doc("https://clerk.house.gov/Votes/2023243", 0.95),
            doc("https://clerk.house.gov/Votes/2023243/summary", 0.95),
        ])
        .with_confidence(ConfidenceLabel::Verified, "official roll call");
    apply_guardrails(&mut claim);
    assert_eq!(claim.confidence, ConfidenceLabel::Likely);
    assert!(claim.rationale.contains("only one source domain"));
}

/// GOLDEN: a sourced claim outside every perspective cannot be asserted
#[test]
fn golden_guardrail_unattributed_claim() {
    let mut claim = Claim::new("c1", "The rule dates to 1917.")
        .with_sources(vec![
            doc("https://www.senate.gov/history", 0.9),
            doc("https://www.brookings.edu/filibuster", 0.8),
        ])
        .with_confidence(ConfidenceLabel::Likely, "two sources");
    apply_guardrails(&mut claim);
    assert_eq!(claim.confidence, ConfidenceLabel::Unverifiable);
    assert_eq!(claim.sources.len(), 2);
    assert!(claim.is_traceable());
    assert!(claim
        .rationale
        .contains("downgraded from likely to unverifiable: not attributed to any perspective"));
}

#[test]
fn test_guardrail_keeps_sources_untouched() {
    let sources = vec![doc("https://apnews.com/a", 0.8), doc("https://cbo.gov/b", 0.9)];
    let mut claim = Claim::new("c1", "CBO scored the deal.")
        .with_perspective("Cap spending")
        .with_sources(sources.clone())
        .with_confidence(ConfidenceLabel::Verified, "CBO and AP agree");
    apply_guardrails(&mut claim);
    assert_eq!(claim.confidence, ConfidenceLabel::Verified);
    assert_eq!(claim.sources, sources);
    assert_eq!(claim.rationale, "CBO and AP agree");
}

// === GOLDEN TESTS: Aggregate ===

/// GOLDEN: mean of label weights
#[test]
fn golden_aggregate_weights() {
    let claims = vec![
        Claim::new("a", "x").with_confidence(ConfidenceLabel::Verified, ""),
        Claim::new("b", "y").with_confidence(ConfidenceLabel::Uncertain, ""),
    ];
    let summary = summarize(&claims, 0.55);
    // (1.0 + 0.4) / 2 = 0.7
    assert!((summary.aggregate - 0.7).abs() < 1e-6);
    assert!(!summary.below_threshold);
    assert_eq!(summary.verified, 1);
    assert_eq!(summary.uncertain, 1);
    assert_eq!(decide(&summary), CalibrationDecision::AnswerWithHedges);
}

/// GOLDEN: no claims is zero confidence and a partial refusal
#[test]
fn golden_no_claims() {
    let summary = summarize(&[], 0.55);
    assert_eq!(summary.aggregate, 0.0);
    assert!(summary.below_threshold);
    assert_eq!(decide(&summary), CalibrationDecision::PartialRefusal);
}

#[test]
fn test_all_confident_is_plain_answer() {
    let claims = vec![
        Claim::new("a", "x").with_confidence(ConfidenceLabel::Verified, ""),
        Claim::new("b", "y").with_confidence(ConfidenceLabel::Likely, ""),
    ];
    assert_eq!(decide(&summarize(&claims, 0.55)), CalibrationDecision::Answer);
}
