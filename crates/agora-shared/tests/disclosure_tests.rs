//! Limitation disclosure and transcript tests.
//!
//! These lock the user-facing phrasing of disclosures.

use agora_shared::limitations::{Disclosure, LimitationContext, LimitationReason};
use agora_shared::transcript::{
    Actor, StageOutcome, Transcript, TranscriptEvent, TranscriptEventKind, MAX_TRANSCRIPT_EVENTS,
};

#[test]
fn test_no_reasons_no_disclosure() {
    assert!(Disclosure::build(&[], &LimitationContext::default()).is_none());
}

/// GOLDEN: priority ordering and dedup
#[test]
fn golden_disclosure_orders_by_priority() {
    let context = LimitationContext {
        queries: 3,
        failed_queries: 1,
        revisions: 2,
        open_defects: vec!["loaded_language".into()],
        aggregate_confidence: 0.4,
        confidence_threshold: 0.55,
    };
    let disclosure = Disclosure::build(
        &[
            LimitationReason::PartialGrounding,
            LimitationReason::BiasCeilingReached,
            LimitationReason::PartialGrounding,
            LimitationReason::LowAggregateConfidence,
        ],
        &context,
    )
    .unwrap();

    let codes: Vec<LimitationReason> = disclosure.items.iter().map(|i| i.code).collect();
    assert_eq!(
        codes,
        vec![
            LimitationReason::BiasCeilingReached,
            LimitationReason::LowAggregateConfidence,
            LimitationReason::PartialGrounding,
        ]
    );
    assert_eq!(
        disclosure.summary,
        "Limitations: the balance review still found issues after its final revision (+2 other issues)."
    );
    assert_eq!(
        disclosure.items[0].details,
        "2 revision passes did not resolve: loaded_language"
    );
    assert_eq!(
        disclosure.items[1].details,
        "aggregate confidence 40% is below the 55% threshold"
    );
    assert_eq!(disclosure.items[2].details, "1 of 3 searches failed");
}

#[test]
fn test_grounding_gap_detail() {
    let context = LimitationContext {
        queries: 1,
        ..Default::default()
    };
    let disclosure = Disclosure::build(&[LimitationReason::GroundingGap], &context).unwrap();
    assert_eq!(
        disclosure.summary,
        "Limitations: no reliable sources could be retrieved for this question."
    );
    assert!(disclosure.render().contains("1 search query returned no usable sources"));
}

#[test]
fn test_transcript_cap() {
    let mut transcript = Transcript::new();
    for i in 0..(MAX_TRANSCRIPT_EVENTS + 5) {
        transcript.push(TranscriptEvent::note(i as u64, "n"));
    }
    assert_eq!(transcript.len(), MAX_TRANSCRIPT_EVENTS);
    assert_eq!(transcript.dropped, 5);
}

#[test]
fn test_degraded_stages() {
    let mut transcript = Transcript::new();
    transcript.push(TranscriptEvent::stage_start(0, Actor::Grounding, "grounding"));
    transcript.push(TranscriptEvent::stage_end(
        10,
        Actor::Grounding,
        "grounding",
        StageOutcome::degraded("search timed out"),
    ));
    transcript.push(TranscriptEvent::stage_end(20, Actor::Reflector, "reflection", StageOutcome::Ok));
    assert_eq!(transcript.degraded_stages(), vec!["grounding".to_string()]);
    assert!(transcript.ran_stage("grounding"));
    assert!(!transcript.ran_stage("calibration"));
}

#[test]
fn test_unknown_event_kind_deserializes() {
    let json = r#"{"elapsed_ms":5,"actor":"system","kind":{"type":"future_kind","x":1}}"#;
    let event: TranscriptEvent = serde_json::from_str(json).unwrap();
    assert_eq!(event.kind, TranscriptEventKind::Unknown);
}
