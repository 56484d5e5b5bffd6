//! Session and state machine tests.

use agora_shared::session::{Session, SessionState};
use agora_shared::turn::{Classification, RepairKind, Turn, TurnReport, Verdict};

fn exchange(text: &str, verdict: Verdict, final_state: SessionState) -> (Turn, Turn) {
    let classification = Classification::new(verdict, "test rationale", 0.9).with_topic(text);
    let user = Turn::user(text, classification.clone());
    let mut report = TurnReport::new(final_state, vec![SessionState::Classifying, final_state]);
    if final_state == SessionState::ClarifyingRepair {
        report.repair = Some(RepairKind::Clarify);
    }
    let agent = Turn::agent("reply", report).with_classification(classification);
    (user, agent)
}

#[test]
fn test_new_session_awaits_turn() {
    let session = Session::new("s1", 5);
    assert_eq!(session.state(), SessionState::AwaitingTurn);
    assert!(session.turns().is_empty());
    assert!(session.classifications().is_empty());
}

#[test]
fn test_commit_appends_both_turns_and_classification() {
    let mut session = Session::new("s1", 5);
    let (user, agent) = exchange("debt ceiling", Verdict::InScope, SessionState::Responding);
    session.commit_exchange(user, agent);

    assert_eq!(session.turns().len(), 2);
    assert_eq!(session.classifications().len(), 1);
    assert_eq!(session.scope_memory().len(), 1);
    assert_eq!(session.metrics().answered, 1);
    assert!(session.metrics().engagement > 0.5);
}

#[test]
fn test_classification_history_is_append_only() {
    let mut session = Session::new("s1", 5);
    for (i, verdict) in [Verdict::OutOfScope, Verdict::Ambiguous, Verdict::InScope]
        .into_iter()
        .enumerate()
    {
        let (user, agent) = exchange(&format!("t{}", i), verdict, SessionState::Responding);
        session.commit_exchange(user, agent);
    }
    let verdicts: Vec<Verdict> = session.classifications().iter().map(|c| c.verdict).collect();
    assert_eq!(
        verdicts,
        vec![Verdict::OutOfScope, Verdict::Ambiguous, Verdict::InScope]
    );
}

#[test]
fn test_consecutive_ambiguous_counts_trailing_run() {
    let mut session = Session::new("s1", 5);
    let (u, a) = exchange("a", Verdict::Ambiguous, SessionState::ClarifyingRepair);
    session.commit_exchange(u, a);
    let (u, a) = exchange("b", Verdict::InScope, SessionState::Responding);
    session.commit_exchange(u, a);
    assert_eq!(session.consecutive_ambiguous(), 0);

    let (u, a) = exchange("c", Verdict::Ambiguous, SessionState::ClarifyingRepair);
    session.commit_exchange(u, a);
    let (u, a) = exchange("d", Verdict::Ambiguous, SessionState::ClarifyingRepair);
    session.commit_exchange(u, a);
    assert_eq!(session.consecutive_ambiguous(), 2);
    assert_eq!(session.metrics().clarifications, 3);
}

#[test]
fn test_repetition_needs_two_identical_previous_messages() {
    let mut session = Session::new("s1", 5);
    let (u, a) = exchange("Tell me  about it", Verdict::Ambiguous, SessionState::ClarifyingRepair);
    session.commit_exchange(u, a);
    assert!(!session.is_repetition("tell me about it"));
    let (u, a) = exchange("tell me about it", Verdict::Ambiguous, SessionState::ClarifyingRepair);
    session.commit_exchange(u, a);
    assert!(session.is_repetition("TELL me about it"));
    assert!(!session.is_repetition("something else"));
}

#[test]
fn test_recent_turns_window() {
    let mut session = Session::new("s1", 5);
    for i in 0..4 {
        let (u, a) = exchange(&format!("t{}", i), Verdict::InScope, SessionState::Responding);
        session.commit_exchange(u, a);
    }
    let recent = session.recent_turns(3);
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[2].text, "reply");
    assert_eq!(session.recent_turns(100).len(), 8);
}

#[test]
fn test_session_end_is_terminal() {
    let mut session = Session::new("s1", 5);
    session.set_state(SessionState::Ended).unwrap();
    assert!(session.set_state(SessionState::AwaitingTurn).is_err());
    assert!(session.set_state(SessionState::Classifying).is_err());
}

#[test]
fn test_cancellation_reverts_from_any_in_flight_state() {
    for state in [
        SessionState::Classifying,
        SessionState::Grounding,
        SessionState::Synthesizing,
        SessionState::Reflecting,
        SessionState::Calibrating,
    ] {
        assert!(state.can_transition(SessionState::AwaitingTurn), "{}", state);
    }
}
