//! Property check tests over hand-built turns.

use agora_shared::claims::{Claim, ConfidenceLabel, Perspective, SourceDocument};
use agora_shared::evaluation::{
    builtin_case, builtin_cases, check_property, evaluate, CaseRun, Exchange, Property,
    PropertyOutcome,
};
use agora_shared::reflection::{CheckSource, DefectCategory, DefectCheck, ReflectionLog, ReflectionPass};
use agora_shared::render::{hedged_claim_text, render_boundary, UNRESOLVED_PREFIX};
use agora_shared::session::SessionState;
use agora_shared::turn::{Classification, Turn, TurnReport, Verdict};

fn words(n: usize) -> String {
    vec!["word"; n].join(" ")
}

fn boundary_exchange(text: &str, rationale: &str) -> Exchange {
    let c = Classification::new(Verdict::OutOfScope, rationale, 0.95);
    let report = TurnReport::new(
        SessionState::BoundaryResponding,
        vec![SessionState::Classifying, SessionState::BoundaryResponding],
    );
    Exchange {
        user: Turn::user(text, c.clone()),
        agent: Turn::agent(render_boundary(&c), report).with_classification(c),
    }
}

fn answer_exchange() -> Exchange {
    let c = Classification::new(Verdict::InScope, "Fiscal negotiation between branches.", 0.9);
    let sourced = Claim::new("c1", "The agreement suspended the limit until 2025")
        .with_sources(vec![SourceDocument::new("https://apnews.com/a", "x").with_reliability(0.8)])
        .with_perspective("Pair the increase with spending limits")
        .with_confidence(ConfidenceLabel::Likely, "one reliable wire report");
    let shaky = Claim::new("c2", "Some members threatened a discharge petition")
        .with_perspective("Raise the limit without conditions")
        .with_confidence(ConfidenceLabel::Unverifiable, "no source");

    let mut a = Perspective::new("Pair the increase with spending limits", "Conditions are leverage.");
    a.narrative = words(100);
    let mut b = Perspective::new("Raise the limit without conditions", "Default risk is unacceptable.");
    b.narrative = words(90);

    let mut report = TurnReport::new(
        SessionState::Responding,
        vec![
            SessionState::Classifying,
            SessionState::Grounding,
            SessionState::Synthesizing,
            SessionState::Reflecting,
            SessionState::Calibrating,
            SessionState::Responding,
        ],
    );
    report.unresolved = vec!["whether the spending caps will hold in later appropriations".into()];
    let mut log = ReflectionLog::new(2);
    log.passes.push(ReflectionPass {
        pass: 1,
        checks: DefectCategory::ALL
            .iter()
            .map(|c| DefectCheck::clean(*c, CheckSource::Structural))
            .collect(),
        revised: false,
    });
    report.reflection = Some(log);

    let text = format!(
        "Overview.\n\n- {}. [1]\n- {}.\n\n- {} {}",
        hedged_claim_text(&sourced),
        hedged_claim_text(&shaky),
        UNRESOLVED_PREFIX,
        report.unresolved[0]
    );
    Exchange {
        user: Turn::user("debt ceiling 2023", c.clone()),
        agent: Turn::agent(text, report)
            .with_classification(c)
            .with_claims(vec![sourced, shaky])
            .with_perspectives(vec![a, b]),
    }
}

#[test]
fn test_weather_then_homework_passes_on_boundary_replies() {
    let case = builtin_case("weather_then_homework").unwrap();
    let run = CaseRun {
        exchanges: vec![
            boundary_exchange("What's the weather like today?", "Weather is not a political topic."),
            boundary_exchange("Can you help me with my homework?", "Homework help is general tutoring."),
        ],
        replay_verdicts: vec![vec![Verdict::OutOfScope, Verdict::OutOfScope]],
    };
    let report = evaluate(&case, &run);
    assert!(report.all_passed(), "{:?}", report.results);
}

#[test]
fn test_debt_ceiling_properties_pass_on_good_answer() {
    let case = builtin_case("debt_ceiling_2023").unwrap();
    let run = CaseRun {
        exchanges: vec![answer_exchange()],
        replay_verdicts: vec![],
    };
    let report = evaluate(&case, &run);
    assert!(report.all_passed(), "{:?}", report.results);
}

#[test]
fn test_unhedged_claim_fails() {
    let mut exchange = answer_exchange();
    exchange.agent.text = exchange.agent.text.replace("I cannot verify this: ", "");
    let outcome = check_property(&Property::HedgedUncertainClaims { turn: 0 }, &CaseRun {
        exchanges: vec![exchange],
        replay_verdicts: vec![],
    });
    match outcome {
        PropertyOutcome::Fail { reason } => assert!(reason.contains("c2")),
        PropertyOutcome::Pass => panic!("unhedged claim must fail"),
    }
}

#[test]
fn test_imbalance_without_justification_fails() {
    let mut exchange = answer_exchange();
    exchange.agent.perspectives[0].narrative = words(200);
    let run = CaseRun {
        exchanges: vec![exchange],
        replay_verdicts: vec![],
    };
    let outcome = check_property(&Property::BalancedPerspectives { turn: 0, tolerance: 0.35 }, &run);
    assert!(!outcome.is_pass());
}

#[test]
fn test_unstable_verdicts_fail() {
    let run = CaseRun {
        exchanges: vec![boundary_exchange("weather?", "Not political.")],
        replay_verdicts: vec![vec![Verdict::Ambiguous]],
    };
    let outcome = check_property(&Property::StableVerdicts { replays: 1 }, &run);
    assert!(!outcome.is_pass());
}

#[test]
fn test_missing_turn_reports_reason() {
    let run = CaseRun::default();
    let outcome = check_property(&Property::RedirectOffered { turn: 3 }, &run);
    assert_eq!(
        outcome,
        PropertyOutcome::fail("turn 3 was not produced (0 exchanges)")
    );
}

#[test]
fn test_builtin_cases_cover_required_scenarios() {
    let ids: Vec<String> = builtin_cases().into_iter().map(|c| c.id).collect();
    for required in ["weather_then_homework", "debt_ceiling_2023", "immigration_debate"] {
        assert!(ids.iter().any(|id| id == required), "missing {}", required);
    }
}

#[test]
fn test_report_wire_format() {
    let case = builtin_case("weather_then_homework").unwrap();
    let report = evaluate(&case, &CaseRun::default());
    let json = serde_json::to_value(&report).unwrap();
    let result = &json["results"]["turn0.redirect_offered"];
    assert_eq!(result["status"], "fail");
    assert!(result["reason"].as_str().unwrap().contains("not produced"));
}
