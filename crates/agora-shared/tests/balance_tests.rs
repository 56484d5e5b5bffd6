//! Golden tests for word-budget balance.

use agora_shared::balance::{
    allocate_budgets, assess, word_count, DEFAULT_BALANCE_TOLERANCE,
};

fn words(n: usize) -> String {
    vec!["word"; n].join(" ")
}

/// GOLDEN: within tolerance
#[test]
fn golden_balanced_sections() {
    let a = words(100);
    let b = words(80);
    let report = assess(
        [("Position A", a.as_str()), ("Position B", b.as_str())],
        DEFAULT_BALANCE_TOLERANCE,
        None,
    );
    // (100 - 80) / 100 = 0.2
    assert!((report.imbalance - 0.2).abs() < 1e-6);
    assert!(report.within_tolerance());
    assert!(report.is_acceptable());
}

/// GOLDEN: imbalanced without justification
#[test]
fn golden_imbalanced_unjustified() {
    let a = words(150);
    let b = words(50);
    let report = assess(
        [("Position A", a.as_str()), ("Position B", b.as_str())],
        DEFAULT_BALANCE_TOLERANCE,
        Some("   "),
    );
    assert!(!report.within_tolerance());
    assert!(!report.justified);
    assert!(!report.is_acceptable());
    assert_eq!(report.longest(), Some("Position A"));
}

/// GOLDEN: imbalanced with a stated justification
#[test]
fn golden_imbalanced_justified() {
    let a = words(150);
    let b = words(50);
    let report = assess(
        [("Position A", a.as_str()), ("Position B", b.as_str())],
        DEFAULT_BALANCE_TOLERANCE,
        Some("Position A draws on five sources versus one."),
    );
    assert!(!report.within_tolerance());
    assert!(report.is_acceptable());
}

/// GOLDEN: equal budgets when sourcing is comparable
#[test]
fn golden_equal_budgets() {
    let (budgets, note) = allocate_budgets(&[("A", 3), ("B", 2)], 240);
    assert_eq!(budgets, vec![120, 120]);
    assert!(note.is_none());
}

/// GOLDEN: source volume justifies asymmetry
#[test]
fn golden_asymmetric_budgets() {
    let (budgets, note) = allocate_budgets(&[("Cap spending", 4), ("Raise without conditions", 1)], 240);
    // floor 60 each, spare 120 split 4:1
    assert_eq!(budgets, vec![156, 84]);
    let note = note.expect("asymmetry must be justified");
    assert!(note.contains("\"Cap spending\""));
    assert!(note.contains("4 retrieved sources versus 1"));
}

#[test]
fn test_single_perspective_gets_whole_budget() {
    let (budgets, note) = allocate_budgets(&[("Consensus", 5)], 200);
    assert_eq!(budgets, vec![200]);
    assert!(note.is_none());
}

#[test]
fn test_word_count_ignores_extra_whitespace() {
    assert_eq!(word_count("  one\ttwo \n three  "), 3);
    assert_eq!(word_count(""), 0);
}
