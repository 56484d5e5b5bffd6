//! Word-budget balance across perspective sections.
//!
//! Pure functions with test-locked behavior. Balance is a proportional
//! tolerance on word counts: `(max - min) / max <= tolerance`.

use serde::{Deserialize, Serialize};

/// Default proportional tolerance between the longest and shortest section
pub const DEFAULT_BALANCE_TOLERANCE: f32 = 0.35;

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionCount {
    pub label: String,
    pub words: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub sections: Vec<SectionCount>,
    /// (max - min) / max, 0.0 for fewer than two sections
    pub imbalance: f32,
    pub tolerance: f32,
    /// An explicit asymmetry justification was supplied
    pub justified: bool,
}

impl BalanceReport {
    pub fn within_tolerance(&self) -> bool {
        self.imbalance <= self.tolerance
    }

    /// Balanced, or imbalanced with a stated justification
    pub fn is_acceptable(&self) -> bool {
        self.within_tolerance() || self.justified
    }

    /// Label of the longest section
    pub fn longest(&self) -> Option<&str> {
        self.sections
            .iter()
            .max_by_key(|s| s.words)
            .map(|s| s.label.as_str())
    }
}

/// Measure balance over `(label, text)` sections
pub fn assess<'a, I>(sections: I, tolerance: f32, justification: Option<&str>) -> BalanceReport
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let sections: Vec<SectionCount> = sections
        .into_iter()
        .map(|(label, text)| SectionCount {
            label: label.to_string(),
            words: word_count(text),
        })
        .collect();

    let imbalance = imbalance_ratio(sections.iter().map(|s| s.words));

    BalanceReport {
        sections,
        imbalance,
        tolerance,
        justified: justification.map(|j| !j.trim().is_empty()).unwrap_or(false),
    }
}

/// `(max - min) / max` over word counts
pub fn imbalance_ratio<I: IntoIterator<Item = usize>>(counts: I) -> f32 {
    let counts: Vec<usize> = counts.into_iter().collect();
    if counts.len() < 2 {
        return 0.0;
    }
    let max = counts.iter().copied().max().unwrap_or(0);
    let min = counts.iter().copied().min().unwrap_or(0);
    if max == 0 {
        return 0.0;
    }
    (max - min) as f32 / max as f32
}

/// Per-perspective word budgets.
///
/// Equal split of `total` unless one perspective has at least twice the
/// sources of another, in which case budgets follow source volume (each
/// perspective keeps at least half an equal share). Returns the budgets and
/// the justification when the split is asymmetric.
pub fn allocate_budgets(
    labels_and_sources: &[(&str, usize)],
    total: usize,
) -> (Vec<usize>, Option<String>) {
    let n = labels_and_sources.len();
    if n == 0 {
        return (Vec::new(), None);
    }
    let equal = total / n;
    let max = labels_and_sources.iter().map(|(_, c)| *c).max().unwrap_or(0);
    let min = labels_and_sources.iter().map(|(_, c)| *c).min().unwrap_or(0);

    if n < 2 || max < 2 * min.max(1) {
        return (vec![equal; n], None);
    }

    let floor = equal / 2;
    let spare = total.saturating_sub(floor * n);
    let source_total: usize = labels_and_sources.iter().map(|(_, c)| *c).sum();
    let budgets: Vec<usize> = labels_and_sources
        .iter()
        .map(|(_, c)| floor + spare * c / source_total.max(1))
        .collect();

    let (rich, rich_count) = labels_and_sources
        .iter()
        .max_by_key(|(_, c)| *c)
        .map(|(l, c)| (*l, *c))
        .unwrap_or(("", 0));
    let (thin, thin_count) = labels_and_sources
        .iter()
        .min_by_key(|(_, c)| *c)
        .map(|(l, c)| (*l, *c))
        .unwrap_or(("", 0));

    let note = format!(
        "\"{}\" is covered at greater length because it draws on {} retrieved source{} versus {} for \"{}\".",
        rich,
        rich_count,
        if rich_count == 1 { "" } else { "s" },
        thin_count,
        thin
    );
    (budgets, Some(note))
}

/// Trim `text` to at most `budget` words, cutting at a sentence boundary
/// when one exists inside the budget. A zero budget leaves nothing.
pub fn trim_to_budget(text: &str, budget: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= budget {
        return text.trim().to_string();
    }
    if budget == 0 {
        return String::new();
    }
    let head = &words[..budget];
    let last_sentence_end = head
        .iter()
        .rposition(|w| w.ends_with('.') || w.ends_with('!') || w.ends_with('?'));
    match last_sentence_end {
        Some(i) => head[..=i].join(" "),
        None => format!("{}...", head.join(" ")),
    }
}
