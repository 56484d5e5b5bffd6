//! Response rendering.
//!
//! Single source of truth for the text a user sees. Hedges are attached
//! directly to the claim they qualify so they can never drift apart.

use crate::calibration::CalibrationDecision;
use crate::claims::{Claim, ConfidenceLabel, Perspective, SourceDocument};
use crate::limitations::Disclosure;
use crate::turn::{Classification, RepairKind};

/// Opening of every redirect offer
pub const REDIRECT_PREFIX: &str = "If you'd like, I can help with";

/// Opening of every unresolved sub-question line
pub const UNRESOLVED_PREFIX: &str = "Still uncertain:";

/// Opening of the scope limitation statement
pub const LIMITATION_STATEMENT: &str =
    "I can only help with political events, public policy and the debates around them.";

/// In-scope directions offered when nothing more specific is known
pub const DEFAULT_SUGGESTIONS: [&str; 4] = [
    "a current legislative debate",
    "a recent election and what shaped its result",
    "a policy proposal and the trade-offs people argue about",
    "a court ruling with political consequences",
];

/// Prefix and suffix hedge for a confidence label
pub fn hedge_for(label: ConfidenceLabel) -> (&'static str, &'static str) {
    match label {
        ConfidenceLabel::Verified => ("", " (confirmed by independent sources)"),
        ConfidenceLabel::Likely => ("Available evidence suggests: ", ""),
        ConfidenceLabel::Uncertain => (
            "While unconfirmed, some reports indicate: ",
            " (this should be treated with caution)",
        ),
        ConfidenceLabel::Unverifiable => (
            "I cannot verify this: ",
            " (treat this as unconfirmed)",
        ),
    }
}

/// Claim text with its hedge attached
pub fn hedged_claim_text(claim: &Claim) -> String {
    let (prefix, suffix) = hedge_for(claim.confidence);
    format!("{}{}{}", prefix, claim.qualified_text(), suffix)
}

/// Numbered source list in order of first appearance
#[derive(Debug, Default)]
pub struct SourceIndex {
    entries: Vec<SourceDocument>,
}

impl SourceIndex {
    pub fn number_of(&mut self, doc: &SourceDocument) -> usize {
        let key = doc.canonical_url();
        if let Some(pos) = self.entries.iter().position(|d| d.canonical_url() == key) {
            return pos + 1;
        }
        self.entries.push(doc.clone());
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::from("Sources:");
        for (i, doc) in self.entries.iter().enumerate() {
            let title = if doc.title.trim().is_empty() {
                doc.domain()
            } else {
                doc.title.trim().to_string()
            };
            out.push_str(&format!("\n[{}] {} ({})", i + 1, title, doc.url));
        }
        out
    }
}

/// One claim as a bullet line with source markers
pub fn render_claim(claim: &Claim, index: &mut SourceIndex) -> String {
    let markers: String = claim
        .sources
        .iter()
        .map(|s| format!("[{}]", index.number_of(s)))
        .collect();
    if markers.is_empty() {
        format!("- {}.", hedged_claim_text(claim))
    } else {
        format!("- {}. {}", hedged_claim_text(claim), markers)
    }
}

/// Everything needed to render a full answer
#[derive(Debug, Clone)]
pub struct AnswerView<'a> {
    pub overview: &'a str,
    pub perspectives: &'a [Perspective],
    pub claims: &'a [Claim],
    pub asymmetry_note: Option<&'a str>,
    /// Reasoning for presenting a single perspective
    pub consensus_note: Option<&'a str>,
    pub unresolved: &'a [String],
    pub disclosure: Option<&'a Disclosure>,
    pub decision: CalibrationDecision,
    pub returned_to_scope: bool,
}

pub fn render_answer(view: &AnswerView<'_>) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut index = SourceIndex::default();

    if view.returned_to_scope {
        blocks.push("Turning to your political question:".to_string());
    }
    if view.decision == CalibrationDecision::PartialRefusal {
        blocks.push(
            "I could not confirm the facts behind this question, so I am only sharing what each position holds and how well it is supported."
                .to_string(),
        );
    }
    if !view.overview.trim().is_empty() {
        blocks.push(view.overview.trim().to_string());
    }

    for perspective in view.perspectives {
        let mut block = format!("**{}**: {}", perspective.label, perspective.stance.trim());
        if !perspective.narrative.trim().is_empty() {
            block.push('\n');
            block.push_str(perspective.narrative.trim());
        }
        for claim in view
            .claims
            .iter()
            .filter(|c| c.perspective.as_deref() == Some(perspective.label.as_str()))
        {
            block.push('\n');
            block.push_str(&render_claim(claim, &mut index));
        }
        blocks.push(block);
    }

    let unattached: Vec<&Claim> = view
        .claims
        .iter()
        .filter(|c| {
            c.perspective
                .as_deref()
                .map(|l| !view.perspectives.iter().any(|p| p.label == l))
                .unwrap_or(true)
        })
        .collect();
    if !unattached.is_empty() {
        let mut block = String::from("Other points raised:");
        for claim in unattached {
            block.push('\n');
            block.push_str(&render_claim(claim, &mut index));
        }
        blocks.push(block);
    }

    if let Some(note) = view.consensus_note {
        blocks.push(format!("Why a single perspective: {}", note.trim()));
    }
    if let Some(note) = view.asymmetry_note {
        blocks.push(format!("On coverage: {}", note.trim()));
    }
    if !view.unresolved.is_empty() {
        let lines: Vec<String> = view
            .unresolved
            .iter()
            .map(|q| format!("- {} {}", UNRESOLVED_PREFIX, q.trim()))
            .collect();
        blocks.push(format!("Open questions:\n{}", lines.join("\n")));
    }
    if !index.is_empty() {
        blocks.push(index.render());
    }
    if let Some(disclosure) = view.disclosure {
        blocks.push(disclosure.render());
    }

    blocks.join("\n\n")
}

fn suggestion_sentence(suggestions: &[String]) -> String {
    match suggestions.len() {
        0 => String::new(),
        1 => suggestions[0].clone(),
        n => format!(
            "{}, or {}",
            suggestions[..n - 1].join(", "),
            suggestions[n - 1]
        ),
    }
}

/// Suggested directions: the classifier's hint first, then defaults
pub fn suggestions(classification: &Classification, limit: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(hint) = &classification.redirect_hint {
        out.push(hint.clone());
    }
    for s in DEFAULT_SUGGESTIONS {
        if out.len() >= limit {
            break;
        }
        out.push(s.to_string());
    }
    out.truncate(limit);
    out
}

/// Out-of-scope reply: limitation, one-sentence reason, redirect offer
pub fn render_boundary(classification: &Classification) -> String {
    let offers = suggestions(classification, 2);
    format!(
        "{} {} {} {}.",
        LIMITATION_STATEMENT,
        classification.rationale_sentence(),
        REDIRECT_PREFIX,
        suggestion_sentence(&offers)
    )
}

/// Clarifying reply for ambiguous or unclassifiable turns
pub fn render_clarification(classification: &Classification, kind: RepairKind) -> String {
    match kind {
        RepairKind::Clarify => {
            let offers = suggestions(classification, 2);
            format!(
                "I want to make sure I answer the question you are asking. {} Could you tell me which political angle you have in mind? {} {}.",
                classification.rationale_sentence(),
                REDIRECT_PREFIX,
                suggestion_sentence(&offers)
            )
        }
        RepairKind::Proactive => {
            let offers = suggestions(classification, 3);
            let numbered: Vec<String> = offers
                .iter()
                .enumerate()
                .map(|(i, s)| format!("{}) {}", i + 1, s))
                .collect();
            format!(
                "I have not been able to pin down what you are looking for over the last few messages, so let me ask directly: which of these is closest to your question? {}. Or name the political event or policy you have in mind and I will start there.",
                numbered.join("; ")
            )
        }
        RepairKind::Bounded => format!(
            "I could not fully process that request just now. {} Could you rephrase it, or ask about a specific political event or policy? {} {}.",
            LIMITATION_STATEMENT,
            REDIRECT_PREFIX,
            suggestion_sentence(&suggestions(classification, 2))
        ),
    }
}
