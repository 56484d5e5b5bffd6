//! Perspective synthesis.
//!
//! One model call structures the answer (overview, positions, claims with
//! source references). Section text for each position is then drafted
//! concurrently against a word budget. Position order is alphabetical by
//! label so the phrasing of the question never decides who goes first.

use super::json::parse_reply;
use super::{
    complete_with_retry, format_sources, CallPolicy, Draft, PerspectiveSynthesizer,
    SynthesisInput, TurnTrace,
};
use crate::config::Config;
use crate::gateway::{CompletionOptions, ModelGateway, Prompt, Stage};
use agora_shared::balance::{allocate_budgets, trim_to_budget};
use agora_shared::transcript::{Actor, StageOutcome};
use agora_shared::{Claim, Perspective, SourceDocument};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

const STAGE: &str = "synthesis";

const STRUCTURE_PROMPT: &str = r#"You structure balanced answers about political topics.
Identify the materially distinct positions people hold on the question. Label each position by what it argues (for example "Pair the increase with spending limits"), never by party or group name alone.
If the facts are settled and there is no real disagreement, set contested to false, give a single position and explain why in consensus_reason.
List the factual claims the answer relies on. Attach each claim to the position it supports, or leave perspective empty for background facts. Cite sources by their [number]; never cite a source that does not support the claim, and do not invent facts that no source supports.
Output JSON only:
{"overview":"<2-3 neutral sentences>","contested":true,"consensus_reason":"","perspectives":[{"label":"...","stance":"<one sentence>","source_ids":[1]}],"claims":[{"text":"...","perspective":"<label or empty>","source_ids":[1]}]}"#;

const PARTIAL_GROUNDING_NOTE: &str =
    "\n\nSome searches failed, so these sources are incomplete. Do not fill the gaps from memory; leave unsupported points out or say they could not be checked.";

const SECTION_PROMPT: &str = r#"Write the section of a balanced answer that presents one position, in its strongest fair form and in neutral language.
Attribute arguments to their holders ("supporters argue"), avoid loaded words, and hedge anything the sources do not establish.
Stay within the word budget. Plain prose only, no headings or lists."#;

#[derive(Debug, Deserialize)]
struct PerspectiveReply {
    label: String,
    #[serde(default)]
    stance: String,
    #[serde(default)]
    source_ids: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct ClaimReply {
    text: String,
    #[serde(default)]
    perspective: String,
    #[serde(default)]
    source_ids: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct StructureReply {
    #[serde(default)]
    overview: String,
    #[serde(default = "default_contested")]
    contested: bool,
    #[serde(default)]
    consensus_reason: String,
    #[serde(default)]
    perspectives: Vec<PerspectiveReply>,
    #[serde(default)]
    claims: Vec<ClaimReply>,
}

fn default_contested() -> bool {
    true
}

pub struct LlmSynthesizer {
    model: Arc<dyn ModelGateway>,
    config: Arc<Config>,
}

impl LlmSynthesizer {
    pub fn new(model: Arc<dyn ModelGateway>, config: Arc<Config>) -> Self {
        Self { model, config }
    }

    fn policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: self.config.timeouts.synthesis(),
            backoff: self.config.timeouts.backoff(),
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions::default()
            .with_temperature(self.config.model.temperature)
            .with_max_output(self.config.model.max_output)
    }

    /// Draft every section concurrently. A failed section falls back to the
    /// stance and its claims.
    async fn draft_sections(
        &self,
        question: &str,
        draft: &mut Draft,
        sources: &[SourceDocument],
        trace: &mut TurnTrace,
    ) {
        let policy = self.policy();
        let options = self.options();
        let prompts: Vec<Prompt> = draft
            .perspectives
            .iter()
            .zip(&draft.section_budgets)
            .map(|(p, budget)| {
                let claims: Vec<String> = draft
                    .claims
                    .iter()
                    .filter(|c| c.perspective.as_deref() == Some(p.label.as_str()))
                    .map(|c| format!("- {}", c.text))
                    .collect();
                Prompt::new(
                    Stage::SectionDraft,
                    SECTION_PROMPT,
                    format!(
                        "Question: {}\nPosition: {}\nStance: {}\nWord budget: {}\nClaims:\n{}\n\nSources:\n{}",
                        question,
                        p.label,
                        p.stance,
                        budget,
                        if claims.is_empty() { "(none)".to_string() } else { claims.join("\n") },
                        format_sources(sources)
                    ),
                )
            })
            .collect();

        let model = self.model.as_ref();
        let calls = prompts.iter().map(|prompt| {
            let options = &options;
            async move {
                let mut local = TurnTrace::new();
                let out = complete_with_retry(
                    model,
                    prompt,
                    options,
                    policy,
                    Actor::Synthesizer,
                    &mut local,
                )
                .await;
                (out, !local.transcript().is_empty())
            }
        });
        let results = join_all(calls).await;

        for ((perspective, budget), (result, retried)) in draft
            .perspectives
            .iter_mut()
            .zip(draft.section_budgets.iter())
            .zip(results)
        {
            if retried {
                trace.note(format!("section \"{}\" needed a retry", perspective.label));
            }
            perspective.narrative = match result {
                Ok(text) => trim_to_budget(text.trim(), *budget),
                Err(e) => {
                    warn!("Section draft failed for {:?}: {}", perspective.label, e);
                    trace.note(format!(
                        "section \"{}\" drafted from its claims after {}",
                        perspective.label, e
                    ));
                    let claims: Vec<&str> = draft
                        .claims
                        .iter()
                        .filter(|c| c.perspective.as_deref() == Some(perspective.label.as_str()))
                        .map(|c| c.text.as_str())
                        .collect();
                    fallback_narrative(&perspective.stance, &claims, *budget)
                }
            };
        }
    }
}

fn fallback_narrative(stance: &str, claims: &[&str], budget: usize) -> String {
    let mut text = stance.trim().to_string();
    for claim in claims {
        if !text.is_empty() {
            text.push(' ');
        }
        let claim = claim.trim();
        text.push_str(claim);
        if !claim.ends_with('.') {
            text.push('.');
        }
    }
    trim_to_budget(&text, budget)
}

/// Build the structured draft from the model reply. Ids out of range are
/// dropped; positions are sorted; claims are renumbered in position order.
fn build_draft(reply: StructureReply, sources: &[SourceDocument], total_budget: usize) -> Draft {
    let resolve = |ids: &[usize]| -> Vec<SourceDocument> {
        let mut seen = BTreeSet::new();
        ids.iter()
            .filter(|&&i| i >= 1 && i <= sources.len() && seen.insert(i))
            .map(|&i| sources[i - 1].clone())
            .collect()
    };

    let mut labels_seen = BTreeSet::new();
    let mut perspectives: Vec<(Perspective, BTreeSet<usize>)> = reply
        .perspectives
        .into_iter()
        .filter(|p| !p.label.trim().is_empty())
        .filter(|p| labels_seen.insert(p.label.trim().to_lowercase()))
        .map(|p| {
            let ids: BTreeSet<usize> = p
                .source_ids
                .iter()
                .copied()
                .filter(|&i| i >= 1 && i <= sources.len())
                .collect();
            (Perspective::new(p.label.trim(), p.stance.trim()), ids)
        })
        .collect();
    perspectives.sort_by_key(|(p, _)| p.ordering_key());

    let position_of = |label: &str| {
        perspectives
            .iter()
            .position(|(p, _)| p.label.eq_ignore_ascii_case(label.trim()))
    };

    let mut claims: Vec<(usize, usize, Claim)> = reply
        .claims
        .into_iter()
        .filter(|c| !c.text.trim().is_empty())
        .enumerate()
        .map(|(i, c)| {
            let pos = position_of(&c.perspective);
            let mut claim = Claim::new("", c.text.trim()).with_sources(resolve(&c.source_ids));
            if let Some(p) = pos {
                claim = claim.with_perspective(perspectives[p].0.label.clone());
            }
            (pos.unwrap_or(usize::MAX), i, claim)
        })
        .collect();
    claims.sort_by_key(|(pos, i, _)| (*pos, *i));

    let mut out_claims = Vec::with_capacity(claims.len());
    for (n, (pos, _, mut claim)) in claims.into_iter().enumerate() {
        claim.id = format!("c{}", n + 1);
        if pos != usize::MAX {
            let (perspective, ids) = &mut perspectives[pos];
            perspective.claim_ids.push(claim.id.clone());
            for s in &claim.sources {
                if let Some(i) = sources.iter().position(|d| d.url == s.url) {
                    ids.insert(i + 1);
                }
            }
        }
        out_claims.push(claim);
    }

    let perspectives: Vec<Perspective> = perspectives
        .into_iter()
        .map(|(mut p, ids)| {
            p.source_count = ids.len();
            p
        })
        .collect();

    let counts: Vec<(&str, usize)> = perspectives
        .iter()
        .map(|p| (p.label.as_str(), p.source_count))
        .collect();
    let (section_budgets, asymmetry_note) = allocate_budgets(&counts, total_budget);

    let consensus_note = if !reply.contested && perspectives.len() == 1 {
        let reason = reply.consensus_reason.trim();
        Some(if reason.is_empty() {
            "The retrieved sources describe the same account without material disagreement.".to_string()
        } else {
            reason.to_string()
        })
    } else {
        None
    };

    Draft {
        overview: reply.overview.trim().to_string(),
        contested: reply.contested,
        perspectives,
        section_budgets,
        claims: out_claims,
        consensus_note,
        asymmetry_note,
        degraded: false,
    }
}

fn degraded_draft(question: &str) -> Draft {
    Draft {
        overview: format!(
            "I could not put together a structured analysis of \"{}\" right now.",
            question.trim()
        ),
        contested: true,
        degraded: true,
        ..Default::default()
    }
}

#[async_trait]
impl PerspectiveSynthesizer for LlmSynthesizer {
    async fn synthesize(&self, input: &SynthesisInput, trace: &mut TurnTrace) -> Draft {
        trace.start(Actor::Synthesizer, STAGE);
        let mut user = format!("Question: {}\n\nSources:\n{}", input.question.trim(), format_sources(&input.sources));
        if input.rapidly_evolving {
            user.push_str("\n\nThis situation is still developing; say which facts may change.");
        }
        if input.partial_grounding {
            user.push_str(PARTIAL_GROUNDING_NOTE);
        }
        let prompt = Prompt::new(Stage::Synthesis, STRUCTURE_PROMPT, user);

        let reply = complete_with_retry(
            self.model.as_ref(),
            &prompt,
            &self.options(),
            self.policy(),
            Actor::Synthesizer,
            trace,
        )
        .await;
        let structured = match reply {
            Ok(raw) => parse_reply::<StructureReply>(&raw),
            Err(e) => Err(e.to_string()),
        };

        let mut draft = match structured {
            Ok(reply) => build_draft(reply, &input.sources, self.config.pipeline.section_word_budget),
            Err(reason) => {
                warn!("Synthesis unavailable: {}", reason);
                trace.end(Actor::Synthesizer, STAGE, StageOutcome::degraded(reason));
                return degraded_draft(&input.question);
            }
        };

        for p in &draft.perspectives {
            trace.step(
                Actor::Synthesizer,
                format!("position \"{}\" backed by {} source(s)", p.label, p.source_count),
                None,
            );
        }
        if let Some(note) = &draft.asymmetry_note {
            trace.step(Actor::Synthesizer, note.clone(), None);
        }

        self.draft_sections(&input.question, &mut draft, &input.sources, trace)
            .await;
        info!(
            "Synthesis: {} position(s), {} claim(s)",
            draft.perspectives.len(),
            draft.claims.len()
        );
        trace.end(Actor::Synthesizer, STAGE, StageOutcome::Ok);
        draft
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FakeModelGateway;
    use agora_shared::GatewayError;

    fn sources() -> Vec<SourceDocument> {
        vec![
            SourceDocument::new("https://apnews.com/a", "deal reached"),
            SourceDocument::new("https://cbo.gov/b", "spending caps"),
            SourceDocument::new("https://reuters.com/c", "default risk"),
        ]
    }

    fn synthesizer(fake: FakeModelGateway) -> LlmSynthesizer {
        let mut config = Config::default();
        config.timeouts.retry_backoff_ms = 1;
        config.pipeline.section_word_budget = 100;
        LlmSynthesizer::new(Arc::new(fake), Arc::new(config))
    }

    const STRUCTURE: &str = r#"{"overview":"Lawmakers negotiated.","contested":true,
        "perspectives":[
            {"label":"Raise the limit without conditions","stance":"Default is too risky.","source_ids":[3]},
            {"label":"Pair the increase with spending limits","stance":"Use leverage.","source_ids":[2]}
        ],
        "claims":[
            {"text":"Default would disrupt markets","perspective":"Raise the limit without conditions","source_ids":[3,9]},
            {"text":"The deal capped spending","perspective":"pair the increase with spending limits","source_ids":[2,2]},
            {"text":"Talks lasted weeks","perspective":"","source_ids":[1]}
        ]}"#;

    #[test]
    fn test_build_draft_orders_and_numbers() {
        let reply: StructureReply = serde_json::from_str(STRUCTURE).unwrap();
        let draft = build_draft(reply, &sources(), 100);
        let labels: Vec<&str> = draft.perspectives.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Pair the increase with spending limits", "Raise the limit without conditions"]
        );
        assert_eq!(draft.claims[0].id, "c1");
        assert_eq!(draft.claims[0].text, "The deal capped spending");
        assert_eq!(draft.claims[0].sources.len(), 1);
        assert_eq!(draft.claims[1].sources.len(), 1, "out-of-range id dropped");
        assert!(draft.claims[2].perspective.is_none());
        assert_eq!(draft.perspectives[0].claim_ids, vec!["c1".to_string()]);
        assert_eq!(draft.section_budgets, vec![50, 50]);
        assert!(draft.asymmetry_note.is_none());
        assert!(draft.consensus_note.is_none());
    }

    #[test]
    fn test_consensus_draft() {
        let reply: StructureReply = serde_json::from_str(
            r#"{"overview":"The date is settled.","contested":false,"consensus_reason":"Every source reports the same date.",
                "perspectives":[{"label":"Official record","stance":"The vote took place on June 1."}],"claims":[]}"#,
        )
        .unwrap();
        let draft = build_draft(reply, &sources(), 100);
        assert_eq!(draft.consensus_note.as_deref(), Some("Every source reports the same date."));
        assert_eq!(draft.section_budgets, vec![100]);
    }

    #[tokio::test]
    async fn test_synthesis_drafts_sections_within_budget() {
        let long = vec!["word"; 80].join(" ");
        let fake = FakeModelGateway::new()
            .on(Stage::Synthesis, STRUCTURE)
            .on_matching(Stage::SectionDraft, "Position: Pair", "Supporters argue conditions restrain spending.")
            .on_matching(Stage::SectionDraft, "Position: Raise", long);
        let mut trace = TurnTrace::new();
        let draft = synthesizer(fake.clone())
            .synthesize(
                &SynthesisInput {
                    question: "debt ceiling".into(),
                    sources: sources(),
                    rapidly_evolving: false,
                    partial_grounding: false,
                },
                &mut trace,
            )
            .await;
        assert!(!draft.degraded);
        assert_eq!(draft.perspectives[0].narrative, "Supporters argue conditions restrain spending.");
        assert_eq!(draft.perspectives[1].narrative.split_whitespace().count(), 50);
        assert_eq!(fake.call_count(Stage::SectionDraft), 2);
    }

    #[tokio::test]
    async fn test_section_failure_uses_claims() {
        let fake = FakeModelGateway::new()
            .on(Stage::Synthesis, STRUCTURE)
            .fail(Stage::SectionDraft, GatewayError::Timeout);
        let mut trace = TurnTrace::new();
        let draft = synthesizer(fake)
            .synthesize(
                &SynthesisInput {
                    question: "debt ceiling".into(),
                    sources: sources(),
                    rapidly_evolving: false,
                    partial_grounding: false,
                },
                &mut trace,
            )
            .await;
        assert_eq!(draft.perspectives[0].narrative, "Use leverage. The deal capped spending.");
    }

    #[tokio::test]
    async fn test_partial_grounding_noted_in_prompt() {
        let fake = FakeModelGateway::new()
            .on(Stage::Synthesis, STRUCTURE)
            .on(Stage::SectionDraft, "Supporters make their case.");
        let input = SynthesisInput {
            question: "debt ceiling".into(),
            sources: sources(),
            rapidly_evolving: false,
            partial_grounding: true,
        };
        let mut trace = TurnTrace::new();
        synthesizer(fake.clone()).synthesize(&input, &mut trace).await;

        let prompts = fake.prompts(Stage::Synthesis);
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].user.contains("Some searches failed"));

        let complete = SynthesisInput {
            partial_grounding: false,
            ..input
        };
        let fake = FakeModelGateway::new().on(Stage::Synthesis, STRUCTURE);
        synthesizer(fake.clone()).synthesize(&complete, &mut TurnTrace::new()).await;
        assert!(!fake.prompts(Stage::Synthesis)[0].user.contains("Some searches failed"));
    }

    #[tokio::test]
    async fn test_synthesis_failure_degrades() {
        let fake = FakeModelGateway::new().fail(Stage::Synthesis, GatewayError::RateLimited);
        let mut trace = TurnTrace::new();
        let draft = synthesizer(fake)
            .synthesize(&SynthesisInput::default(), &mut trace)
            .await;
        assert!(draft.degraded);
        assert!(draft.claims.is_empty());
        assert_eq!(trace.transcript().degraded_stages(), vec![STAGE.to_string()]);
    }
}
