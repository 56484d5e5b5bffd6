//! Bias reflection.
//!
//! Each pass runs structural checks (section balance, one-sided omission)
//! and a model critique (loaded language, missing hedges, omission). Defects
//! trigger a revision, at most K revisions per turn. Revisions may rewrite
//! section text and add claim qualifiers; they never touch claim sources.

use super::json::parse_reply;
use super::{
    complete_with_retry, BiasReflector, CallPolicy, Draft, ReflectionInput, ReflectionOutcome,
    TurnTrace,
};
use crate::config::Config;
use crate::gateway::{CompletionOptions, ModelGateway, Prompt, Stage};
use agora_shared::balance::{assess, trim_to_budget, word_count};
use agora_shared::limitations::LimitationReason;
use agora_shared::reflection::{
    CheckSource, DefectCategory, DefectCheck, ReflectionLog, ReflectionPass,
};
use agora_shared::transcript::{Actor, StageOutcome};
use agora_shared::AgoraError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

const STAGE: &str = "reflection";

const CRITIQUE_PROMPT: &str = r#"You review a draft answer about a political topic for bias. Check three things:
loaded_language: emotionally charged or partisan wording in any section.
missing_hedge: speculation or contested facts stated as certain.
one_sided_omission: a significant position or key counter-argument left out.
Be strict but concrete: report a defect only when you can quote or name it.
Output JSON only:
{"loaded_language":{"found":false,"detail":""},"missing_hedge":{"found":false,"detail":""},"one_sided_omission":{"found":false,"detail":""}}"#;

const REVISION_PROMPT: &str = r#"Revise the draft to fix the listed defects.
Rewrite section text only: keep every position label, keep each section within its word budget, and keep the sections close in length.
To hedge a claim, give it a short qualifier instead of rewriting it. Do not add, remove or re-source claims.
Output JSON only:
{"sections":[{"label":"...","narrative":"..."}],"qualifiers":[{"claim_id":"c1","qualifier":"..."}]}"#;

#[derive(Debug, Default, Deserialize)]
struct Finding {
    #[serde(default)]
    found: bool,
    #[serde(default)]
    detail: String,
}

#[derive(Debug, Deserialize)]
struct CritiqueReply {
    #[serde(default)]
    loaded_language: Finding,
    #[serde(default)]
    missing_hedge: Finding,
    #[serde(default)]
    one_sided_omission: Finding,
}

#[derive(Debug, Deserialize)]
struct SectionRevision {
    label: String,
    narrative: String,
}

#[derive(Debug, Deserialize)]
struct QualifierRevision {
    claim_id: String,
    qualifier: String,
}

#[derive(Debug, Deserialize)]
struct RevisionReply {
    #[serde(default)]
    sections: Vec<SectionRevision>,
    #[serde(default)]
    qualifiers: Vec<QualifierRevision>,
}

pub struct LlmReflector {
    model: Arc<dyn ModelGateway>,
    config: Arc<Config>,
}

impl LlmReflector {
    pub fn new(model: Arc<dyn ModelGateway>, config: Arc<Config>) -> Self {
        Self { model, config }
    }

    fn policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: self.config.timeouts.reflection(),
            backoff: self.config.timeouts.backoff(),
        }
    }

    /// Checks computed from the draft itself
    fn structural_checks(&self, draft: &Draft) -> Vec<DefectCheck> {
        let mut checks = Vec::new();
        let balance = assess(
            draft.section_texts(),
            self.config.pipeline.balance_tolerance,
            draft.asymmetry_note.as_deref(),
        );
        checks.push(if balance.is_acceptable() {
            DefectCheck::clean(DefectCategory::WordBudgetImbalance, CheckSource::Structural)
        } else {
            DefectCheck::found(
                DefectCategory::WordBudgetImbalance,
                CheckSource::Structural,
                format!(
                    "\"{}\" is {:.0}% longer than the shortest section",
                    balance.longest().unwrap_or_default(),
                    balance.imbalance * 100.0
                ),
            )
        });
        if draft.contested && draft.perspectives.len() < 2 && !draft.degraded {
            checks.push(DefectCheck::found(
                DefectCategory::OneSidedOmission,
                CheckSource::Structural,
                format!(
                    "contested question presented with {} position(s)",
                    draft.perspectives.len()
                ),
            ));
        }
        checks
    }

    async fn critique(
        &self,
        question: &str,
        draft: &Draft,
        trace: &mut TurnTrace,
    ) -> Result<Vec<DefectCheck>, String> {
        let prompt = Prompt::new(Stage::Critique, CRITIQUE_PROMPT, render_draft(question, draft));
        let options = CompletionOptions::default()
            .with_temperature(self.config.model.critique_temperature)
            .with_max_output(500);
        let raw = complete_with_retry(
            self.model.as_ref(),
            &prompt,
            &options,
            self.policy(),
            Actor::Reflector,
            trace,
        )
        .await
        .map_err(|e| e.to_string())?;
        let reply: CritiqueReply = parse_reply(&raw)?;
        Ok([
            (DefectCategory::LoadedLanguage, reply.loaded_language),
            (DefectCategory::MissingHedge, reply.missing_hedge),
            (DefectCategory::OneSidedOmission, reply.one_sided_omission),
        ]
        .into_iter()
        .map(|(category, f)| {
            if f.found {
                DefectCheck::found(category, CheckSource::Critique, f.detail)
            } else {
                DefectCheck::clean(category, CheckSource::Critique)
            }
        })
        .collect())
    }

    async fn revise(
        &self,
        question: &str,
        draft: &mut Draft,
        defects: &[DefectCheck],
        trace: &mut TurnTrace,
    ) {
        let defect_lines: Vec<String> = defects
            .iter()
            .map(|d| format!("- {}: {}", d.category, d.detail))
            .collect();
        let user = format!(
            "{}\n\nDefects:\n{}",
            render_draft(question, draft),
            defect_lines.join("\n")
        );
        let prompt = Prompt::new(Stage::Revision, REVISION_PROMPT, user);
        let options = CompletionOptions::default()
            .with_temperature(self.config.model.temperature)
            .with_max_output(self.config.model.max_output);
        let reply = complete_with_retry(
            self.model.as_ref(),
            &prompt,
            &options,
            self.policy(),
            Actor::Reflector,
            trace,
        )
        .await;

        match reply.map_err(|e| e.to_string()).and_then(|raw| parse_reply::<RevisionReply>(&raw)) {
            Ok(revision) => apply_revision(draft, revision),
            Err(reason) => {
                warn!("Revision unavailable ({}), rebalancing sections", reason);
                trace.note(format!("revision unavailable ({}), sections trimmed to balance", reason));
                rebalance(draft, self.config.pipeline.balance_tolerance);
            }
        }
    }
}

/// Draft as the critic sees it
fn render_draft(question: &str, draft: &Draft) -> String {
    let mut out = format!("Question: {}\n\nOverview: {}\n", question.trim(), draft.overview);
    for (p, budget) in draft.perspectives.iter().zip(&draft.section_budgets) {
        out.push_str(&format!(
            "\n## {} (budget {} words, {} used)\n{}\n",
            p.label,
            budget,
            word_count(&p.narrative),
            p.narrative
        ));
    }
    if !draft.claims.is_empty() {
        out.push_str("\nClaims:\n");
        for c in &draft.claims {
            out.push_str(&format!(
                "- {} [{}]: {}\n",
                c.id,
                c.perspective.as_deref().unwrap_or("background"),
                c.qualified_text()
            ));
        }
    }
    out
}

/// Apply section rewrites and qualifiers. Labels, claims and sources are
/// fixed; rewrites are held to the section budget.
fn apply_revision(draft: &mut Draft, revision: RevisionReply) {
    for section in revision.sections {
        let slot = draft
            .perspectives
            .iter()
            .position(|p| p.label.eq_ignore_ascii_case(section.label.trim()));
        if let Some(i) = slot {
            let budget = draft.section_budgets.get(i).copied().unwrap_or(usize::MAX);
            draft.perspectives[i].narrative = trim_to_budget(section.narrative.trim(), budget);
        }
    }
    for q in revision.qualifiers {
        if let Some(claim) = draft.claims.iter_mut().find(|c| c.id == q.claim_id) {
            if !q.qualifier.trim().is_empty() {
                claim.qualifier = Some(q.qualifier.trim().to_string());
            }
        }
    }
}

/// Deterministic fallback: trim long sections so the imbalance ratio fits
/// the tolerance
fn rebalance(draft: &mut Draft, tolerance: f32) {
    let shortest = draft
        .perspectives
        .iter()
        .map(|p| word_count(&p.narrative))
        .min()
        .unwrap_or(0);
    if shortest == 0 {
        return;
    }
    let allowed = ((shortest as f32) / (1.0 - tolerance).max(0.01)).floor() as usize;
    for p in draft.perspectives.iter_mut() {
        if word_count(&p.narrative) > allowed {
            p.narrative = trim_to_budget(&p.narrative, allowed);
        }
    }
}

fn ceiling_check(log: &ReflectionLog) -> Result<(), AgoraError> {
    if log.ceiling_reached {
        Err(AgoraError::BiasCeilingReached {
            passes: log.revisions,
        })
    } else {
        Ok(())
    }
}

#[async_trait]
impl BiasReflector for LlmReflector {
    async fn reflect(
        &self,
        mut draft: Draft,
        input: &ReflectionInput,
        trace: &mut TurnTrace,
    ) -> ReflectionOutcome {
        trace.start(Actor::Reflector, STAGE);
        let max_revisions = self.config.pipeline.max_revisions;
        let mut log = ReflectionLog::new(max_revisions);
        let mut critique_failed = false;

        loop {
            let pass = log.passes.len() as u8 + 1;
            let mut checks = self.structural_checks(&draft);
            match self.critique(&input.question, &draft, trace).await {
                Ok(found) => checks.extend(found),
                Err(reason) => {
                    warn!("Critique unavailable on pass {}: {}", pass, reason);
                    critique_failed = true;
                    for category in [
                        DefectCategory::LoadedLanguage,
                        DefectCategory::MissingHedge,
                    ] {
                        checks.push(DefectCheck::clean(category, CheckSource::Unavailable));
                    }
                }
            }

            let defects: Vec<DefectCheck> = checks.iter().filter(|c| c.found).cloned().collect();
            trace.step(
                Actor::Reflector,
                if defects.is_empty() {
                    format!("pass {}: no defects", pass)
                } else {
                    let names: Vec<&str> = defects.iter().map(|d| d.category.as_str()).collect();
                    format!("pass {}: {}", pass, names.join(", "))
                },
                None,
            );

            let clean = defects.is_empty();
            let can_revise = log.revisions < max_revisions;
            log.passes.push(ReflectionPass {
                pass,
                checks,
                revised: !clean && can_revise,
            });

            if clean {
                break;
            }
            if !can_revise {
                log.ceiling_reached = true;
                break;
            }
            self.revise(&input.question, &mut draft, &defects, trace).await;
            log.revisions += 1;
        }

        let mut limitations = Vec::new();
        if critique_failed {
            limitations.push(LimitationReason::CritiqueUnavailable);
        }
        let outcome = match ceiling_check(&log) {
            Ok(()) => StageOutcome::Ok,
            Err(e) => {
                warn!("{}", e);
                limitations.push(LimitationReason::BiasCeilingReached);
                StageOutcome::degraded(e.to_string())
            }
        };
        let outcome = if critique_failed && !outcome.is_degraded() {
            StageOutcome::degraded("critique unavailable, structural checks only")
        } else {
            outcome
        };
        info!(
            "Reflection: {} pass(es), {} revision(s), ceiling reached: {}",
            log.passes.len(),
            log.revisions,
            log.ceiling_reached
        );
        trace.end(Actor::Reflector, STAGE, outcome);

        ReflectionOutcome {
            draft,
            log,
            limitations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FakeModelGateway;
    use agora_shared::{Claim, GatewayError, Perspective, SourceDocument};

    const CLEAN: &str = r#"{"loaded_language":{"found":false},"missing_hedge":{"found":false},"one_sided_omission":{"found":false}}"#;
    const LOADED: &str = r#"{"loaded_language":{"found":true,"detail":"\"reckless\" in section 2"},"missing_hedge":{"found":false},"one_sided_omission":{"found":false}}"#;

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    fn draft() -> Draft {
        let mut a = Perspective::new("Cap spending first", "Leverage matters.");
        a.narrative = words(100);
        let mut b = Perspective::new("Raise without conditions", "Default is reckless.");
        b.narrative = words(90);
        Draft {
            overview: "Overview.".into(),
            contested: true,
            perspectives: vec![a, b],
            section_budgets: vec![120, 120],
            claims: vec![Claim::new("c1", "The deal capped spending")
                .with_sources(vec![SourceDocument::new("https://cbo.gov/a", "x")])
                .with_perspective("Cap spending first")],
            ..Default::default()
        }
    }

    fn reflector(fake: FakeModelGateway, max_revisions: u8) -> LlmReflector {
        let mut config = Config::default();
        config.timeouts.retry_backoff_ms = 1;
        config.pipeline.max_revisions = max_revisions;
        LlmReflector::new(Arc::new(fake), Arc::new(config))
    }

    fn input() -> ReflectionInput {
        ReflectionInput {
            question: "debt ceiling".into(),
        }
    }

    #[tokio::test]
    async fn test_clean_draft_single_pass() {
        let fake = FakeModelGateway::new().on(Stage::Critique, CLEAN);
        let mut trace = TurnTrace::new();
        let out = reflector(fake.clone(), 2).reflect(draft(), &input(), &mut trace).await;
        assert_eq!(out.log.passes.len(), 1);
        assert_eq!(out.log.revisions, 0);
        assert!(!out.log.ceiling_reached);
        assert_eq!(out.log.evaluated_categories().len(), 4);
        assert!(out.limitations.is_empty());
        assert_eq!(fake.call_count(Stage::Revision), 0);
    }

    #[tokio::test]
    async fn test_revision_then_clean() {
        let revised = format!("Supporters argue {}", words(88));
        let reply = serde_json::json!({
            "sections": [{"label": "raise without conditions", "narrative": revised.clone()}],
            "qualifiers": [{"claim_id": "c1", "qualifier": "according to CBO estimates"}]
        });
        let fake = FakeModelGateway::new()
            .sequence(Stage::Critique, vec![Ok(LOADED.into()), Ok(CLEAN.into())])
            .on(Stage::Revision, reply.to_string());
        let mut trace = TurnTrace::new();
        let out = reflector(fake, 2).reflect(draft(), &input(), &mut trace).await;
        assert_eq!(out.log.revisions, 1);
        assert_eq!(out.log.passes.len(), 2);
        assert!(out.log.passes[0].revised);
        assert_eq!(out.draft.perspectives[1].narrative, revised);
        let claim = &out.draft.claims[0];
        assert_eq!(claim.qualifier.as_deref(), Some("according to CBO estimates"));
        assert_eq!(claim.sources.len(), 1, "sources survive revision");
        assert_eq!(out.draft.perspectives.len(), 2);
    }

    #[tokio::test]
    async fn test_pathological_critic_stops_at_ceiling() {
        let fake = FakeModelGateway::new()
            .on(Stage::Critique, LOADED)
            .on(Stage::Revision, r#"{"sections":[],"qualifiers":[]}"#);
        let mut trace = TurnTrace::new();
        let out = reflector(fake.clone(), 2).reflect(draft(), &input(), &mut trace).await;
        assert_eq!(out.log.revisions, 2);
        assert_eq!(out.log.passes.len(), 3);
        assert!(out.log.ceiling_reached);
        assert!(!out.log.passes[2].revised);
        assert_eq!(out.limitations, vec![LimitationReason::BiasCeilingReached]);
        assert_eq!(fake.call_count(Stage::Revision), 2);
        assert_eq!(out.log.open_defects(), vec![DefectCategory::LoadedLanguage]);
    }

    #[tokio::test]
    async fn test_critique_unavailable_keeps_structural_checks() {
        let fake = FakeModelGateway::new().fail(Stage::Critique, GatewayError::Timeout);
        let mut trace = TurnTrace::new();
        let out = reflector(fake, 2).reflect(draft(), &input(), &mut trace).await;
        assert_eq!(out.limitations, vec![LimitationReason::CritiqueUnavailable]);
        assert_eq!(
            out.log.evaluated_categories(),
            vec![DefectCategory::WordBudgetImbalance]
        );
    }

    #[tokio::test]
    async fn test_revision_failure_rebalances() {
        let mut d = draft();
        d.perspectives[0].narrative = "Short one. ".repeat(30);
        d.perspectives[1].narrative = words(20) + ".";
        let fake = FakeModelGateway::new()
            .on(Stage::Critique, CLEAN)
            .fail(Stage::Revision, GatewayError::ServiceError("500".into()));
        let mut trace = TurnTrace::new();
        let out = reflector(fake, 2).reflect(d, &input(), &mut trace).await;
        // 60 vs 20 words is out of tolerance; trimming brings it within
        assert_eq!(out.log.revisions, 1);
        assert!(!out.log.ceiling_reached);
        assert!(word_count(&out.draft.perspectives[0].narrative) <= 30);
    }

    #[test]
    fn test_zero_ceiling_never_revises() {
        let log = ReflectionLog {
            ceiling_reached: true,
            ..ReflectionLog::new(0)
        };
        assert!(matches!(
            ceiling_check(&log),
            Err(AgoraError::BiasCeilingReached { passes: 0 })
        ));
    }
}
