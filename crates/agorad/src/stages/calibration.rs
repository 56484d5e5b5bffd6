//! Uncertainty calibration.
//!
//! The model labels every claim with its reasoning and names the open
//! sub-questions. Guardrails then apply on top of the model's judgment.
//! When the model is unavailable, labels come from evidence signals alone.

use super::json::parse_reply;
use super::{
    complete_with_retry, CalibrationInput, CalibrationReport, CallPolicy, TurnTrace,
    UncertaintyCalibrator,
};
use crate::config::Config;
use crate::gateway::{CompletionOptions, ModelGateway, Prompt, Stage};
use agora_shared::calibration::{
    apply_guardrails, calibrate_from_signals, decide, summarize, ClaimSignals,
};
use agora_shared::limitations::LimitationReason;
use agora_shared::transcript::{Actor, StageOutcome};
use agora_shared::{Claim, ConfidenceLabel};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const STAGE: &str = "calibration";

const CALIBRATION_PROMPT: &str = r#"You calibrate confidence in factual claims about politics.
For each claim choose one label:
verified: stated by at least two independent reliable sources.
likely: supported by a reliable source but not independently confirmed.
uncertain: thinly or unreliably supported, or contradicted.
unverifiable: no source supports it.
Explain each label in one sentence that names the evidence.
Then list the sub-questions the evidence cannot settle yet.
Output JSON only:
{"claims":[{"id":"c1","label":"likely","rationale":"..."}],"unresolved_questions":["..."]}"#;

/// Cap on disclosed open questions
const MAX_UNRESOLVED: usize = 5;

#[derive(Debug, Deserialize)]
struct LabelReply {
    id: String,
    label: String,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct CalibrationReply {
    #[serde(default)]
    claims: Vec<LabelReply>,
    #[serde(default)]
    unresolved_questions: Vec<String>,
}

pub struct LlmCalibrator {
    model: Arc<dyn ModelGateway>,
    config: Arc<Config>,
}

impl LlmCalibrator {
    pub fn new(model: Arc<dyn ModelGateway>, config: Arc<Config>) -> Self {
        Self { model, config }
    }

    fn policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: self.config.timeouts.calibration(),
            backoff: self.config.timeouts.backoff(),
        }
    }

    fn signal_label(&self, claim: &mut Claim, rapidly_evolving: bool) {
        let signals = ClaimSignals::from_claim(claim, Utc::now(), rapidly_evolving);
        let (label, rationale) =
            calibrate_from_signals(&signals, self.config.pipeline.stale_after_days);
        claim.confidence = label;
        claim.rationale = rationale;
    }
}

fn build_user_prompt(input: &CalibrationInput) -> String {
    let now = Utc::now();
    let mut out = format!("Question: {}\n", input.question.trim());
    if input.rapidly_evolving {
        out.push_str("The situation is still developing; older evidence may be stale.\n");
    }
    out.push_str("\nClaims:\n");
    for claim in &input.claims {
        out.push_str(&format!("{}: {}\n", claim.id, claim.qualified_text()));
        if claim.sources.is_empty() {
            out.push_str("  (no supporting source)\n");
        }
        for s in &claim.sources {
            let age = s
                .age_days(now)
                .map(|d| format!("{} days old", d))
                .unwrap_or_else(|| "undated".to_string());
            out.push_str(&format!(
                "  - {} (reliability {:.2}, {}): {}\n",
                s.domain(),
                s.reliability,
                age,
                s.snippet
            ));
        }
    }
    out
}

/// Open questions for the fallback path: what the weakest claims leave open
fn fallback_unresolved(claims: &[Claim]) -> Vec<String> {
    claims
        .iter()
        .filter(|c| c.confidence == ConfidenceLabel::Unverifiable)
        .map(|c| format!("whether \"{}\" is accurate", c.text.trim_end_matches('.')))
        .take(MAX_UNRESOLVED)
        .collect()
}

#[async_trait]
impl UncertaintyCalibrator for LlmCalibrator {
    async fn calibrate(&self, input: &CalibrationInput, trace: &mut TurnTrace) -> CalibrationReport {
        trace.start(Actor::Calibrator, STAGE);
        let mut claims = input.claims.clone();
        let mut limitations = Vec::new();
        let mut unresolved: Vec<String>;
        let outcome;

        let reply = if claims.is_empty() {
            Err("no claims to calibrate".to_string())
        } else {
            let prompt = Prompt::new(Stage::Calibration, CALIBRATION_PROMPT, build_user_prompt(input));
            let options = CompletionOptions::default()
                .with_temperature(self.config.model.critique_temperature)
                .with_max_output(self.config.model.max_output);
            complete_with_retry(
                self.model.as_ref(),
                &prompt,
                &options,
                self.policy(),
                Actor::Calibrator,
                trace,
            )
            .await
            .map_err(|e| e.to_string())
            .and_then(|raw| parse_reply::<CalibrationReply>(&raw))
        };

        match reply {
            Ok(reply) => {
                let labels: HashMap<String, (ConfidenceLabel, String)> = reply
                    .claims
                    .into_iter()
                    .filter_map(|l| {
                        ConfidenceLabel::parse(&l.label).map(|label| (l.id, (label, l.rationale)))
                    })
                    .collect();
                for claim in claims.iter_mut() {
                    match labels.get(&claim.id) {
                        Some((label, rationale)) => {
                            claim.confidence = *label;
                            claim.rationale = if rationale.trim().is_empty() {
                                format!("labelled {} by review", label)
                            } else {
                                rationale.trim().to_string()
                            };
                        }
                        None => {
                            trace.note(format!("{} was not labelled, using evidence signals", claim.id));
                            self.signal_label(claim, input.rapidly_evolving);
                        }
                    }
                }
                unresolved = reply
                    .unresolved_questions
                    .into_iter()
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect();
                unresolved.truncate(MAX_UNRESOLVED);
                outcome = StageOutcome::Ok;
            }
            Err(reason) if input.claims.is_empty() => {
                unresolved = Vec::new();
                outcome = StageOutcome::Skipped;
                trace.note(reason);
            }
            Err(reason) => {
                warn!("Calibration unavailable ({}), labelling from evidence signals", reason);
                for claim in claims.iter_mut() {
                    self.signal_label(claim, input.rapidly_evolving);
                }
                unresolved = fallback_unresolved(&claims);
                limitations.push(LimitationReason::CalibrationDegraded);
                outcome = StageOutcome::degraded(reason);
            }
        }

        for claim in claims.iter_mut() {
            let before = claim.confidence;
            apply_guardrails(claim);
            if claim.confidence != before {
                trace.step(
                    Actor::Calibrator,
                    format!("{} downgraded from {} to {}", claim.id, before, claim.confidence),
                    None,
                );
            }
            trace.step(
                Actor::Calibrator,
                format!("{} {}: {}", claim.id, claim.confidence, claim.rationale),
                Some(claim.confidence.weight()),
            );
        }

        let threshold = self.config.pipeline.min_aggregate_confidence;
        let summary = summarize(&claims, threshold);
        if summary.below_threshold && !claims.is_empty() {
            limitations.push(LimitationReason::LowAggregateConfidence);
        }
        let decision = decide(&summary);
        info!(
            "Calibration: {} claim(s), aggregate {:.2}, decision {:?}",
            claims.len(),
            summary.aggregate,
            decision
        );
        trace.end(Actor::Calibrator, STAGE, outcome);

        CalibrationReport {
            claims,
            unresolved,
            summary,
            decision,
            limitations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FakeModelGateway;
    use agora_shared::calibration::CalibrationDecision;
    use agora_shared::{GatewayError, SourceDocument};

    fn calibrator(fake: FakeModelGateway) -> LlmCalibrator {
        let mut config = Config::default();
        config.timeouts.retry_backoff_ms = 1;
        LlmCalibrator::new(Arc::new(fake), Arc::new(config))
    }

    fn claims() -> Vec<Claim> {
        vec![
            Claim::new("c1", "The deal suspended the limit")
                .with_perspective("A")
                .with_sources(vec![
                    SourceDocument::new("https://apnews.com/a", "x").with_reliability(0.9)
                ]),
            Claim::new("c2", "A discharge petition was drafted").with_perspective("B"),
        ]
    }

    fn input() -> CalibrationInput {
        CalibrationInput {
            question: "debt ceiling".into(),
            claims: claims(),
            rapidly_evolving: false,
        }
    }

    #[tokio::test]
    async fn test_guardrails_override_model() {
        let fake = FakeModelGateway::new().on(
            Stage::Calibration,
            r#"{"claims":[{"id":"c1","label":"verified","rationale":"Wire report."},{"id":"c2","label":"likely","rationale":"Plausible."}],
                "unresolved_questions":["whether the caps hold"]}"#,
        );
        let mut trace = TurnTrace::new();
        let report = calibrator(fake).calibrate(&input(), &mut trace).await;
        // single domain: verified -> likely; no source: -> unverifiable
        assert_eq!(report.claims[0].confidence, ConfidenceLabel::Likely);
        assert!(report.claims[0].rationale.contains("only one source domain"));
        assert_eq!(report.claims[1].confidence, ConfidenceLabel::Unverifiable);
        assert_eq!(report.unresolved, vec!["whether the caps hold".to_string()]);
        assert_eq!(report.decision, CalibrationDecision::AnswerWithHedges);
        // (0.75 + 0.1) / 2 = 0.425 < 0.55
        assert_eq!(report.limitations, vec![LimitationReason::LowAggregateConfidence]);
    }

    #[tokio::test]
    async fn test_fallback_uses_signals() {
        let fake = FakeModelGateway::new().fail(Stage::Calibration, GatewayError::Timeout);
        let mut trace = TurnTrace::new();
        let report = calibrator(fake).calibrate(&input(), &mut trace).await;
        assert_eq!(report.claims[0].confidence, ConfidenceLabel::Likely);
        assert!(report.claims[0].rationale.contains("mean reliability 0.90"));
        assert_eq!(report.claims[1].confidence, ConfidenceLabel::Unverifiable);
        assert!(report.limitations.contains(&LimitationReason::CalibrationDegraded));
        assert_eq!(report.unresolved.len(), 1);
        assert!(report.unresolved[0].contains("discharge petition"));
    }

    #[tokio::test]
    async fn test_no_claims_is_partial_refusal() {
        let fake = FakeModelGateway::new();
        let mut trace = TurnTrace::new();
        let report = calibrator(fake.clone())
            .calibrate(&CalibrationInput::default(), &mut trace)
            .await;
        assert_eq!(report.decision, CalibrationDecision::PartialRefusal);
        assert!(report.limitations.is_empty());
        assert_eq!(fake.total_calls(), 0);
    }
}
