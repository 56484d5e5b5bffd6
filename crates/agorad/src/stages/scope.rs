//! LLM-backed scope classifier.
//!
//! Decides whether a turn is about political events, policy or the debate
//! around them. Low-certainty verdicts are treated as ambiguous so the
//! conversation asks instead of guessing.

use super::json::parse_reply;
use super::{complete_with_retry, CallPolicy, ScopeClassifier, ScopeInput, TurnTrace};
use crate::config::Config;
use crate::gateway::{CompletionOptions, ModelGateway, Prompt, Stage};
use agora_shared::transcript::{Actor, StageOutcome};
use agora_shared::turn::{Classification, Role, Verdict};
use agora_shared::AgoraError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const STAGE: &str = "classification";

const SYSTEM_PROMPT: &str = r#"You decide whether a message to a political-topics assistant is in scope.
In scope: political events, elections, public policy, legislation, court rulings with political consequences, and the public debate around them.
Out of scope: everything else (weather, homework, recipes, personal advice, coding, entertainment), even when phrased politely.
Ambiguous: the subject cannot be identified, or it could be read either way.
Use the recent conversation to resolve references such as "that bill" or "the rates thing".
Output JSON only:
{"verdict":"in_scope|out_of_scope|ambiguous","rationale":"<one sentence>","certainty":0.0-1.0,"topic":"<2-6 word topic>","redirect_hint":"<a related political angle, or empty>"}"#;

#[derive(Debug, Deserialize)]
struct ClassifierReply {
    verdict: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    certainty: f32,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    redirect_hint: String,
}

pub struct LlmScopeClassifier {
    model: Arc<dyn ModelGateway>,
    config: Arc<Config>,
}

impl LlmScopeClassifier {
    pub fn new(model: Arc<dyn ModelGateway>, config: Arc<Config>) -> Self {
        Self { model, config }
    }

    fn policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: self.config.timeouts.classify(),
            backoff: self.config.timeouts.backoff(),
        }
    }

    /// Turn the model reply into a classification, applying the ambiguity threshold
    fn interpret(&self, reply: ClassifierReply) -> Result<Classification, String> {
        let verdict = Verdict::parse(&reply.verdict)
            .ok_or_else(|| format!("unknown verdict {:?}", reply.verdict))?;
        let rationale = if reply.rationale.trim().is_empty() {
            "The classifier gave no reason.".to_string()
        } else {
            reply.rationale.trim().to_string()
        };
        let threshold = self.config.pipeline.ambiguity_threshold;
        let verdict = if verdict != Verdict::Ambiguous && reply.certainty < threshold {
            let uncertain = AgoraError::ScopeUncertain {
                certainty: reply.certainty,
            };
            debug!("{} below threshold {:.2}, treating {} as ambiguous", uncertain, threshold, verdict);
            Verdict::Ambiguous
        } else {
            verdict
        };
        Ok(Classification::new(verdict, rationale, reply.certainty)
            .with_topic(reply.topic)
            .with_redirect_hint(reply.redirect_hint))
    }
}

pub(crate) fn build_user_prompt(input: &ScopeInput) -> String {
    let mut out = String::new();
    if !input.scope_memory.is_empty() {
        out.push_str("Earlier topics:\n");
        for entry in &input.scope_memory {
            out.push_str(&format!("- {} ({})\n", entry.topic, entry.verdict));
        }
        out.push('\n');
    }
    if !input.recent.is_empty() {
        out.push_str("Recent conversation:\n");
        for (role, text) in &input.recent {
            let who = match role {
                Role::User => "User",
                Role::Agent => "Assistant",
            };
            let line: String = text.chars().take(300).collect();
            out.push_str(&format!("{}: {}\n", who, line.replace('\n', " ")));
        }
        out.push('\n');
    }
    out.push_str(&format!("Message: {}", input.text.trim()));
    out
}

#[async_trait]
impl ScopeClassifier for LlmScopeClassifier {
    async fn classify(&self, input: &ScopeInput, trace: &mut TurnTrace) -> Classification {
        trace.start(Actor::ScopeClassifier, STAGE);
        let prompt = Prompt::new(Stage::Classify, SYSTEM_PROMPT, build_user_prompt(input));
        let options = CompletionOptions::default()
            .with_temperature(self.config.model.critique_temperature)
            .with_max_output(300);

        let reply = complete_with_retry(
            self.model.as_ref(),
            &prompt,
            &options,
            self.policy(),
            Actor::ScopeClassifier,
            trace,
        )
        .await;

        let result = match reply {
            Ok(raw) => parse_reply::<ClassifierReply>(&raw).and_then(|r| self.interpret(r)),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(classification) => {
                trace.step(
                    Actor::ScopeClassifier,
                    format!("{}: {}", classification.verdict, classification.rationale),
                    Some(classification.certainty),
                );
                trace.end(Actor::ScopeClassifier, STAGE, StageOutcome::Ok);
                classification
            }
            Err(reason) => {
                warn!("Scope classifier unavailable: {}", reason);
                trace.end(
                    Actor::ScopeClassifier,
                    STAGE,
                    StageOutcome::degraded(reason.clone()),
                );
                Classification::unavailable(format!(
                    "I could not determine the subject of this message ({}).",
                    reason
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FakeModelGateway;
    use agora_shared::GatewayError;

    fn classifier(fake: FakeModelGateway) -> LlmScopeClassifier {
        let mut config = Config::default();
        config.timeouts.retry_backoff_ms = 1;
        LlmScopeClassifier::new(Arc::new(fake), Arc::new(config))
    }

    fn input(text: &str) -> ScopeInput {
        ScopeInput {
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_out_of_scope_with_hint() {
        let fake = FakeModelGateway::new().on(
            Stage::Classify,
            r#"{"verdict":"out_of_scope","rationale":"Weather is not a political topic.","certainty":0.95,"topic":"weather","redirect_hint":"climate policy debates"}"#,
        );
        let mut trace = TurnTrace::new();
        let c = classifier(fake).classify(&input("weather?"), &mut trace).await;
        assert_eq!(c.verdict, Verdict::OutOfScope);
        assert_eq!(c.topic.as_deref(), Some("weather"));
        assert_eq!(c.redirect_hint.as_deref(), Some("climate policy debates"));
        assert!(!c.is_fallback());
    }

    #[tokio::test]
    async fn test_low_certainty_becomes_ambiguous() {
        let fake = FakeModelGateway::new().on(
            Stage::Classify,
            r#"{"verdict":"in_scope","rationale":"Possibly about interest rate policy.","certainty":0.4}"#,
        );
        let mut trace = TurnTrace::new();
        let c = classifier(fake).classify(&input("the rates thing"), &mut trace).await;
        assert_eq!(c.verdict, Verdict::Ambiguous);
        assert!((c.certainty - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_ambiguous() {
        let fake = FakeModelGateway::new().fail(Stage::Classify, GatewayError::Timeout);
        let mut trace = TurnTrace::new();
        let c = classifier(fake.clone()).classify(&input("debt ceiling"), &mut trace).await;
        assert_eq!(c.verdict, Verdict::Ambiguous);
        assert!(c.is_fallback());
        assert_eq!(fake.call_count(Stage::Classify), 2);
        assert_eq!(trace.transcript().degraded_stages(), vec![STAGE.to_string()]);
    }

    #[tokio::test]
    async fn test_unparseable_verdict_falls_back() {
        let fake = FakeModelGateway::new().on(Stage::Classify, r#"{"verdict":"perhaps"}"#);
        let mut trace = TurnTrace::new();
        let c = classifier(fake).classify(&input("x"), &mut trace).await;
        assert!(c.is_fallback());
    }

    #[test]
    fn test_prompt_ends_with_current_message() {
        let input = ScopeInput {
            text: "And the vote?".into(),
            recent: vec![(Role::User, "Tell me about the farm bill".into())],
            scope_memory: vec![],
        };
        let prompt = build_user_prompt(&input);
        assert!(prompt.contains("User: Tell me about the farm bill"));
        assert!(prompt.ends_with("Message: And the vote?"));
    }
}
