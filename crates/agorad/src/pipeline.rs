//! Response pipeline.
//!
//! Sequences the stages for one turn:
//! classify -> route -> (ground -> synthesize -> reflect -> calibrate) -> render
//! and commits the exchange through the conversation manager. Stages never
//! fail a turn; their limitations are collected and disclosed in the reply.

use crate::config::Config;
use crate::conversation::{route, scope_input, ConversationManager, Route, TurnGuard};
use crate::gateway::{ModelGateway, RetrievalGateway};
use crate::stages::{
    BiasReflector, CalibrationInput, GroundingAgent, GroundingInput, LlmCalibrator,
    LlmGroundingAgent, LlmReflector, LlmScopeClassifier, LlmSynthesizer, PerspectiveSynthesizer,
    ReflectionInput, ScopeClassifier, SynthesisInput, TurnTrace, UncertaintyCalibrator,
};
use agora_shared::limitations::{Disclosure, LimitationContext, LimitationReason};
use agora_shared::render::{render_answer, render_boundary, render_clarification, AnswerView};
use agora_shared::transcript::Actor;
use agora_shared::turn::{Classification, RepairKind, TurnReport};
use agora_shared::{AgoraError, SessionState, Turn};
use std::sync::Arc;
use tracing::{debug, info};

/// The five reasoning stages, injectable for tests and offline runs
pub struct Stages {
    pub classifier: Arc<dyn ScopeClassifier>,
    pub grounding: Arc<dyn GroundingAgent>,
    pub synthesizer: Arc<dyn PerspectiveSynthesizer>,
    pub reflector: Arc<dyn BiasReflector>,
    pub calibrator: Arc<dyn UncertaintyCalibrator>,
}

impl Stages {
    /// LLM-backed stages over the given gateways
    pub fn llm(
        config: Arc<Config>,
        model: Arc<dyn ModelGateway>,
        retrieval: Arc<dyn RetrievalGateway>,
    ) -> Self {
        Self {
            classifier: Arc::new(LlmScopeClassifier::new(model.clone(), config.clone())),
            grounding: Arc::new(LlmGroundingAgent::new(model.clone(), retrieval, config.clone())),
            synthesizer: Arc::new(LlmSynthesizer::new(model.clone(), config.clone())),
            reflector: Arc::new(LlmReflector::new(model.clone(), config.clone())),
            calibrator: Arc::new(LlmCalibrator::new(model, config)),
        }
    }
}

pub struct ResponsePipeline {
    config: Arc<Config>,
    stages: Stages,
    conversations: Arc<ConversationManager>,
}

impl ResponsePipeline {
    pub fn new(
        config: Arc<Config>,
        model: Arc<dyn ModelGateway>,
        retrieval: Arc<dyn RetrievalGateway>,
    ) -> Self {
        let stages = Stages::llm(config.clone(), model, retrieval);
        Self::with_stages(config, stages)
    }

    pub fn with_stages(config: Arc<Config>, stages: Stages) -> Self {
        let conversations = Arc::new(ConversationManager::new(
            config.pipeline.scope_memory_window,
            config.server.ended_sessions_retained,
        ));
        Self {
            config,
            stages,
            conversations,
        }
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process one user message and return the agent turn.
    ///
    /// Turns on the same session queue behind each other. Dropping the
    /// returned future before it completes leaves the session unchanged.
    /// Errors are limited to session misuse (ended session) and internal
    /// invariant breaks; gateway failures degrade the reply instead.
    pub async fn handle_turn(&self, session_id: &str, text: &str) -> Result<Turn, AgoraError> {
        let mut guard = self.conversations.begin_turn(session_id).await?;
        let mut trace = TurnTrace::new();
        debug!("Session {} message: {}", session_id, preview(text, 80));

        let input = scope_input(guard.session(), text, self.config.pipeline.history_window);
        let classification = self.stages.classifier.classify(&input, &mut trace).await;
        let next = route(guard.session(), &classification, text);
        let returned_to_scope = guard
            .session()
            .scope_memory()
            .is_return_to_scope(classification.verdict);
        info!(
            "Session {}: {} (certainty {:.2}) -> {:?}",
            session_id, classification.verdict, classification.certainty, next
        );

        let agent = match next {
            Route::Boundary => {
                guard.advance(SessionState::BoundaryResponding)?;
                let report = self.report(&guard, Vec::new());
                Turn::agent(render_boundary(&classification), report)
            }
            Route::Repair(kind) => {
                guard.advance(SessionState::ClarifyingRepair)?;
                let limitations = if kind == RepairKind::Bounded {
                    vec![LimitationReason::ClassifierUnavailable]
                } else {
                    Vec::new()
                };
                if kind == RepairKind::Proactive {
                    trace.step(
                        Actor::Conversation,
                        "repeated ambiguity, asking a direct clarifying question",
                        None,
                    );
                }
                let mut report = self.report(&guard, limitations);
                report.repair = Some(kind);
                Turn::agent(render_clarification(&classification, kind), report)
            }
            Route::Answer => {
                self.answer(&mut guard, text, &classification, returned_to_scope, &mut trace)
                    .await?
            }
        };

        let mut agent = agent.with_classification(classification.clone());
        if let Some(report) = agent.report.as_mut() {
            report.states = guard.path();
            report.transcript = trace.into_transcript();
        }
        guard.commit(Turn::user(text, classification), agent.clone())?;
        Ok(agent)
    }

    fn report(&self, guard: &TurnGuard, limitations: Vec<LimitationReason>) -> TurnReport {
        let mut report = TurnReport::new(guard.state(), guard.path());
        report.limitations = limitations;
        report
    }

    async fn answer(
        &self,
        guard: &mut TurnGuard,
        question: &str,
        classification: &Classification,
        returned_to_scope: bool,
        trace: &mut TurnTrace,
    ) -> Result<Turn, AgoraError> {
        let stages = &self.stages;

        guard.advance(SessionState::Grounding)?;
        let grounding = stages
            .grounding
            .ground(
                &GroundingInput {
                    question: question.to_string(),
                    topic: classification.topic.clone(),
                },
                trace,
            )
            .await;

        guard.advance(SessionState::Synthesizing)?;
        let draft = stages
            .synthesizer
            .synthesize(
                &SynthesisInput {
                    question: question.to_string(),
                    sources: grounding.sources.clone(),
                    rapidly_evolving: grounding.rapidly_evolving,
                    partial_grounding: grounding
                        .limitations
                        .contains(&LimitationReason::PartialGrounding),
                },
                trace,
            )
            .await;
        let synthesis_degraded = draft.degraded;

        guard.advance(SessionState::Reflecting)?;
        let reflection = stages
            .reflector
            .reflect(
                draft,
                &ReflectionInput {
                    question: question.to_string(),
                },
                trace,
            )
            .await;

        guard.advance(SessionState::Calibrating)?;
        let calibration = stages
            .calibrator
            .calibrate(
                &CalibrationInput {
                    question: question.to_string(),
                    claims: reflection.draft.claims.clone(),
                    rapidly_evolving: grounding.rapidly_evolving,
                },
                trace,
            )
            .await;

        guard.advance(SessionState::Responding)?;

        let mut limitations = grounding.limitations.clone();
        if synthesis_degraded {
            limitations.push(LimitationReason::SynthesisDegraded);
        }
        limitations.extend(reflection.limitations.iter().copied());
        limitations.extend(calibration.limitations.iter().copied());

        let context = LimitationContext {
            queries: grounding.queries.len(),
            failed_queries: grounding.failed_queries,
            revisions: reflection.log.revisions,
            open_defects: reflection
                .log
                .open_defects()
                .iter()
                .map(|d| d.as_str().replace('_', " "))
                .collect(),
            aggregate_confidence: calibration.summary.aggregate,
            confidence_threshold: self.config.pipeline.min_aggregate_confidence,
        };
        let disclosure = Disclosure::build(&limitations, &context);

        let draft = reflection.draft;
        let text = render_answer(&AnswerView {
            overview: &draft.overview,
            perspectives: &draft.perspectives,
            claims: &calibration.claims,
            asymmetry_note: draft.asymmetry_note.as_deref(),
            consensus_note: draft.consensus_note.as_deref(),
            unresolved: &calibration.unresolved,
            disclosure: disclosure.as_ref(),
            decision: calibration.decision,
            returned_to_scope,
        });

        let mut report = self.report(guard, limitations);
        report.reflection = Some(reflection.log);
        report.unresolved = calibration.unresolved;
        report.queries = grounding.queries;
        report.asymmetry_note = draft.asymmetry_note;
        report.returned_to_scope = returned_to_scope;

        info!(
            "Answered with {} position(s), {} claim(s), {} limitation(s), {} revision(s)",
            draft.perspectives.len(),
            calibration.claims.len(),
            report.limitations.len(),
            report.revisions()
        );

        Ok(Turn::agent(text, report)
            .with_claims(calibration.claims)
            .with_perspectives(draft.perspectives)
            .with_confidence(calibration.summary))
    }
}

/// First `max` chars of a message for debug logs
fn preview(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        format!("{}...", flat.chars().take(max).collect::<String>())
    }
}
