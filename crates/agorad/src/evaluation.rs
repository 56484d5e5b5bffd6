//! Evaluation harness.
//!
//! Drives the response pipeline with scripted turns and checks each case's
//! declared properties. Every run uses a fresh session that is removed
//! afterwards, so cases never see each other's history and nothing is left
//! behind in the daemon.

use crate::pipeline::ResponsePipeline;
use agora_shared::evaluation::{evaluate, CaseRun, Exchange, Property};
use agora_shared::turn::Verdict;
use agora_shared::{CaseReport, EvaluationCase};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct EvaluationHarness {
    pipeline: Arc<ResponsePipeline>,
}

impl EvaluationHarness {
    pub fn new(pipeline: Arc<ResponsePipeline>) -> Self {
        Self { pipeline }
    }

    /// Run one case and report pass/fail per property
    pub async fn run_case(&self, case: &EvaluationCase) -> CaseReport {
        let mut run = CaseRun {
            exchanges: self.play(case).await,
            replay_verdicts: Vec::new(),
        };
        for _ in 0..replays_needed(case) {
            let replay = self.play(case).await;
            run.replay_verdicts.push(
                replay
                    .iter()
                    .filter_map(|e| e.user.classification.as_ref().map(|c| c.verdict))
                    .collect::<Vec<Verdict>>(),
            );
        }

        let report = evaluate(case, &run);
        info!(
            "Case {}: {} passed, {} failed",
            case.id,
            report.passed(),
            report.failed()
        );
        for (name, outcome) in &report.results {
            if !outcome.is_pass() {
                warn!("Case {} property {} failed: {:?}", case.id, name, outcome);
            }
        }
        report
    }

    /// Run cases one after another, in order
    pub async fn run_all(&self, cases: &[EvaluationCase]) -> Vec<CaseReport> {
        let mut reports = Vec::with_capacity(cases.len());
        for case in cases {
            reports.push(self.run_case(case).await);
        }
        reports
    }

    /// Play the scripted turns on a fresh session. Stops at the first turn
    /// the pipeline refuses; properties on missing turns then fail.
    async fn play(&self, case: &EvaluationCase) -> Vec<Exchange> {
        let session_id = format!("eval-{}-{}", case.id, Uuid::new_v4());
        for (i, text) in case.turns.iter().enumerate() {
            if let Err(e) = self.pipeline.handle_turn(&session_id, text).await {
                warn!("Case {} turn {} was not processed: {}", case.id, i, e);
                break;
            }
        }

        match self.pipeline.conversations().remove(&session_id).await {
            Some(view) => view
                .turns
                .chunks_exact(2)
                .map(|pair| Exchange {
                    user: pair[0].clone(),
                    agent: pair[1].clone(),
                })
                .collect(),
            None => Vec::new(),
        }
    }
}

fn replays_needed(case: &EvaluationCase) -> usize {
    case.properties
        .iter()
        .filter_map(|p| match p {
            Property::StableVerdicts { replays } => Some(*replays),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}
