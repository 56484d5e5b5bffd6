//! Evidence retrieval.
//!
//! Plans search queries, runs them concurrently, merges results in query
//! order, deduplicates, scores reliability and caps the working set. Sources
//! are fetched fresh for every turn.

use super::json::parse_reply;
use super::{complete_with_retry, CallPolicy, GroundingAgent, GroundingInput, GroundingResult, TurnTrace};
use crate::config::Config;
use crate::gateway::{
    with_retry, CompletionOptions, ModelGateway, Prompt, RecencyBias, RetrievalGateway,
    SearchOptions, Stage,
};
use agora_shared::limitations::LimitationReason;
use agora_shared::transcript::{Actor, StageOutcome};
use agora_shared::{AgoraError, SourceDocument};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

const STAGE: &str = "grounding";

/// Snippets this similar are the same story syndicated
const DUPLICATE_SIMILARITY: f32 = 0.85;

/// Snippet overlap that counts as another domain agreeing
const AGREEMENT_SIMILARITY: f32 = 0.2;

/// Reputation used when scoring is unavailable
const NEUTRAL_REPUTATION: f32 = 0.5;

const PLANNING_PROMPT: &str = r#"You plan web searches for a political-topics assistant.
Write up to {max} short search queries that together cover the facts of the question and the main positions people hold about it.
Set rapidly_evolving to true when the situation is still developing (ongoing negotiations, pending rulings, live campaigns).
Output JSON only:
{"queries":["..."],"rapidly_evolving":false}"#;

const SCORING_PROMPT: &str = r#"Rate the general reliability of each news or reference domain for factual reporting on politics, from 0.0 (unreliable) to 1.0 (authoritative).
Official government, court and statistical sources, major wire services and established newspapers rate high. Partisan blogs, anonymous sites and content farms rate low.
Output JSON only:
{"domains":[{"domain":"example.com","reputation":0.8}]}"#;

#[derive(Debug, Deserialize)]
struct QueryPlan {
    #[serde(default)]
    queries: Vec<String>,
    #[serde(default)]
    rapidly_evolving: bool,
}

#[derive(Debug, Deserialize)]
struct DomainScore {
    domain: String,
    reputation: f32,
}

#[derive(Debug, Deserialize)]
struct ScoringReply {
    #[serde(default)]
    domains: Vec<DomainScore>,
}

pub struct LlmGroundingAgent {
    model: Arc<dyn ModelGateway>,
    retrieval: Arc<dyn RetrievalGateway>,
    config: Arc<Config>,
}

impl LlmGroundingAgent {
    pub fn new(
        model: Arc<dyn ModelGateway>,
        retrieval: Arc<dyn RetrievalGateway>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            model,
            retrieval,
            config,
        }
    }

    fn policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: self.config.timeouts.grounding(),
            backoff: self.config.timeouts.backoff(),
        }
    }

    async fn plan(&self, input: &GroundingInput, trace: &mut TurnTrace) -> QueryPlan {
        let max = self.config.pipeline.max_queries;
        let system = PLANNING_PROMPT.replace("{max}", &max.to_string());
        let mut user = format!("Question: {}", input.question.trim());
        if let Some(topic) = &input.topic {
            user.push_str(&format!("\nTopic: {}", topic));
        }
        let prompt = Prompt::new(Stage::QueryPlanning, system, user);
        let options = CompletionOptions::default()
            .with_temperature(self.config.model.critique_temperature)
            .with_max_output(300);

        let reply = complete_with_retry(
            self.model.as_ref(),
            &prompt,
            &options,
            self.policy(),
            Actor::Grounding,
            trace,
        )
        .await;

        let plan = match reply {
            Ok(raw) => parse_reply::<QueryPlan>(&raw),
            Err(e) => Err(e.to_string()),
        };
        let mut plan = match plan {
            Ok(plan) => plan,
            Err(reason) => {
                warn!("Query planning unavailable ({}), searching the question directly", reason);
                trace.note(format!("query planning unavailable: {}", reason));
                QueryPlan {
                    queries: Vec::new(),
                    rapidly_evolving: false,
                }
            }
        };
        plan.queries = normalize_queries(plan.queries, &input.question, max);
        if plan.rapidly_evolving {
            let stamp = Utc::now().format("%B %Y").to_string();
            plan.queries = plan
                .queries
                .into_iter()
                .map(|q| format!("{} as of {}", q, stamp))
                .collect();
        }
        plan
    }

    /// Run every query concurrently; results come back in query order
    async fn search_all(
        &self,
        queries: &[String],
        recency: RecencyBias,
        trace: &mut TurnTrace,
    ) -> (Vec<SourceDocument>, usize) {
        let options = SearchOptions {
            max_results: self.config.retrieval.max_results,
            recency_bias: recency,
        };
        let timeout = self.config.timeouts.grounding();
        let backoff = self.config.timeouts.backoff();
        let calls = queries.iter().map(|query| {
            let retrieval = self.retrieval.clone();
            let options = options.clone();
            async move {
                with_retry(Stage::Search, timeout, backoff, || {
                    retrieval.search(query, &options)
                })
                .await
            }
        });
        let outcomes = join_all(calls).await;

        let mut merged = Vec::new();
        let mut failed = 0;
        for (query, outcome) in queries.iter().zip(outcomes) {
            if let Some(first) = &outcome.retried_after {
                trace.retry(Actor::Grounding, Stage::Search.as_str(), first);
            }
            match outcome.result {
                Ok(docs) => {
                    trace.step(
                        Actor::Grounding,
                        format!("\"{}\" returned {} result(s)", query, docs.len()),
                        None,
                    );
                    merged.extend(docs);
                }
                Err(e) => {
                    failed += 1;
                    warn!("Search failed for {:?}: {}", query, e);
                    trace.step(Actor::Grounding, format!("\"{}\" failed: {}", query, e), None);
                }
            }
        }
        (merged, failed)
    }

    async fn reputations(
        &self,
        sources: &[SourceDocument],
        trace: &mut TurnTrace,
    ) -> BTreeMap<String, f32> {
        let domains: Vec<String> = distinct_domains(sources);
        let prompt = Prompt::new(
            Stage::SourceScoring,
            SCORING_PROMPT,
            format!("Domains:\n{}", domains.join("\n")),
        );
        let options = CompletionOptions::default()
            .with_temperature(self.config.model.critique_temperature)
            .with_max_output(400);
        let reply = complete_with_retry(
            self.model.as_ref(),
            &prompt,
            &options,
            self.policy(),
            Actor::Grounding,
            trace,
        )
        .await;

        let scored = match reply {
            Ok(raw) => parse_reply::<ScoringReply>(&raw),
            Err(e) => Err(e.to_string()),
        };
        match scored {
            Ok(reply) => reply
                .domains
                .into_iter()
                .map(|d| {
                    let domain = d.domain.trim().trim_start_matches("www.").to_lowercase();
                    (domain, d.reputation.clamp(0.0, 1.0))
                })
                .collect(),
            Err(reason) => {
                warn!("Source scoring unavailable: {}", reason);
                trace.note(format!(
                    "source scoring unavailable ({}), using neutral reputation",
                    reason
                ));
                BTreeMap::new()
            }
        }
    }

    /// Working set or a grounding gap
    fn working_set(&self, sources: Vec<SourceDocument>) -> Result<Vec<SourceDocument>, AgoraError> {
        if sources.is_empty() {
            return Err(AgoraError::GroundingGap(
                "no query returned a usable source".to_string(),
            ));
        }
        Ok(cap_sources(sources, self.config.pipeline.source_cap))
    }
}

#[async_trait]
impl GroundingAgent for LlmGroundingAgent {
    async fn ground(&self, input: &GroundingInput, trace: &mut TurnTrace) -> GroundingResult {
        trace.start(Actor::Grounding, STAGE);
        let plan = self.plan(input, trace).await;
        let recency = if plan.rapidly_evolving {
            RecencyBias::Recent
        } else {
            RecencyBias::Any
        };

        let (raw, failed) = self.search_all(&plan.queries, recency, trace).await;
        let unique = dedup_sources(raw);

        let scored = if unique.is_empty() {
            unique
        } else {
            let reputations = self.reputations(&unique, trace).await;
            score_reliability(unique, &reputations)
        };

        let mut result = GroundingResult {
            queries: plan.queries,
            failed_queries: failed,
            sources: Vec::new(),
            rapidly_evolving: plan.rapidly_evolving,
            limitations: Vec::new(),
        };

        match self.working_set(scored) {
            Ok(sources) => {
                info!(
                    "Grounding: {} source(s) from {} quer(ies), {} failed",
                    sources.len(),
                    result.queries.len(),
                    failed
                );
                result.sources = sources;
                if failed > 0 {
                    result.limitations.push(LimitationReason::PartialGrounding);
                    trace.end(
                        Actor::Grounding,
                        STAGE,
                        StageOutcome::degraded(format!("{} of {} searches failed", failed, result.queries.len())),
                    );
                } else {
                    trace.end(Actor::Grounding, STAGE, StageOutcome::Ok);
                }
            }
            Err(gap) => {
                warn!("{}", gap);
                result.limitations.push(LimitationReason::GroundingGap);
                trace.end(Actor::Grounding, STAGE, StageOutcome::degraded(gap.to_string()));
            }
        }
        result
    }
}

/// Trim, dedup and cap queries; the question itself when the plan is empty
fn normalize_queries(queries: Vec<String>, question: &str, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out: Vec<String> = queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(max.max(1))
        .collect();
    if out.is_empty() {
        out.push(question.trim().to_string());
    }
    out
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    inter / union
}

/// Drop repeated URLs and near-identical snippets, keeping the first seen
pub(crate) fn dedup_sources(sources: Vec<SourceDocument>) -> Vec<SourceDocument> {
    let mut kept: Vec<(SourceDocument, HashSet<String>)> = Vec::new();
    for doc in sources {
        let url = doc.canonical_url();
        let toks = tokens(&doc.snippet);
        let duplicate = kept.iter().any(|(k, kt)| {
            k.canonical_url() == url || jaccard(kt, &toks) >= DUPLICATE_SIMILARITY
        });
        if !duplicate {
            kept.push((doc, toks));
        }
    }
    kept.into_iter().map(|(d, _)| d).collect()
}

fn distinct_domains(sources: &[SourceDocument]) -> Vec<String> {
    let mut domains: Vec<String> = sources.iter().map(|s| s.domain()).collect();
    domains.sort();
    domains.dedup();
    domains
}

/// reliability = 0.75 * domain reputation + 0.25 * cross-domain agreement
pub(crate) fn score_reliability(
    sources: Vec<SourceDocument>,
    reputations: &BTreeMap<String, f32>,
) -> Vec<SourceDocument> {
    let token_sets: Vec<HashSet<String>> = sources.iter().map(|s| tokens(&s.snippet)).collect();
    let domains: Vec<String> = sources.iter().map(|s| s.domain()).collect();
    let domain_count = distinct_domains(&sources).len();

    sources
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let reputation = reputations
                .get(&domains[i])
                .copied()
                .unwrap_or(NEUTRAL_REPUTATION);
            let agreement = if domain_count < 2 {
                0.0
            } else {
                let agreeing: HashSet<&str> = (0..sources.len())
                    .filter(|&j| domains[j] != domains[i])
                    .filter(|&j| jaccard(&token_sets[i], &token_sets[j]) >= AGREEMENT_SIMILARITY)
                    .map(|j| domains[j].as_str())
                    .collect();
                agreeing.len() as f32 / (domain_count - 1) as f32
            };
            doc.clone()
                .with_reliability(0.75 * reputation + 0.25 * agreement)
        })
        .collect()
}

/// Top `cap` by reliability x relevance; ties keep merge order
pub(crate) fn cap_sources(sources: Vec<SourceDocument>, cap: usize) -> Vec<SourceDocument> {
    let mut indexed: Vec<(usize, SourceDocument)> = sources.into_iter().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| {
        b.combined_score()
            .partial_cmp(&a.combined_score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(ia.cmp(ib))
    });
    indexed.truncate(cap);
    indexed.into_iter().map(|(_, d)| d).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{FakeModelGateway, FakeRetrievalGateway};
    use agora_shared::GatewayError;

    fn doc(url: &str, snippet: &str, relevance: f32) -> SourceDocument {
        SourceDocument::new(url, snippet).with_relevance(relevance)
    }

    fn agent(model: FakeModelGateway, retrieval: FakeRetrievalGateway) -> LlmGroundingAgent {
        let mut config = Config::default();
        config.timeouts.retry_backoff_ms = 1;
        LlmGroundingAgent::new(Arc::new(model), Arc::new(retrieval), Arc::new(config))
    }

    fn input(q: &str) -> GroundingInput {
        GroundingInput {
            question: q.to_string(),
            topic: None,
        }
    }

    #[test]
    fn test_dedup_by_url_and_snippet() {
        let sources = vec![
            doc("https://www.apnews.com/a/", "Congress passed the debt limit deal on Thursday night", 0.9),
            doc("http://apnews.com/a?utm=x", "different text", 0.9),
            doc("https://syndicated.example/a", "Congress passed the debt limit deal on Thursday night", 0.8),
            doc("https://cbo.gov/b", "The agreement caps discretionary spending", 0.7),
        ];
        let unique = dedup_sources(sources);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].domain(), "apnews.com");
        assert_eq!(unique[1].domain(), "cbo.gov");
    }

    #[test]
    fn test_reliability_blends_reputation_and_agreement() {
        let sources = vec![
            doc("https://apnews.com/a", "senate passes debt ceiling agreement", 0.9),
            doc("https://reuters.com/b", "senate passes debt ceiling agreement vote", 0.9),
            doc("https://blog.example/c", "aliens control the treasury", 0.9),
        ];
        let mut reps = BTreeMap::new();
        reps.insert("apnews.com".to_string(), 0.9);
        reps.insert("reuters.com".to_string(), 0.9);
        let scored = score_reliability(sources, &reps);
        // 0.75 * 0.9 + 0.25 * (1 of 2 other domains)
        assert!((scored[0].reliability - 0.8).abs() < 1e-5);
        // neutral reputation, no agreement
        assert!((scored[2].reliability - 0.375).abs() < 1e-5);
    }

    #[test]
    fn test_cap_is_stable_on_ties() {
        let sources: Vec<SourceDocument> = (0..5)
            .map(|i| doc(&format!("https://s{}.org/x", i), "x", 0.5).with_reliability(0.5))
            .collect();
        let capped = cap_sources(sources, 3);
        let urls: Vec<&str> = capped.iter().map(|d| d.url.as_str()).collect();
        assert_eq!(urls, vec!["https://s0.org/x", "https://s1.org/x", "https://s2.org/x"]);
    }

    #[test]
    fn test_normalize_queries() {
        let q = normalize_queries(vec![" a ".into(), "A".into(), "".into(), "b".into(), "c".into()], "q", 2);
        assert_eq!(q, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(normalize_queries(vec![], "the question", 3), vec!["the question".to_string()]);
    }

    #[tokio::test]
    async fn test_grounding_gap_when_every_search_fails() {
        let model = FakeModelGateway::new().on(
            Stage::QueryPlanning,
            r#"{"queries":["debt ceiling 2023 deal","debt ceiling reactions"],"rapidly_evolving":false}"#,
        );
        let retrieval = FakeRetrievalGateway::new().failing(GatewayError::ServiceError("down".into()));
        let mut trace = TurnTrace::new();
        let result = agent(model.clone(), retrieval.clone())
            .ground(&input("debt ceiling"), &mut trace)
            .await;
        assert!(result.is_gap());
        assert_eq!(result.failed_queries, 2);
        assert_eq!(result.limitations, vec![LimitationReason::GroundingGap]);
        // one retry per query
        assert_eq!(retrieval.call_count(), 4);
        assert_eq!(model.call_count(Stage::SourceScoring), 0);
    }

    #[tokio::test]
    async fn test_partial_grounding() {
        let model = FakeModelGateway::new()
            .on(
                Stage::QueryPlanning,
                r#"{"queries":["deal terms","broken query"],"rapidly_evolving":false}"#,
            )
            .on(Stage::SourceScoring, r#"{"domains":[{"domain":"apnews.com","reputation":0.9}]}"#);
        let retrieval = FakeRetrievalGateway::new()
            .on_query("deal terms", vec![doc("https://apnews.com/a", "the deal terms", 0.8)])
            .fail_query("broken", GatewayError::Timeout);
        let mut trace = TurnTrace::new();
        let result = agent(model, retrieval).ground(&input("deal"), &mut trace).await;
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.limitations, vec![LimitationReason::PartialGrounding]);
        assert!((result.sources[0].reliability - 0.675).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_rapid_topics_get_dated_queries() {
        let model = FakeModelGateway::new()
            .on(
                Stage::QueryPlanning,
                r#"{"queries":["shutdown talks"],"rapidly_evolving":true}"#,
            )
            .fail(Stage::SourceScoring, GatewayError::Timeout);
        let retrieval = FakeRetrievalGateway::new()
            .returning(vec![doc("https://apnews.com/a", "talks continue", 0.8)]);
        let mut trace = TurnTrace::new();
        let result = agent(model, retrieval.clone())
            .ground(&input("shutdown"), &mut trace)
            .await;
        assert!(result.rapidly_evolving);
        assert!(retrieval.queries()[0].starts_with("shutdown talks as of "));
        // scoring failed: neutral reputation
        assert!((result.sources[0].reliability - 0.375).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_planning_failure_searches_question() {
        let model = FakeModelGateway::new().fail(Stage::QueryPlanning, GatewayError::RateLimited);
        let retrieval = FakeRetrievalGateway::new();
        let mut trace = TurnTrace::new();
        let result = agent(model, retrieval.clone())
            .ground(&input("What is the farm bill?"), &mut trace)
            .await;
        assert_eq!(retrieval.queries(), vec!["What is the farm bill?".to_string()]);
        assert!(result.is_gap());
    }
}
