//! Scripted gateways for tests and offline evaluation.
//!
//! Responses are keyed by stage (model) or query substring (retrieval).
//! A response list is consumed front to back; its last entry repeats.

use super::{CompletionOptions, ModelGateway, Prompt, RetrievalGateway, SearchOptions, Stage};
use agora_shared::{GatewayError, SourceDocument};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Script<T> {
    responses: Vec<Result<T, GatewayError>>,
}

impl<T: Clone> Script<T> {
    fn next(&mut self) -> Result<T, GatewayError> {
        match self.responses.len() {
            0 => Err(GatewayError::ServiceError("script exhausted".into())),
            1 => self.responses[0].clone(),
            _ => self.responses.remove(0),
        }
    }
}

struct ModelRule {
    stage: Stage,
    /// Only applies when the user prompt contains this text
    contains: Option<String>,
    script: Script<String>,
}

/// Fake model gateway
#[derive(Clone, Default)]
pub struct FakeModelGateway {
    rules: Arc<Mutex<Vec<ModelRule>>>,
    delays: Arc<Mutex<HashMap<Stage, Duration>>>,
    calls: Arc<Mutex<HashMap<Stage, usize>>>,
    prompts: Arc<Mutex<Vec<Prompt>>>,
}

impl FakeModelGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_rule(self, stage: Stage, contains: Option<String>, responses: Vec<Result<String, GatewayError>>) -> Self {
        lock(&self.rules).push(ModelRule {
            stage,
            contains,
            script: Script { responses },
        });
        self
    }

    /// Always answer `stage` with `response`
    pub fn on(self, stage: Stage, response: impl Into<String>) -> Self {
        self.push_rule(stage, None, vec![Ok(response.into())])
    }

    /// Answer `stage` with `response` when the user prompt contains `needle`
    pub fn on_matching(self, stage: Stage, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.push_rule(stage, Some(needle.into()), vec![Ok(response.into())])
    }

    /// Scripted sequence for `stage`
    pub fn sequence(self, stage: Stage, responses: Vec<Result<String, GatewayError>>) -> Self {
        self.push_rule(stage, None, responses)
    }

    /// Scripted sequence for `stage` when the user prompt contains `needle`
    pub fn sequence_matching(
        self,
        stage: Stage,
        needle: impl Into<String>,
        responses: Vec<Result<String, GatewayError>>,
    ) -> Self {
        self.push_rule(stage, Some(needle.into()), responses)
    }

    /// Always fail `stage`
    pub fn fail(self, stage: Stage, error: GatewayError) -> Self {
        self.push_rule(stage, None, vec![Err(error)])
    }

    /// Delay every call for `stage`
    pub fn with_delay(self, stage: Stage, delay: Duration) -> Self {
        lock(&self.delays).insert(stage, delay);
        self
    }

    pub fn call_count(&self, stage: Stage) -> usize {
        lock(&self.calls).get(&stage).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    /// Prompts received for `stage`, in call order
    pub fn prompts(&self, stage: Stage) -> Vec<Prompt> {
        lock(&self.prompts)
            .iter()
            .filter(|p| p.stage == stage)
            .cloned()
            .collect()
    }

    fn respond(&self, prompt: &Prompt) -> Result<String, GatewayError> {
        let mut rules = lock(&self.rules);
        let specific = rules.iter().position(|r| {
            r.stage == prompt.stage
                && r.contains
                    .as_deref()
                    .map(|n| prompt.user.contains(n))
                    .unwrap_or(false)
        });
        let index = specific.or_else(|| {
            rules
                .iter()
                .position(|r| r.stage == prompt.stage && r.contains.is_none())
        });
        match index {
            Some(i) => rules[i].script.next(),
            None => Err(GatewayError::ServiceError(format!(
                "no scripted response for {}",
                prompt.stage
            ))),
        }
    }
}

#[async_trait]
impl ModelGateway for FakeModelGateway {
    async fn complete(
        &self,
        prompt: &Prompt,
        _options: &CompletionOptions,
    ) -> Result<String, GatewayError> {
        *lock(&self.calls).entry(prompt.stage).or_insert(0) += 1;
        lock(&self.prompts).push(prompt.clone());
        let delay = lock(&self.delays).get(&prompt.stage).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.respond(prompt)
    }
}

struct SearchRule {
    contains: Option<String>,
    script: Script<Vec<SourceDocument>>,
}

/// Fake retrieval gateway
#[derive(Clone, Default)]
pub struct FakeRetrievalGateway {
    rules: Arc<Mutex<Vec<SearchRule>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl FakeRetrievalGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_rule(self, contains: Option<String>, responses: Vec<Result<Vec<SourceDocument>, GatewayError>>) -> Self {
        lock(&self.rules).push(SearchRule {
            contains,
            script: Script { responses },
        });
        self
    }

    /// Results for any query without a more specific rule
    pub fn returning(self, docs: Vec<SourceDocument>) -> Self {
        self.push_rule(None, vec![Ok(docs)])
    }

    /// Results for queries containing `needle` (case-insensitive)
    pub fn on_query(self, needle: impl Into<String>, docs: Vec<SourceDocument>) -> Self {
        self.push_rule(Some(needle.into().to_lowercase()), vec![Ok(docs)])
    }

    pub fn fail_query(self, needle: impl Into<String>, error: GatewayError) -> Self {
        self.push_rule(Some(needle.into().to_lowercase()), vec![Err(error)])
    }

    /// Fail every query without a more specific rule
    pub fn failing(self, error: GatewayError) -> Self {
        self.push_rule(None, vec![Err(error)])
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *lock(&self.delay) = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.queries).len()
    }

    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }

    fn respond(&self, query: &str) -> Result<Vec<SourceDocument>, GatewayError> {
        let q = query.to_lowercase();
        let mut rules = lock(&self.rules);
        let specific = rules.iter().position(|r| {
            r.contains
                .as_deref()
                .map(|n| q.contains(n))
                .unwrap_or(false)
        });
        let index = specific.or_else(|| rules.iter().position(|r| r.contains.is_none()));
        match index {
            Some(i) => rules[i].script.next(),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl RetrievalGateway for FakeRetrievalGateway {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SourceDocument>, GatewayError> {
        lock(&self.queries).push(query.to_string());
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.respond(query)
            .map(|docs| docs.into_iter().take(options.max_results).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(stage: Stage, user: &str) -> Prompt {
        Prompt::new(stage, "system", user)
    }

    #[tokio::test]
    async fn test_specific_rule_wins() {
        let fake = FakeModelGateway::new()
            .on(Stage::Classify, "generic")
            .on_matching(Stage::Classify, "weather", "weather reply");
        let opts = CompletionOptions::default();
        assert_eq!(
            fake.complete(&prompt(Stage::Classify, "the weather"), &opts).await.unwrap(),
            "weather reply"
        );
        assert_eq!(
            fake.complete(&prompt(Stage::Classify, "debt"), &opts).await.unwrap(),
            "generic"
        );
        assert_eq!(fake.call_count(Stage::Classify), 2);
        assert_eq!(fake.prompts(Stage::Classify).len(), 2);
    }

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let fake = FakeModelGateway::new().sequence(
            Stage::Critique,
            vec![Err(GatewayError::Timeout), Ok("a".into()), Ok("b".into())],
        );
        let opts = CompletionOptions::default();
        let p = prompt(Stage::Critique, "");
        assert!(fake.complete(&p, &opts).await.is_err());
        assert_eq!(fake.complete(&p, &opts).await.unwrap(), "a");
        assert_eq!(fake.complete(&p, &opts).await.unwrap(), "b");
        assert_eq!(fake.complete(&p, &opts).await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_unscripted_stage_fails() {
        let fake = FakeModelGateway::new();
        let err = fake
            .complete(&prompt(Stage::Synthesis, ""), &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ServiceError(_)));
    }

    #[tokio::test]
    async fn test_retrieval_rules() {
        let fake = FakeRetrievalGateway::new()
            .returning(vec![SourceDocument::new("https://a.org/1", "a")])
            .fail_query("broken", GatewayError::RateLimited);
        let opts = SearchOptions::default();
        assert_eq!(fake.search("anything", &opts).await.unwrap().len(), 1);
        assert_eq!(
            fake.search("a Broken query", &opts).await.unwrap_err(),
            GatewayError::RateLimited
        );
        assert_eq!(fake.call_count(), 2);
    }
}
