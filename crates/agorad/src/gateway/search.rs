//! Tavily-compatible web search client.

use super::{map_reqwest_error, map_status, RecencyBias, RetrievalGateway, SearchOptions};
use crate::config::RetrievalConfig;
use agora_shared::{GatewayError, SourceDocument};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Publication window used for rapidly evolving topics
const RECENT_DAYS: u32 = 30;

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    published_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchItem>,
}

pub struct TavilyGateway {
    http: reqwest::Client,
    endpoint: String,
    key: String,
    search_depth: String,
}

impl TavilyGateway {
    pub fn new(config: &RetrievalConfig, key: impl Into<String>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| GatewayError::ServiceError(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.base_url.clone(),
            key: key.into(),
            search_depth: config.search_depth.clone(),
        })
    }

    fn body(&self, query: &str, options: &SearchOptions) -> serde_json::Value {
        let mut body = serde_json::json!({
            "api_key": self.key,
            "query": query,
            "max_results": options.max_results,
            "search_depth": self.search_depth,
        });
        if options.recency_bias == RecencyBias::Recent {
            body["topic"] = serde_json::json!("news");
            body["days"] = serde_json::json!(RECENT_DAYS);
        }
        body
    }
}

#[async_trait]
impl RetrievalGateway for TavilyGateway {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SourceDocument>, GatewayError> {
        debug!("search query={:?} recency={:?}", query, options.recency_bias);
        let response = self
            .http
            .post(&self.endpoint)
            .json(&self.body(query, options))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text));
        }

        let parsed: SearchResponse = response.json().await.map_err(map_reqwest_error)?;
        Ok(parsed
            .results
            .into_iter()
            .take(options.max_results)
            .map(into_document)
            .collect())
    }
}

fn into_document(item: SearchItem) -> SourceDocument {
    let mut doc = SourceDocument::new(item.url, item.content)
        .with_title(item.title)
        .with_relevance(item.score);
    if let Some(published) = item.published_date.as_deref().and_then(parse_date) {
        doc = doc.with_published(published);
    }
    doc
}

/// Accepts RFC 3339, RFC 2822 and bare dates
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
