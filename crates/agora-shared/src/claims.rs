//! Claims, sources and perspectives.
//!
//! A claim never loses its source list once attached. Later stages may only
//! add a qualifier or change the confidence label.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A retrieved document. Fetched fresh per turn, never cached across sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub snippet: String,
    /// Reliability in [0,1], assigned by the grounding stage
    #[serde(default)]
    pub reliability: f32,
    /// Relevance in [0,1], as reported by the search service
    #[serde(default)]
    pub relevance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
}

impl SourceDocument {
    pub fn new(url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            snippet: snippet.into(),
            reliability: 0.0,
            relevance: 0.0,
            published: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_relevance(mut self, relevance: f32) -> Self {
        self.relevance = relevance.clamp(0.0, 1.0);
        self
    }

    pub fn with_reliability(mut self, reliability: f32) -> Self {
        self.reliability = reliability.clamp(0.0, 1.0);
        self
    }

    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }

    /// Host part of the URL without scheme or leading "www."
    pub fn domain(&self) -> String {
        let rest = self
            .url
            .split_once("://")
            .map(|(_, r)| r)
            .unwrap_or(&self.url);
        let host = rest.split(|c: char| c == '/' || c == '?' || c == '#').next().unwrap_or(rest);
        host.trim_start_matches("www.").to_lowercase()
    }

    /// URL normalized for duplicate detection
    pub fn canonical_url(&self) -> String {
        let rest = self
            .url
            .split_once("://")
            .map(|(_, r)| r)
            .unwrap_or(&self.url);
        let path = rest.split(|c: char| c == '?' || c == '#').next().unwrap_or(rest);
        path.trim_start_matches("www.")
            .trim_end_matches('/')
            .to_lowercase()
    }

    /// Ranking key for capping the working set
    pub fn combined_score(&self) -> f32 {
        self.reliability * self.relevance
    }

    /// Age in whole days relative to `now`, if the publication date is known
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.published.map(|p| (now - p).num_days().max(0))
    }
}

/// Confidence attached to a factual claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLabel {
    Verified,
    Likely,
    Uncertain,
    Unverifiable,
}

impl ConfidenceLabel {
    /// Ordinal rank, higher is more confident
    pub fn rank(&self) -> u8 {
        match self {
            Self::Verified => 3,
            Self::Likely => 2,
            Self::Uncertain => 1,
            Self::Unverifiable => 0,
        }
    }

    /// Weight used for the aggregate confidence of a draft
    pub fn weight(&self) -> f32 {
        match self {
            Self::Verified => 1.0,
            Self::Likely => 0.75,
            Self::Uncertain => 0.4,
            Self::Unverifiable => 0.1,
        }
    }

    /// Uncertain and unverifiable claims are always rendered hedged
    pub fn needs_hedge(&self) -> bool {
        matches!(self, Self::Uncertain | Self::Unverifiable)
    }

    /// One step less confident (floor at unverifiable)
    pub fn downgrade(&self) -> Self {
        match self {
            Self::Verified => Self::Likely,
            Self::Likely => Self::Uncertain,
            Self::Uncertain | Self::Unverifiable => Self::Unverifiable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Likely => "likely",
            Self::Uncertain => "uncertain",
            Self::Unverifiable => "unverifiable",
        }
    }

    /// Lenient parse of a model-provided label
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "verified" => Some(Self::Verified),
            "likely" => Some(Self::Likely),
            "uncertain" => Some(Self::Uncertain),
            "unverifiable" | "unverified" => Some(Self::Unverifiable),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConfidenceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An atomic factual assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub sources: Vec<SourceDocument>,
    pub confidence: ConfidenceLabel,
    /// Inspectable reasoning behind the confidence label
    #[serde(default)]
    pub rationale: String,
    /// Label of the perspective this claim supports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perspective: Option<String>,
    /// Qualification added during reflection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
}

impl Claim {
    /// New claim, unverifiable until calibrated
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            sources: Vec::new(),
            confidence: ConfidenceLabel::Unverifiable,
            rationale: "not yet calibrated".to_string(),
            perspective: None,
            qualifier: None,
        }
    }

    pub fn with_sources(mut self, sources: Vec<SourceDocument>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_perspective(mut self, label: impl Into<String>) -> Self {
        self.perspective = Some(label.into());
        self
    }

    pub fn with_confidence(mut self, label: ConfidenceLabel, rationale: impl Into<String>) -> Self {
        self.confidence = label;
        self.rationale = rationale.into();
        self
    }

    pub fn has_source(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Traces to a perspective, or is explicitly unverifiable
    pub fn is_traceable(&self) -> bool {
        self.perspective.is_some() || self.confidence == ConfidenceLabel::Unverifiable
    }

    /// Claim text with its reflection qualifier appended
    pub fn qualified_text(&self) -> String {
        match &self.qualifier {
            Some(q) if !q.trim().is_empty() => {
                format!("{} ({})", self.text.trim_end_matches('.'), q.trim())
            }
            _ => self.text.trim_end_matches('.').to_string(),
        }
    }

    /// Number of distinct source domains
    pub fn distinct_domains(&self) -> usize {
        let mut domains: Vec<String> = self.sources.iter().map(|s| s.domain()).collect();
        domains.sort();
        domains.dedup();
        domains.len()
    }
}

/// A materially distinct stance on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perspective {
    /// Derived per topic, describes a position
    pub label: String,
    pub stance: String,
    #[serde(default)]
    pub claim_ids: Vec<String>,
    /// Section text drafted for this perspective
    #[serde(default)]
    pub narrative: String,
    /// Number of retrieved sources backing this perspective
    #[serde(default)]
    pub source_count: usize,
}

impl Perspective {
    pub fn new(label: impl Into<String>, stance: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stance: stance.into(),
            claim_ids: Vec::new(),
            narrative: String::new(),
            source_count: 0,
        }
    }

    /// Order-independent sort key so query phrasing cannot decide which
    /// perspective comes first
    pub fn ordering_key(&self) -> String {
        self.label.trim().to_lowercase()
    }
}
