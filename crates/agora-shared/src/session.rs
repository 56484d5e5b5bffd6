//! Session model and conversation state machine.
//!
//! Start -> AwaitingTurn -> Classifying -> one of
//!   Grounding -> Synthesizing -> Reflecting -> Calibrating -> Responding
//!   ClarifyingRepair
//!   BoundaryResponding
//! -> AwaitingTurn, until an external close moves the session to Ended.
//!
//! Any in-flight state may revert to AwaitingTurn (cancellation).

use crate::turn::{Classification, RepairKind, Role, Turn, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Default size of the rolling scope memory
pub const DEFAULT_SCOPE_MEMORY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Start,
    AwaitingTurn,
    Classifying,
    Grounding,
    Synthesizing,
    Reflecting,
    Calibrating,
    Responding,
    ClarifyingRepair,
    BoundaryResponding,
    Ended,
}

impl SessionState {
    /// Whether `to` is a legal next state
    pub fn can_transition(&self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Ended, _) => false,
            (Start, AwaitingTurn) | (Start, Ended) => true,
            (AwaitingTurn, Classifying) | (AwaitingTurn, Ended) => true,
            (Classifying, Grounding)
            | (Classifying, ClarifyingRepair)
            | (Classifying, BoundaryResponding) => true,
            (Grounding, Synthesizing) => true,
            (Synthesizing, Reflecting) => true,
            (Reflecting, Calibrating) => true,
            (Calibrating, Responding) => true,
            // Completion, or cancellation from any in-flight state
            (Classifying, AwaitingTurn)
            | (Grounding, AwaitingTurn)
            | (Synthesizing, AwaitingTurn)
            | (Reflecting, AwaitingTurn)
            | (Calibrating, AwaitingTurn)
            | (Responding, AwaitingTurn)
            | (ClarifyingRepair, AwaitingTurn)
            | (BoundaryResponding, AwaitingTurn) => true,
            _ => false,
        }
    }

    /// States a turn can finish in
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::Responding | Self::ClarifyingRepair | Self::BoundaryResponding
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::AwaitingTurn => "awaiting_turn",
            Self::Classifying => "classifying",
            Self::Grounding => "grounding",
            Self::Synthesizing => "synthesizing",
            Self::Reflecting => "reflecting",
            Self::Calibrating => "calibrating",
            Self::Responding => "responding",
            Self::ClarifyingRepair => "clarifying_repair",
            Self::BoundaryResponding => "boundary_responding",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Records the states a single turn passes through
#[derive(Debug, Clone)]
pub struct StateTracker {
    current: SessionState,
    path: Vec<SessionState>,
}

impl StateTracker {
    /// Tracker for a turn that has just been accepted
    pub fn begin() -> Self {
        Self {
            current: SessionState::Classifying,
            path: vec![SessionState::Classifying],
        }
    }

    pub fn advance(&mut self, to: SessionState) -> Result<(), InvalidTransition> {
        if !self.current.can_transition(to) {
            return Err(InvalidTransition {
                from: self.current,
                to,
            });
        }
        self.current = to;
        self.path.push(to);
        Ok(())
    }

    pub fn current(&self) -> SessionState {
        self.current
    }

    pub fn path(&self) -> &[SessionState] {
        &self.path
    }
}

/// One remembered classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeEntry {
    pub topic: String,
    pub verdict: Verdict,
}

/// Rolling window of the last N classified topics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeMemory {
    capacity: usize,
    entries: VecDeque<ScopeEntry>,
}

impl ScopeMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn remember(&mut self, topic: impl Into<String>, verdict: Verdict) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ScopeEntry {
            topic: topic.into(),
            verdict,
        });
    }

    /// Oldest first
    pub fn entries(&self) -> impl Iterator<Item = &ScopeEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&ScopeEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when the previous turn was outside scope and this one is in scope
    pub fn is_return_to_scope(&self, current: Verdict) -> bool {
        current == Verdict::InScope
            && matches!(
                self.last().map(|e| e.verdict),
                Some(Verdict::OutOfScope) | Some(Verdict::Ambiguous)
            )
    }
}

/// Per-session counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub turns: usize,
    pub answered: usize,
    pub boundary: usize,
    pub clarifications: usize,
    pub degraded: usize,
    /// Engagement in [0,1], starts at 0.5
    pub engagement: f32,
}

impl Default for EngagementMetrics {
    fn default() -> Self {
        Self {
            turns: 0,
            answered: 0,
            boundary: 0,
            clarifications: 0,
            degraded: 0,
            engagement: 0.5,
        }
    }
}

impl EngagementMetrics {
    fn record(&mut self, agent: &Turn) {
        self.turns += 1;
        let Some(report) = &agent.report else {
            return;
        };
        let degraded = !report.limitations.is_empty() || report.repair == Some(RepairKind::Bounded);
        match report.final_state {
            SessionState::Responding => self.answered += 1,
            SessionState::BoundaryResponding => self.boundary += 1,
            SessionState::ClarifyingRepair => self.clarifications += 1,
            _ => {}
        }
        if degraded {
            self.degraded += 1;
            self.engagement = (self.engagement - 0.2).max(0.0);
        } else if report.final_state == SessionState::Responding {
            self.engagement = (self.engagement + 0.1).min(1.0);
        }
    }
}

/// A conversation. Append-only history, owned by the conversation manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    state: SessionState,
    turns: Vec<Turn>,
    classifications: Vec<Classification>,
    scope_memory: ScopeMemory,
    metrics: EngagementMetrics,
}

impl Session {
    pub fn new(id: impl Into<String>, memory_window: usize) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            state: SessionState::AwaitingTurn,
            turns: Vec::new(),
            classifications: Vec::new(),
            scope_memory: ScopeMemory::new(memory_window),
            metrics: EngagementMetrics::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, to: SessionState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn classifications(&self) -> &[Classification] {
        &self.classifications
    }

    pub fn scope_memory(&self) -> &ScopeMemory {
        &self.scope_memory
    }

    pub fn metrics(&self) -> &EngagementMetrics {
        &self.metrics
    }

    /// Last `n` turns, oldest first
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// Number of trailing ambiguous classifications
    pub fn consecutive_ambiguous(&self) -> usize {
        self.classifications
            .iter()
            .rev()
            .take_while(|c| c.verdict == Verdict::Ambiguous)
            .count()
    }

    /// Whether `text` repeats the previous two user messages verbatim
    pub fn is_repetition(&self, text: &str) -> bool {
        let current = normalize(text);
        let previous: Vec<String> = self
            .turns
            .iter()
            .rev()
            .filter(|t| t.role == Role::User)
            .take(2)
            .map(|t| normalize(&t.text))
            .collect();
        previous.len() == 2 && previous.iter().all(|p| *p == current)
    }

    /// Append a completed exchange. Both turns land together or not at all.
    pub fn commit_exchange(&mut self, user: Turn, agent: Turn) {
        if let Some(classification) = &user.classification {
            let topic = classification
                .topic
                .clone()
                .unwrap_or_else(|| truncate(&user.text, 60));
            self.scope_memory.remember(topic, classification.verdict);
            self.classifications.push(classification.clone());
        }
        self.metrics.record(&agent);
        self.turns.push(user);
        self.turns.push(agent);
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
