//! Conversation state management.
//!
//! Sessions live in memory only. Ended sessions stay viewable until more
//! than the retention limit have ended, then the oldest are dropped. Each
//! session sits
//! behind its own async mutex: a turn holds the lock from classification to
//! commit, so turns on one session run one at a time in arrival order while
//! different sessions proceed in parallel.
//!
//! A turn that is dropped before commit (client went away, caller timed out)
//! reverts the session to AwaitingTurn and appends nothing.

use agora_shared::rpc::SessionView;
use agora_shared::session::{InvalidTransition, StateTracker};
use agora_shared::turn::{Classification, RepairKind, Role, Verdict};
use agora_shared::{AgoraError, Session, SessionState, Turn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::stages::ScopeInput;

/// Ambiguous turns in a row that switch to a proactive question
const PROACTIVE_AFTER: usize = 2;

type SessionSlot = Arc<Mutex<Session>>;

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, SessionSlot>,
    ended: HashSet<String>,
    /// Ended ids, oldest first
    ended_order: VecDeque<String>,
}

impl Registry {
    fn forget(&mut self, id: &str) {
        self.sessions.remove(id);
        if self.ended.remove(id) {
            self.ended_order.retain(|e| e != id);
        }
    }

    fn mark_ended(&mut self, id: &str, retained: usize) {
        if self.ended.insert(id.to_string()) {
            self.ended_order.push_back(id.to_string());
        }
        while self.ended_order.len() > retained {
            let Some(oldest) = self.ended_order.pop_front() else {
                break;
            };
            self.ended.remove(&oldest);
            self.sessions.remove(&oldest);
            debug!("Session {} dropped from retention", oldest);
        }
    }
}

/// Owns every session; the only writer of session history
pub struct ConversationManager {
    registry: RwLock<Registry>,
    memory_window: usize,
    ended_retained: usize,
}

impl ConversationManager {
    pub fn new(memory_window: usize, ended_retained: usize) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            memory_window,
            ended_retained,
        }
    }

    async fn slot(&self, id: &str) -> Option<SessionSlot> {
        self.registry.read().await.sessions.get(id).cloned()
    }

    async fn slot_or_create(&self, id: &str) -> SessionSlot {
        if let Some(slot) = self.slot(id).await {
            return slot;
        }
        let mut registry = self.registry.write().await;
        registry
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                info!("Session {} opened", id);
                Arc::new(Mutex::new(Session::new(id, self.memory_window)))
            })
            .clone()
    }

    /// Wait for exclusive use of a session and start a turn on it.
    ///
    /// Unknown ids open a new session. Ended sessions are refused.
    pub async fn begin_turn(&self, id: &str) -> Result<TurnGuard, AgoraError> {
        if self.registry.read().await.ended.contains(id) {
            return Err(AgoraError::SessionEnded(id.to_string()));
        }
        let slot = self.slot_or_create(id).await;
        let mut session = slot.lock_owned().await;
        if session.state() == SessionState::Ended {
            return Err(AgoraError::SessionEnded(id.to_string()));
        }
        session
            .set_state(SessionState::Classifying)
            .map_err(transition_error)?;
        debug!("Session {} turn {} started", id, session.turns().len() / 2 + 1);
        Ok(TurnGuard {
            session,
            tracker: StateTracker::begin(),
            committed: false,
        })
    }

    /// Close a session. Waits for an in-flight turn to finish first.
    /// Returns false when the session is unknown or already ended.
    pub async fn end(&self, id: &str) -> Result<bool, AgoraError> {
        let Some(slot) = self.slot(id).await else {
            return Ok(false);
        };
        let mut session = slot.lock().await;
        if session.state() == SessionState::Ended {
            return Ok(false);
        }
        session
            .set_state(SessionState::Ended)
            .map_err(transition_error)?;
        self.registry
            .write()
            .await
            .mark_ended(id, self.ended_retained);
        info!("Session {} ended after {} turn(s)", id, session.turns().len());
        Ok(true)
    }

    /// End a session and drop it at once, returning its final export.
    /// Waits for an in-flight turn to finish first.
    pub async fn remove(&self, id: &str) -> Option<SessionView> {
        let slot = self.slot(id).await?;
        let mut session = slot.lock().await;
        if session.state() != SessionState::Ended {
            if let Err(e) = session.set_state(SessionState::Ended) {
                warn!("Session {} could not be ended: {}", id, e);
            }
        }
        let view = SessionView::from(&*session);
        self.registry.write().await.forget(id);
        debug!("Session {} removed after {} turn(s)", id, session.turns().len());
        Some(view)
    }

    /// Snapshot of a session; waits for an in-flight turn to finish
    pub async fn view(&self, id: &str) -> Option<SessionView> {
        let slot = self.slot(id).await?;
        let session = slot.lock().await;
        Some(SessionView::from(&*session))
    }

    /// Sessions that have not been ended
    pub async fn active_sessions(&self) -> usize {
        let registry = self.registry.read().await;
        registry.sessions.len().saturating_sub(registry.ended.len())
    }

    /// Sessions held in memory, ended ones included
    pub async fn retained_sessions(&self) -> usize {
        self.registry.read().await.sessions.len()
    }
}

fn transition_error(e: InvalidTransition) -> AgoraError {
    AgoraError::Internal(e.to_string())
}

/// Where a classified turn goes next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Answer,
    Boundary,
    Repair(RepairKind),
}

/// Pick the response path for a classified turn
pub fn route(session: &Session, classification: &Classification, text: &str) -> Route {
    if classification.is_fallback() {
        return Route::Repair(RepairKind::Bounded);
    }
    match classification.verdict {
        Verdict::InScope => Route::Answer,
        Verdict::OutOfScope => Route::Boundary,
        Verdict::Ambiguous => {
            if session.consecutive_ambiguous() + 1 >= PROACTIVE_AFTER || session.is_repetition(text) {
                Route::Repair(RepairKind::Proactive)
            } else {
                Route::Repair(RepairKind::Clarify)
            }
        }
    }
}

/// Classifier input for the next message of a session
pub fn scope_input(session: &Session, text: &str, history_window: usize) -> ScopeInput {
    ScopeInput {
        text: text.to_string(),
        recent: session
            .recent_turns(history_window)
            .iter()
            .map(|t| (t.role, t.text.clone()))
            .collect::<Vec<(Role, String)>>(),
        scope_memory: session.scope_memory().entries().cloned().collect(),
    }
}

/// Exclusive hold on a session for the duration of one turn.
///
/// Tracks the states the turn visits and mirrors them onto the session.
/// Dropping the guard without `commit` reverts the session.
pub struct TurnGuard {
    session: OwnedMutexGuard<Session>,
    tracker: StateTracker,
    committed: bool,
}

impl TurnGuard {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn advance(&mut self, to: SessionState) -> Result<(), AgoraError> {
        self.tracker.advance(to).map_err(transition_error)?;
        self.session.set_state(to).map_err(transition_error)
    }

    pub fn state(&self) -> SessionState {
        self.tracker.current()
    }

    /// States visited so far, starting with Classifying
    pub fn path(&self) -> Vec<SessionState> {
        self.tracker.path().to_vec()
    }

    /// Append both turns and return the session to AwaitingTurn
    pub fn commit(mut self, user: Turn, agent: Turn) -> Result<(), AgoraError> {
        if !self.state().is_response() {
            return Err(AgoraError::Internal(format!(
                "cannot commit a turn from state {}",
                self.state()
            )));
        }
        self.session.commit_exchange(user, agent);
        self.session
            .set_state(SessionState::AwaitingTurn)
            .map_err(transition_error)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if self.committed || self.session.state() == SessionState::AwaitingTurn {
            return;
        }
        warn!(
            "Session {} turn abandoned in {}, reverting",
            self.session.id,
            self.session.state()
        );
        if let Err(e) = self.session.set_state(SessionState::AwaitingTurn) {
            warn!("Session {} could not revert: {}", self.session.id, e);
        }
    }
}
