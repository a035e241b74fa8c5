//! Per-session conversation memory.
//!
//! Sessions are keyed by caller-supplied id and created on first use.  Each
//! session owns its history behind a `tokio::sync::Mutex`, so turns within
//! one session are strictly serialized while different sessions proceed in
//! parallel.  A turn that cannot acquire the lock within its wait budget
//! fails with [`AgentError::SessionBusy`] rather than queueing forever.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use kopi_tools::ToolKind;

use crate::error::{AgentError, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Who produced a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

/// One entry in a session's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEntry {
    pub role: Role,
    pub text: String,
    /// The tool that produced this reply, if any.  Only set on agent entries.
    pub tool_used: Option<ToolKind>,
    pub timestamp: DateTime<Utc>,
}

impl TurnEntry {
    fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            tool_used: None,
            timestamp: Utc::now(),
        }
    }

    fn agent(text: impl Into<String>, tool_used: Option<ToolKind>) -> Self {
        Self {
            role: Role::Agent,
            text: text.into(),
            tool_used,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One conversation, with history behind a per-session lock.
pub struct Session {
    id: String,
    history: Arc<Mutex<Vec<TurnEntry>>>,
}

impl Session {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire the session lock, waiting at most `wait`.
    ///
    /// The returned guard holds the lock for the remainder of the turn, so a
    /// second turn on the same session blocks here until the first commits
    /// or fails.
    pub async fn lock_within(&self, wait: Duration) -> Result<SessionGuard> {
        let history = Arc::clone(&self.history);
        match tokio::time::timeout(wait, history.lock_owned()).await {
            Ok(guard) => Ok(SessionGuard {
                session_id: self.id.clone(),
                history: guard,
            }),
            Err(_) => Err(AgentError::SessionBusy {
                session_id: self.id.clone(),
            }),
        }
    }
}

/// Exclusive access to one session's history for the duration of a turn.
pub struct SessionGuard {
    session_id: String,
    history: OwnedMutexGuard<Vec<TurnEntry>>,
}

impl SessionGuard {
    /// The most recent `n` entries, oldest first.
    pub fn context_window(&self, n: usize) -> Vec<TurnEntry> {
        let start = self.history.len().saturating_sub(n);
        self.history[start..].to_vec()
    }

    /// Total entries stored (the full history, not the window).
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Commit a completed exchange: the user query and the agent reply are
    /// appended together, so the history never holds a user entry without
    /// its reply.
    pub fn append_exchange(
        &mut self,
        user_text: impl Into<String>,
        agent_text: impl Into<String>,
        tool_used: Option<ToolKind>,
    ) {
        self.history.push(TurnEntry::user(user_text));
        self.history.push(TurnEntry::agent(agent_text, tool_used));
        debug!(session_id = %self.session_id, entries = self.history.len(), "exchange committed");
    }

    /// Drop all history for this session.
    pub fn clear(&mut self) {
        self.history.clear();
        debug!(session_id = %self.session_id, "session cleared");
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// All live sessions, keyed by caller-supplied id.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session, creating it on first use.
    pub fn session(&self, id: &str) -> Arc<Session> {
        self.sessions
            .entry(id.to_owned())
            .or_insert_with(|| Arc::new(Session::new(id)))
            .clone()
    }

    /// Remove a session and its history entirely.
    pub fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn first_use_creates_empty_session() {
        let store = SessionStore::new();
        let session = store.session("alice");
        let guard = session.lock_within(WAIT).await.unwrap();
        assert!(guard.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn window_returns_most_recent_oldest_first() {
        let store = SessionStore::new();
        let session = store.session("alice");
        let mut guard = session.lock_within(WAIT).await.unwrap();

        for i in 0..5 {
            guard.append_exchange(format!("q{i}"), format!("a{i}"), None);
        }
        assert_eq!(guard.len(), 10);

        let window = guard.context_window(4);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].text, "q3");
        assert_eq!(window[0].role, Role::User);
        assert_eq!(window[3].text, "a4");
        assert_eq!(window[3].role, Role::Agent);
    }

    #[tokio::test]
    async fn window_larger_than_history_returns_everything() {
        let store = SessionStore::new();
        let session = store.session("alice");
        let mut guard = session.lock_within(WAIT).await.unwrap();
        guard.append_exchange("hi", "hello", None);

        assert_eq!(guard.context_window(50).len(), 2);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = SessionStore::new();
        {
            let alice = store.session("alice");
            let mut guard = alice.lock_within(WAIT).await.unwrap();
            guard.append_exchange("what is 2+2", "4", Some(ToolKind::Calculator));
        }

        let bob = store.session("bob");
        let guard = bob.lock_within(WAIT).await.unwrap();
        assert!(guard.is_empty());
    }

    #[tokio::test]
    async fn busy_session_times_out() {
        let store = SessionStore::new();
        let session = store.session("alice");
        let _held = session.lock_within(WAIT).await.unwrap();

        let result = session.lock_within(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(AgentError::SessionBusy { .. })));
    }

    #[tokio::test]
    async fn lock_released_after_guard_drop() {
        let store = SessionStore::new();
        let session = store.session("alice");
        {
            let mut guard = session.lock_within(WAIT).await.unwrap();
            guard.append_exchange("hi", "hello", None);
        }
        let guard = session.lock_within(WAIT).await.unwrap();
        assert_eq!(guard.len(), 2);
    }

    #[tokio::test]
    async fn remove_drops_the_session() {
        let store = SessionStore::new();
        store.session("alice");
        store.remove("alice");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_history_but_keeps_session() {
        let store = SessionStore::new();
        let session = store.session("alice");
        let mut guard = session.lock_within(WAIT).await.unwrap();
        guard.append_exchange("hi", "hello", None);
        guard.clear();
        assert!(guard.is_empty());
        assert_eq!(store.len(), 1);
    }
}
