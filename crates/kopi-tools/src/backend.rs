//! Traits for the external collaborators the adapters delegate to.
//!
//! The agent consumes three capabilities it does not own: a retrieval index
//! over product descriptions, a read-only outlet database, and a language
//! reasoning service.  Each is specified here at its interface boundary so
//! production backends and test mocks are interchangeable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single retrieved product snippet with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    /// Display text for the matched product.
    pub text: String,
    /// Relevance score in `[0, 1]`, higher is better.
    pub score: f64,
}

/// One result row from the outlet database, column name → JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Errors surfaced by backends.
///
/// `NotLoaded` is a distinct condition: a backend that has not finished
/// loading is reported as unavailable to the user, while an operational
/// failure is an internal fault.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend has not been loaded yet (index not built, database
    /// file absent).  Distinguishable from "no results".
    #[error("backend not loaded: {0}")]
    NotLoaded(String),

    /// The backend rejected the request (e.g. the SQL engine refused the
    /// statement).
    #[error("backend rejected request: {0}")]
    Rejected(String),

    /// The backend failed operationally.
    #[error("backend failure: {0}")]
    Failed(String),
}

/// Ranked retrieval over product descriptions.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Return up to `k` snippets ranked by relevance to `query`.
    ///
    /// An empty result is a valid answer; a backend that is not loaded
    /// returns [`BackendError::NotLoaded`] instead.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Snippet>, BackendError>;

    /// Whether the backend is loaded and ready to serve queries.
    fn is_ready(&self) -> bool;
}

/// Read-only access to the tabular outlet store.
#[async_trait]
pub trait OutletDatabase: Send + Sync {
    /// Execute a validated, read-only SQL statement and return its rows.
    ///
    /// Implementations must reject anything that is not a SELECT; the
    /// adapter validates before calling, this is the second line.
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, BackendError>;

    /// Whether the outlet data has been loaded.
    fn is_ready(&self) -> bool;
}

/// The language reasoning service, treated purely as an untrusted text
/// oracle.  Its output is never executed or routed without validation.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Complete a prompt and return the raw generated text.
    async fn complete(&self, prompt: &str) -> Result<String, BackendError>;
}
