//! Agent error types.
//!
//! All agent subsystems surface errors through [`AgentError`].  Every variant
//! maps to exactly one [`ErrorCategory`], which drives how the turn
//! controller reports the failure and whether the turn is committed to
//! session memory.

/// Coarse failure categories the controller reasons about.
///
/// Recoverable categories (`InputRejected`, `BackendUnavailable`) produce a
/// fallback reply that is committed to memory; unrecoverable ones
/// (`ReasoningFailure`, `Timeout`, `InternalFault`) leave the session
/// history untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The user's input was rejected before any tool ran.
    InputRejected,
    /// A tool backend exists but cannot serve the request right now.
    BackendUnavailable,
    /// The reasoning service failed or produced unusable output.
    ReasoningFailure,
    /// A stage exceeded its time budget.
    Timeout,
    /// A bug or unexpected internal condition.
    InternalFault,
}

/// Unified error type for the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Input errors --------------------------------------------------------
    /// The user's query failed boundary validation.
    #[error("input rejected: {reason}")]
    InputRejected { reason: String },

    // -- Backend errors ------------------------------------------------------
    /// A tool backend is not loaded or temporarily unreachable.
    #[error("backend unavailable for `{tool}`: {reason}")]
    BackendUnavailable { tool: String, reason: String },

    // -- Reasoning errors ----------------------------------------------------
    /// An HTTP request to the reasoning provider failed.
    #[error("reasoning request failed: {reason}")]
    ReasoningRequestFailed { reason: String },

    /// The reasoning response could not be parsed into the expected format.
    #[error("reasoning response parse error: {reason}")]
    ReasoningParseFailed { reason: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Timing errors -------------------------------------------------------
    /// A stage of the turn ran past its deadline.
    #[error("timed out during {stage}")]
    Timeout { stage: String },

    /// The session was still busy with a previous turn when the wait budget
    /// ran out.
    #[error("session `{session_id}` busy")]
    SessionBusy { session_id: String },

    // -- Configuration errors ------------------------------------------------
    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// The failure category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InputRejected { .. } => ErrorCategory::InputRejected,
            Self::BackendUnavailable { .. } => ErrorCategory::BackendUnavailable,
            Self::ReasoningRequestFailed { .. }
            | Self::ReasoningParseFailed { .. }
            | Self::MissingApiKey { .. } => ErrorCategory::ReasoningFailure,
            Self::Timeout { .. } | Self::SessionBusy { .. } => ErrorCategory::Timeout,
            Self::ConfigError { .. } | Self::Json(_) | Self::Internal(_) => {
                ErrorCategory::InternalFault
            }
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::ReasoningRequestFailed {
            reason: err.to_string(),
        }
    }
}
