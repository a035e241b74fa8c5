//! Conversational agent runtime for kopi.
//!
//! This crate implements the core of the assistant: it takes a free-text
//! customer query, decides how to answer it, runs at most one tool, and
//! commits the exchange to per-session memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────┐     ┌──────────────┐
//! │   Planner    │────>│ Controller │────>│ Tool adapters│
//! │ (route query)│     │ (one turn) │     │ (calc/search │
//! └──────┬───────┘     └─────┬──────┘     │  /outlets)   │
//!        │                   │            └──────────────┘
//!        │             ┌─────┴──────┐
//!  ┌─────┴──────┐      │  Session   │
//!  │ LLM client │      │   store    │
//!  │  (Gemini)  │      │ (per-user) │
//!  └────────────┘      └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`controller`] -- The per-turn lifecycle, timeouts, and commit rules.
//! - [`planner`] -- Query routing with untrusted-output validation.
//! - [`session`] -- Per-session history with strict turn serialization.
//! - [`llm`] -- Gemini / OpenAI-compatible reasoning client.
//! - [`config`] -- Layered configuration (defaults, file, environment).
//! - [`error`] -- Agent error taxonomy.

pub mod config;
pub mod controller;
pub mod error;
pub mod llm;
pub mod planner;
pub mod session;

// Re-export the most commonly used types at the crate root.
pub use config::{DataSettings, KopiConfig, ReasoningSettings, TurnSettings};
pub use controller::{Controller, Readiness, TurnReply, TurnStatus};
pub use error::{AgentError, ErrorCategory, Result};
pub use llm::{LlmClient, LlmClientConfig, ReasoningProvider};
pub use planner::{PlanDecision, Planner};
pub use session::{Role, Session, SessionGuard, SessionStore, TurnEntry};
