//! Turn controller.
//!
//! Drives each user query through the turn lifecycle: receive, plan, act
//! (directly or through one tool), synthesize a reply, and commit the
//! exchange to session memory.  The controller is the only component that
//! touches session history, so the commit rules live here:
//!
//! - rejected input and unavailable backends commit a fallback reply, so the
//!   user sees the failure in context later;
//! - reasoning failures and timeouts commit nothing — the turn never
//!   happened as far as memory is concerned.
//!
//! Every turn runs under a hard deadline; a single reasoning retry and a
//! single re-plan after a failed tool call are the only recovery loops.

use std::sync::Arc;

use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use kopi_tools::backend::{OutletDatabase, ReasoningService, RetrievalBackend, Row};
use kopi_tools::calculator::{Calculator, CalculatorConfig};
use kopi_tools::outlets::{OutletQuery, OutletQueryConfig};
use kopi_tools::products::{ProductSearch, ProductSearchConfig};
use kopi_tools::{ToolKind, ToolOutcome, ToolValue};

use crate::config::KopiConfig;
use crate::error::{AgentError, ErrorCategory, Result};
use crate::planner::{PlanDecision, Planner};
use crate::session::{Role, SessionStore, TurnEntry};

// ---------------------------------------------------------------------------
// Turn results
// ---------------------------------------------------------------------------

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// The agent produced a real answer (or a clarifying question).
    Answered,
    /// A recoverable failure produced a fallback reply, committed to memory.
    Fallback,
    /// The turn failed without committing anything.
    Failed,
}

/// The reply handed back to the caller.  `handle_turn` always returns one of
/// these; failures are folded into `status` rather than surfaced as errors.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub text: String,
    pub status: TurnStatus,
    /// The tool that answered, if one did.
    pub tool_used: Option<ToolKind>,
}

/// Backend load state, for startup banners and health checks.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub products_loaded: bool,
    pub outlets_loaded: bool,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

const INPUT_MAX_LENGTH: usize = 2_000;

const CHAT_PROMPT: &str = "You are a friendly assistant for a Malaysian coffee chain. \
Answer the customer's question briefly and helpfully, using only the conversation so far. \
If you genuinely don't know, say so.";

/// The conversational agent: planner, tools, and session memory behind one
/// `handle_turn` entry point.
pub struct Controller {
    config: KopiConfig,
    planner: Planner,
    reasoning: Arc<dyn ReasoningService>,
    calculator: Calculator,
    products: ProductSearch,
    outlets: OutletQuery,
    sessions: SessionStore,
}

impl Controller {
    /// Assemble a controller from its collaborators.
    pub fn new(
        config: KopiConfig,
        reasoning: Arc<dyn ReasoningService>,
        retrieval: Arc<dyn RetrievalBackend>,
        outlet_db: Arc<dyn OutletDatabase>,
    ) -> Self {
        let planner = Planner::new(Arc::clone(&reasoning));
        let calculator = Calculator::new(CalculatorConfig::default());
        let products = ProductSearch::new(retrieval, ProductSearchConfig::default());
        let outlets = OutletQuery::new(
            Arc::clone(&reasoning),
            outlet_db,
            OutletQueryConfig::default(),
        );

        Self {
            config,
            planner,
            reasoning,
            calculator,
            products,
            outlets,
            sessions: SessionStore::new(),
        }
    }

    /// Whether each tool backend is ready to serve.
    pub fn readiness(&self) -> Readiness {
        Readiness {
            products_loaded: self.products.is_ready(),
            outlets_loaded: self.outlets.is_ready(),
        }
    }

    /// Forget everything in one session.
    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        let session = self.sessions.session(session_id);
        let mut guard = session.lock_within(self.config.lock_budget()).await?;
        guard.clear();
        Ok(())
    }

    /// Snapshot of one session's full history.
    pub async fn session_history(&self, session_id: &str) -> Result<Vec<TurnEntry>> {
        let session = self.sessions.session(session_id);
        let guard = session.lock_within(self.config.lock_budget()).await?;
        Ok(guard.context_window(usize::MAX))
    }

    /// Handle one user turn end to end.
    ///
    /// Never returns an error: failures become a [`TurnReply`] with the
    /// appropriate status.  The whole turn runs under the configured
    /// deadline; if it expires, nothing is committed.
    pub async fn handle_turn(&self, session_id: &str, input: &str) -> TurnReply {
        let turn_id = Uuid::now_v7();
        let span = info_span!("turn", %turn_id, session_id);

        let outcome = tokio::time::timeout(
            self.config.turn_budget(),
            self.run_turn(session_id, input),
        )
        .instrument(span)
        .await;

        match outcome {
            Ok(reply) => reply,
            Err(_) => {
                warn!(%turn_id, session_id, "turn deadline exceeded");
                TurnReply {
                    text: "Sorry, that took too long to answer. Please try again.".to_owned(),
                    status: TurnStatus::Failed,
                    tool_used: None,
                }
            }
        }
    }

    async fn run_turn(&self, session_id: &str, input: &str) -> TurnReply {
        match self.try_turn(session_id, input).await {
            Ok(reply) => {
                info!(status = ?reply.status, tool = ?reply.tool_used, "turn finished");
                reply
            }
            Err(err) => {
                let category = err.category();
                warn!(%err, ?category, "turn failed");
                TurnReply {
                    text: failure_text(category),
                    status: TurnStatus::Failed,
                    tool_used: None,
                }
            }
        }
    }

    async fn try_turn(&self, session_id: &str, input: &str) -> Result<TurnReply> {
        let input = input.trim();
        let session = self.sessions.session(session_id);
        let mut guard = session.lock_within(self.config.lock_budget()).await?;

        // Boundary validation.  A rejected input still gets a committed
        // reply so the refusal shows up in later context windows.
        if let Some(reason) = validate_input(input) {
            let text = format!("Sorry, I can't process that: {reason}.");
            guard.append_exchange(input, &text, None);
            return Ok(TurnReply {
                text,
                status: TurnStatus::Fallback,
                tool_used: None,
            });
        }

        let window = guard.context_window(self.config.turn.window_size);
        let decision = self.plan_with_retry(&window, input).await?;

        let (text, status, tool_used) = match decision {
            PlanDecision::Ambiguous { question } => (question, TurnStatus::Answered, None),
            PlanDecision::Direct => {
                let text = self.direct_reply(&window, input).await?;
                (text, TurnStatus::Answered, None)
            }
            PlanDecision::UseTool {
                tool,
                argument,
                top_k,
            } => self.tool_turn(&window, input, tool, &argument, top_k).await?,
        };

        guard.append_exchange(input, &text, tool_used);
        Ok(TurnReply {
            text,
            status,
            tool_used,
        })
    }

    // -----------------------------------------------------------------------
    // Tool path
    // -----------------------------------------------------------------------

    /// Execute the chosen tool; on rejection or unavailability, re-plan once
    /// and try the new decision, unless it is the same invocation again.
    async fn tool_turn(
        &self,
        window: &[TurnEntry],
        input: &str,
        tool: ToolKind,
        argument: &str,
        top_k: Option<usize>,
    ) -> Result<(String, TurnStatus, Option<ToolKind>)> {
        let outcome = self.invoke_tool(tool, argument, top_k).await?;
        let (reason, kind) = match outcome {
            ToolOutcome::Success(value) => {
                return Ok((synthesize(&value), TurnStatus::Answered, Some(tool)));
            }
            ToolOutcome::Rejected { reason } => (reason, FailureKind::Rejected),
            ToolOutcome::Unavailable { reason } => (reason, FailureKind::Unavailable),
        };
        let first_failure = outcome_fallback(tool, &kind);

        warn!(%tool, %reason, "tool failed, re-planning once");
        let hinted = format!(
            "{input}\n(The {tool} tool could not be used: {reason}. \
             Pick a different approach or ask the user to clarify.)"
        );

        // A reasoning failure during the re-plan is not worth failing the
        // whole turn over; fall back to the first failure's reply.
        let Ok(second) = self.planner.decide(window, &hinted).await else {
            return Ok(first_failure);
        };

        match second {
            PlanDecision::UseTool {
                tool: t2,
                argument: a2,
                top_k: k2,
            } => {
                if t2 == tool && a2 == argument {
                    // Identical invocation would fail identically.
                    return Ok(first_failure);
                }
                match self.invoke_tool(t2, &a2, k2).await? {
                    ToolOutcome::Success(value) => {
                        Ok((synthesize(&value), TurnStatus::Answered, Some(t2)))
                    }
                    ToolOutcome::Rejected { reason } => {
                        warn!(tool = %t2, %reason, "re-planned tool also failed");
                        Ok(outcome_fallback(t2, &FailureKind::Rejected))
                    }
                    ToolOutcome::Unavailable { reason } => {
                        warn!(tool = %t2, %reason, "re-planned tool also failed");
                        Ok(outcome_fallback(t2, &FailureKind::Unavailable))
                    }
                }
            }
            PlanDecision::Direct => {
                let text = self.direct_reply(window, input).await?;
                Ok((text, TurnStatus::Answered, None))
            }
            PlanDecision::Ambiguous { question } => Ok((question, TurnStatus::Answered, None)),
        }
    }

    /// Dispatch one tool invocation under the tool deadline.
    ///
    /// The match is deliberately exhaustive over [`ToolKind`]: adding a tool
    /// fails compilation here until it gets a dispatch arm.
    async fn invoke_tool(
        &self,
        tool: ToolKind,
        argument: &str,
        top_k: Option<usize>,
    ) -> Result<ToolOutcome> {
        let invocation = async {
            match tool {
                ToolKind::Calculator => self.calculator.invoke(argument),
                ToolKind::ProductSearch => self.products.invoke(argument, top_k).await,
                ToolKind::OutletQuery => self.outlets.invoke(argument).await,
            }
        };
        tokio::time::timeout(self.config.tool_budget(), invocation)
            .await
            .map_err(|_| AgentError::Timeout {
                stage: format!("{tool} invocation"),
            })
    }

    // -----------------------------------------------------------------------
    // Reasoning with single retry
    // -----------------------------------------------------------------------

    async fn plan_with_retry(&self, window: &[TurnEntry], input: &str) -> Result<PlanDecision> {
        match self.planner.decide(window, input).await {
            Ok(decision) => Ok(decision),
            Err(err) if err.category() == ErrorCategory::ReasoningFailure => {
                warn!(%err, "planning failed, retrying once");
                tokio::time::sleep(self.config.retry_backoff()).await;
                self.planner.decide(window, input).await
            }
            Err(err) => Err(err),
        }
    }

    async fn direct_reply(&self, window: &[TurnEntry], input: &str) -> Result<String> {
        let prompt = build_chat_prompt(window, input);
        match self.reasoning.complete(&prompt).await {
            Ok(text) => Ok(text.trim().to_owned()),
            Err(err) => {
                warn!(%err, "direct reply failed, retrying once");
                tokio::time::sleep(self.config.retry_backoff()).await;
                self.reasoning
                    .complete(&prompt)
                    .await
                    .map(|t| t.trim().to_owned())
                    .map_err(|e| AgentError::ReasoningRequestFailed {
                        reason: e.to_string(),
                    })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Prompts and validation
// ---------------------------------------------------------------------------

fn build_chat_prompt(window: &[TurnEntry], input: &str) -> String {
    let mut prompt = String::from(CHAT_PROMPT);
    if !window.is_empty() {
        prompt.push_str("\n\nConversation so far:\n");
        for entry in window {
            let who = match entry.role {
                Role::User => "customer",
                Role::Agent => "assistant",
            };
            prompt.push_str(&format!("{who}: {}\n", entry.text));
        }
    }
    prompt.push_str(&format!("\ncustomer: {input}\nassistant:"));
    prompt
}

/// Boundary input checks.  Returns the rejection reason, or `None` to accept.
fn validate_input(input: &str) -> Option<&'static str> {
    if input.is_empty() {
        return Some("the message was empty");
    }
    if input.len() > INPUT_MAX_LENGTH {
        return Some("the message is too long");
    }
    let lowered = input.to_lowercase();
    // Raw SQL is never accepted as conversation input.
    for marker in ["select ", "insert ", "delete ", "drop ", "update ", "alter "] {
        if lowered.starts_with(marker) {
            return Some("it looks like raw SQL, which I don't accept");
        }
    }
    if lowered.contains(";--") || lowered.contains("; drop") || lowered.contains("; delete") {
        return Some("it contains SQL control sequences");
    }
    None
}

// ---------------------------------------------------------------------------
// Failure replies
// ---------------------------------------------------------------------------

enum FailureKind {
    Rejected,
    Unavailable,
}

fn outcome_fallback(
    tool: ToolKind,
    kind: &FailureKind,
) -> (String, TurnStatus, Option<ToolKind>) {
    let text = match (tool, kind) {
        (ToolKind::Calculator, _) => {
            "Sorry, I couldn't evaluate that expression. Could you rewrite it using plain \
             arithmetic?"
        }
        (ToolKind::ProductSearch, FailureKind::Unavailable) => {
            "Sorry, the product catalogue isn't available right now. Please try again later."
        }
        (ToolKind::ProductSearch, FailureKind::Rejected) => {
            "Sorry, I couldn't search for that. Could you describe the product differently?"
        }
        (ToolKind::OutletQuery, FailureKind::Unavailable) => {
            "Sorry, the outlet directory isn't available right now. Please try again later."
        }
        (ToolKind::OutletQuery, FailureKind::Rejected) => {
            "Sorry, I couldn't look that up. Could you ask about outlets, their hours, or \
             their locations in a different way?"
        }
    };
    (text.to_owned(), TurnStatus::Fallback, None)
}

fn failure_text(category: ErrorCategory) -> String {
    match category {
        ErrorCategory::InputRejected => {
            "Sorry, I can't process that message.".to_owned()
        }
        ErrorCategory::BackendUnavailable => {
            "Sorry, part of the service is unavailable right now. Please try again later."
                .to_owned()
        }
        ErrorCategory::ReasoningFailure => {
            "Sorry, I'm having trouble thinking right now. Please try again in a moment."
                .to_owned()
        }
        ErrorCategory::Timeout => {
            "Sorry, that took too long to answer. Please try again.".to_owned()
        }
        ErrorCategory::InternalFault => {
            "Sorry, something went wrong on my side. Please try again.".to_owned()
        }
    }
}

// ---------------------------------------------------------------------------
// Reply synthesis
// ---------------------------------------------------------------------------

/// Deterministic reply text for a successful tool value.  No second model
/// call: tool output is already structured, so the reply is assembled
/// directly from it.
fn synthesize(value: &ToolValue) -> String {
    match value {
        ToolValue::Number { expression, value } => {
            format!("The result of {expression} is {}.", format_number(*value))
        }
        ToolValue::Snippets(snippets) => {
            if snippets.is_empty() {
                return "I couldn't find any products matching that.".to_owned();
            }
            let mut text = String::from("Here's what I found:\n");
            for (i, snippet) in snippets.iter().enumerate() {
                text.push_str(&format!("{}. {}\n", i + 1, snippet.text));
            }
            text.trim_end().to_owned()
        }
        ToolValue::Rows(rows) => {
            if rows.is_empty() {
                return "No outlets matched that query.".to_owned();
            }
            let mut text = String::new();
            for row in rows {
                text.push_str(&format_row(row));
                text.push('\n');
            }
            text.trim_end().to_owned()
        }
    }
}

/// Integers render without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// One outlet row as a readable line, name first.
fn format_row(row: &Row) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(name) = row.get("name").and_then(|v| v.as_str()) {
        parts.push(name.to_owned());
    }
    for (key, value) in row {
        if key == "name" || key == "id" {
            continue;
        }
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        parts.push(format!("{key}: {rendered}"));
    }
    if parts.is_empty() {
        "(empty row)".to_owned()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopi_tools::backend::Snippet;

    #[test]
    fn rejects_raw_sql_input() {
        assert!(validate_input("SELECT * FROM outlets").is_some());
        assert!(validate_input("drop table outlets").is_some());
        assert!(validate_input("hi'; DROP TABLE outlets;--").is_some());
        assert!(validate_input("").is_some());
        assert!(validate_input(&"x".repeat(INPUT_MAX_LENGTH + 1)).is_some());
    }

    #[test]
    fn accepts_ordinary_questions() {
        assert!(validate_input("what is 2 + 2?").is_none());
        assert!(validate_input("which outlets are in SS2?").is_none());
        // Mentioning SQL words mid-sentence is fine.
        assert!(validate_input("can you select a tumbler for me?").is_none());
    }

    #[test]
    fn synthesizes_integer_without_decimal_point() {
        let text = synthesize(&ToolValue::Number {
            expression: "2 + 2 * 5".into(),
            value: 12.0,
        });
        assert_eq!(text, "The result of 2 + 2 * 5 is 12.");
    }

    #[test]
    fn synthesizes_fractional_number() {
        let text = synthesize(&ToolValue::Number {
            expression: "7 / 2".into(),
            value: 3.5,
        });
        assert_eq!(text, "The result of 7 / 2 is 3.5.");
    }

    #[test]
    fn synthesizes_numbered_product_list() {
        let text = synthesize(&ToolValue::Snippets(vec![
            Snippet {
                text: "All Day Tumbler — RM 79.00 (Tumbler)".into(),
                score: 0.9,
            },
            Snippet {
                text: "Ceramic Mug — RM 39.00 (Mug)".into(),
                score: 0.4,
            },
        ]));
        assert!(text.starts_with("Here's what I found:"));
        assert!(text.contains("1. All Day Tumbler"));
        assert!(text.contains("2. Ceramic Mug"));
    }

    #[test]
    fn synthesizes_empty_results() {
        assert_eq!(
            synthesize(&ToolValue::Snippets(vec![])),
            "I couldn't find any products matching that."
        );
        assert_eq!(
            synthesize(&ToolValue::Rows(vec![])),
            "No outlets matched that query."
        );
    }

    #[test]
    fn row_lines_put_name_first() {
        let mut row = Row::new();
        row.insert("closing_time".into(), serde_json::json!("22:00"));
        row.insert("name".into(), serde_json::json!("SS2 Mall"));
        let line = format_row(&row);
        assert!(line.starts_with("SS2 Mall"));
        assert!(line.contains("closing_time: 22:00"));
    }
}
