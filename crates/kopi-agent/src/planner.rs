//! Turn planner.
//!
//! Decides, for each user query, whether to answer directly, invoke one of
//! the tools, or ask the user to clarify.  The decision comes back from the
//! reasoning service as JSON, which is treated as untrusted: anything that
//! fails to parse or validate degrades to a clarification request instead of
//! being acted on.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use kopi_tools::ToolKind;
use kopi_tools::backend::ReasoningService;

use crate::error::{AgentError, Result};
use crate::session::{Role, TurnEntry};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// What the planner chose to do with a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDecision {
    /// Answer conversationally, no tool involved.
    Direct,
    /// Invoke one tool with the given argument.
    UseTool {
        tool: ToolKind,
        argument: String,
        /// Result count hint, only meaningful for product search.
        top_k: Option<usize>,
    },
    /// The query is missing information; ask the user.
    Ambiguous { question: String },
}

/// Raw decision as the model emits it.  Deliberately loose: validation
/// happens in [`parse_decision`], not in serde.
#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    tool: String,
    #[serde(default)]
    argument: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    question: String,
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

const ROUTING_PROMPT: &str = r#"You route customer questions for a coffee chain assistant.

Available tools:
- calculator: evaluates an arithmetic expression. Argument: the expression, e.g. "2 + 2 * 5".
- product_search: finds drinkware products. Argument: search keywords, e.g. "insulated tumbler".
- outlet_query: answers questions about outlet locations and opening hours. Argument: the question in plain English, e.g. "which outlets in Petaling Jaya close after 9pm".

Reply with a single JSON object and nothing else:
- to use a tool: {"action": "tool", "tool": "<name>", "argument": "<argument>"}
- to answer from conversation alone: {"action": "direct"}
- if the question is missing information: {"action": "clarify", "question": "<what to ask>"}

For product_search you may add "top_k": <1-10> when the user asks for a specific number of results."#;

/// Routes each query to a tool, a direct answer, or a clarification.
pub struct Planner {
    reasoning: Arc<dyn ReasoningService>,
}

impl Planner {
    pub fn new(reasoning: Arc<dyn ReasoningService>) -> Self {
        Self { reasoning }
    }

    /// Decide what to do with `query` given the recent conversation.
    pub async fn decide(&self, history: &[TurnEntry], query: &str) -> Result<PlanDecision> {
        let prompt = build_routing_prompt(history, query);
        let raw = self
            .reasoning
            .complete(&prompt)
            .await
            .map_err(|e| AgentError::ReasoningRequestFailed {
                reason: e.to_string(),
            })?;

        let decision = parse_decision(&raw);
        debug!(?decision, "plan decided");
        Ok(decision)
    }
}

/// Assemble the routing prompt: instructions, recent history, then the query.
fn build_routing_prompt(history: &[TurnEntry], query: &str) -> String {
    let mut prompt = String::from(ROUTING_PROMPT);
    if !history.is_empty() {
        prompt.push_str("\n\nRecent conversation:\n");
        for entry in history {
            let who = match entry.role {
                Role::User => "user",
                Role::Agent => "assistant",
            };
            prompt.push_str(&format!("{who}: {}\n", entry.text));
        }
    }
    prompt.push_str(&format!("\nQuestion: {query}\n"));
    prompt
}

// ---------------------------------------------------------------------------
// Untrusted-output validation
// ---------------------------------------------------------------------------

/// Parse and validate the model's routing reply.
///
/// Never fails: any output that does not survive validation becomes an
/// [`PlanDecision::Ambiguous`] asking the user to rephrase.
pub fn parse_decision(raw: &str) -> PlanDecision {
    let Some(block) = extract_json_block(raw) else {
        warn!("routing reply contained no JSON object");
        return rephrase();
    };

    let parsed: RawDecision = match serde_json::from_str(&block) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "routing reply was not valid JSON");
            return rephrase();
        }
    };

    match parsed.action.as_str() {
        "direct" => PlanDecision::Direct,
        "clarify" => {
            let question = if parsed.question.trim().is_empty() {
                "Could you give me a bit more detail?".to_owned()
            } else {
                parsed.question
            };
            PlanDecision::Ambiguous { question }
        }
        "tool" => {
            let Some(tool) = ToolKind::parse(&parsed.tool) else {
                warn!(tool = %parsed.tool, "routing reply named an unknown tool");
                return rephrase();
            };
            let argument = parsed.argument.trim().to_owned();
            if argument.is_empty() {
                warn!(tool = %parsed.tool, "routing reply had an empty argument");
                return rephrase();
            }
            PlanDecision::UseTool {
                tool,
                argument,
                top_k: parsed.top_k,
            }
        }
        other => {
            warn!(action = %other, "routing reply used an unknown action");
            rephrase()
        }
    }
}

fn rephrase() -> PlanDecision {
    PlanDecision::Ambiguous {
        question: "I didn't quite catch that. Could you rephrase your question?".to_owned(),
    }
}

/// Pull the first JSON object out of a reply, tolerating code fences and
/// surrounding prose.
fn extract_json_block(raw: &str) -> Option<String> {
    let trimmed = raw.trim();

    // Strip a ```json ... ``` fence if present.
    let inner = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.split("```").next().unwrap_or(rest)
    } else {
        trimmed
    };

    let start = inner.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in inner[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(inner[start..=start + i].to_owned());
                }
            }
            _ => {}
        }
    }
    None
}
