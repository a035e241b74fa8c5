//! The closed tool set and the uniform invocation result contract.

use serde::{Deserialize, Serialize};

use crate::backend::{Row, Snippet};

// ---------------------------------------------------------------------------
// Tool kinds
// ---------------------------------------------------------------------------

/// The closed set of tools the planner may select.
///
/// Adding a tool means adding a variant here, an adapter module, and one arm
/// in the controller's dispatch match — there is deliberately no open-ended
/// name-based dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Arithmetic expression evaluation.
    Calculator,
    /// Ranked retrieval over product descriptions.
    ProductSearch,
    /// Natural-language outlet lookup translated to guarded SQL.
    OutletQuery,
}

impl ToolKind {
    /// The wire name used in planner prompts and parsed planner output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calculator => "calculator",
            Self::ProductSearch => "product_search",
            Self::OutletQuery => "outlet_query",
        }
    }

    /// Parse a wire name into a tool kind.  Unknown names return `None`;
    /// callers must treat that as an ambiguous plan, never as a tool call.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "calculator" => Some(Self::Calculator),
            "product_search" => Some(Self::ProductSearch),
            "outlet_query" => Some(Self::OutletQuery),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Invocation results
// ---------------------------------------------------------------------------

/// The result of one tool invocation.
///
/// `Unavailable` distinguishes a backend that is not ready (index not loaded,
/// database absent) from input the adapter refused — the controller maps the
/// two to different failure categories.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    /// The tool produced a value.
    Success(ToolValue),
    /// The argument was rejected by the adapter's sanitization rules.
    Rejected { reason: String },
    /// The backing service is not ready to serve requests.
    Unavailable { reason: String },
}

impl ToolOutcome {
    /// Convenience constructor for a rejection.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for an unavailable backend.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Whether this outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Successful tool output, tagged per tool.
#[derive(Debug, Clone)]
pub enum ToolValue {
    /// Calculator result, kept alongside the evaluated expression so the
    /// reply can echo it back.
    Number { expression: String, value: f64 },
    /// Ranked product snippets with relevance scores.
    Snippets(Vec<Snippet>),
    /// Outlet rows as column → value maps.
    Rows(Vec<Row>),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_kind_round_trips_wire_names() {
        for kind in [
            ToolKind::Calculator,
            ToolKind::ProductSearch,
            ToolKind::OutletQuery,
        ] {
            assert_eq!(ToolKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn unknown_tool_name_is_none() {
        assert_eq!(ToolKind::parse("shell_execute"), None);
        assert_eq!(ToolKind::parse(""), None);
        assert_eq!(ToolKind::parse("Calculator"), None);
    }

    #[test]
    fn tool_kind_serde_uses_snake_case() {
        let json = serde_json::to_string(&ToolKind::ProductSearch).unwrap();
        assert_eq!(json, "\"product_search\"");
    }
}
