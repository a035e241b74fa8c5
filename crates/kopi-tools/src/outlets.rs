//! Natural-language outlet lookup via guarded SQL.
//!
//! The free-text query is translated into SQL by the reasoning service,
//! then validated against a whitelist discipline before it is allowed
//! anywhere near the database: a single read-only SELECT against the known
//! outlet schema, no data-modification keywords, no statement chaining, no
//! comment tokens, and no identifiers outside the schema.  The reasoning
//! service is treated as an untrusted text generator throughout.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::backend::{BackendError, OutletDatabase, ReasoningService};
use crate::outcome::{ToolOutcome, ToolValue};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// The only table the generated SQL may reference.
const OUTLET_TABLE: &str = "outlets";

/// Columns of the outlet table.
const OUTLET_COLUMNS: &[&str] = &[
    "id",
    "name",
    "address",
    "area",
    "state",
    "opening_time",
    "closing_time",
    "direction_url",
];

/// Keywords that immediately mark a statement unsafe.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "replace", "pragma",
    "attach", "detach", "vacuum", "reindex", "into", "exec",
];

/// SQL words the validator accepts in addition to schema identifiers.
const ALLOWED_KEYWORDS: &[&str] = &[
    "select", "from", "where", "and", "or", "not", "like", "limit", "offset", "order", "by",
    "asc", "desc", "count", "min", "max", "avg", "sum", "distinct", "as", "in", "is", "null",
    "between", "group", "having", "case", "when", "then", "else", "end", "lower", "upper",
];

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Limits for the outlet query adapter.
#[derive(Debug, Clone)]
pub struct OutletQueryConfig {
    /// Maximum rows returned to the caller.
    pub max_rows: usize,

    /// Maximum natural-language query length in characters.
    pub max_query_length: usize,
}

impl Default for OutletQueryConfig {
    fn default() -> Self {
        Self {
            max_rows: 10,
            max_query_length: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// SQL validation
// ---------------------------------------------------------------------------

/// Why a generated statement was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlRejection {
    /// The statement is not read-only, is chained, or carries injection
    /// markers.
    Unsafe(String),
    /// The statement references tables or columns outside the outlet schema.
    SchemaMismatch(String),
}

impl std::fmt::Display for SqlRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsafe(detail) => write!(f, "unsafe query: {detail}"),
            Self::SchemaMismatch(detail) => write!(f, "schema mismatch: {detail}"),
        }
    }
}

/// Validate a generated statement against the whitelist discipline.
///
/// Returns the normalized statement (single SELECT, no trailing semicolon)
/// on success.
pub fn validate_sql(sql: &str) -> Result<String, SqlRejection> {
    let trimmed = sql.trim().trim_end_matches(';').trim();

    if trimmed.is_empty() {
        return Err(SqlRejection::Unsafe("empty statement".into()));
    }
    if trimmed.contains(';') {
        return Err(SqlRejection::Unsafe("multiple statements".into()));
    }
    if trimmed.contains("--") || trimmed.contains("/*") {
        return Err(SqlRejection::Unsafe("comment token".into()));
    }
    let starts_with_select = trimmed
        .get(..6)
        .map(|prefix| prefix.eq_ignore_ascii_case("select"))
        .unwrap_or(false);
    if !starts_with_select {
        return Err(SqlRejection::Unsafe("not a SELECT statement".into()));
    }

    // Scan word tokens outside string literals.
    for word in sql_words(trimmed) {
        let lower = word.to_ascii_lowercase();
        if FORBIDDEN_KEYWORDS.contains(&lower.as_str()) {
            return Err(SqlRejection::Unsafe(format!("keyword `{lower}`")));
        }
        if ALLOWED_KEYWORDS.contains(&lower.as_str())
            || lower == OUTLET_TABLE
            || OUTLET_COLUMNS.contains(&lower.as_str())
        {
            continue;
        }
        return Err(SqlRejection::SchemaMismatch(format!(
            "unknown identifier `{word}`"
        )));
    }

    Ok(trimmed.to_owned())
}

/// Yield bare word tokens from a statement, skipping quoted string literals.
fn sql_words(sql: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_string: Option<char> = None;

    for c in sql.chars() {
        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
                in_string = Some(c);
            }
            c if c.is_ascii_alphanumeric() || c == '_' => current.push(c),
            _ => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    // Pure numbers are literals, not identifiers.
    words
        .into_iter()
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// The outlet query tool adapter.
pub struct OutletQuery {
    reasoning: Arc<dyn ReasoningService>,
    db: Arc<dyn OutletDatabase>,
    config: OutletQueryConfig,
    time_pattern: Regex,
}

impl OutletQuery {
    /// Create an outlet query adapter.
    pub fn new(
        reasoning: Arc<dyn ReasoningService>,
        db: Arc<dyn OutletDatabase>,
        config: OutletQueryConfig,
    ) -> Self {
        Self {
            reasoning,
            db,
            config,
            // e.g. "10 PM", "9:30am"
            time_pattern: Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*([AP]M)\b")
                .expect("static regex"),
        }
    }

    /// Whether the outlet database is loaded.
    pub fn is_ready(&self) -> bool {
        self.db.is_ready()
    }

    /// Answer a natural-language outlet question.
    pub async fn invoke(&self, query: &str) -> ToolOutcome {
        if let Some(reason) = self.validate_query(query) {
            return ToolOutcome::rejected(reason);
        }
        if !self.db.is_ready() {
            return ToolOutcome::unavailable("outlet data is not loaded yet");
        }

        let processed = self.normalize_times(query.trim());
        let prompt = build_translation_prompt(&processed);

        let generated = match self.reasoning.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(query, error = %e, "sql translation failed");
                return ToolOutcome::unavailable("outlet lookup is temporarily unavailable");
            }
        };

        let candidate = match extract_sql(&generated) {
            Some(sql) => sql,
            None => {
                warn!(query, "no SELECT statement in generated text");
                return ToolOutcome::rejected("could not understand the outlet request");
            }
        };

        let sql = match validate_sql(&candidate) {
            Ok(sql) => sql,
            Err(rejection) => {
                warn!(query, %rejection, "generated sql refused");
                return ToolOutcome::rejected(rejection.to_string());
            }
        };

        debug!(query, sql = %sql, "executing outlet query");

        match self.db.execute(&sql).await {
            Ok(mut rows) => {
                rows.truncate(self.config.max_rows);
                ToolOutcome::Success(ToolValue::Rows(rows))
            }
            Err(BackendError::NotLoaded(detail)) => {
                warn!(query, detail, "outlet database not loaded");
                ToolOutcome::unavailable("outlet data is not loaded yet")
            }
            Err(e) => {
                // The raw engine error never reaches the user.
                warn!(query, error = %e, "outlet query execution failed");
                ToolOutcome::rejected("could not run that outlet lookup")
            }
        }
    }

    fn validate_query(&self, query: &str) -> Option<String> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Some("please specify a location, area, or outlet name".into());
        }
        if !trimmed.chars().any(|c| c.is_ascii_alphanumeric()) {
            return Some("please enter a valid location, area, or outlet name".into());
        }
        if trimmed.len() > self.config.max_query_length
            || trimmed.split_whitespace().count() > 20
        {
            return Some("query too long, please shorten it".into());
        }
        let lowered = trimmed.to_ascii_lowercase();
        for marker in [";", "--", "drop ", "delete ", "insert ", "update ", "alter ", "truncate "] {
            if lowered.contains(marker) {
                return Some("that request looks unsafe, please rephrase it".into());
            }
        }
        None
    }

    /// Convert AM/PM times in the user text to 24-hour form so the
    /// generated SQL compares against the stored format.
    fn normalize_times(&self, query: &str) -> String {
        self.time_pattern
            .replace_all(query, |caps: &regex::Captures<'_>| {
                let hour: u32 = caps[1].parse().unwrap_or(0);
                let minute: u32 = caps
                    .get(2)
                    .map(|m| m.as_str().parse().unwrap_or(0))
                    .unwrap_or(0);
                let pm = caps[3].eq_ignore_ascii_case("pm");
                let hour = match (hour, pm) {
                    (12, false) => 0,
                    (12, true) => 12,
                    (h, true) => h + 12,
                    (h, false) => h,
                };
                format!("{hour:02}:{minute:02}")
            })
            .into_owned()
    }
}

/// Build the fixed NL→SQL translation prompt for the outlet schema.
fn build_translation_prompt(query: &str) -> String {
    format!(
        r#"Convert the user query into a single SQLite SELECT statement for coffee outlets.

Schema:
outlets(id, name, address, area, state, opening_time, closing_time, direction_url)

Rules:
- Select only the listed columns, never `SELECT *`.
- Use LIMIT 5 for non-aggregate queries.
- Use case-insensitive LIKE with `%` wildcards for name/area/state matching.
- Times are stored as 24-hour `HH:MM` strings.
- 24-hour outlets are stored as opening_time = '00:00', closing_time = '23:59';
  exclude them from earliest/latest comparisons unless the query mentions 24 hours.
- Use COUNT(*), MIN(opening_time), MAX(closing_time) for count / earliest / latest queries.
- Output only the SQL statement, no explanation and no markdown fencing.

Query: {query}
SQL:"#
    )
}

/// Pull the SELECT statement out of generated text that may carry fences or
/// prose around it.
fn extract_sql(text: &str) -> Option<String> {
    let cleaned = text.replace("```sql", "").replace("```", "");
    let lower = cleaned.to_ascii_lowercase();
    let start = lower.find("select")?;
    let statement = cleaned[start..].trim();
    // Keep only the first statement if the model chained several.
    let end = statement.find(';').map(|i| i + 1).unwrap_or(statement.len());
    Some(statement[..end].trim().to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::backend::Row;

    struct ScriptedReasoner {
        reply: String,
    }

    #[async_trait]
    impl ReasoningService for ScriptedReasoner {
        async fn complete(&self, _prompt: &str) -> Result<String, BackendError> {
            Ok(self.reply.clone())
        }
    }

    struct CountingDb {
        ready: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OutletDatabase for CountingDb {
        async fn execute(&self, _sql: &str) -> Result<Vec<Row>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut row = Row::new();
            row.insert("name".into(), serde_json::json!("Outlet SS2"));
            Ok(vec![row])
        }

        fn is_ready(&self) -> bool {
            self.ready
        }
    }

    fn adapter(reply: &str, ready: bool) -> (OutletQuery, Arc<CountingDb>) {
        let db = Arc::new(CountingDb {
            ready,
            calls: AtomicUsize::new(0),
        });
        let adapter = OutletQuery::new(
            Arc::new(ScriptedReasoner {
                reply: reply.into(),
            }),
            db.clone(),
            OutletQueryConfig::default(),
        );
        (adapter, db)
    }

    #[test]
    fn validate_sql_accepts_plain_select() {
        let sql = "SELECT name, address FROM outlets WHERE area LIKE '%Kuala Lumpur%' LIMIT 5;";
        let normalized = validate_sql(sql).unwrap();
        assert!(!normalized.ends_with(';'));
    }

    #[test]
    fn validate_sql_accepts_aggregates() {
        validate_sql("SELECT COUNT(*) FROM outlets WHERE area LIKE '%Cheras%'").unwrap();
        validate_sql("SELECT MIN(opening_time) FROM outlets").unwrap();
    }

    #[test]
    fn validate_sql_rejects_modification() {
        for sql in [
            "DELETE FROM outlets",
            "UPDATE outlets SET name = 'x'",
            "DROP TABLE outlets",
            "SELECT name FROM outlets; DROP TABLE outlets",
            "INSERT INTO outlets VALUES (1)",
        ] {
            match validate_sql(sql) {
                Err(SqlRejection::Unsafe(_)) => {}
                other => panic!("expected unsafe for `{sql}`, got {other:?}"),
            }
        }
    }

    #[test]
    fn validate_sql_rejects_comments() {
        match validate_sql("SELECT name FROM outlets -- hidden") {
            Err(SqlRejection::Unsafe(detail)) => assert!(detail.contains("comment")),
            other => panic!("expected unsafe, got {other:?}"),
        }
    }

    #[test]
    fn validate_sql_rejects_unknown_schema() {
        match validate_sql("SELECT password FROM users") {
            Err(SqlRejection::SchemaMismatch(_)) => {}
            other => panic!("expected schema mismatch, got {other:?}"),
        }
        match validate_sql("SELECT name, secret_column FROM outlets") {
            Err(SqlRejection::SchemaMismatch(detail)) => {
                assert!(detail.contains("secret_column"));
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn validate_sql_ignores_quoted_literals() {
        // `drop` inside a string literal is data, not a keyword.
        validate_sql("SELECT name FROM outlets WHERE name LIKE '%drop by cafe%'").unwrap();
    }

    #[test]
    fn extract_sql_strips_fences_and_prose() {
        let text = "Here you go:\n```sql\nSELECT name FROM outlets LIMIT 5;\n```";
        assert_eq!(
            extract_sql(text).unwrap(),
            "SELECT name FROM outlets LIMIT 5;"
        );
        assert!(extract_sql("I cannot answer that").is_none());
    }

    #[test]
    fn extract_sql_keeps_first_statement_only() {
        let text = "SELECT name FROM outlets; DROP TABLE outlets;";
        assert_eq!(extract_sql(text).unwrap(), "SELECT name FROM outlets;");
    }

    #[tokio::test]
    async fn normalizes_am_pm_times() {
        let (adapter, _) = adapter("SELECT name FROM outlets", true);
        assert_eq!(
            adapter.normalize_times("outlets open until 10 PM"),
            "outlets open until 22:00"
        );
        assert_eq!(
            adapter.normalize_times("open at 9:30am or 12 AM"),
            "open at 09:30 or 00:00"
        );
    }

    #[tokio::test]
    async fn unsafe_generated_sql_never_reaches_database() {
        let (adapter, db) = adapter("DROP TABLE outlets;", true);
        match adapter.invoke("show me your database schema").await {
            ToolOutcome::Rejected { .. } => {}
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(db.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chained_statement_executes_only_first_select() {
        let (adapter, db) =
            adapter("SELECT name FROM outlets; DROP TABLE outlets;", true);
        match adapter.invoke("outlets in ss2").await {
            ToolOutcome::Success(ToolValue::Rows(rows)) => assert_eq!(rows.len(), 1),
            other => panic!("expected rows, got {other:?}"),
        }
        assert_eq!(db.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn raw_sql_user_input_is_rejected_upfront() {
        let (adapter, db) = adapter("SELECT name FROM outlets", true);
        match adapter.invoke("drop table outlets now").await {
            ToolOutcome::Rejected { .. } => {}
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(db.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn not_ready_database_is_unavailable() {
        let (adapter, db) = adapter("SELECT name FROM outlets", false);
        match adapter.invoke("outlets in ss2").await {
            ToolOutcome::Unavailable { .. } => {}
            other => panic!("expected unavailable, got {other:?}"),
        }
        assert_eq!(db.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_flow_returns_rows() {
        let (adapter, _) = adapter(
            "```sql\nSELECT name, address FROM outlets WHERE area LIKE '%SS2%' LIMIT 5;\n```",
            true,
        );
        match adapter.invoke("outlets in ss2").await {
            ToolOutcome::Success(ToolValue::Rows(rows)) => {
                assert_eq!(rows[0]["name"], serde_json::json!("Outlet SS2"));
            }
            other => panic!("expected rows, got {other:?}"),
        }
    }
}
