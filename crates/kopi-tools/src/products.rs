//! Semantic product retrieval adapter.
//!
//! Validates the free-text query, clamps the requested result count, and
//! delegates to the [`RetrievalBackend`].  A backend that has not loaded its
//! index yet surfaces as [`ToolOutcome::Unavailable`], distinct from a query
//! that simply matches nothing.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{BackendError, RetrievalBackend};
use crate::outcome::{ToolOutcome, ToolValue};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Limits for the product search adapter.
#[derive(Debug, Clone)]
pub struct ProductSearchConfig {
    /// Result count used when the caller does not specify one.
    pub default_top_k: usize,

    /// Hard cap on the result count, whatever the caller asks for.
    pub max_top_k: usize,

    /// Maximum query length in characters.
    pub max_query_length: usize,
}

impl Default for ProductSearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 10,
            max_query_length: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// The product search tool adapter.
pub struct ProductSearch {
    backend: Arc<dyn RetrievalBackend>,
    config: ProductSearchConfig,
}

impl ProductSearch {
    /// Create a product search adapter over the given retrieval backend.
    pub fn new(backend: Arc<dyn RetrievalBackend>, config: ProductSearchConfig) -> Self {
        Self { backend, config }
    }

    /// Whether the underlying index is loaded.
    pub fn is_ready(&self) -> bool {
        self.backend.is_ready()
    }

    /// Search for products matching `query`, returning at most `top_k`
    /// snippets (clamped to the configured cap).
    pub async fn invoke(&self, query: &str, top_k: Option<usize>) -> ToolOutcome {
        if let Some(reason) = self.validate_query(query) {
            return ToolOutcome::rejected(reason);
        }

        let k = top_k
            .unwrap_or(self.config.default_top_k)
            .clamp(1, self.config.max_top_k);

        match self.backend.search(query.trim(), k).await {
            Ok(snippets) => {
                debug!(query, k, hits = snippets.len(), "product search completed");
                ToolOutcome::Success(ToolValue::Snippets(snippets))
            }
            Err(BackendError::NotLoaded(detail)) => {
                warn!(query, detail, "product index not loaded");
                ToolOutcome::unavailable("product search is not ready yet")
            }
            Err(e) => {
                warn!(query, error = %e, "product search backend failure");
                ToolOutcome::unavailable("product search is temporarily unavailable")
            }
        }
    }

    fn validate_query(&self, query: &str) -> Option<String> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Some("please enter a product keyword".into());
        }
        if !trimmed.chars().any(|c| c.is_ascii_alphanumeric()) {
            return Some("please enter a valid product keyword".into());
        }
        if trimmed.len() > self.config.max_query_length
            || trimmed.split_whitespace().count() > 20
        {
            return Some("query too long, please shorten it".into());
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::backend::Snippet;

    struct FixedBackend {
        ready: bool,
        snippets: Vec<Snippet>,
    }

    #[async_trait]
    impl RetrievalBackend for FixedBackend {
        async fn search(&self, _query: &str, k: usize) -> Result<Vec<Snippet>, BackendError> {
            if !self.ready {
                return Err(BackendError::NotLoaded("index not built".into()));
            }
            Ok(self.snippets.iter().take(k).cloned().collect())
        }

        fn is_ready(&self) -> bool {
            self.ready
        }
    }

    fn snippets(n: usize) -> Vec<Snippet> {
        (0..n)
            .map(|i| Snippet {
                text: format!("product {i}"),
                score: 1.0 - i as f64 * 0.1,
            })
            .collect()
    }

    #[tokio::test]
    async fn returns_ranked_snippets() {
        let adapter = ProductSearch::new(
            Arc::new(FixedBackend {
                ready: true,
                snippets: snippets(3),
            }),
            ProductSearchConfig::default(),
        );

        match adapter.invoke("tumbler", None).await {
            ToolOutcome::Success(ToolValue::Snippets(hits)) => {
                assert_eq!(hits.len(), 3);
                assert!(hits[0].score >= hits[1].score);
            }
            other => panic!("expected snippets, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn top_k_is_capped() {
        let adapter = ProductSearch::new(
            Arc::new(FixedBackend {
                ready: true,
                snippets: snippets(50),
            }),
            ProductSearchConfig::default(),
        );

        match adapter.invoke("mug", Some(40)).await {
            ToolOutcome::Success(ToolValue::Snippets(hits)) => assert_eq!(hits.len(), 10),
            other => panic!("expected snippets, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_loaded_backend_is_unavailable() {
        let adapter = ProductSearch::new(
            Arc::new(FixedBackend {
                ready: false,
                snippets: vec![],
            }),
            ProductSearchConfig::default(),
        );

        match adapter.invoke("mug", None).await {
            ToolOutcome::Unavailable { .. } => {}
            other => panic!("expected unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let adapter = ProductSearch::new(
            Arc::new(FixedBackend {
                ready: true,
                snippets: vec![],
            }),
            ProductSearchConfig::default(),
        );

        match adapter.invoke("   ", None).await {
            ToolOutcome::Rejected { .. } => {}
            other => panic!("expected rejection, got {other:?}"),
        }
        match adapter.invoke("!!!", None).await {
            ToolOutcome::Rejected { .. } => {}
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
