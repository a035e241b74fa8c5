//! In-memory product retrieval index.
//!
//! Builds TF-IDF vectors over the product catalogue text and ranks matches
//! by cosine similarity.  Deterministic and read-only once loaded, so it is
//! shared freely across concurrent sessions.  Until [`ProductIndex::load`]
//! succeeds the index reports not-loaded, which the product search adapter
//! surfaces as a distinct unavailable condition.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use kopi_tools::backend::{BackendError, RetrievalBackend, Snippet};

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One drinkware product record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Product name, e.g. "All Day Tumbler 500ml".
    pub name: String,
    /// Display price, e.g. "RM 79.00".
    pub price: String,
    /// Active promotion text, if any.
    #[serde(default)]
    pub promotion: String,
    /// Category, e.g. "Tumbler".
    pub category: String,
    /// Available colours.
    #[serde(default)]
    pub colours: Vec<String>,
    /// Whether the product is in stock.
    #[serde(default = "default_true")]
    pub in_stock: bool,
    /// Free-text description used for matching.
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

impl Product {
    /// The text the index matches against.
    fn document_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.name,
            self.category,
            self.colours.join(" "),
            self.description
        )
    }

    /// The display line returned to the agent.
    fn snippet_text(&self) -> String {
        let mut text = format!("{} — {} ({})", self.name, self.price, self.category);
        if !self.promotion.is_empty() {
            text.push_str(&format!(", promo: {}", self.promotion));
        }
        if !self.in_stock {
            text.push_str(", out of stock");
        }
        text
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

struct Document {
    snippet: String,
    weights: HashMap<String, f64>,
    norm: f64,
}

struct Index {
    documents: Vec<Document>,
    idf: HashMap<String, f64>,
}

/// TF-IDF product index with cosine ranking.
#[derive(Default)]
pub struct ProductIndex {
    inner: RwLock<Option<Index>>,
}

impl ProductIndex {
    /// Create an empty, not-yet-loaded index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from product records.
    pub fn load(&self, products: Vec<Product>) -> StoreResult<usize> {
        let count = products.len();

        let tokenized: Vec<(String, Vec<String>)> = products
            .iter()
            .map(|p| (p.snippet_text(), tokenize(&p.document_text())))
            .collect();

        // Document frequency per term.
        let mut df: HashMap<String, usize> = HashMap::new();
        for (_, tokens) in &tokenized {
            let mut seen: Vec<&String> = Vec::new();
            for token in tokens {
                if !seen.contains(&token) {
                    seen.push(token);
                    *df.entry(token.clone()).or_insert(0) += 1;
                }
            }
        }

        let n = count.max(1) as f64;
        let idf: HashMap<String, f64> = df
            .into_iter()
            .map(|(term, freq)| (term, (n / freq as f64).ln() + 1.0))
            .collect();

        let documents = tokenized
            .into_iter()
            .map(|(snippet, tokens)| {
                let mut weights: HashMap<String, f64> = HashMap::new();
                for token in &tokens {
                    *weights.entry(token.clone()).or_insert(0.0) += 1.0;
                }
                for (term, w) in weights.iter_mut() {
                    *w *= idf.get(term).copied().unwrap_or(1.0);
                }
                let norm = weights.values().map(|w| w * w).sum::<f64>().sqrt();
                Document {
                    snippet,
                    weights,
                    norm,
                }
            })
            .collect();

        *self
            .inner
            .write()
            .map_err(|e| StoreError::TaskJoin(format!("lock poisoned: {e}")))? =
            Some(Index { documents, idf });

        info!(count, "product index built");
        Ok(count)
    }

    /// Load product records from a JSON array file and build the index.
    pub fn load_from_json(&self, path: impl AsRef<Path>) -> StoreResult<usize> {
        let text = std::fs::read_to_string(path)?;
        let products: Vec<Product> = serde_json::from_str(&text)?;
        self.load(products)
    }

    fn rank(&self, query: &str, k: usize) -> Result<Vec<Snippet>, BackendError> {
        let guard = self
            .inner
            .read()
            .map_err(|e| BackendError::Failed(format!("lock poisoned: {e}")))?;
        let index = guard
            .as_ref()
            .ok_or_else(|| BackendError::NotLoaded("product index not built".into()))?;

        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_weights: HashMap<String, f64> = HashMap::new();
        for token in &tokens {
            *query_weights.entry(token.clone()).or_insert(0.0) += 1.0;
        }
        for (term, w) in query_weights.iter_mut() {
            *w *= index.idf.get(term).copied().unwrap_or(1.0);
        }
        let query_norm = query_weights.values().map(|w| w * w).sum::<f64>().sqrt();
        if query_norm == 0.0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Snippet> = index
            .documents
            .iter()
            .filter_map(|doc| {
                if doc.norm == 0.0 {
                    return None;
                }
                let dot: f64 = query_weights
                    .iter()
                    .filter_map(|(term, qw)| doc.weights.get(term).map(|dw| qw * dw))
                    .sum();
                let score = dot / (query_norm * doc.norm);
                if score > 0.0 {
                    Some(Snippet {
                        text: doc.snippet.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[async_trait]
impl RetrievalBackend for ProductIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Snippet>, BackendError> {
        self.rank(query, k)
    }

    fn is_ready(&self) -> bool {
        self.inner.read().map(|g| g.is_some()).unwrap_or(false)
    }
}

/// Lowercased alphanumeric word tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> Vec<Product> {
        vec![
            Product {
                name: "All Day Tumbler 500ml".into(),
                price: "RM 79.00".into(),
                promotion: "buy 1 free 1".into(),
                category: "Tumbler".into(),
                colours: vec!["Black".into(), "Sage".into()],
                in_stock: true,
                description: "double wall stainless steel tumbler with flip lid".into(),
            },
            Product {
                name: "Ceramic Mug 350ml".into(),
                price: "RM 39.00".into(),
                promotion: String::new(),
                category: "Mug".into(),
                colours: vec!["White".into()],
                in_stock: true,
                description: "glazed ceramic coffee mug".into(),
            },
            Product {
                name: "Travel Flask 750ml".into(),
                price: "RM 99.00".into(),
                promotion: String::new(),
                category: "Flask".into(),
                colours: vec!["Navy".into()],
                in_stock: false,
                description: "insulated travel flask keeps drinks hot".into(),
            },
        ]
    }

    #[tokio::test]
    async fn not_loaded_until_load() {
        let index = ProductIndex::new();
        assert!(!index.is_ready());

        let result = index.search("tumbler", 5).await;
        assert!(matches!(result, Err(BackendError::NotLoaded(_))));

        index.load(catalogue()).unwrap();
        assert!(index.is_ready());
    }

    #[tokio::test]
    async fn ranks_relevant_product_first() {
        let index = ProductIndex::new();
        index.load(catalogue()).unwrap();

        let hits = index.search("stainless steel tumbler", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].text.contains("Tumbler"));
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0 + 1e-9);
    }

    #[tokio::test]
    async fn scores_are_descending() {
        let index = ProductIndex::new();
        index.load(catalogue()).unwrap();

        let hits = index.search("coffee mug tumbler", 5).await.unwrap();
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn respects_k() {
        let index = ProductIndex::new();
        index.load(catalogue()).unwrap();

        let hits = index.search("ml", 1).await.unwrap();
        assert!(hits.len() <= 1);
    }

    #[tokio::test]
    async fn no_match_returns_empty_not_error() {
        let index = ProductIndex::new();
        index.load(catalogue()).unwrap();

        let hits = index.search("quantum flux capacitor", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn snippet_carries_price_and_promo() {
        let index = ProductIndex::new();
        index.load(catalogue()).unwrap();

        let hits = index.search("tumbler", 1).await.unwrap();
        assert!(hits[0].text.contains("RM 79.00"));
        assert!(hits[0].text.contains("buy 1 free 1"));
    }

    #[test]
    fn load_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        std::fs::write(&path, serde_json::to_string(&catalogue()).unwrap()).unwrap();

        let index = ProductIndex::new();
        let count = index.load_from_json(&path).unwrap();
        assert_eq!(count, 3);
    }
}
