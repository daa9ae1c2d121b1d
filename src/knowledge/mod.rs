//! Knowledge retrieval
//!
//! Handlers query a single corpus partitioned by metadata (`type = menu` vs
//! `type = info`). The `Retriever` trait is the seam; `KnowledgeBase` is the
//! local in-memory implementation loaded from a JSON document file.
//!
//! # Example Document File
//!
//! ```json
//! [
//!   {
//!     "content": "Menu Item: Classic Burger\nPrice: $8.99",
//!     "metadata": { "type": "menu", "category": "Burgers" }
//!   },
//!   {
//!     "content": "Opening hours: 10:00 - 22:00 every day",
//!     "metadata": { "type": "info" }
//!   }
//! ]
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Metadata key/value pairs a document must match exactly
pub type Filter = BTreeMap<String, String>;

/// Filter selecting official menu entries
pub fn menu_filter() -> Filter {
    Filter::from([("type".to_string(), "menu".to_string())])
}

/// Filter selecting store facility and policy entries
pub fn info_filter() -> Filter {
    Filter::from([("type".to_string(), "info".to_string())])
}

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid knowledge file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Search failed: {0}")]
    SearchFailed(String),
}

/// Read-only passage search
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `k` passages matching `filter`, most relevant first
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<String>, KnowledgeError>;
}

/// A passage and its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub content: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    fn matches(&self, filter: Option<&Filter>) -> bool {
        filter.map_or(true, |f| {
            f.iter()
                .all(|(key, value)| self.metadata.get(key) == Some(value))
        })
    }
}

/// In-memory corpus ranked by query-term overlap
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    documents: Vec<Document>,
}

impl KnowledgeBase {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    /// Load documents from a JSON array file
    pub async fn from_file(path: &Path) -> Result<Self, KnowledgeError> {
        let content = fs::read_to_string(path).await?;
        let documents: Vec<Document> = serde_json::from_str(&content)?;
        Ok(Self::new(documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl Retriever for KnowledgeBase {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<String>, KnowledgeError> {
        tracing::debug!(query, ?filter, k, "Searching knowledge base");

        let query_terms = terms(query);
        let mut scored: Vec<(usize, &Document)> = self
            .documents
            .iter()
            .filter(|doc| doc.matches(filter))
            .map(|doc| (terms(&doc.content).intersection(&query_terms).count(), doc))
            .collect();

        // Stable sort keeps file order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, doc)| doc.content.clone())
            .collect())
    }
}
