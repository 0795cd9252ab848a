//! Vector search seam used for retrieval-based signal extraction.
//!
//! The real index backend lives outside this crate. `InMemoryStore` ranks
//! documents by term overlap, which is enough for small corpora and tests.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// One retrieved snippet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    /// Arbitrary JSON per document (`module_path`, `rel_path`, line numbers, ...)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SearchHit {
    /// A metadata entry as text; non-string values are rendered as JSON.
    pub fn metadata_text(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

pub trait VectorStore: Send + Sync {
    fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit>;
}

/// Search that treats an absent store as "no hits".
pub fn search_optional(store: Option<&dyn VectorStore>, query: &str, top_k: usize) -> Vec<SearchHit> {
    match store {
        Some(store) if !query.trim().is_empty() => store.search(query, top_k),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    documents: Vec<SearchHit>,
}

impl InMemoryStore {
    pub fn new(documents: Vec<SearchHit>) -> Self {
        Self { documents }
    }

    /// Load documents from a JSONL file of `{content, metadata}` rows.
    /// Malformed rows are skipped with a warning.
    pub fn load_jsonl(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read documents '{}'", path.display()))?;
        let documents: Vec<SearchHit> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(idx, line)| match serde_json::from_str(line) {
                Ok(doc) => Some(doc),
                Err(err) => {
                    tracing::warn!(line = idx + 1, error = %err, "skipping malformed document");
                    None
                }
            })
            .collect();
        tracing::info!(
            documents = documents.len(),
            path = %path.display(),
            "loaded retrieval documents"
        );
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
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

impl VectorStore for InMemoryStore {
    fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let query_terms = terms(query);
        let mut scored: Vec<(usize, usize)> = self
            .documents
            .iter()
            .enumerate()
            .map(|(idx, doc)| {
                let doc_terms = terms(&doc.content);
                (idx, query_terms.intersection(&doc_terms).count())
            })
            .filter(|(_, score)| *score > 0)
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored
            .into_iter()
            .take(top_k)
            .map(|(idx, _)| self.documents[idx].clone())
            .collect()
    }
}
