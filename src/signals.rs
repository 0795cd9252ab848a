//! Signal extraction: turns a target function into the two signal sets the
//! pipeline consumes (one from related files, one from retrieval).

use crate::llm::{parse_json, prompts, CompletionClient, Parsed};
use crate::llm::parse::truncate_content;
use crate::model::{SignalSet, SourceFile, TargetFunction};
use crate::retrieval::{search_optional, SearchHit, VectorStore};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Signals for one target: file-based always, retrieval-based when available
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetSignals {
    pub from_files: SignalSet,
    pub from_retrieval: Option<SignalSet>,
}

/// Where the pipeline gets its signals from.
pub trait SignalSource: Send + Sync {
    fn signals_for<'a>(
        &'a self,
        target: &'a TargetFunction,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TargetSignals>> + Send + 'a>>;
}

/// Pre-computed signals keyed by qualified function name.
/// Unknown targets get empty signals.
#[derive(Debug, Clone, Default)]
pub struct FixedSignals {
    signals: HashMap<String, TargetSignals>,
}

impl FixedSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, qualified_name: impl Into<String>, signals: TargetSignals) -> Self {
        self.signals.insert(qualified_name.into(), signals);
        self
    }
}

impl SignalSource for FixedSignals {
    fn signals_for<'a>(
        &'a self,
        target: &'a TargetFunction,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TargetSignals>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .signals
                .get(&target.qualified_name)
                .cloned()
                .unwrap_or_default())
        })
    }
}

#[derive(Debug, Clone)]
pub struct RelatedFileSelection {
    pub files: Vec<SourceFile>,
    pub raw_response: String,
}

#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub raw_response: String,
}

#[derive(Deserialize)]
struct SelectionJson {
    #[serde(default)]
    selected_files: Vec<SelectedFileJson>,
}

#[derive(Deserialize)]
struct SelectedFileJson {
    #[serde(default)]
    rel_path: Option<String>,
}

#[derive(Deserialize)]
struct QueryJson {
    #[serde(default)]
    retrieval_query: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RelationshipJson {
    Text(String),
    Object {
        #[serde(default)]
        description: String,
    },
}

#[derive(Deserialize, Default)]
struct SignalJson {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    invariants: Option<Vec<String>>,
    #[serde(default)]
    preconditions: Option<Vec<String>>,
    #[serde(default)]
    postconditions: Option<Vec<String>>,
    #[serde(default)]
    relationships: Option<Vec<RelationshipJson>>,
    #[serde(default)]
    examples: Option<Vec<String>>,
}

/// Map a signal response onto a `SignalSet`; unparsed output becomes an
/// empty set that still carries the raw text for debugging.
fn signals_from_response(raw: &str) -> SignalSet {
    let mut metadata = HashMap::new();
    metadata.insert("raw_llm_output".to_string(), raw.to_string());

    let data = match parse_json::<SignalJson>(raw) {
        Parsed::Parsed(data) => data,
        Parsed::Unparsed { error, .. } => {
            metadata.insert("parse_error".to_string(), error);
            SignalJson::default()
        }
    };

    SignalSet {
        description: data.description.unwrap_or_default(),
        invariants: data.invariants.unwrap_or_default(),
        preconditions: data.preconditions.unwrap_or_default(),
        postconditions: data.postconditions.unwrap_or_default(),
        relationships: data
            .relationships
            .unwrap_or_default()
            .into_iter()
            .map(|r| match r {
                RelationshipJson::Text(text) => text,
                RelationshipJson::Object { description } => description,
            })
            .collect(),
        examples: data.examples.unwrap_or_default(),
        metadata,
    }
}

/// Model-backed signal extraction over the project's files and an optional
/// vector store.
pub struct LlmSignalSource {
    llm: Arc<dyn CompletionClient>,
    store: Option<Arc<dyn VectorStore>>,
    files: Vec<SourceFile>,
    project_tree: String,
    top_n: usize,
    max_snippet_chars: usize,
}

impl LlmSignalSource {
    pub fn new(
        llm: Arc<dyn CompletionClient>,
        store: Option<Arc<dyn VectorStore>>,
        files: Vec<SourceFile>,
        top_n: usize,
        max_snippet_chars: usize,
    ) -> Self {
        Self {
            llm,
            store,
            files,
            project_tree: String::new(),
            top_n,
            max_snippet_chars,
        }
    }

    /// Show the model this project layout when it selects related files.
    pub fn with_project_tree(mut self, tree: impl Into<String>) -> Self {
        self.project_tree = tree.into();
        self
    }

    pub async fn select_related_files(
        &self,
        target: &TargetFunction,
    ) -> anyhow::Result<RelatedFileSelection> {
        let prompt = prompts::select_related_files(target, &self.project_tree, &self.files, self.top_n);
        let raw = self.llm.complete(&prompt).await?;

        let selection = parse_json::<SelectionJson>(&raw).unwrap_or_else(|_, error| {
            tracing::warn!(function = %target.qualified_name, "file selection unparsed: {}", error);
            SelectionJson {
                selected_files: Vec::new(),
            }
        });

        let by_rel: HashMap<String, &SourceFile> = self
            .files
            .iter()
            .map(|f| (f.rel_path.to_string_lossy().to_string(), f))
            .collect();
        let files = selection
            .selected_files
            .into_iter()
            .filter_map(|item| item.rel_path)
            .filter_map(|rel| by_rel.get(&rel).map(|f| (*f).clone()))
            .collect();

        Ok(RelatedFileSelection {
            files,
            raw_response: raw,
        })
    }

    pub async fn extract_from_files(
        &self,
        target: &TargetFunction,
        selection: &RelatedFileSelection,
    ) -> anyhow::Result<SignalSet> {
        let mut contents = Vec::with_capacity(selection.files.len());
        for file in &selection.files {
            match fs::read_to_string(&file.path) {
                Ok(text) => contents.push((
                    file.rel_path.display().to_string(),
                    truncate_content(&text, self.max_snippet_chars),
                )),
                Err(err) => {
                    tracing::warn!(file = %file.path.display(), "skipping related file: {}", err)
                }
            }
        }

        let prompt = prompts::extract_signals_from_files(target, &contents);
        let raw = self.llm.complete(&prompt).await?;
        Ok(signals_from_response(&raw))
    }

    pub async fn build_retrieval_query(
        &self,
        target: &TargetFunction,
    ) -> anyhow::Result<RetrievalResult> {
        let prompt = prompts::build_retrieval_query(target);
        let raw = self.llm.complete(&prompt).await?;
        let query = parse_json::<QueryJson>(&raw)
            .ok()
            .and_then(|q| q.retrieval_query)
            .unwrap_or_default();
        let hits = search_optional(self.store.as_deref(), &query, self.top_n);
        Ok(RetrievalResult {
            query,
            hits,
            raw_response: raw,
        })
    }

    pub async fn extract_from_retrieval(
        &self,
        target: &TargetFunction,
        retrieval: &RetrievalResult,
    ) -> anyhow::Result<SignalSet> {
        let prompt = prompts::extract_signals_from_retrieval(target, &retrieval.query, &retrieval.hits);
        let raw = self.llm.complete(&prompt).await?;
        Ok(signals_from_response(&raw))
    }

    async fn collect_from_files(&self, target: &TargetFunction) -> anyhow::Result<SignalSet> {
        let selection = self.select_related_files(target).await?;
        tracing::debug!(
            function = %target.qualified_name,
            related_files = selection.files.len(),
            "related files selected"
        );
        self.extract_from_files(target, &selection).await
    }

    async fn collect_from_retrieval(&self, target: &TargetFunction) -> anyhow::Result<Option<SignalSet>> {
        if self.store.is_none() {
            return Ok(None);
        }
        let retrieval = self.build_retrieval_query(target).await?;
        if retrieval.query.trim().is_empty() || retrieval.hits.is_empty() {
            tracing::debug!(function = %target.qualified_name, "no retrieval hits");
            return Ok(None);
        }
        Ok(Some(self.extract_from_retrieval(target, &retrieval).await?))
    }

    async fn collect(&self, target: &TargetFunction) -> anyhow::Result<TargetSignals> {
        // File and retrieval branches are independent
        let (from_files, from_retrieval) = futures::future::try_join(
            self.collect_from_files(target),
            self.collect_from_retrieval(target),
        )
        .await?;

        Ok(TargetSignals {
            from_files,
            from_retrieval,
        })
    }
}

impl SignalSource for LlmSignalSource {
    fn signals_for<'a>(
        &'a self,
        target: &'a TargetFunction,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TargetSignals>> + Send + 'a>> {
        Box::pin(self.collect(target))
    }
}
