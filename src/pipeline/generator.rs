use crate::llm::{extract_code, prompts, CompletionClient};
use crate::model::{Candidate, Property, TargetFunction};
use crate::signals::TargetSignals;
use std::sync::Arc;

/// Produces one candidate test per property with a single completion.
///
/// Completion failures are returned to the caller untouched; an empty
/// extraction means the property is skipped.
#[derive(Clone)]
pub struct CandidateGenerator {
    llm: Arc<dyn CompletionClient>,
}

impl CandidateGenerator {
    pub fn new(llm: Arc<dyn CompletionClient>) -> Self {
        Self { llm }
    }

    pub async fn generate(
        &self,
        target: &TargetFunction,
        signals: &TargetSignals,
        property: &Property,
    ) -> anyhow::Result<Option<Candidate>> {
        let prompt = prompts::generate_test(
            target,
            &signals.from_files,
            signals.from_retrieval.as_ref(),
            property,
        );
        let response = self.llm.complete(&prompt).await?;
        let code = extract_code(&response);
        if code.trim().is_empty() {
            tracing::warn!(property = %property.preview(), "empty completion, skipping property");
            return Ok(None);
        }
        Ok(Some(Candidate::new(property.clone(), code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PropertyKind, SignalSet, SourceFile};
    use std::future::Future;
    use std::path::PathBuf;
    use std::pin::Pin;

    struct Reply(Option<&'static str>);

    impl CompletionClient for Reply {
        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
            Box::pin(async move {
                match self.0 {
                    Some(reply) => Ok(reply.to_string()),
                    None => Err(anyhow::anyhow!("API error 503: upstream unavailable")),
                }
            })
        }
    }

    fn target() -> TargetFunction {
        TargetFunction {
            name: "upper".to_string(),
            qualified_name: "strs.upper".to_string(),
            file: SourceFile {
                path: PathBuf::from("/tmp/strs.py"),
                rel_path: PathBuf::from("strs.py"),
                module_path: Some("strs".to_string()),
            },
            line: 1,
            end_line: 2,
            source: "def upper(s):\n    return s.upper()".to_string(),
            is_method: false,
            class_name: None,
        }
    }

    fn signals() -> TargetSignals {
        TargetSignals {
            from_files: SignalSet::default(),
            from_retrieval: None,
        }
    }

    fn property() -> Property {
        Property::new(PropertyKind::Invariant, "len(upper(s)) == len(s)")
    }

    #[tokio::test]
    async fn test_fenced_code_becomes_candidate() {
        let generator = CandidateGenerator::new(Arc::new(Reply(Some(
            "Here you go:\n```python\nfrom strs import upper\n\ndef test_len(): pass\n```",
        ))));
        let candidate = generator
            .generate(&target(), &signals(), &property())
            .await
            .unwrap()
            .unwrap();
        assert!(candidate.code.starts_with("from strs import upper"));
        assert!(!candidate.executed);
        assert_eq!(candidate.property, property());
    }

    #[tokio::test]
    async fn test_unfenced_reply_is_taken_verbatim() {
        let generator = CandidateGenerator::new(Arc::new(Reply(Some("  def test_len(): pass  "))));
        let candidate = generator
            .generate(&target(), &signals(), &property())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.code, "def test_len(): pass");
    }

    #[tokio::test]
    async fn test_blank_reply_skips() {
        let generator = CandidateGenerator::new(Arc::new(Reply(Some("   "))));
        let result = generator.generate(&target(), &signals(), &property()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_completion_error_propagates() {
        let generator = CandidateGenerator::new(Arc::new(Reply(None)));
        let err = generator
            .generate(&target(), &signals(), &property())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
