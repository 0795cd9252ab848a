use super::client::truncate_str;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

/// Outcome of reading structured data out of a model response.
///
/// Parse failures never raise; they land in `Unparsed` and each caller maps
/// that to its own neutral shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    Parsed(T),
    Unparsed { raw: String, error: String },
}

impl<T> Parsed<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, Parsed::Parsed(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Parsed::Parsed(value) => Some(value),
            Parsed::Unparsed { .. } => None,
        }
    }

    pub fn unwrap_or_else(self, fallback: impl FnOnce(&str, &str) -> T) -> T {
        match self {
            Parsed::Parsed(value) => value,
            Parsed::Unparsed { raw, error } => fallback(&raw, &error),
        }
    }
}

fn source_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)```(?:python|py)\b[^\n]*\n?(?P<code>.+?)```").expect("static regex")
    })
}

fn any_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[\w+-]*[ \t]*\n?(?P<code>.+?)```").expect("static regex"))
}

/// Pull test code out of a free-form completion.
///
/// Prefers a fence tagged as Python, then any fence, then the trimmed
/// response. Returns an empty string only for a blank response.
pub fn extract_code(response: &str) -> String {
    if response.trim().is_empty() {
        return String::new();
    }

    for re in [source_block_re(), any_block_re()] {
        if let Some(code) = re.captures(response).and_then(|c| c.name("code")) {
            let code = code.as_str().trim();
            if !code.is_empty() {
                return code.to_string();
            }
        }
    }

    response.trim().to_string()
}

/// Strip markdown code fences from a response
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

/// Extract a JSON fragment between matching delimiters
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Try to fix common JSON issues from LLM responses
fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    // Remove trailing commas before ] or }
    fixed = fixed.replace(",]", "]");
    fixed = fixed.replace(",}", "}");

    fixed = fixed.replace(['\u{201C}', '\u{201D}'], "\"");
    fixed = fixed.replace(['\u{2018}', '\u{2019}'], "'");

    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Parse a JSON object out of a model response.
///
/// Tolerates surrounding prose, code fences, trailing commas and smart
/// quotes. Anything still unreadable becomes `Parsed::Unparsed`.
pub fn parse_json<T: DeserializeOwned>(response: &str) -> Parsed<T> {
    let clean = strip_markdown_fences(response);
    let Some(json_str) = extract_json_fragment(clean, '{', '}') else {
        return Parsed::Unparsed {
            raw: response.to_string(),
            error: "no JSON object found".to_string(),
        };
    };

    match serde_json::from_str::<T>(json_str) {
        Ok(value) => Parsed::Parsed(value),
        Err(initial_error) => {
            let fixed = fix_json_issues(json_str);
            match serde_json::from_str::<T>(&fixed) {
                Ok(value) => Parsed::Parsed(value),
                Err(_) => {
                    tracing::debug!(
                        error = %initial_error,
                        preview = truncate_str(json_str, 200),
                        "structured response could not be parsed"
                    );
                    Parsed::Unparsed {
                        raw: response.to_string(),
                        error: initial_error.to_string(),
                    }
                }
            }
        }
    }
}

/// Truncate file content for prompts, marking the cut
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        format!("{}\n# ... truncated ...", truncate_str(content, max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Query {
        retrieval_query: String,
    }

    #[test]
    fn test_extract_code_prefers_python_fence() {
        let response = "Here:\n```text\nnot this\n```\n```python\ndef test_a():\n    assert True\n```";
        assert_eq!(extract_code(response), "def test_a():\n    assert True");
    }

    #[test]
    fn test_extract_code_falls_back_to_any_fence() {
        let response = "```\nimport pytest\ndef test_b():\n    pass\n```\ntrailing words";
        assert_eq!(extract_code(response), "import pytest\ndef test_b():\n    pass");
    }

    #[test]
    fn test_extract_code_without_fence_uses_trimmed_response() {
        let response = "\n\n  def test_c():\n    assert 1 == 1\n  ";
        assert_eq!(extract_code(response), "def test_c():\n    assert 1 == 1");
    }

    #[test]
    fn test_extract_code_blank_response_is_empty() {
        assert_eq!(extract_code("   \n\t"), "");
        assert_eq!(extract_code(""), "");
    }

    #[test]
    fn test_extract_code_is_case_insensitive_on_tag() {
        let response = "```Python\nx = 1\n```";
        assert_eq!(extract_code(response), "x = 1");
    }

    #[test]
    fn test_parse_json_with_fences_and_trailing_comma() {
        let response = "```json\n{\"retrieval_query\": \"encode decode\",}\n```";
        let parsed: Parsed<Query> = parse_json(response);
        assert_eq!(
            parsed,
            Parsed::Parsed(Query {
                retrieval_query: "encode decode".to_string()
            })
        );
    }

    #[test]
    fn test_parse_json_with_surrounding_prose() {
        let response = "Sure! {\"retrieval_query\": \"q\"} hope that helps";
        let parsed: Parsed<Query> = parse_json(response);
        assert!(parsed.is_parsed());
    }

    #[test]
    fn test_parse_json_garbage_is_unparsed() {
        let parsed: Parsed<Query> = parse_json("I cannot answer that.");
        match parsed {
            Parsed::Unparsed { raw, .. } => assert_eq!(raw, "I cannot answer that."),
            Parsed::Parsed(_) => panic!("expected unparsed"),
        }
    }

    #[test]
    fn test_truncate_content_marks_cut() {
        let truncated = truncate_content("abcdefghij", 4);
        assert_eq!(truncated, "abcd\n# ... truncated ...");
        assert_eq!(truncate_content("abc", 4), "abc");
    }
}
