//! Prompt builders for every model call the tool makes.

use crate::model::{Property, SignalSet, SourceFile, TargetFunction};
use crate::retrieval::SearchHit;

fn target_section(target: &TargetFunction) -> String {
    format!(
        "## Target function\n- module_path: `{}`\n- file: `{}`\n- source:\n```python\n{}\n```",
        target.qualified_name,
        target.file.rel_path.display(),
        target.source
    )
}

const METADATA_RULE: &str = "## STRICT REQUIREMENT ABOUT METADATA\n\
- Every function/class/method you mention must carry its full Python module path.\n\
- The module path must be enough to import the symbol from test code.";

const SIGNAL_SCHEMA: &str = r#"{
  "target_function_module_path": "<string>",
  "description": "<high-level description of the function's behavior and role>",
  "invariants": ["<string>"],
  "preconditions": ["<string>"],
  "postconditions": ["<string>"],
  "relationships": [
    {
      "description": "<relation, e.g. encode/decode round-trip>",
      "related_symbol_module_path": "<python.module.path>",
      "kind": "function|class|method"
    }
  ],
  "examples": ["<example>"]
}"#;

/// Ask the model to pick the files most related to the target.
///
/// `project_tree` is the rendered layout of the project; blank leaves the
/// section out.
pub fn select_related_files(
    target: &TargetFunction,
    project_tree: &str,
    files: &[SourceFile],
    top_n: usize,
) -> String {
    let tree = if project_tree.trim().is_empty() {
        String::new()
    } else {
        format!("## Project file tree\n{}\n\n", project_tree)
    };
    let listing = files
        .iter()
        .map(|f| {
            format!(
                "- {}  (module_path={})",
                f.rel_path.display(),
                f.module_path.as_deref().unwrap_or("<unknown>")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an expert Python engineer and testing specialist.
Identify source files that are semantically related to the target function, focusing on
properties, invariants and cross-function relationships useful for property-based testing.

{METADATA_RULE}

{tree}## All Python files (with module paths)
{listing}

{target}

## Your goals
Select the top {top_n} files most likely to contain inverse operations (encode/decode,
serialize/deserialize), validation logic, invariant checks, callers that rely on the target,
or alternative implementations with the same behavior. Explain why each one is related.

## Output format (MUST be valid JSON)
{{
  "target_function_module_path": "<string>",
  "selected_files": [
    {{
      "rel_path": "<relative/path/to/file.py>",
      "module_path": "<python.module.path>",
      "reason": "<why this file is related>"
    }}
  ]
}}

Do not include any comments outside JSON. Do not use trailing commas."#,
        target = target_section(target),
    )
}

/// Ask for signals given the contents of the selected related files.
pub fn extract_signals_from_files(target: &TargetFunction, contents: &[(String, String)]) -> String {
    let files_blob = contents
        .iter()
        .map(|(rel, content)| format!("# File: {}\n```python\n{}\n```", rel, content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are an expert in property-based testing for Python.
You are given a target function and the full source of several related files.
Extract structured information that helps generate cross-function property-based tests.

{METADATA_RULE}

{target}

## Related files (with source)
{files_blob}

## Your goals
Infer invariants, preconditions, postconditions, cross-function relationships
(round-trips, consistency with validators, ...) and a few concrete examples.

## Output format (MUST be valid JSON)
{SIGNAL_SCHEMA}

Do not include any comments outside JSON. Do not use trailing commas."#,
        target = target_section(target),
    )
}

/// Ask for a single dense-retrieval query about the target.
pub fn build_retrieval_query(target: &TargetFunction) -> String {
    format!(
        r#"You are assisting with semantic vector search over Python source code in order to
build cross-function property-based tests.

{target}

## Your goal
Produce a single self-contained natural-language query that finds inverse/dual functions,
callers and callees imposing stronger invariants, validators, and alternative
implementations. Emphasize properties and relationships over variable names.

## Output format (MUST be valid JSON)
{{
  "target_function_module_path": "{module_path}",
  "retrieval_query": "<single natural language query>"
}}

Do not include comments, only JSON."#,
        target = target_section(target),
        module_path = target.qualified_name,
    )
}

/// Ask for signals given vector-search hits.
pub fn extract_signals_from_retrieval(
    target: &TargetFunction,
    query: &str,
    hits: &[SearchHit],
) -> String {
    let hits_blob = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let module_path = hit
                .metadata_text("module_path")
                .unwrap_or_else(|| "<unknown>".to_string());
            let rel_path = hit
                .metadata_text("rel_path")
                .unwrap_or_else(|| "<unknown>".to_string());
            format!(
                "### Hit {}\n- module_path: {}\n- rel_path: {}\n```python\n{}\n```",
                i, module_path, rel_path, hit.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are an expert in property-based testing for Python.
You are given a target function, a semantic search query and the snippets it retrieved.

{METADATA_RULE}

{target}

## Retrieval query
{query}

## Retrieval hits
{hits_blob}

## Your goals
Infer invariants, preconditions, postconditions, relationships and examples, focusing on how
the target should behave in relation to the retrieved symbols.

## Output format (MUST be valid JSON)
{SIGNAL_SCHEMA}

Do not include comments, only JSON."#,
        target = target_section(target),
    )
}

/// Ask for exactly one Hypothesis test for one property.
pub fn generate_test(
    target: &TargetFunction,
    signals_from_files: &SignalSet,
    signals_from_retrieval: Option<&SignalSet>,
    property: &Property,
) -> String {
    let retrieval_json = signals_from_retrieval
        .map(SignalSet::prompt_json)
        .unwrap_or_else(|| "null".to_string());

    format!(
        r#"You are a senior Python engineer and a property-based testing expert.
Generate a property-based test for the target function using Hypothesis.

## STRICT REQUIREMENTS
- All imports must use the given module paths exactly. Do NOT invent module paths.
- The test must be valid Python, runnable with pytest + hypothesis.

{target}

## Signals from related files
```json
{files_json}
```

## Signals from retrieval hits
```json
{retrieval_json}
```

## CRITICAL: Generate ONLY ONE test function
- Property type: {kind}
- Property description: {description}

- Do NOT generate multiple tests, classes or setup methods.
- The test will be merged with other tests later; include the imports it needs.

## Output format
Return only the Python code for the single test function and its imports, no explanations."#,
        target = target_section(target),
        files_json = signals_from_files.prompt_json(),
        kind = property.kind,
        description = property.description,
    )
}

/// Ask for a conservative verdict on a failing test.
pub fn judge_failure(
    target: &TargetFunction,
    property: &Property,
    test_code: &str,
    diagnostic: &str,
) -> String {
    format!(
        r#"You are an expert Python engineer and testing specialist.
A property-based test was generated for a function but failed when executed.
Decide whether the failure shows a real bug in the function or an error in the test.

## CRITICAL: Be VERY CONSERVATIVE
- Only conclude it is a function bug with strong, evidence-based reasons.
- The property must be clearly valid and well-defined.
- The test must be correctly written and properly test the property.
- The error must directly violate the stated property or contract.
- If there is any doubt, conclude it is a test generation error.

{target}

## Property being tested
- Property type: {kind}
- Property description: {description}

## Generated test code
```python
{test_code}
```

## Error output from test execution
```
{diagnostic}
```

## Output format (MUST be valid JSON)
{{
  "is_function_bug": <true|false>,
  "confidence": "<high|medium|low>",
  "reasoning": "<explanation>",
  "evidence": ["<evidence point>"],
  "property_validity": "<is the property valid?>",
  "test_correctness": "<is the test correctly written?>"
}}

Do not include comments, only JSON."#,
        target = target_section(target),
        kind = property.kind,
        description = property.description,
    )
}

/// Ask for a corrected test after a failure judged to be the test's fault.
pub fn fix_test(
    target: &TargetFunction,
    property: &Property,
    test_code: &str,
    diagnostic: &str,
) -> String {
    format!(
        r#"You are an expert Python engineer and testing specialist.
A property-based test failed and the failure was judged to be a test generation error,
not a function bug. Fix the test.

{target}

## Property being tested
- Property type: {kind}
- Property description: {description}

## Original test code (with error)
```python
{test_code}
```

## Error output from test execution
```
{diagnostic}
```

## Your task
1. Import everything needed using the exact module paths.
2. Set up the test correctly (e.g. instantiate classes when needed).
3. Implement the property faithfully; keep it runnable with pytest + hypothesis.

## Output format
Return only the corrected Python code for a single test function and its imports."#,
        target = target_section(target),
        kind = property.kind,
        description = property.description,
    )
}

/// Ask for a corrected test after static-checker errors.
pub fn fix_static_errors(
    target: &TargetFunction,
    property: &Property,
    test_code: &str,
    checker_report: &str,
) -> String {
    format!(
        r#"You are an expert Python engineer and testing specialist.
A property-based test was generated but the static checker reports errors.
Fix the errors without changing what the test checks.

{target}

## Property being tested
- Property type: {kind}
- Property description: {description}

## Original test code (with errors)
```python
{test_code}
```

## Static checker output
```
{checker_report}
```

## Your task
1. Fix every reported error.
2. Keep imports on the exact module paths.
3. Keep the property and test logic intact.

## Output format
Return only the corrected Python code for a single test function and its imports."#,
        target = target_section(target),
        kind = property.kind,
        description = property.description,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyKind;
    use std::path::PathBuf;

    fn target() -> TargetFunction {
        TargetFunction {
            name: "upper".to_string(),
            qualified_name: "pkg.text.upper".to_string(),
            file: SourceFile {
                path: PathBuf::from("/p/pkg/text.py"),
                rel_path: PathBuf::from("pkg/text.py"),
                module_path: Some("pkg.text".to_string()),
            },
            line: 1,
            end_line: 2,
            source: "def upper(s):\n    return s.upper()".to_string(),
            is_method: false,
            class_name: None,
        }
    }

    #[test]
    fn test_selection_prompt_includes_tree_only_when_present() {
        let files = vec![target().file];
        let with_tree = select_related_files(&target(), "proj\n└── pkg", &files, 3);
        assert!(with_tree.contains("## Project file tree\nproj\n└── pkg"));
        assert!(with_tree.contains("- pkg/text.py  (module_path=pkg.text)"));

        let without = select_related_files(&target(), "  ", &files, 3);
        assert!(!without.contains("Project file tree"));
    }

    #[test]
    fn test_generate_prompt_names_single_property() {
        let property = Property::new(PropertyKind::Postcondition, "output equals input.upper()");
        let prompt = generate_test(&target(), &SignalSet::default(), None, &property);
        assert!(prompt.contains("Property type: postcondition"));
        assert!(prompt.contains("output equals input.upper()"));
        assert!(prompt.contains("pkg.text.upper"));
        assert!(prompt.contains("ONLY ONE test function"));
    }

    #[test]
    fn test_judge_prompt_includes_diagnostic() {
        let property = Property::new(PropertyKind::Invariant, "len preserved");
        let prompt = judge_failure(&target(), &property, "def test_x(): ...", "AssertionError: 3 != 4");
        assert!(prompt.contains("AssertionError: 3 != 4"));
        assert!(prompt.contains("\"is_function_bug\""));
    }

    #[test]
    fn test_retrieval_query_prompt_restates_module_path() {
        let prompt = build_retrieval_query(&target());
        assert!(prompt.contains("\"target_function_module_path\": \"pkg.text.upper\""));
    }
}
