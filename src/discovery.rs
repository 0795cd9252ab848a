//! Python source discovery: file collection, module paths, the project tree
//! view and function extraction with tree-sitter.

use crate::model::{SourceFile, TargetFunction};
use rayon::prelude::*;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tree_sitter::{Node, Parser};
use walkdir::WalkDir;

const IGNORED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    ".mypy_cache",
    ".pytest_cache",
    ".tox",
    "node_modules",
];

// One parser per rayon worker thread
thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - will be caught at parse time if language fails
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

fn is_ignored(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| IGNORED_DIRS.contains(&name))
        .unwrap_or(false)
}

/// Resolve a directory to leave out of the walk (the tool's own output)
/// against the canonical project root.
fn resolve_skip(root: &Path, skip: Option<&Path>) -> Option<PathBuf> {
    skip.map(|dir| {
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            root.join(dir)
        };
        dir.canonicalize().unwrap_or(dir)
    })
}

fn is_excluded(path: &Path, skip: Option<&Path>) -> bool {
    is_ignored(path) || skip == Some(path)
}

/// Convert a relative file path to a dotted module path.
///
/// `src/pkg/module.py` becomes `pkg.module`; `pkg/__init__.py` becomes `pkg`.
pub fn infer_module_path(rel_path: &Path) -> String {
    let mut parts: Vec<String> = rel_path
        .with_extension("")
        .components()
        .filter_map(|c| c.as_os_str().to_str().map(str::to_string))
        .collect();
    if parts.first().map(|p| p == "src").unwrap_or(false) {
        parts.remove(0);
    }
    if parts.len() > 1 && parts.last().map(|p| p == "__init__").unwrap_or(false) {
        parts.pop();
    }
    parts.join(".")
}

/// Collect every `.py` file under the project, sorted by relative path.
///
/// `skip` names a directory to leave out, typically the output directory
/// so generated tests are never rediscovered as targets.
pub fn collect_python_files(project_root: &Path, skip: Option<&Path>) -> anyhow::Result<Vec<SourceFile>> {
    let root = project_root.canonicalize()?;
    let skip = resolve_skip(&root, skip);
    let mut files: Vec<SourceFile> = WalkDir::new(&root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(e.path(), skip.as_deref()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("py"))
        .filter_map(|e| {
            let rel_path = e.path().strip_prefix(&root).ok()?.to_path_buf();
            let module_path = infer_module_path(&rel_path);
            Some(SourceFile {
                path: e.path().to_path_buf(),
                rel_path,
                module_path: Some(module_path),
            })
        })
        .collect();
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

/// Render the project layout the way `tree` does, directories first.
///
/// Entries deeper than `max_depth` are left out. Once `max_entries` lines
/// have been emitted the walk stops with a truncation marker.
pub fn render_project_tree(
    project_root: &Path,
    max_depth: usize,
    max_entries: usize,
    skip: Option<&Path>,
) -> anyhow::Result<String> {
    let root = project_root.canonicalize()?;
    let skip = resolve_skip(&root, skip);
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root.display().to_string());

    let mut tree = TreeWalk {
        lines: vec![name],
        entries: 0,
        max_depth,
        max_entries,
        skip: skip.as_deref(),
        truncated: false,
    };
    tree.walk(&root, "", 1);
    Ok(tree.lines.join("\n"))
}

struct TreeWalk<'a> {
    lines: Vec<String>,
    entries: usize,
    max_depth: usize,
    max_entries: usize,
    skip: Option<&'a Path>,
    truncated: bool,
}

impl TreeWalk<'_> {
    fn walk(&mut self, dir: &Path, prefix: &str, depth: usize) {
        if depth > self.max_depth || self.truncated {
            return;
        }

        let skip = self.skip;
        let children: Vec<walkdir::DirEntry> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by(|a, b| {
                (!a.file_type().is_dir(), a.file_name().to_ascii_lowercase())
                    .cmp(&(!b.file_type().is_dir(), b.file_name().to_ascii_lowercase()))
            })
            .into_iter()
            .filter_entry(|e| !is_excluded(e.path(), skip))
            .filter_map(|e| e.ok())
            .collect();

        let last = children.len().saturating_sub(1);
        for (i, child) in children.iter().enumerate() {
            if self.entries >= self.max_entries {
                self.lines
                    .push(format!("{}└── ... (truncated, limit={})", prefix, self.max_entries));
                self.truncated = true;
                return;
            }

            let (connector, extension) = if i == last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };
            self.lines.push(format!(
                "{}{}{}",
                prefix,
                connector,
                child.file_name().to_string_lossy()
            ));
            self.entries += 1;

            if child.file_type().is_dir() {
                self.walk(child.path(), &format!("{}{}", prefix, extension), depth + 1);
                if self.truncated {
                    return;
                }
            }
        }
    }
}

fn node_text(node: &Node, content: &str) -> String {
    content[node.start_byte()..node.end_byte()].to_string()
}

/// Name of the class a function node is defined directly in, if any.
fn enclosing_class(node: &Node, content: &str) -> Option<String> {
    let mut current = node.parent();
    while let Some(parent) = current {
        match parent.kind() {
            "block" | "decorated_definition" => current = parent.parent(),
            "class_definition" => {
                return parent
                    .child_by_field_name("name")
                    .map(|n| node_text(&n, content));
            }
            _ => return None,
        }
    }
    None
}

/// Extract all functions and methods from one parsed file.
pub fn extract_functions(file: &SourceFile, content: &str) -> Vec<TargetFunction> {
    let Some(tree) = PYTHON_PARSER.with(|p| p.borrow_mut().parse(content, None)) else {
        return Vec::new();
    };
    let root = tree.root_node();
    if root.has_error() {
        tracing::debug!(file = %file.rel_path.display(), "skipping file with syntax errors");
        return Vec::new();
    }

    let module_path = file
        .module_path
        .clone()
        .unwrap_or_else(|| infer_module_path(&file.rel_path));
    let mut functions = Vec::new();
    let mut cursor = root.walk();

    loop {
        let node = cursor.node();

        if node.kind() == "function_definition" {
            if let Some(name_node) = node.child_by_field_name("name") {
                let name = node_text(&name_node, content);
                let class_name = enclosing_class(&node, content);
                let qualified_name = match &class_name {
                    Some(class) => format!("{}.{}.{}", module_path, class, name),
                    None => format!("{}.{}", module_path, name),
                };
                functions.push(TargetFunction {
                    name,
                    qualified_name,
                    file: file.clone(),
                    line: node.start_position().row + 1,
                    end_line: node.end_position().row + 1,
                    source: node_text(&node, content),
                    is_method: class_name.is_some(),
                    class_name,
                });
            }
        }

        if cursor.goto_first_child() {
            continue;
        }

        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return functions;
            }
        }
    }
}

/// Discover every function in the project outside `skip`. Unreadable or
/// unparsable files are skipped.
pub fn collect_functions(project_root: &Path, skip: Option<&Path>) -> anyhow::Result<Vec<TargetFunction>> {
    let files = collect_python_files(project_root, skip)?;
    Ok(functions_in(&files))
}

/// Extract the functions of already collected files, ordered by file and line.
pub fn functions_in(files: &[SourceFile]) -> Vec<TargetFunction> {
    let mut functions: Vec<TargetFunction> = files
        .par_iter()
        .flat_map(|file| match fs::read_to_string(&file.path) {
            Ok(content) => extract_functions(file, &content),
            Err(err) => {
                tracing::warn!(file = %file.path.display(), "failed to read source: {}", err);
                Vec::new()
            }
        })
        .collect();
    functions.sort_by(|a, b| (&a.file.rel_path, a.line).cmp(&(&b.file.rel_path, b.line)));
    functions
}

/// Keep only the functions named in `targets`, by qualified name or bare
/// function name; an empty filter keeps all.
pub fn filter_functions(functions: Vec<TargetFunction>, targets: &[String]) -> Vec<TargetFunction> {
    if targets.is_empty() {
        return functions;
    }
    let wanted: HashSet<&str> = targets.iter().map(|t| t.trim()).collect();
    functions
        .into_iter()
        .filter(|f| wanted.contains(f.qualified_name.as_str()) || wanted.contains(f.name.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn example_project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pkg/__init__.py", "");
        write(
            dir.path(),
            "pkg/module_a.py",
            "def add(a, b):\n    return a + b\n\n\nclass Encoder:\n    @staticmethod\n    def helper():\n        pass\n\n    def encode(self, value):\n        return value.upper()\n",
        );
        write(
            dir.path(),
            "pkg/subpkg/module_b.py",
            "def mul(a, b):\n    return a * b\n",
        );
        write(dir.path(), ".venv/lib/site.py", "def ignored():\n    pass\n");
        dir
    }

    #[test]
    fn test_infer_module_path() {
        assert_eq!(infer_module_path(Path::new("src/pkg/module.py")), "pkg.module");
        assert_eq!(infer_module_path(Path::new("pkg/__init__.py")), "pkg");
        assert_eq!(infer_module_path(Path::new("tool.py")), "tool");
    }

    #[test]
    fn test_collect_functions_discovers_functions_and_methods() {
        let project = example_project();
        let functions = collect_functions(project.path(), None).unwrap();
        let names: HashSet<&str> = functions.iter().map(|f| f.qualified_name.as_str()).collect();

        assert!(names.contains("pkg.module_a.add"));
        assert!(names.contains("pkg.module_a.Encoder.encode"));
        assert!(names.contains("pkg.module_a.Encoder.helper"));
        assert!(names.contains("pkg.subpkg.module_b.mul"));
        assert!(!names.iter().any(|n| n.contains("ignored")));

        let encode = functions
            .iter()
            .find(|f| f.qualified_name == "pkg.module_a.Encoder.encode")
            .unwrap();
        assert!(encode.is_method);
        assert_eq!(encode.class_name.as_deref(), Some("Encoder"));
        assert_eq!(encode.line, 10);
        assert!(encode.source.starts_with("def encode"));
    }

    #[test]
    fn test_filter_functions_by_qualified_name() {
        let project = example_project();
        let functions = collect_functions(project.path(), None).unwrap();
        let filtered = filter_functions(functions.clone(), &["pkg.module_a.add".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].qualified_name, "pkg.module_a.add");

        let all = filter_functions(functions.clone(), &[]);
        assert_eq!(all.len(), functions.len());
    }

    #[test]
    fn test_filter_functions_by_bare_name() {
        let project = example_project();
        let functions = collect_functions(project.path(), None).unwrap();
        let filtered = filter_functions(functions, &["mul".to_string(), " encode ".to_string()]);
        let names: Vec<&str> = filtered.iter().map(|f| f.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["pkg.module_a.Encoder.encode", "pkg.subpkg.module_b.mul"]);
    }

    #[test]
    fn test_output_dir_is_not_rediscovered() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "strs.py", "def upper(s):\n    return s.upper()\n");
        write(dir.path(), "generated_tests/test_pbt_0.py", "def test_len():\n    pass\n");
        write(dir.path(), "generated_tests/_temp_test_0_0.py", "def test_tmp():\n    pass\n");

        let functions = collect_functions(dir.path(), Some(Path::new("generated_tests"))).unwrap();
        let names: Vec<&str> = functions.iter().map(|f| f.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["strs.upper"]);

        let absolute = dir.path().join("generated_tests");
        let files = collect_python_files(dir.path(), Some(absolute.as_path())).unwrap();
        assert_eq!(files.len(), 1);

        let tree = render_project_tree(dir.path(), 20, 5000, Some(absolute.as_path())).unwrap();
        assert!(!tree.contains("generated_tests"));
    }

    #[test]
    fn test_project_tree_lists_directories_first() {
        let project = example_project();
        let tree = render_project_tree(project.path(), 20, 5000, None).unwrap();
        let lines: Vec<&str> = tree.lines().skip(1).collect();
        assert_eq!(
            lines,
            vec![
                "└── pkg",
                "    ├── subpkg",
                "    │   └── module_b.py",
                "    ├── __init__.py",
                "    └── module_a.py",
            ]
        );
    }

    #[test]
    fn test_project_tree_depth_limit() {
        let project = example_project();
        let tree = render_project_tree(project.path(), 2, 5000, None).unwrap();
        assert!(tree.contains("├── subpkg"));
        assert!(!tree.contains("module_b.py"));
    }

    #[test]
    fn test_project_tree_entry_limit_adds_marker() {
        let project = example_project();
        let tree = render_project_tree(project.path(), 20, 2, None).unwrap();
        let lines: Vec<&str> = tree.lines().skip(1).collect();
        assert_eq!(
            lines,
            vec![
                "└── pkg",
                "    ├── subpkg",
                "    │   └── ... (truncated, limit=2)",
            ]
        );
    }

    #[test]
    fn test_file_with_syntax_error_is_skipped() {
        let file = SourceFile {
            path: PathBuf::from("/x/bad.py"),
            rel_path: PathBuf::from("bad.py"),
            module_path: None,
        };
        assert!(extract_functions(&file, "def broken(:\n  pass").is_empty());
    }
}
