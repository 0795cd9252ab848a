use super::aggregate::normalize_candidate_source;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-property temporary test file. Unique per (target, property) pair so
/// concurrent pipelines never share one.
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(dir: &Path, target_index: usize, property_index: usize) -> Self {
        Self {
            path: dir.join(format!("_temp_test_{}_{}.py", target_index, property_index)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write normalized candidate source. Returns false (and writes nothing)
    /// when the candidate has no test body.
    pub fn write(&self, code: &str) -> anyhow::Result<bool> {
        let Some(source) = normalize_candidate_source(code) else {
            return Ok(false);
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, source)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(true)
    }

    pub fn remove(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove scratch file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), 3, 1);
        assert!(scratch.path().ends_with("_temp_test_3_1.py"));
        assert!(scratch.write("import a\ndef test_x(): pass").unwrap());
        assert_eq!(
            fs::read_to_string(scratch.path()).unwrap(),
            "import a\n\ndef test_x(): pass\n"
        );
        scratch.remove();
        assert!(!scratch.path().exists());
        scratch.remove();
    }

    #[test]
    fn test_import_only_code_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), 0, 0);
        assert!(!scratch.write("import a").unwrap());
        assert!(!scratch.path().exists());
    }
}
