//! Structural extraction orchestrator.
//!
//! Per-file worker: read bytes, hash, parse, run the language queries,
//! compute the interface hash. The orchestrator fans a batch out to
//! worker threads that share no mutable state and report back over a
//! completion channel; with one worker it runs sequentially in place.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::connector::parser::{extract_facts, grammar_for, FileFacts, TreeSitterParser};
use crate::domain::{compute_content_hash, detect_language_family, LanguageFamily};

/// Everything the writer needs for one file, whether or not structural
/// extraction succeeded. A failed parse still carries content for the
/// lexical layer.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub path: String,
    pub content_hash: String,
    pub content: String,
    pub line_count: i64,
    pub language_family: Option<LanguageFamily>,
    pub declared_module: Option<String>,
    pub facts: Option<FileFacts>,
    pub error: Option<String>,
}

pub struct StructuralExtractor {
    repo_root: PathBuf,
    parser: Arc<TreeSitterParser>,
}

impl StructuralExtractor {
    pub fn new(repo_root: PathBuf, parser: Arc<TreeSitterParser>) -> Self {
        Self { repo_root, parser }
    }

    /// Extract a batch of repo-relative paths with the requested
    /// parallelism. Output order is unspecified.
    pub fn extract_batch(&self, paths: &[String], workers: usize) -> Vec<ExtractionOutcome> {
        if paths.is_empty() {
            return Vec::new();
        }
        let workers = workers.max(1).min(paths.len());
        if workers == 1 {
            return paths.iter().map(|p| self.extract_one(p)).collect();
        }

        let queue: Arc<Mutex<VecDeque<String>>> =
            Arc::new(Mutex::new(paths.iter().cloned().collect()));
        let (tx, rx) = mpsc::channel::<ExtractionOutcome>();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let queue = queue.clone();
                let tx = tx.clone();
                scope.spawn(move || loop {
                    let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                    let Some(path) = next else {
                        break;
                    };
                    // A worker failure only loses its own file.
                    if tx.send(self.extract_one(&path)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);
            rx.iter().collect()
        })
    }

    pub fn extract_one(&self, rel_path: &str) -> ExtractionOutcome {
        let full_path = self.repo_root.join(rel_path);
        let mut outcome = ExtractionOutcome {
            path: rel_path.to_string(),
            content_hash: String::new(),
            content: String::new(),
            line_count: 0,
            language_family: None,
            declared_module: None,
            facts: None,
            error: None,
        };

        let bytes = match std::fs::read(&full_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                outcome.error = Some(format!("read failed: {e}"));
                return outcome;
            }
        };

        outcome.content_hash = compute_content_hash(&bytes);
        outcome.content = String::from_utf8_lossy(&bytes).to_string();
        outcome.line_count = outcome.content.lines().count() as i64;

        let family = detect_language_family(std::path::Path::new(rel_path));
        outcome.language_family = family;
        let Some(family) = family else {
            return outcome;
        };

        if family == LanguageFamily::Go {
            outcome.declared_module = go_package_name(&outcome.content);
        }

        let Some(grammar) = grammar_for(family, std::path::Path::new(rel_path)) else {
            // Lexical-only family: content is still searchable.
            return outcome;
        };

        match self.parser.parse(grammar, &outcome.content_hash, &bytes) {
            Some(parsed) => {
                let facts =
                    extract_facts(grammar, self.parser.grammar(grammar), rel_path, &parsed);
                debug!(
                    path = rel_path,
                    defs = facts.defs.len(),
                    refs = facts.refs.len(),
                    "extracted structural facts"
                );
                outcome.facts = Some(facts);
            }
            None => {
                warn!(path = rel_path, "parse failed; indexing lexically only");
                outcome.error = Some("parse failed".to_string());
            }
        }

        outcome
    }
}

fn go_package_name(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.trim()
            .strip_prefix("package ")
            .map(|rest| rest.trim().to_string())
            .filter(|name| !name.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, StructuralExtractor) {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let extractor = StructuralExtractor::new(
            dir.path().to_path_buf(),
            Arc::new(TreeSitterParser::new()),
        );
        (dir, extractor)
    }

    #[test]
    fn test_extract_one_python() {
        let (_dir, extractor) = setup(&[(
            "src/main.py",
            "def greet(name: str) -> str:\n    return \"Hello \" + name\n",
        )]);

        let outcome = extractor.extract_one("src/main.py");
        assert!(outcome.error.is_none());
        assert_eq!(outcome.language_family, Some(LanguageFamily::Python));
        assert_eq!(outcome.content_hash.len(), 64);
        assert_eq!(outcome.line_count, 2);

        let facts = outcome.facts.unwrap();
        assert_eq!(facts.defs.len(), 1);
        assert_eq!(facts.defs[0].name, "greet");
    }

    #[test]
    fn test_lexical_only_family_has_no_facts() {
        let (_dir, extractor) = setup(&[("README.md", "# Title\n\nSome prose.\n")]);
        let outcome = extractor.extract_one("README.md");
        assert!(outcome.facts.is_none());
        assert!(outcome.error.is_none());
        assert!(!outcome.content.is_empty());
    }

    #[test]
    fn test_missing_file_records_error() {
        let (_dir, extractor) = setup(&[]);
        let outcome = extractor.extract_one("gone.py");
        assert!(outcome.error.as_deref().unwrap_or("").contains("read failed"));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let files: Vec<(String, String)> = (0..12)
            .map(|i| {
                (
                    format!("src/mod_{i}.py"),
                    format!("def fn_{i}():\n    return {i}\n"),
                )
            })
            .collect();
        let refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_str()))
            .collect();
        let (_dir, extractor) = setup(&refs);

        let paths: Vec<String> = files.iter().map(|(p, _)| p.clone()).collect();
        let mut sequential: Vec<String> = extractor
            .extract_batch(&paths, 1)
            .into_iter()
            .map(|o| o.path)
            .collect();
        let mut parallel: Vec<String> = extractor
            .extract_batch(&paths, 4)
            .into_iter()
            .map(|o| o.path)
            .collect();
        sequential.sort();
        parallel.sort();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_go_declared_module() {
        let (_dir, extractor) = setup(&[("pkg/util/io.go", "package util\n\nfunc Read() {}\n")]);
        let outcome = extractor.extract_one("pkg/util/io.go");
        assert_eq!(outcome.declared_module.as_deref(), Some("util"));
    }
}
