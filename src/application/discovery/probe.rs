//! Context probe validation via file sampling.
//!
//! A candidate is valid when enough sampled files parse with the
//! family's grammar. Data families relax validation to byte-readable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::connector::ignore::{is_prunable_dir, matches_glob, IgnoreChecker};
use crate::connector::parser::{grammar_for, TreeSitterParser};
use crate::domain::{language_def, normalize_rel_path, CandidateContext, ProbeStatus};

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub max_sample: usize,
    pub min_success: usize,
    pub min_ratio: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_sample: 10,
            min_success: 1,
            min_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub status: ProbeStatus,
    pub files_sampled: usize,
    pub files_passed: usize,
    pub reason: String,
}

pub struct ContextProbe {
    repo_root: PathBuf,
    config: ProbeConfig,
    parser: Arc<TreeSitterParser>,
}

impl ContextProbe {
    pub fn new(repo_root: &Path, config: ProbeConfig, parser: Arc<TreeSitterParser>) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            config,
            parser,
        }
    }

    pub fn validate(&self, candidate: &CandidateContext, checker: &IgnoreChecker) -> ProbeResult {
        let ctx_root = if candidate.root_path.is_empty() {
            self.repo_root.clone()
        } else {
            self.repo_root.join(&candidate.root_path)
        };
        if !ctx_root.exists() {
            return ProbeResult {
                status: ProbeStatus::Invalid,
                files_sampled: 0,
                files_passed: 0,
                reason: format!("root path does not exist: {}", candidate.root_path),
            };
        }

        let sampled = self.sample_files(candidate, &ctx_root, checker);
        if sampled.is_empty() {
            return ProbeResult {
                status: ProbeStatus::Invalid,
                files_sampled: 0,
                files_passed: 0,
                reason: "no matching files found".to_string(),
            };
        }

        let passed = sampled
            .iter()
            .filter(|path| self.validate_file(candidate, path))
            .count();

        let enough = passed >= self.config.min_success;
        let ratio_ok = sampled.len() <= self.config.min_success
            || (passed as f64 / sampled.len() as f64) >= self.config.min_ratio;

        if enough && ratio_ok {
            ProbeResult {
                status: ProbeStatus::Valid,
                files_sampled: sampled.len(),
                files_passed: passed,
                reason: String::new(),
            }
        } else {
            ProbeResult {
                status: ProbeStatus::Invalid,
                files_sampled: sampled.len(),
                files_passed: passed,
                reason: if enough {
                    format!("low parse ratio: {passed}/{}", sampled.len())
                } else {
                    format!("insufficient parses: {passed}/{}", self.config.min_success)
                },
            }
        }
    }

    fn sample_files(
        &self,
        candidate: &CandidateContext,
        ctx_root: &Path,
        checker: &IgnoreChecker,
    ) -> Vec<PathBuf> {
        let extensions = language_def(candidate.language_family).extensions;
        let mut files = Vec::new();

        let walker = WalkDir::new(ctx_root).into_iter().filter_entry(|e| {
            !(e.file_type().is_dir() && is_prunable_dir(e.file_name().to_str().unwrap_or("")))
        });

        for entry in walker.flatten() {
            if files.len() >= self.config.max_sample {
                break;
            }
            if !entry.file_type().is_file() || checker.should_ignore(entry.path()) {
                continue;
            }
            let name = entry.file_name().to_str().unwrap_or("");
            let matches_ext = extensions.iter().any(|ext| {
                name.to_lowercase()
                    .ends_with(&ext.to_lowercase())
            });
            if !matches_ext {
                continue;
            }
            let rel_in_ctx = entry
                .path()
                .strip_prefix(ctx_root)
                .map(normalize_rel_path)
                .unwrap_or_default();
            if candidate
                .exclude_spec
                .iter()
                .any(|pat| matches_glob(&rel_in_ctx, pat))
            {
                continue;
            }
            files.push(entry.path().to_path_buf());
        }

        files
    }

    fn validate_file(&self, candidate: &CandidateContext, path: &Path) -> bool {
        let Ok(bytes) = std::fs::read(path) else {
            return false;
        };
        // Data families and families without a grammar: byte-readable.
        if candidate.language_family.is_data_format() {
            return std::str::from_utf8(&bytes).is_ok();
        }
        match grammar_for(candidate.language_family, path) {
            Some(grammar) => self.parser.validates(grammar, &bytes),
            None => std::str::from_utf8(&bytes).is_ok(),
        }
    }
}

/// Validate every candidate, returning probe statuses in input order.
pub fn validate_contexts(
    repo_root: &Path,
    candidates: &[CandidateContext],
    config: ProbeConfig,
    parser: Arc<TreeSitterParser>,
    checker: &IgnoreChecker,
) -> Vec<ProbeResult> {
    let probe = ContextProbe::new(repo_root, config, parser);
    candidates
        .iter()
        .map(|c| probe.validate(c, checker))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LanguageFamily, MarkerTier};

    fn candidate(family: LanguageFamily, root: &str) -> CandidateContext {
        CandidateContext {
            language_family: family,
            root_path: root.to_string(),
            tier: MarkerTier::Package,
            markers: vec![],
            include_spec: vec![],
            exclude_spec: vec![],
        }
    }

    fn probe_for(dir: &Path) -> (ContextProbe, IgnoreChecker) {
        (
            ContextProbe::new(dir, ProbeConfig::default(), Arc::new(TreeSitterParser::new())),
            IgnoreChecker::new(dir, &[], false),
        )
    }

    #[test]
    fn test_valid_python_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "def f():\n    return 1\n").unwrap();

        let (probe, checker) = probe_for(dir.path());
        let result = probe.validate(&candidate(LanguageFamily::Python, "src"), &checker);
        assert_eq!(result.status, ProbeStatus::Valid);
        assert_eq!(result.files_passed, 1);
    }

    #[test]
    fn test_empty_context_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let (probe, checker) = probe_for(dir.path());
        let result = probe.validate(&candidate(LanguageFamily::Python, "empty"), &checker);
        assert_eq!(result.status, ProbeStatus::Invalid);
        assert_eq!(result.reason, "no matching files found");
    }

    #[test]
    fn test_unparseable_files_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.py"), "def def def ((\n").unwrap();

        let (probe, checker) = probe_for(dir.path());
        let result = probe.validate(&candidate(LanguageFamily::Python, ""), &checker);
        assert_eq!(result.status, ProbeStatus::Invalid);
        assert_eq!(result.files_passed, 0);
    }

    #[test]
    fn test_data_family_relaxed_validation() {
        let dir = tempfile::tempdir().unwrap();
        // Not valid JSON, but byte-readable: good enough for data formats.
        std::fs::write(dir.path().join("notes.json"), "not really json").unwrap();

        let (probe, checker) = probe_for(dir.path());
        let result = probe.validate(&candidate(LanguageFamily::JsonYaml, ""), &checker);
        assert_eq!(result.status, ProbeStatus::Valid);
    }

    #[test]
    fn test_missing_root_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let (probe, checker) = probe_for(dir.path());
        let result = probe.validate(&candidate(LanguageFamily::Python, "nope"), &checker);
        assert_eq!(result.status, ProbeStatus::Invalid);
        assert!(result.reason.contains("does not exist"));
    }
}
