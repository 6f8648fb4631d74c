//! Unified path exclusion.
//!
//! Single source of truth for ignore logic used by the file watcher,
//! context probing, discovery scans and map-repo filtering. Composes the
//! hardcoded prunable set, `.cplignore` files (root plus nested),
//! optional `.gitignore` trees, and caller-supplied extra patterns.

use std::path::{Path, PathBuf};

use glob::Pattern;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::domain::normalize_rel_path;

/// Directory names pruned during traversal, matched by exact segment.
pub const PRUNABLE_DIRS: &[&str] = &[
    // Version control
    ".git",
    ".svn",
    ".hg",
    // CodePlane state
    ".codeplane",
    // JavaScript/Node
    "node_modules",
    ".npm",
    ".yarn",
    ".pnpm-store",
    // Python
    "venv",
    ".venv",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
    ".tox",
    "site-packages",
    ".ipynb_checkpoints",
    // Go
    "vendor",
    // Rust
    "target",
    // JVM
    ".gradle",
    ".m2",
    "out",
    // .NET
    "bin",
    "obj",
    // Terraform
    ".terraform",
    // Ruby
    ".bundle",
    // Build outputs
    "dist",
    "build",
    "_build",
    // Coverage
    "coverage",
    ".nyc_output",
    "htmlcov",
    // IDE
    ".idea",
    ".vscode",
    // Caches
    ".cache",
    "tmp",
];

pub fn is_prunable_dir(name: &str) -> bool {
    PRUNABLE_DIRS.contains(&name)
}

#[derive(Debug, Clone)]
struct IgnorePattern {
    negate: bool,
    pattern: Pattern,
}

/// Checks whether paths should be excluded from indexing.
///
/// Pattern syntax is glob with `!` negation; negation is evaluated in
/// load order. A path is ignored when it, or any ancestor directory of
/// it, matches a pattern.
pub struct IgnoreChecker {
    root: PathBuf,
    patterns: Vec<IgnorePattern>,
    /// (relative path, content) of every loaded ignore file, load order.
    loaded_files: Vec<(String, String)>,
}

impl IgnoreChecker {
    pub fn new(root: &Path, extra_patterns: &[String], respect_gitignore: bool) -> Self {
        let mut checker = Self {
            root: root.to_path_buf(),
            patterns: Vec::new(),
            loaded_files: Vec::new(),
        };

        checker.load_cplignore_tree();
        if respect_gitignore {
            checker.load_gitignore_tree();
        }
        for raw in extra_patterns {
            checker.add_pattern(raw, "");
        }

        checker
    }

    fn load_cplignore_tree(&mut self) {
        // The canonical location plus any nested .cplignore in the tree.
        let canonical = self.root.join(".codeplane").join(".cplignore");
        if canonical.exists() {
            self.load_ignore_file(&canonical, "");
        }
        self.load_named_tree(".cplignore");
    }

    fn load_gitignore_tree(&mut self) {
        self.load_named_tree(".gitignore");
    }

    /// Load every `name` file under the root, prefixing nested files'
    /// patterns with the file's directory relative to root.
    fn load_named_tree(&mut self, name: &str) {
        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && is_prunable_dir(entry_name(e))));

        for entry in walker.flatten() {
            if !entry.file_type().is_file() || entry.file_name() != name {
                continue;
            }
            let prefix = entry
                .path()
                .parent()
                .and_then(|dir| dir.strip_prefix(&self.root).ok())
                .map(|rel| normalize_rel_path(rel))
                .unwrap_or_default();
            let path = entry.path().to_path_buf();
            self.load_ignore_file(&path, &prefix);
        }
    }

    fn load_ignore_file(&mut self, path: &Path, prefix: &str) {
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.add_pattern(line, prefix);
        }

        let rel = path
            .strip_prefix(&self.root)
            .map(normalize_rel_path)
            .unwrap_or_else(|_| path.to_string_lossy().to_string());
        self.loaded_files.push((rel, content));
    }

    fn add_pattern(&mut self, raw: &str, prefix: &str) {
        let (negate, body) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        // Directory patterns ending in / match everything beneath them.
        let body = if let Some(stripped) = body.strip_suffix('/') {
            format!("{stripped}/**")
        } else {
            body.to_string()
        };

        let full = if prefix.is_empty() {
            body
        } else {
            format!("{prefix}/{body}")
        };

        if let Ok(pattern) = Pattern::new(&full) {
            self.patterns.push(IgnorePattern { negate, pattern });
        }
    }

    /// Should this absolute path be ignored? Paths outside the root are
    /// always ignored.
    pub fn should_ignore(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return true;
        };
        self.is_excluded_rel(&normalize_rel_path(rel))
    }

    /// Pattern check against a repo-relative path.
    pub fn is_excluded_rel(&self, rel_path: &str) -> bool {
        if rel_path.split('/').any(is_prunable_dir) {
            return true;
        }

        for entry in &self.patterns {
            if entry.negate {
                if entry.pattern.matches(rel_path) {
                    return false;
                }
                continue;
            }
            if entry.pattern.matches(rel_path) {
                return true;
            }
            // A pattern naming a directory excludes everything inside it.
            for ancestor in ancestors_of(rel_path) {
                if entry.pattern.matches(ancestor) {
                    return true;
                }
            }
        }

        false
    }

    /// SHA-256 over the loaded ignore-file contents in deterministic
    /// (path-sorted) order. Callers use this to invalidate caches when
    /// ignore configuration changes.
    pub fn compute_combined_hash(&self) -> String {
        let mut files = self.loaded_files.clone();
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        for (path, content) in &files {
            hasher.update(path.as_bytes());
            hasher.update(b"\x00");
            hasher.update(content.as_bytes());
            hasher.update(b"\x00");
        }
        format!("{:x}", hasher.finalize())
    }
}

fn entry_name(entry: &walkdir::DirEntry) -> &str {
    entry.file_name().to_str().unwrap_or("")
}

fn ancestors_of(rel_path: &str) -> impl Iterator<Item = &str> {
    rel_path
        .char_indices()
        .filter(|(_, c)| *c == '/')
        .map(|(i, _)| &rel_path[..i])
}

/// Glob match with `**/` any-depth support, shared by context exclude
/// checks and map-repo filters.
pub fn matches_glob(rel_path: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("**/") {
        if Pattern::new(suffix).map(|p| p.matches(rel_path)).unwrap_or(false) {
            return true;
        }
        // Any-depth: also try the suffix against every path tail.
        let mut rest = rel_path;
        while let Some(pos) = rest.find('/') {
            rest = &rest[pos + 1..];
            if Pattern::new(suffix).map(|p| p.matches(rest)).unwrap_or(false) {
                return true;
            }
        }
    }
    Pattern::new(pattern).map(|p| p.matches(rel_path)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_prunable_segments_always_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let checker = IgnoreChecker::new(dir.path(), &[], false);
        assert!(checker.is_excluded_rel("node_modules/lib/index.js"));
        assert!(checker.is_excluded_rel("a/b/__pycache__/x.pyc"));
        assert!(checker.is_excluded_rel("target/debug/app"));
        assert!(!checker.is_excluded_rel("src/main.py"));
    }

    #[test]
    fn test_cplignore_patterns() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".codeplane/.cplignore", "*.generated.py\ndocs/\n");
        let checker = IgnoreChecker::new(dir.path(), &[], false);
        assert!(checker.is_excluded_rel("api.generated.py"));
        assert!(checker.is_excluded_rel("docs/guide.md"));
        assert!(!checker.is_excluded_rel("src/api.py"));
    }

    #[test]
    fn test_nested_cplignore_prefixing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pkg/.cplignore", "fixtures/\n");
        write(dir.path(), "pkg/fixtures/data.json", "{}");
        let checker = IgnoreChecker::new(dir.path(), &[], false);
        assert!(checker.is_excluded_rel("pkg/fixtures/data.json"));
        assert!(!checker.is_excluded_rel("fixtures/data.json"));
    }

    #[test]
    fn test_negation() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".codeplane/.cplignore", "!keep.log\n*.log\n");
        let checker = IgnoreChecker::new(dir.path(), &[], false);
        assert!(checker.is_excluded_rel("debug.log"));
        assert!(!checker.is_excluded_rel("keep.log"));
    }

    #[test]
    fn test_gitignore_respected_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", "*.tmp\n");

        let off = IgnoreChecker::new(dir.path(), &[], false);
        assert!(!off.is_excluded_rel("scratch.tmp"));

        let on = IgnoreChecker::new(dir.path(), &[], true);
        assert!(on.is_excluded_rel("scratch.tmp"));
    }

    #[test]
    fn test_should_ignore_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let checker = IgnoreChecker::new(dir.path(), &[], false);
        assert!(checker.should_ignore(Path::new("/somewhere/else.py")));
    }

    #[test]
    fn test_combined_hash_tracks_ignore_config() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".codeplane/.cplignore", "*.log\n");
        let before = IgnoreChecker::new(dir.path(), &[], false).compute_combined_hash();

        // Same inputs produce the same hash.
        let again = IgnoreChecker::new(dir.path(), &[], false).compute_combined_hash();
        assert_eq!(before, again);

        write(dir.path(), ".codeplane/.cplignore", "*.log\n*.tmp\n");
        let after = IgnoreChecker::new(dir.path(), &[], false).compute_combined_hash();
        assert_ne!(before, after);
    }

    #[test]
    fn test_extra_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let checker = IgnoreChecker::new(dir.path(), &["*.snap".to_string()], false);
        assert!(checker.is_excluded_rel("tests/output.snap"));
    }

    #[test]
    fn test_matches_glob_any_depth() {
        assert!(matches_glob("a/b/test_x.py", "**/test_*.py"));
        assert!(matches_glob("test_x.py", "**/test_*.py"));
        assert!(matches_glob("core/index.js", "core/**"));
        assert!(!matches_glob("corex/index.js", "core/**"));
    }
}
