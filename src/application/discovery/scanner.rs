//! Marker scanning and candidate synthesis.
//!
//! Walks the repository (leaves pruned via the ignore engine), records
//! workspace/package markers per directory, and emits one candidate
//! context per (family, root). Families with source files but no marker
//! anywhere get a synthesized candidate rooted at the deepest common
//! directory of their files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use walkdir::WalkDir;

use crate::connector::ignore::{is_prunable_dir, IgnoreChecker};
use crate::domain::{
    detect_language_family, language_def, marker_definitions, normalize_rel_path, CandidateContext,
    LanguageFamily, MarkerTier,
};

pub fn scan_candidates(repo_root: &Path, checker: &IgnoreChecker) -> Vec<CandidateContext> {
    // (family, root) -> (tier, markers)
    let mut found: BTreeMap<(String, String), (MarkerTier, BTreeSet<String>)> = BTreeMap::new();
    let marker_defs = marker_definitions();

    // Families seen anywhere, with every file path, for markerless synthesis.
    let mut family_files: BTreeMap<String, Vec<String>> = BTreeMap::new();

    let walker = WalkDir::new(repo_root).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir() && is_prunable_dir(e.file_name().to_str().unwrap_or("")))
    });

    for entry in walker.flatten() {
        if !entry.file_type().is_file() || checker.should_ignore(entry.path()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(repo_root) else {
            continue;
        };
        let rel_path = normalize_rel_path(rel);
        let name = entry.file_name().to_str().unwrap_or("");
        let dir = match rel_path.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        };

        for (family, ws_markers, pkg_markers) in &marker_defs {
            let tier = if ws_markers.iter().any(|m| m.eq_ignore_ascii_case(name)) {
                Some(MarkerTier::Workspace)
            } else if pkg_markers.iter().any(|m| m.eq_ignore_ascii_case(name)) {
                Some(MarkerTier::Package)
            } else {
                None
            };
            if let Some(tier) = tier {
                let key = (family.as_str().to_string(), dir.clone());
                let slot = found
                    .entry(key)
                    .or_insert_with(|| (tier, BTreeSet::new()));
                // Workspace markers outrank package markers at the same root.
                if tier == MarkerTier::Workspace {
                    slot.0 = MarkerTier::Workspace;
                }
                slot.1.insert(name.to_string());
            }
        }

        if let Some(family) = detect_language_family(Path::new(&rel_path)) {
            family_files
                .entry(family.as_str().to_string())
                .or_default()
                .push(rel_path.clone());
        }
    }

    let mut candidates: Vec<CandidateContext> = found
        .into_iter()
        .filter_map(|((family, root), (tier, markers))| {
            let family = LanguageFamily::parse(&family)?;
            Some(CandidateContext {
                language_family: family,
                root_path: root,
                tier,
                markers: markers.into_iter().collect(),
                include_spec: default_include(family),
                exclude_spec: Vec::new(),
            })
        })
        .collect();

    // Markerless fallback: a family whose files exist but produced no
    // candidate is rooted at the deepest directory common to its files.
    let covered: BTreeSet<&str> = candidates
        .iter()
        .map(|c| c.language_family.as_str())
        .collect();
    for (family_tag, files) in &family_files {
        if covered.contains(family_tag.as_str()) {
            continue;
        }
        let Some(family) = LanguageFamily::parse(family_tag) else {
            continue;
        };
        if language_def(family).include_globs.is_empty() {
            continue;
        }
        candidates.push(CandidateContext {
            language_family: family,
            root_path: common_ancestor_dir(files),
            tier: MarkerTier::Package,
            markers: Vec::new(),
            include_spec: default_include(family),
            exclude_spec: Vec::new(),
        });
    }

    candidates.sort_by(|a, b| {
        (a.root_path.as_str(), a.language_family.as_str())
            .cmp(&(b.root_path.as_str(), b.language_family.as_str()))
    });
    candidates
}

fn default_include(family: LanguageFamily) -> Vec<String> {
    language_def(family)
        .include_globs
        .iter()
        .map(|g| g.to_string())
        .collect()
}

/// Deepest directory containing every given path ("" for repo root).
fn common_ancestor_dir(paths: &[String]) -> String {
    let mut common: Option<Vec<&str>> = None;
    for path in paths {
        let dir: Vec<&str> = match path.rsplit_once('/') {
            Some((dir, _)) => dir.split('/').collect(),
            None => Vec::new(),
        };
        common = Some(match common {
            None => dir,
            Some(prev) => prev
                .iter()
                .zip(dir.iter())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| *a)
                .collect(),
        });
    }
    common.unwrap_or_default().join("/")
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
    fn test_marker_scan_finds_package_roots() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pyproject.toml", "[project]\nname = \"x\"\n");
        write(dir.path(), "src/app.py", "x = 1\n");

        let checker = IgnoreChecker::new(dir.path(), &[], false);
        let candidates = scan_candidates(dir.path(), &checker);

        let python: Vec<_> = candidates
            .iter()
            .filter(|c| c.language_family == LanguageFamily::Python)
            .collect();
        assert_eq!(python.len(), 1);
        assert_eq!(python[0].root_path, "");
        assert!(python[0].markers.contains(&"pyproject.toml".to_string()));
        assert!(!python[0].include_spec.is_empty());
    }

    #[test]
    fn test_nested_markers_emit_nested_candidates() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "packages/package.json", "{}");
        write(dir.path(), "packages/core/package.json", "{}");
        write(dir.path(), "packages/core/index.js", "module.exports = {};\n");

        let checker = IgnoreChecker::new(dir.path(), &[], false);
        let candidates = scan_candidates(dir.path(), &checker);

        let js_roots: Vec<&str> = candidates
            .iter()
            .filter(|c| c.language_family == LanguageFamily::Javascript)
            .map(|c| c.root_path.as_str())
            .collect();
        assert!(js_roots.contains(&"packages"));
        assert!(js_roots.contains(&"packages/core"));
    }

    #[test]
    fn test_markerless_family_synthesized_at_common_root() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.py", "def greet():\n    pass\n");

        let checker = IgnoreChecker::new(dir.path(), &[], false);
        let candidates = scan_candidates(dir.path(), &checker);

        let python = candidates
            .iter()
            .find(|c| c.language_family == LanguageFamily::Python)
            .unwrap();
        assert_eq!(python.root_path, "src");
        assert!(python.markers.is_empty());
    }

    #[test]
    fn test_common_ancestor_dir() {
        assert_eq!(common_ancestor_dir(&["src/a.py".to_string()]), "src");
        assert_eq!(
            common_ancestor_dir(&["src/a/x.py".to_string(), "src/b/y.py".to_string()]),
            "src"
        );
        assert_eq!(
            common_ancestor_dir(&["a.py".to_string(), "src/b.py".to_string()]),
            ""
        );
    }
}
