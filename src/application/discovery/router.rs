//! File-to-context routing.
//!
//! The gating invariant: for a given language family, the deepest
//! context whose root contains the file, whose include spec matches and
//! whose exclude spec does not, owns the file. Every file has at most
//! one owner per family.

use std::path::Path;

use crate::connector::ignore::matches_glob;
use crate::domain::{
    detect_language_family, is_inside, relative_to_root, ContextRecord, LanguageFamily,
};

/// Route a file to its owning context among the stored contexts.
pub fn route_file<'a>(path: &str, contexts: &'a [ContextRecord]) -> Option<&'a ContextRecord> {
    let family = detect_language_family(Path::new(path))?;
    route_file_for_family(path, family, contexts)
}

pub fn route_file_for_family<'a>(
    path: &str,
    family: LanguageFamily,
    contexts: &'a [ContextRecord],
) -> Option<&'a ContextRecord> {
    let mut matching: Vec<&ContextRecord> = contexts
        .iter()
        .filter(|c| c.language_family == family)
        .collect();
    // Deepest root wins.
    matching.sort_by_key(|c| std::cmp::Reverse(c.root_depth()));

    matching.into_iter().find(|ctx| owns(ctx, path))
}

fn owns(ctx: &ContextRecord, path: &str) -> bool {
    if !is_inside(path, &ctx.root_path) {
        return false;
    }
    let rel = relative_to_root(path, &ctx.root_path);

    if ctx.exclude_spec.iter().any(|pat| matches_glob(rel, pat)) {
        return false;
    }
    if ctx.include_spec.is_empty() {
        return true;
    }
    ctx.include_spec.iter().any(|pat| matches_glob(rel, pat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProbeStatus;

    fn context(id: i64, family: LanguageFamily, root: &str, excludes: &[&str]) -> ContextRecord {
        ContextRecord {
            id,
            language_family: family,
            root_path: root.to_string(),
            include_spec: crate::domain::language_def(family)
                .include_globs
                .iter()
                .map(|g| g.to_string())
                .collect(),
            exclude_spec: excludes.iter().map(|e| e.to_string()).collect(),
            probe_status: ProbeStatus::Valid,
        }
    }

    #[test]
    fn test_deepest_match_wins() {
        let contexts = vec![
            context(1, LanguageFamily::Javascript, "packages", &["core/**"]),
            context(2, LanguageFamily::Javascript, "packages/core", &[]),
        ];

        let owner = route_file("packages/core/index.js", &contexts).unwrap();
        assert_eq!(owner.id, 2);

        let owner = route_file("packages/top.js", &contexts).unwrap();
        assert_eq!(owner.id, 1);
    }

    #[test]
    fn test_hole_punch_blocks_parent_ownership() {
        // Even without the child context present, the parent's punched
        // exclude keeps it from claiming nested files.
        let contexts = vec![context(1, LanguageFamily::Javascript, "packages", &["core/**"])];
        assert!(route_file("packages/core/index.js", &contexts).is_none());
    }

    #[test]
    fn test_family_filter() {
        let contexts = vec![
            context(1, LanguageFamily::Python, "src", &[]),
            context(2, LanguageFamily::Javascript, "src", &[]),
        ];
        let owner = route_file("src/app.py", &contexts).unwrap();
        assert_eq!(owner.id, 1);
    }

    #[test]
    fn test_include_spec_must_match() {
        let mut ctx = context(1, LanguageFamily::Python, "src", &[]);
        ctx.include_spec = vec!["**/*.py".to_string()];
        let contexts = vec![ctx];

        assert!(route_file_for_family("src/a.py", LanguageFamily::Python, &contexts).is_some());
        assert!(route_file_for_family("src/data.csv", LanguageFamily::Python, &contexts).is_none());
    }

    #[test]
    fn test_at_most_one_owner_per_family() {
        let contexts = vec![
            context(1, LanguageFamily::Javascript, "packages", &["core/**"]),
            context(2, LanguageFamily::Javascript, "packages/core", &[]),
        ];
        // Routing is deterministic: the same path always lands on the
        // same single owner.
        for _ in 0..3 {
            let owner = route_file("packages/core/lib/util.js", &contexts).unwrap();
            assert_eq!(owner.id, 2);
        }
    }
}
