//! Working-tree reconciliation.
//!
//! Compares candidate paths against stored content hashes and reports
//! added/modified/removed deltas. The reconciler never writes.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::connector::ignore::{is_prunable_dir, IgnoreChecker};
use crate::connector::storage::Database;
use crate::domain::{
    compute_content_hash, normalize_rel_path, ChangeKind, ChangedFile, CoreError,
    detect_language_family,
};

pub struct Reconciler {
    repo_root: PathBuf,
}

impl Reconciler {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
        }
    }

    /// Reconcile the given candidate paths, or the full tree when
    /// `candidates` is None.
    pub fn reconcile(
        &self,
        db: &Database,
        candidates: Option<&[String]>,
        checker: &IgnoreChecker,
    ) -> Result<Vec<ChangedFile>, CoreError> {
        let stored: HashMap<String, String> = db
            .list_files()?
            .into_iter()
            .map(|f| (f.path, f.content_hash))
            .collect();

        let full_walk = candidates.is_none();
        let candidate_set: BTreeSet<String> = match candidates {
            Some(paths) => paths.iter().cloned().collect(),
            None => self.walk_tree(checker),
        };

        let mut changes = Vec::new();

        for path in &candidate_set {
            if checker.is_excluded_rel(path) {
                continue;
            }
            // Unknown-family files are never indexed, so deltas for them
            // are noise.
            if detect_language_family(Path::new(path)).is_none() {
                continue;
            }
            let full_path = self.repo_root.join(path);
            match std::fs::read(&full_path) {
                Ok(bytes) => {
                    let new_hash = compute_content_hash(&bytes);
                    match stored.get(path) {
                        None => changes.push(ChangedFile {
                            kind: ChangeKind::Added,
                            path: path.clone(),
                            new_hash: Some(new_hash),
                        }),
                        Some(old_hash) if *old_hash != new_hash => changes.push(ChangedFile {
                            kind: ChangeKind::Modified,
                            path: path.clone(),
                            new_hash: Some(new_hash),
                        }),
                        Some(_) => {}
                    }
                }
                Err(_) => {
                    if stored.contains_key(path) {
                        changes.push(ChangedFile {
                            kind: ChangeKind::Removed,
                            path: path.clone(),
                            new_hash: None,
                        });
                    }
                }
            }
        }

        // In a full walk, stored files outside the walked set are gone.
        if full_walk {
            for path in stored.keys() {
                if !candidate_set.contains(path) && !self.repo_root.join(path).exists() {
                    changes.push(ChangedFile {
                        kind: ChangeKind::Removed,
                        path: path.clone(),
                        new_hash: None,
                    });
                }
            }
        }

        Ok(changes)
    }

    fn walk_tree(&self, checker: &IgnoreChecker) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();
        let walker = WalkDir::new(&self.repo_root).into_iter().filter_entry(|e| {
            !(e.file_type().is_dir()
                && is_prunable_dir(e.file_name().to_str().unwrap_or("")))
        });

        for entry in walker.flatten() {
            if !entry.file_type().is_file() || checker.should_ignore(entry.path()) {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.repo_root) {
                let rel_path = normalize_rel_path(rel);
                // Only index files whose family we recognize.
                if detect_language_family(Path::new(&rel_path)).is_some() {
                    paths.insert(rel_path);
                }
            }
        }

        paths
    }
}
