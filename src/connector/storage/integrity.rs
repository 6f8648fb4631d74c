//! Index integrity verification and recovery.
//!
//! Checks foreign-key orphans, files missing from disk, and drift
//! between the lexical document count and the Files table. On failure,
//! recovery wipes both stores and forces a full reindex.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::IntegrityConfig;
use crate::connector::lexical::LexicalIndex;
use crate::connector::storage::Database;
use crate::domain::CoreError;

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityIssue {
    pub category: String,
    pub table: Option<String>,
    pub message: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub passed: bool,
    pub issues: Vec<IntegrityIssue>,
    pub files_checked: u64,
    pub lexical_doc_count: u64,
    pub storage_file_count: u64,
}

impl IntegrityReport {
    fn add_issue(&mut self, issue: IntegrityIssue) {
        self.issues.push(issue);
        self.passed = false;
    }
}

pub struct IntegrityChecker<'a> {
    db: &'a Database,
    repo_root: PathBuf,
    lexical: Option<&'a LexicalIndex>,
    config: IntegrityConfig,
}

impl<'a> IntegrityChecker<'a> {
    pub fn new(
        db: &'a Database,
        repo_root: &Path,
        lexical: Option<&'a LexicalIndex>,
        config: IntegrityConfig,
    ) -> Self {
        Self {
            db,
            repo_root: repo_root.to_path_buf(),
            lexical,
            config,
        }
    }

    pub fn verify(&self) -> Result<IntegrityReport, CoreError> {
        let mut report = IntegrityReport {
            passed: true,
            ..Default::default()
        };

        self.check_foreign_keys(&mut report)?;
        self.check_files_exist(&mut report)?;
        self.check_lexical_sync(&mut report)?;

        if !report.passed {
            warn!(issues = report.issues.len(), "integrity check failed");
        }
        Ok(report)
    }

    fn check_foreign_keys(&self, report: &mut IntegrityReport) -> Result<(), CoreError> {
        for table in [
            "ref_facts",
            "def_facts",
            "import_facts",
            "scope_facts",
            "local_bind_facts",
            "context_markers",
        ] {
            let orphans = self.db.count_orphans(table)?;
            if orphans > 0 {
                report.add_issue(IntegrityIssue {
                    category: "fk_violation".to_string(),
                    table: Some(table.to_string()),
                    message: format!("{table} rows pointing at missing parents"),
                    count: orphans,
                });
            }
        }
        Ok(())
    }

    fn check_files_exist(&self, report: &mut IntegrityReport) -> Result<(), CoreError> {
        let files = self.db.list_files()?;
        report.files_checked = files.len() as u64;

        let missing = files
            .iter()
            .filter(|f| !self.repo_root.join(&f.path).exists())
            .count() as u64;
        if missing > 0 {
            report.add_issue(IntegrityIssue {
                category: "missing_file".to_string(),
                table: Some("files".to_string()),
                message: "files in storage but missing from disk".to_string(),
                count: missing,
            });
        }
        Ok(())
    }

    fn check_lexical_sync(&self, report: &mut IntegrityReport) -> Result<(), CoreError> {
        let Some(lexical) = self.lexical else {
            return Ok(());
        };

        let storage_count = self.db.files_count()?;
        let lexical_count = lexical.doc_count();
        report.storage_file_count = storage_count;
        report.lexical_doc_count = lexical_count;

        let drift = lexical_count.abs_diff(storage_count);
        let tolerance = self
            .config
            .drift_abs
            .max((storage_count as f64 * self.config.drift_ratio) as u64);
        if drift > tolerance {
            report.add_issue(IntegrityIssue {
                category: "lexical_drift".to_string(),
                table: None,
                message: format!(
                    "lexical has {lexical_count} docs, storage has {storage_count} files"
                ),
                count: drift,
            });
        }
        Ok(())
    }
}

/// Wipes all index state so the next `initialize()` rebuilds from disk.
pub struct IndexRecovery<'a> {
    db: &'a Database,
    lexical_dir: PathBuf,
}

impl<'a> IndexRecovery<'a> {
    pub fn new(db: &'a Database, lexical_dir: &Path) -> Self {
        Self {
            db,
            lexical_dir: lexical_dir.to_path_buf(),
        }
    }

    pub fn wipe_all(&self) -> Result<(), CoreError> {
        self.db.wipe_all()?;
        if self.lexical_dir.exists() {
            std::fs::remove_dir_all(&self.lexical_dir)?;
        }
        info!("index state wiped; full reindex required");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::storage::NewFile;

    fn seeded_db(dir: &Path) -> Database {
        let db = Database::in_memory().unwrap();
        std::fs::write(dir.join("a.py"), "x = 1\n").unwrap();
        db.upsert_file(&NewFile {
            path: "a.py".to_string(),
            language_family: None,
            content_hash: "h".to_string(),
            indexed_at: Some(1),
            declared_module: None,
            interface_hash: None,
            line_count: 1,
        })
        .unwrap();
        db
    }

    #[test]
    fn test_clean_index_passes() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let checker = IntegrityChecker::new(&db, dir.path(), None, IntegrityConfig::default());
        let report = checker.verify().unwrap();
        assert!(report.passed);
        assert_eq!(report.files_checked, 1);
    }

    #[test]
    fn test_fk_orphan_detected() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        db.execute_raw(
            "INSERT INTO ref_facts (file_id, token_text, start_line, start_col, end_line, end_col, role, ref_tier, certainty)
             VALUES (4242, 'ghost', 1, 0, 1, 5, 'read', 'lexical', 'uncertain')",
        )
        .unwrap();

        let checker = IntegrityChecker::new(&db, dir.path(), None, IntegrityConfig::default());
        let report = checker.verify().unwrap();
        assert!(!report.passed);
        assert!(report
            .issues
            .iter()
            .any(|i| i.category == "fk_violation" && i.table.as_deref() == Some("ref_facts")));
    }

    #[test]
    fn test_missing_file_detected() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        std::fs::remove_file(dir.path().join("a.py")).unwrap();

        let checker = IntegrityChecker::new(&db, dir.path(), None, IntegrityConfig::default());
        let report = checker.verify().unwrap();
        assert!(!report.passed);
        assert!(report.issues.iter().any(|i| i.category == "missing_file"));
    }

    #[test]
    fn test_recovery_then_passes() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        db.execute_raw(
            "INSERT INTO ref_facts (file_id, token_text, start_line, start_col, end_line, end_col, role, ref_tier, certainty)
             VALUES (4242, 'ghost', 1, 0, 1, 5, 'read', 'lexical', 'uncertain')",
        )
        .unwrap();

        let lexical_dir = dir.path().join("tantivy");
        IndexRecovery::new(&db, &lexical_dir).wipe_all().unwrap();

        let checker = IntegrityChecker::new(&db, dir.path(), None, IntegrityConfig::default());
        let report = checker.verify().unwrap();
        assert!(report.passed);
        assert_eq!(report.files_checked, 0);
    }
}
