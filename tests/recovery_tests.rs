//! Corruption detection, recovery and epoch ordering across the full
//! coordinator pipeline.

use std::path::Path;
use std::sync::Arc;

use codeplane::{Config, IndexCoordinator, SearchMode};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_corruption_recovery_cycle() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/app.py", "def handler():\n    pass\n");

    let coordinator = Arc::new(IndexCoordinator::open(dir.path(), Config::default()).unwrap());
    coordinator.initialize().await.unwrap();
    assert!(coordinator.verify_integrity().unwrap().passed);

    // Seed a foreign-key orphan in ref_facts.
    coordinator
        .db()
        .execute_raw(
            "INSERT INTO ref_facts (file_id, token_text, start_line, start_col, end_line, end_col, role, ref_tier, certainty)
             VALUES (999999, 'ghost', 1, 0, 1, 5, 'read', 'lexical', 'uncertain')",
        )
        .unwrap();

    let report = coordinator.verify_integrity().unwrap();
    assert!(!report.passed);
    assert!(report
        .issues
        .iter()
        .any(|i| i.category == "fk_violation" && i.table.as_deref() == Some("ref_facts")));

    // Re-initializing detects the corruption, wipes, and rebuilds clean.
    let result = coordinator.initialize().await.unwrap();
    assert_eq!(result.files_indexed, 1);
    assert!(coordinator.verify_integrity().unwrap().passed);

    // The one-shot warning surfaces once, then clears.
    let warning = coordinator.take_integrity_warning();
    assert!(warning.is_some());
    assert!(coordinator.take_integrity_warning().is_none());

    // The rebuilt index still serves queries.
    let response = coordinator
        .search("handler", SearchMode::Symbol, 10, None)
        .unwrap();
    assert_eq!(response.results.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_epoch_monotonic_across_jobs() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "x = 1\n");

    let coordinator = Arc::new(IndexCoordinator::open(dir.path(), Config::default()).unwrap());
    coordinator.initialize().await.unwrap();

    let mut last = coordinator.get_current_epoch().unwrap();
    for round in 0..3 {
        write(dir.path(), "a.py", &format!("x = {round}\n"));
        let stats = coordinator
            .reindex_incremental(vec!["a.py".to_string()])
            .await
            .unwrap();
        assert!(stats.epoch_id > last, "epoch must strictly increase");
        last = stats.epoch_id;
    }

    // A no-op reindex publishes nothing and holds the epoch steady.
    let stats = coordinator
        .reindex_incremental(vec!["a.py".to_string()])
        .await
        .unwrap();
    assert_eq!(stats.epoch_id, last);
    assert_eq!(stats.files_processed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resolution_non_regression_across_reindex() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/a.py", "def foo():\n    pass\n");
    write(dir.path(), "src/b.py", "from .a import foo\nfoo()\n");

    let coordinator = Arc::new(IndexCoordinator::open(dir.path(), Config::default()).unwrap());
    coordinator.initialize().await.unwrap();

    let tier_of = |db: &codeplane::Database| {
        db.search_refs("foo", 10, None)
            .unwrap()
            .into_iter()
            .find(|(_, path)| path == "src/b.py")
            .map(|(r, _)| r.ref_tier)
            .unwrap()
    };

    let db = coordinator.db();
    let before = tier_of(&db);
    assert_eq!(before, codeplane::RefTier::Proven);

    // Touch the defining file; after the incremental round the ref is
    // still at least as resolved as before.
    write(dir.path(), "src/a.py", "def foo():\n    return 2\n");
    coordinator
        .reindex_incremental(vec!["src/a.py".to_string()])
        .await
        .unwrap();
    assert!(tier_of(&db) >= before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reindex_full_catches_unreported_changes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def first():\n    pass\n");

    let coordinator = Arc::new(IndexCoordinator::open(dir.path(), Config::default()).unwrap());
    coordinator.initialize().await.unwrap();

    // Changes land on disk without anyone calling reindex_incremental.
    write(dir.path(), "b.py", "def second():\n    pass\n");
    std::fs::remove_file(dir.path().join("a.py")).unwrap();

    let stats = coordinator.reindex_full().await.unwrap();
    assert_eq!(stats.files_added, 1);
    assert_eq!(stats.files_removed, 1);

    let db = coordinator.db();
    assert!(db.get_file_by_path("a.py").unwrap().is_none());
    assert!(db.get_file_by_path("b.py").unwrap().is_some());
}
