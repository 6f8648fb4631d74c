//! End-to-end tests for the indexing engine.
//!
//! Each test builds a throwaway repository, runs the full initialize
//! pipeline and checks what the index serves back.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use codeplane::{
    compute_content_hash, route_file, Config, IndexCoordinator, LanguageFamily, MapRepoRequest,
    ProbeStatus, RefTier, ScopePreference, SearchMode,
};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

async fn coordinator_for(dir: &Path) -> Arc<IndexCoordinator> {
    Arc::new(IndexCoordinator::open(dir, Config::default()).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_python_file_indexed() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/main.py",
        "def greet(name: str) -> str:\n    return \"Hello \" + name\n",
    );

    let coordinator = coordinator_for(dir.path()).await;
    let result = coordinator.initialize().await.unwrap();
    assert_eq!(result.contexts_valid, 1);
    assert_eq!(result.files_indexed, 1);

    let db = coordinator.db();
    let contexts = db.list_contexts().unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].language_family, LanguageFamily::Python);
    assert_eq!(contexts[0].root_path, "src");
    assert_eq!(contexts[0].probe_status, ProbeStatus::Valid);

    let file = db.get_file_by_path("src/main.py").unwrap().unwrap();
    assert_eq!(file.language_family, Some(LanguageFamily::Python));

    let defs = db.defs_for_file(file.id).unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].name, "greet");
    assert_eq!(defs[0].kind, "function");
    assert_eq!(defs[0].span.start_line, 1);
    assert_eq!(defs[0].span.start_col, 0);
    assert_eq!(defs[0].span.end_line, 2);

    let response = coordinator
        .search("greet", SearchMode::Symbol, 10, None)
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].path, "src/main.py");
    assert_eq!(response.results[0].line, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cross_file_reference_resolves() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/a.py", "def foo():\n    pass\n");
    write(dir.path(), "src/b.py", "from .a import foo\nfoo()\n");

    let coordinator = coordinator_for(dir.path()).await;
    coordinator.initialize().await.unwrap();

    let db = coordinator.db();
    let a = db.get_file_by_path("src/a.py").unwrap().unwrap();
    let foo_uid = db.defs_for_file(a.id).unwrap()[0].def_uid.clone();

    let refs = db.search_refs("foo", 10, None).unwrap();
    let (call_ref, path) = refs
        .iter()
        .find(|(_, path)| path == "src/b.py")
        .expect("b.py must carry a ref for foo");
    assert_eq!(path, "src/b.py");
    assert_eq!(call_ref.ref_tier, RefTier::Proven);
    assert_eq!(call_ref.target_def_uid.as_deref(), Some(foo_uid.as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nested_contexts_hole_punched() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "packages/package.json", "{\"name\": \"root\"}\n");
    write(dir.path(), "packages/core/package.json", "{\"name\": \"core\"}\n");
    write(dir.path(), "packages/core/index.js", "function boot() {}\n");
    write(dir.path(), "packages/top.js", "function top() {}\n");

    let coordinator = coordinator_for(dir.path()).await;
    coordinator.initialize().await.unwrap();

    let db = coordinator.db();
    let contexts = db.list_contexts().unwrap();
    let js: Vec<_> = contexts
        .iter()
        .filter(|c| c.language_family == LanguageFamily::Javascript)
        .collect();
    assert_eq!(js.len(), 2);

    let parent = js.iter().find(|c| c.root_path == "packages").unwrap();
    assert!(parent.exclude_spec.contains(&"core/**".to_string()));

    let child = js.iter().find(|c| c.root_path == "packages/core").unwrap();
    let owner = route_file("packages/core/index.js", &contexts).unwrap();
    assert_eq!(owner.id, child.id);

    let owner = route_file("packages/top.js", &contexts).unwrap();
    assert_eq!(owner.id, parent.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_config_reference_created() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/cli.py", "def run():\n    pass\n");
    write(
        dir.path(),
        "pyproject.toml",
        "[tool.scripts]\ncli = \"src/cli.py\"\n",
    );

    let coordinator = coordinator_for(dir.path()).await;
    coordinator.initialize().await.unwrap();

    let db = coordinator.db();
    let config_file = db.get_file_by_path("pyproject.toml").unwrap().unwrap();

    let imports = db.list_imports().unwrap();
    let edge = imports
        .iter()
        .find(|i| i.import_kind == "config_file_ref")
        .expect("config ref edge must exist");
    assert_eq!(edge.file_id, config_file.id);
    assert_eq!(edge.resolved_path.as_deref(), Some("src/cli.py"));
    assert_eq!(edge.source_literal, "src/cli.py");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hash_content_coherence() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "x = 1\n");
    write(dir.path(), "b.py", "y = 2\n");

    let coordinator = coordinator_for(dir.path()).await;
    coordinator.initialize().await.unwrap();

    for file in coordinator.db().list_files().unwrap() {
        let bytes = std::fs::read(dir.path().join(&file.path)).unwrap();
        assert_eq!(
            file.content_hash,
            compute_content_hash(&bytes),
            "hash mismatch for {}",
            file.path
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_after_write_visibility() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/one.py", "def one():\n    pass\n");

    let coordinator = coordinator_for(dir.path()).await;
    coordinator.initialize().await.unwrap();
    let epoch_before = coordinator.get_current_epoch().unwrap();

    write(dir.path(), "src/two.py", "def freshly_added():\n    pass\n");
    let stats = coordinator
        .reindex_incremental(vec!["src/two.py".to_string()])
        .await
        .unwrap();

    // The epoch advanced and the write is visible at it.
    assert!(stats.epoch_id > epoch_before);
    assert!(coordinator
        .await_epoch(stats.epoch_id, Duration::from_secs(2))
        .await
        .unwrap());

    let response = coordinator
        .search("freshly_added", SearchMode::Lexical, 10, None)
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].path, "src/two.py");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_remove_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/keep.py", "def keep():\n    pass\n");

    let coordinator = coordinator_for(dir.path()).await;
    coordinator.initialize().await.unwrap();

    let db = coordinator.db();
    let files_before = db.files_count().unwrap();
    let (lexical_before, _) = coordinator.doc_counts().unwrap();

    write(dir.path(), "src/temp.py", "def temp():\n    pass\n");
    coordinator
        .reindex_incremental(vec!["src/temp.py".to_string()])
        .await
        .unwrap();
    assert_eq!(db.files_count().unwrap(), files_before + 1);

    std::fs::remove_file(dir.path().join("src/temp.py")).unwrap();
    coordinator
        .reindex_incremental(vec!["src/temp.py".to_string()])
        .await
        .unwrap();

    assert_eq!(db.files_count().unwrap(), files_before);
    let (lexical_after, _) = coordinator.doc_counts().unwrap();
    assert_eq!(lexical_after, lexical_before);
    assert!(db.get_file_by_path("src/temp.py").unwrap().is_none());
    assert!(coordinator
        .search("temp", SearchMode::Symbol, 10, None)
        .unwrap()
        .results
        .is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lexical_storage_drift_bounded() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..8 {
        write(
            dir.path(),
            &format!("src/mod_{i}.py"),
            &format!("def fn_{i}():\n    pass\n"),
        );
    }

    let coordinator = coordinator_for(dir.path()).await;
    coordinator.initialize().await.unwrap();

    let (lexical, storage) = coordinator.doc_counts().unwrap();
    let tolerance = 5u64.max(storage / 10);
    assert!(lexical.abs_diff(storage) <= tolerance);

    let report = coordinator.verify_integrity().unwrap();
    assert!(report.passed, "issues: {:?}", report.issues);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scope_aware_read_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/svc.py",
        "class Service:\n    def handle(self, req):\n        body = req.read()\n        return body\n",
    );

    let coordinator = coordinator_for(dir.path()).await;
    coordinator.initialize().await.unwrap();

    let region = coordinator
        .read_scope("src/svc.py", 3, ScopePreference::Function)
        .unwrap();
    assert!(region.resolved);
    assert_eq!(region.kind, "function");
    assert!(region.content.contains("def handle"));

    let class_region = coordinator
        .read_scope("src/svc.py", 3, ScopePreference::Class)
        .unwrap();
    assert_eq!(class_region.kind, "class");
    assert_eq!(class_region.start_line, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_map_repo_sections() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/main.py", "import requests\n\ndef main():\n    pass\n");
    write(dir.path(), "tests/test_main.py", "def test_main():\n    assert True\n");

    let coordinator = coordinator_for(dir.path()).await;
    coordinator.initialize().await.unwrap();

    let result = coordinator.map_repo(&MapRepoRequest::default()).unwrap();

    let languages = result.languages.unwrap();
    assert!(languages.iter().any(|l| l.language == "python"));

    let structure = result.structure.unwrap();
    assert_eq!(structure.file_count, 2);
    assert!(structure.tree.iter().any(|line| line.contains("main.py")));

    let deps = result.dependencies.unwrap();
    assert!(deps.external_modules.contains(&"requests".to_string()));

    let tests = result.test_layout.unwrap();
    assert_eq!(tests.test_files, vec!["tests/test_main.py".to_string()]);

    let entry_points = result.entry_points.unwrap();
    assert!(entry_points.iter().any(|e| e.name == "main"));

    let api = result.public_api.unwrap();
    assert!(api.iter().any(|s| s.name == "main"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mutation_gate_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/clean.py", "def stable():\n    pass\n");

    let coordinator = coordinator_for(dir.path()).await;
    coordinator.initialize().await.unwrap();

    let db = coordinator.db();
    let file = db.get_file_by_path("src/clean.py").unwrap().unwrap();
    let context_id = db.list_contexts().unwrap()[0].id;

    let gate = coordinator
        .check_mutation_gate(&[file.id], context_id)
        .unwrap();
    assert_eq!(gate.allowed, vec![file.id]);

    // Editing the file on disk flips it to blocked until reindexed.
    write(dir.path(), "src/clean.py", "def stable():\n    return 1\n");
    let gate = coordinator
        .check_mutation_gate(&[file.id], context_id)
        .unwrap();
    assert_eq!(gate.blocked.len(), 1);

    coordinator
        .reindex_incremental(vec!["src/clean.py".to_string()])
        .await
        .unwrap();
    let gate = coordinator
        .check_mutation_gate(&[file.id], context_id)
        .unwrap();
    assert_eq!(gate.allowed, vec![file.id]);
}
