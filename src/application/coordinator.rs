//! The index coordinator: owns the storage handles, the lexical index,
//! the parse cache and the discovered context set, and drives the
//! initialize / reindex pipelines end to end.
//!
//! Pipeline on change: reconcile -> extract (parallel) -> write ->
//! resolve (passes 2-4) -> integrity -> epoch publish -> lexical reload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::application::discovery::{
    punch_holes, route_file_for_family, scan_candidates, validate_contexts, ProbeConfig,
};
use crate::application::epoch::EpochManager;
use crate::application::extractor::{ExtractionOutcome, StructuralExtractor};
use crate::application::file_state::FileStateService;
use crate::application::queries;
use crate::application::reconciler::Reconciler;
use crate::application::resolvers::{resolve_config_refs, ImportResolver, TypeTracedResolver};
use crate::config::Config;
use crate::connector::ignore::IgnoreChecker;
use crate::connector::lexical::{LexicalDoc, LexicalIndex};
use crate::connector::parser::TreeSitterParser;
use crate::connector::storage::{Database, IntegrityChecker, IntegrityReport, NewFile};
use crate::domain::{
    AmbiguityFlag, ChangeKind, ChangedFile, ContextRecord, CoreError, DefFact, FileState,
    ImportFact, IndexStats, InitResult, LocalBindFact, MapRepoRequest, MapRepoResult,
    MemberAccessFact, MutationGateResult, ProbeStatus, RefFact, ScopeFact, ScopePreference,
    ScopeRegion, SearchMode, SearchResponse, TypeAnnotationFact, TypeMemberFact,
};

pub struct IndexCoordinator {
    repo_root: PathBuf,
    config: Config,
    db: Arc<Database>,
    lexical: Arc<LexicalIndex>,
    parser: Arc<TreeSitterParser>,
    epochs: EpochManager,
    contexts: RwLock<Vec<ContextRecord>>,
    /// One-shot warning surfaced on the next API call after recovery.
    integrity_warning: Mutex<Option<String>>,
}

impl IndexCoordinator {
    pub fn open(repo_root: &Path, config: Config) -> Result<Self, CoreError> {
        let state_dir = config.state_dir(repo_root);
        std::fs::create_dir_all(&state_dir)?;

        let db = Arc::new(Database::open(&state_dir.join("index.db"))?);
        let lexical = Arc::new(LexicalIndex::open(&state_dir.join("tantivy"))?);
        let epochs = EpochManager::new(db.clone(), Some(state_dir.join("epochs.log")));
        let contexts = db.list_contexts()?;

        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            config,
            db,
            lexical,
            parser: Arc::new(TreeSitterParser::new()),
            epochs,
            contexts: RwLock::new(contexts),
            integrity_warning: Mutex::new(None),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn db(&self) -> Arc<Database> {
        self.db.clone()
    }

    pub fn epoch_manager(&self) -> &EpochManager {
        &self.epochs
    }

    fn make_checker(&self) -> IgnoreChecker {
        IgnoreChecker::new(&self.repo_root, &[], self.config.ignore.respect_gitignore)
    }

    fn valid_contexts(&self) -> Vec<ContextRecord> {
        self.contexts
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|c| c.probe_status == ProbeStatus::Valid)
            .collect()
    }

    /// Take the pending integrity warning, if recovery ran since the
    /// last API call.
    pub fn take_integrity_warning(&self) -> Option<String> {
        self.integrity_warning.lock().ok().and_then(|mut w| w.take())
    }

    // ---- lifecycle -------------------------------------------------------

    /// Discover contexts, index every routed file, resolve, verify and
    /// publish the first epoch.
    pub async fn initialize(&self) -> Result<InitResult, CoreError> {
        let mut result = self.initialize_once().await?;

        let report = self.verify_integrity()?;
        if !report.passed {
            warn!("integrity check failed after initialize; wiping and rebuilding");
            self.recover(&report)?;
            result = self.initialize_once().await?;
            let report = self.verify_integrity()?;
            if !report.passed {
                return Err(CoreError::integrity(
                    "index corrupt after wipe-and-reindex".to_string(),
                ));
            }
        }

        Ok(result)
    }

    async fn initialize_once(&self) -> Result<InitResult, CoreError> {
        let checker = self.make_checker();

        // Discovery: markers -> candidates -> probe -> hole-punch.
        let mut candidates = scan_candidates(&self.repo_root, &checker);
        let probe_results = validate_contexts(
            &self.repo_root,
            &candidates,
            ProbeConfig::default(),
            self.parser.clone(),
            &checker,
        );
        punch_holes(&mut candidates);

        let statuses: Vec<ProbeStatus> = probe_results.iter().map(|r| r.status).collect();
        self.db.replace_contexts(&candidates, &statuses)?;
        let stored = self.db.list_contexts()?;
        if let Ok(mut contexts) = self.contexts.write() {
            *contexts = stored;
        }

        let contexts_valid = statuses.iter().filter(|s| **s == ProbeStatus::Valid).count();
        let mut result = InitResult {
            contexts_discovered: candidates.len(),
            contexts_valid,
            contexts_failed: candidates.len() - contexts_valid,
            ..Default::default()
        };
        for probe in probe_results.iter().filter(|r| r.status != ProbeStatus::Valid) {
            if !probe.reason.is_empty() {
                result.errors.push(probe.reason.clone());
            }
        }

        // Full reconcile from an (initially) empty file table.
        let reconciler = Reconciler::new(&self.repo_root);
        let changes = reconciler.reconcile(&self.db, None, &checker)?;
        let stats = self.apply_changes(changes).await?;

        result.files_indexed = stats.files_added + stats.files_updated;
        for file in self.db.list_files()? {
            let ext = file
                .path
                .rsplit('.')
                .next()
                .map(|e| format!(".{e}"))
                .unwrap_or_default();
            *result.files_by_ext.entry(ext).or_default() += 1;
        }

        info!(
            contexts = result.contexts_discovered,
            valid = result.contexts_valid,
            files = result.files_indexed,
            "initialize complete"
        );
        Ok(result)
    }

    pub async fn reindex_incremental(&self, paths: Vec<String>) -> Result<IndexStats, CoreError> {
        let checker = self.make_checker();
        let changes = Reconciler::new(&self.repo_root).reconcile(&self.db, Some(&paths), &checker)?;
        self.apply_changes(changes).await
    }

    pub async fn reindex_full(&self) -> Result<IndexStats, CoreError> {
        let checker = self.make_checker();
        let changes = Reconciler::new(&self.repo_root).reconcile(&self.db, None, &checker)?;
        self.apply_changes(changes).await
    }

    /// One logical indexing job over a reconciled change set.
    async fn apply_changes(&self, changes: Vec<ChangedFile>) -> Result<IndexStats, CoreError> {
        let start = Instant::now();
        let mut stats = IndexStats::default();

        if changes.is_empty() {
            stats.epoch_id = self.epochs.get_current_epoch()?;
            return Ok(stats);
        }

        let mut to_extract: Vec<String> = Vec::new();
        let mut removed: Vec<String> = Vec::new();
        for change in &changes {
            match change.kind {
                ChangeKind::Added => {
                    stats.files_added += 1;
                    to_extract.push(change.path.clone());
                }
                ChangeKind::Modified => {
                    stats.files_updated += 1;
                    to_extract.push(change.path.clone());
                }
                ChangeKind::Removed => {
                    stats.files_removed += 1;
                    removed.push(change.path.clone());
                }
            }
        }
        stats.files_processed = changes.len();

        // Parallel extraction on blocking threads.
        let workers = self.config.indexer.workers.max(1);
        let extractor = StructuralExtractor::new(self.repo_root.clone(), self.parser.clone());
        let outcomes = if to_extract.is_empty() {
            Vec::new()
        } else {
            tokio::task::block_in_place(|| extractor.extract_batch(&to_extract, workers))
        };

        let (affected_ids, symbols, config_touched) = self.write_outcomes(&outcomes)?;
        stats.symbols_indexed = symbols;

        for path in &removed {
            if let Some(file) = self.db.get_file_by_path(path)? {
                self.db.delete_file_cascade(file.id)?;
            }
            self.lexical.remove_file(path)?;
        }

        // Incremental resolution over the touched files.
        let import_resolver = ImportResolver::new(&self.db);
        if let Err(e) = import_resolver.resolve_for_files(&affected_ids) {
            warn!(error = %e, "import resolution failed; continuing");
        }
        if let Err(e) = import_resolver.resolve_import_paths() {
            warn!(error = %e, "import path sweep failed; continuing");
        }
        if let Err(e) = TypeTracedResolver::new(&self.db).resolve_for_files(&affected_ids) {
            warn!(error = %e, "type-traced resolution failed; continuing");
        }
        if config_touched || !removed.is_empty() {
            let contexts = self.valid_contexts();
            if let Err(e) = resolve_config_refs(&self.db, &self.repo_root, &contexts) {
                warn!(error = %e, "config ref resolution failed; continuing");
            }
        }

        self.update_ambiguity_flags(&affected_ids)?;

        // Publish exactly one epoch for the whole job, then reload so
        // searchers observe it.
        let epoch = self
            .epochs
            .publish_epoch((stats.files_added + stats.files_updated) as u64, None)?;
        stats.epoch_id = epoch.epoch_id;
        self.lexical.reload()?;

        stats.duration_seconds = start.elapsed().as_secs_f64();
        Ok(stats)
    }

    /// Write extraction outcomes: file rows, fact tables and lexical
    /// documents. Returns (affected file ids, symbols written, whether a
    /// config file was touched).
    fn write_outcomes(
        &self,
        outcomes: &[ExtractionOutcome],
    ) -> Result<(Vec<i64>, usize, bool), CoreError> {
        if outcomes.is_empty() {
            return Ok((Vec::new(), 0, false));
        }

        let contexts = self.valid_contexts();
        let now = unix_now();
        let mut symbols_written = 0usize;
        let mut config_touched = false;

        let new_files: Vec<NewFile> = outcomes
            .iter()
            .filter(|o| o.error.as_deref().map(|e| !e.starts_with("read failed")).unwrap_or(true))
            .map(|o| NewFile {
                path: o.path.clone(),
                language_family: o.language_family,
                content_hash: o.content_hash.clone(),
                indexed_at: Some(now),
                declared_module: o.declared_module.clone(),
                interface_hash: o.facts.as_ref().map(|f| f.interface_hash.clone()),
                line_count: o.line_count,
            })
            .collect();

        let ids = self.db.with_bulk_writer(|writer| {
            let ids = writer.insert_files_returning_ids(&new_files)?;

            for outcome in outcomes {
                let Some(&file_id) = ids.get(&outcome.path) else {
                    continue;
                };
                writer.delete_facts_for_file(file_id)?;
                let Some(facts) = &outcome.facts else {
                    continue;
                };
                let unit_id = outcome
                    .language_family
                    .and_then(|family| {
                        route_file_for_family(&outcome.path, family, &contexts).map(|c| c.id)
                    })
                    .unwrap_or(0);

                let defs: Vec<DefFact> = facts
                    .defs
                    .iter()
                    .map(|d| DefFact {
                        def_uid: d.def_uid.clone(),
                        file_id,
                        unit_id,
                        kind: d.kind.clone(),
                        name: d.name.clone(),
                        lexical_path: d.lexical_path.clone(),
                        span: d.span,
                        docstring: d.docstring.clone(),
                    })
                    .collect();
                writer.insert_defs(&defs)?;

                writer.insert_scopes(
                    &facts
                        .scopes
                        .iter()
                        .map(|s| ScopeFact {
                            file_id,
                            ordinal: s.ordinal,
                            kind: s.kind,
                            span: s.span,
                            parent_ordinal: s.parent_ordinal,
                        })
                        .collect::<Vec<_>>(),
                )?;

                writer.insert_binds(
                    &facts
                        .binds
                        .iter()
                        .map(|b| LocalBindFact {
                            file_id,
                            name: b.name.clone(),
                            target_kind: b.target_kind,
                            target_uid: b.target_uid.clone(),
                        })
                        .collect::<Vec<_>>(),
                )?;

                writer.insert_imports(
                    &facts
                        .imports
                        .iter()
                        .map(|i| ImportFact {
                            import_uid: i.import_uid.clone(),
                            file_id,
                            unit_id,
                            imported_name: i.imported_name.clone(),
                            alias: i.alias.clone(),
                            source_literal: i.source_literal.clone(),
                            resolved_path: None,
                            import_kind: i.import_kind.clone(),
                            certainty: crate::domain::FactCertainty::Uncertain,
                            span: i.span,
                        })
                        .collect::<Vec<_>>(),
                )?;

                writer.insert_refs(
                    &facts
                        .refs
                        .iter()
                        .map(|r| RefFact {
                            id: 0,
                            file_id,
                            token_text: r.token_text.clone(),
                            span: r.span,
                            role: r.role,
                            ref_tier: r.ref_tier,
                            certainty: r.certainty,
                            target_def_uid: r.target_def_uid.clone(),
                        })
                        .collect::<Vec<_>>(),
                )?;

                writer.insert_annotations(
                    &facts
                        .annotations
                        .iter()
                        .map(|a| TypeAnnotationFact {
                            file_id,
                            scope_ordinal: a.scope_ordinal,
                            target_name: a.target_name.clone(),
                            base_type: a.base_type.clone(),
                        })
                        .collect::<Vec<_>>(),
                )?;

                writer.insert_members(
                    &facts
                        .members
                        .iter()
                        .map(|m| TypeMemberFact {
                            file_id,
                            parent_type_name: m.parent_type_name.clone(),
                            member_name: m.member_name.clone(),
                            member_kind: m.member_kind,
                            member_def_uid: m.member_def_uid.clone(),
                            base_type: m.base_type.clone(),
                        })
                        .collect::<Vec<_>>(),
                )?;

                writer.insert_accesses(
                    &facts
                        .accesses
                        .iter()
                        .map(|a| MemberAccessFact {
                            id: 0,
                            file_id,
                            scope_ordinal: a.scope_ordinal,
                            receiver_name: a.receiver_name.clone(),
                            receiver_declared_type: a.receiver_declared_type.clone(),
                            member_chain: a.member_chain.clone(),
                            span: a.span,
                            resolved_type_path: None,
                            final_target_def_uid: None,
                            resolution_method: crate::domain::ResolutionMethod::None,
                            resolution_confidence: 0.0,
                        })
                        .collect::<Vec<_>>(),
                )?;
            }
            Ok(ids)
        })?;

        // Lexical layer: every readable file is searchable, structural
        // facts or not.
        let mut docs = Vec::new();
        for outcome in outcomes {
            let Some(&file_id) = ids.get(&outcome.path) else {
                continue;
            };
            if crate::application::resolvers::is_config_file(&outcome.path) {
                config_touched = true;
            }
            let mut symbols: Vec<String> = outcome
                .facts
                .as_ref()
                .map(|f| f.symbols.clone())
                .unwrap_or_default();
            if let Some(facts) = &outcome.facts {
                if !facts.scaffold.is_empty() {
                    symbols.push(facts.scaffold.clone());
                }
            }
            symbols_written += outcome.facts.as_ref().map(|f| f.defs.len()).unwrap_or(0);

            let unit_id = outcome
                .language_family
                .and_then(|family| {
                    route_file_for_family(&outcome.path, family, &self.valid_contexts())
                        .map(|c| c.id)
                })
                .unwrap_or(0);
            docs.push(LexicalDoc {
                path: outcome.path.clone(),
                content: outcome.content.clone(),
                symbols,
                context_id: unit_id,
                file_id,
            });
        }
        if !docs.is_empty() {
            self.lexical.add_files_batch(&docs)?;
        }

        let mut affected: Vec<i64> = ids.values().copied().collect();
        affected.sort_unstable();
        Ok((affected, symbols_written, config_touched))
    }

    fn update_ambiguity_flags(&self, file_ids: &[i64]) -> Result<(), CoreError> {
        for &file_id in file_ids {
            let mut flags = Vec::new();
            if self.db.count_unresolved_refs(file_id)? > 0 {
                flags.push(AmbiguityFlag::UnresolvedRefs);
            }
            if self.db.count_partial_accesses(file_id)? > 0 {
                flags.push(AmbiguityFlag::PartialTypeTrace);
            }
            self.db.set_file_ambiguity(file_id, &flags)?;
        }
        Ok(())
    }

    // ---- integrity -------------------------------------------------------

    pub fn verify_integrity(&self) -> Result<IntegrityReport, CoreError> {
        IntegrityChecker::new(
            &self.db,
            &self.repo_root,
            Some(&self.lexical),
            self.config.integrity.clone(),
        )
        .verify()
    }

    fn recover(&self, report: &IntegrityReport) -> Result<(), CoreError> {
        // The lexical writer holds its directory open; clearing through
        // it is equivalent to removing the directory and avoids pulling
        // the mmap out from under live searchers.
        self.db.wipe_all()?;
        self.lexical.clear()?;
        self.lexical.reload()?;

        if let Ok(mut warning) = self.integrity_warning.lock() {
            *warning = Some(format!(
                "index integrity failure ({} issue(s)); index was wiped and rebuilt",
                report.issues.len()
            ));
        }
        if let Ok(mut contexts) = self.contexts.write() {
            contexts.clear();
        }
        Ok(())
    }

    // ---- query surface ---------------------------------------------------

    pub fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        context_id: Option<i64>,
    ) -> Result<SearchResponse, CoreError> {
        queries::search(&self.db, &self.lexical, query, mode, limit, context_id)
    }

    pub fn map_repo(&self, request: &MapRepoRequest) -> Result<MapRepoResult, CoreError> {
        queries::map_repo(&self.db, &self.repo_root, request)
    }

    pub fn read_scope(
        &self,
        path: &str,
        line: u32,
        preference: ScopePreference,
    ) -> Result<ScopeRegion, CoreError> {
        queries::read_scope(&self.db, &self.repo_root, path, line, preference)
    }

    pub fn get_file_state(&self, file_id: i64, context_id: i64) -> Result<FileState, CoreError> {
        let service = FileStateService::new(&self.db, &self.repo_root);
        let mut memo = HashMap::new();
        service.get_file_state(file_id, context_id, &mut memo)
    }

    pub fn check_mutation_gate(
        &self,
        file_ids: &[i64],
        context_id: i64,
    ) -> Result<MutationGateResult, CoreError> {
        FileStateService::new(&self.db, &self.repo_root).check_mutation_gate(file_ids, context_id)
    }

    pub fn get_current_epoch(&self) -> Result<u64, CoreError> {
        self.epochs.get_current_epoch()
    }

    pub async fn await_epoch(&self, target: u64, timeout: Duration) -> Result<bool, CoreError> {
        self.epochs.await_epoch(target, timeout).await
    }

    pub fn doc_counts(&self) -> Result<(u64, u64), CoreError> {
        Ok((self.lexical.doc_count(), self.db.files_count()?))
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
