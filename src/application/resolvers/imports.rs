//! Pass 2: import-chain reference resolution.
//!
//! Strong-tier references carry an in-scope binding but no target. This
//! pass follows RefFact -> LocalBindFact -> ImportFact -> exported
//! DefFact, promoting successful resolutions to proven.

use std::collections::HashMap;

use tracing::debug;

use crate::application::resolvers::module_mapping::{
    build_module_index, module_to_candidate_paths, resolve_relative_import,
};
use crate::connector::storage::Database;
use crate::domain::{
    BindTargetKind, CoreError, FactCertainty, FileRecord, RefFact, RefTier, ResolutionStats,
    IMPORT_KIND_CONFIG_REF,
};

const DEFAULT_BATCH_CAP: usize = 10_000;

pub struct ImportResolver<'a> {
    db: &'a Database,
}

struct Caches {
    files_by_id: HashMap<i64, FileRecord>,
    file_id_by_path: HashMap<String, i64>,
    module_index: HashMap<String, String>,
    declared_modules: HashMap<String, i64>,
    /// file_id -> exported name -> def_uid
    exports: HashMap<i64, HashMap<String, String>>,
}

impl<'a> ImportResolver<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Process all unresolved strong refs, up to the batch cap.
    pub fn resolve_all(&self) -> Result<ResolutionStats, CoreError> {
        let refs = self.db.unresolved_strong_refs(DEFAULT_BATCH_CAP, None)?;
        self.run(refs)
    }

    /// Incremental mode: only refs in the supplied files.
    pub fn resolve_for_files(&self, file_ids: &[i64]) -> Result<ResolutionStats, CoreError> {
        if file_ids.is_empty() {
            return Ok(ResolutionStats::default());
        }
        let refs = self.db.unresolved_strong_refs(DEFAULT_BATCH_CAP, Some(file_ids))?;
        self.run(refs)
    }

    /// Populate `resolved_path` for every import whose source literal
    /// deterministically maps to an indexed file.
    pub fn resolve_import_paths(&self) -> Result<usize, CoreError> {
        let caches = self.build_caches()?;
        let mut updated = 0;

        for import in self.db.list_imports()? {
            if import.resolved_path.is_some() || import.import_kind == IMPORT_KIND_CONFIG_REF {
                continue;
            }
            let importer_path = caches
                .files_by_id
                .get(&import.file_id)
                .map(|f| f.path.as_str())
                .unwrap_or("");
            if let Some((path, _)) =
                self.find_target(&caches, importer_path, &import.source_literal)
            {
                self.db.update_import_resolved(
                    &import.import_uid,
                    &path,
                    FactCertainty::Certain,
                )?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn run(&self, refs: Vec<RefFact>) -> Result<ResolutionStats, CoreError> {
        let mut stats = ResolutionStats {
            refs_processed: refs.len(),
            ..Default::default()
        };
        if refs.is_empty() {
            return Ok(stats);
        }

        let caches = self.build_caches()?;

        for r in &refs {
            if self.resolve_ref(&caches, r)? {
                stats.refs_resolved += 1;
            } else {
                stats.refs_unresolved += 1;
            }
        }

        debug!(
            processed = stats.refs_processed,
            resolved = stats.refs_resolved,
            "import-chain resolution finished"
        );
        Ok(stats)
    }

    fn build_caches(&self) -> Result<Caches, CoreError> {
        let files = self.db.list_files()?;
        let module_index = build_module_index(files.iter().map(|f| f.path.as_str()));
        let declared_modules = files
            .iter()
            .filter_map(|f| f.declared_module.clone().map(|m| (m, f.id)))
            .collect();
        let file_id_by_path = files.iter().map(|f| (f.path.clone(), f.id)).collect();
        let files_by_id = files.into_iter().map(|f| (f.id, f)).collect();

        let mut exports: HashMap<i64, HashMap<String, String>> = HashMap::new();
        for def in self.db.top_level_defs()? {
            // Public surface: names not starting with an underscore.
            if def.name.starts_with('_') {
                continue;
            }
            exports
                .entry(def.file_id)
                .or_default()
                .insert(def.name, def.def_uid);
        }

        Ok(Caches {
            files_by_id,
            file_id_by_path,
            module_index,
            declared_modules,
            exports,
        })
    }

    fn resolve_ref(&self, caches: &Caches, r: &RefFact) -> Result<bool, CoreError> {
        let Some(bind) = self.db.local_bind(r.file_id, &r.token_text)? else {
            return Ok(false);
        };

        match bind.target_kind {
            BindTargetKind::Def => {
                self.db
                    .resolve_ref(r.id, &bind.target_uid, RefTier::Proven, FactCertainty::Certain)?;
                Ok(true)
            }
            BindTargetKind::Import => self.resolve_via_import(caches, r, &bind.target_uid),
            _ => Ok(false),
        }
    }

    fn resolve_via_import(
        &self,
        caches: &Caches,
        r: &RefFact,
        import_uid: &str,
    ) -> Result<bool, CoreError> {
        let Some(import) = self.db.import_by_uid(import_uid)? else {
            return Ok(false);
        };
        if import.source_literal.is_empty() {
            return Ok(false);
        }

        let importer_path = caches
            .files_by_id
            .get(&r.file_id)
            .map(|f| f.path.as_str())
            .unwrap_or("");
        let Some((target_path, target_file_id)) =
            self.find_target(caches, importer_path, &import.source_literal)
        else {
            return Ok(false);
        };

        self.db
            .update_import_resolved(&import.import_uid, &target_path, FactCertainty::Certain)?;

        if import.imported_name == "*" {
            // Wildcard imports cannot pin a specific definition.
            return Ok(false);
        }
        let Some(def_uid) = caches
            .exports
            .get(&target_file_id)
            .and_then(|exports| exports.get(&import.imported_name))
        else {
            return Ok(false);
        };

        self.db
            .resolve_ref(r.id, def_uid, RefTier::Proven, FactCertainty::Certain)?;
        Ok(true)
    }

    /// Map a source literal to an indexed file: relative imports resolve
    /// against the importer's package, absolute ones through the module
    /// index (with src-layout probing) and declared modules.
    fn find_target(
        &self,
        caches: &Caches,
        importer_path: &str,
        source_literal: &str,
    ) -> Option<(String, i64)> {
        let module_key = if source_literal.starts_with('.') && !source_literal.contains('/') {
            resolve_relative_import(importer_path, source_literal)?
        } else if source_literal.contains("::") {
            // Rust paths: crate-relative segments map onto dotted keys.
            source_literal.replace("::", ".")
        } else {
            source_literal.to_string()
        };

        for candidate in module_to_candidate_paths(&module_key) {
            if let Some(path) = caches.module_index.get(&candidate) {
                let id = *caches.file_id_by_path.get(path)?;
                return Some((path.clone(), id));
            }
        }

        if let Some(id) = caches.declared_modules.get(source_literal) {
            let path = caches.files_by_id.get(id)?.path.clone();
            return Some((path, *id));
        }

        None
    }
}
