//! Pass 3: type-traced member resolution.
//!
//! Walks each dotted member chain through the type-member index,
//! advancing the current type via declared member types. A full walk
//! pins the final definition and upgrades the reference at the access
//! site; a partial walk records the resolved prefix with fractional
//! confidence.

use std::collections::HashMap;

use tracing::debug;

use crate::connector::storage::Database;
use crate::domain::{
    CoreError, FactCertainty, MemberAccessFact, RefTier, ResolutionMethod, TypeMemberFact,
    TypeTracedStats,
};

const DEFAULT_BATCH_CAP: usize = 10_000;

pub struct TypeTracedResolver<'a> {
    db: &'a Database,
}

struct Caches {
    /// (file_id, name, scope_ordinal) -> base type
    types: HashMap<(i64, String, Option<i64>), String>,
    /// (parent_type, member_name) -> member fact
    members: HashMap<(String, String), TypeMemberFact>,
}

enum Walk {
    Resolved,
    Partial,
    Unresolved,
}

impl<'a> TypeTracedResolver<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn resolve_all(&self) -> Result<TypeTracedStats, CoreError> {
        let accesses = self.db.unresolved_member_accesses(DEFAULT_BATCH_CAP, None)?;
        self.run(accesses)
    }

    pub fn resolve_for_files(&self, file_ids: &[i64]) -> Result<TypeTracedStats, CoreError> {
        if file_ids.is_empty() {
            return Ok(TypeTracedStats::default());
        }
        let accesses = self
            .db
            .unresolved_member_accesses(DEFAULT_BATCH_CAP, Some(file_ids))?;
        self.run(accesses)
    }

    fn run(&self, accesses: Vec<MemberAccessFact>) -> Result<TypeTracedStats, CoreError> {
        let mut stats = TypeTracedStats {
            accesses_processed: accesses.len(),
            ..Default::default()
        };
        if accesses.is_empty() {
            return Ok(stats);
        }

        let caches = self.build_caches()?;

        for access in &accesses {
            match self.resolve_access(&caches, access, &mut stats)? {
                Walk::Resolved => stats.accesses_resolved += 1,
                Walk::Partial => stats.accesses_partial += 1,
                Walk::Unresolved => stats.accesses_unresolved += 1,
            }
        }

        debug!(
            processed = stats.accesses_processed,
            resolved = stats.accesses_resolved,
            partial = stats.accesses_partial,
            "type-traced resolution finished"
        );
        Ok(stats)
    }

    fn build_caches(&self) -> Result<Caches, CoreError> {
        let mut types = HashMap::new();
        for ann in self.db.type_annotations()? {
            types.insert(
                (ann.file_id, ann.target_name.clone(), ann.scope_ordinal),
                ann.base_type.clone(),
            );
            // File-level fallback for lookups from other scopes.
            types
                .entry((ann.file_id, ann.target_name, None))
                .or_insert(ann.base_type);
        }

        let mut members = HashMap::new();
        for m in self.db.type_members()? {
            members.insert((m.parent_type_name.clone(), m.member_name.clone()), m);
        }

        Ok(Caches { types, members })
    }

    fn receiver_type(&self, caches: &Caches, access: &MemberAccessFact) -> Option<String> {
        if let Some(declared) = &access.receiver_declared_type {
            return Some(declared.clone());
        }
        caches
            .types
            .get(&(access.file_id, access.receiver_name.clone(), access.scope_ordinal))
            .or_else(|| {
                caches
                    .types
                    .get(&(access.file_id, access.receiver_name.clone(), None))
            })
            .cloned()
    }

    fn resolve_access(
        &self,
        caches: &Caches,
        access: &MemberAccessFact,
        stats: &mut TypeTracedStats,
    ) -> Result<Walk, CoreError> {
        let Some(receiver_type) = self.receiver_type(caches, access) else {
            return Ok(Walk::Unresolved);
        };

        let chain: Vec<&str> = access
            .member_chain
            .split('.')
            .filter(|s| !s.is_empty())
            .collect();
        if chain.is_empty() {
            return Ok(Walk::Unresolved);
        }

        let mut current_type = receiver_type.clone();
        let mut type_path: Vec<String> = vec![receiver_type];
        let mut resolved_depth = 0usize;

        for (i, member_name) in chain.iter().enumerate() {
            let Some(member) = caches
                .members
                .get(&(current_type.clone(), member_name.to_string()))
            else {
                break;
            };
            resolved_depth = i + 1;
            type_path.push(member_name.to_string());

            if i == chain.len() - 1 {
                self.db.update_access_resolution(
                    access.id,
                    Some(&type_path.join(".")),
                    Some(&member.member_def_uid),
                    ResolutionMethod::TypeTraced,
                    1.0,
                )?;
                if self.upgrade_ref(access, member_name, &member.member_def_uid)? {
                    stats.refs_upgraded += 1;
                }
                return Ok(Walk::Resolved);
            }

            match &member.base_type {
                Some(next) => current_type = next.clone(),
                // A chain cannot continue through an untyped member.
                None => break,
            }
        }

        if resolved_depth > 0 {
            self.db.update_access_resolution(
                access.id,
                Some(&type_path[..resolved_depth + 1].join(".")),
                None,
                ResolutionMethod::TypeTraced,
                resolved_depth as f64 / chain.len() as f64,
            )?;
            return Ok(Walk::Partial);
        }

        Ok(Walk::Unresolved)
    }

    fn upgrade_ref(
        &self,
        access: &MemberAccessFact,
        token: &str,
        target_def_uid: &str,
    ) -> Result<bool, CoreError> {
        let Some(ref_id) = self
            .db
            .find_ref_at(access.file_id, access.span.start_line, token)?
        else {
            return Ok(false);
        };
        self.db
            .resolve_ref(ref_id, target_def_uid, RefTier::Proven, FactCertainty::Certain)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::storage::NewFile;
    use crate::domain::{
        LanguageFamily, MemberKind, RefFact, RefRole, Span, TypeAnnotationFact,
    };

    fn seed_file(db: &Database, path: &str) -> i64 {
        db.upsert_file(&NewFile {
            path: path.to_string(),
            language_family: Some(LanguageFamily::Python),
            content_hash: "h".to_string(),
            indexed_at: Some(1),
            declared_module: None,
            interface_hash: None,
            line_count: 20,
        })
        .unwrap()
    }

    fn seed_member(db: &Database, file_id: i64, parent: &str, name: &str, base: Option<&str>) {
        db.with_bulk_writer(|w| {
            w.insert_members(&[TypeMemberFact {
                file_id,
                parent_type_name: parent.to_string(),
                member_name: name.to_string(),
                member_kind: MemberKind::Method,
                member_def_uid: format!("{parent}{name}0000000"),
                base_type: base.map(String::from),
            }])
        })
        .unwrap();
    }

    fn seed_access(db: &Database, file_id: i64, receiver: &str, chain: &str, line: u32) {
        db.with_bulk_writer(|w| {
            w.insert_accesses(&[MemberAccessFact {
                id: 0,
                file_id,
                scope_ordinal: None,
                receiver_name: receiver.to_string(),
                receiver_declared_type: None,
                member_chain: chain.to_string(),
                span: Span::new(line, 0, line, 20),
                resolved_type_path: None,
                final_target_def_uid: None,
                resolution_method: ResolutionMethod::None,
                resolution_confidence: 0.0,
            }])
        })
        .unwrap();
    }

    fn seed_annotation(db: &Database, file_id: i64, name: &str, base: &str) {
        db.with_bulk_writer(|w| {
            w.insert_annotations(&[TypeAnnotationFact {
                file_id,
                scope_ordinal: None,
                target_name: name.to_string(),
                base_type: base.to_string(),
            }])
        })
        .unwrap();
    }

    #[test]
    fn test_full_chain_resolves_with_confidence_one() {
        let db = Database::in_memory().unwrap();
        let f = seed_file(&db, "src/app.py");
        seed_annotation(&db, f, "ctx", "AppContext");
        seed_member(&db, f, "AppContext", "mutation_ops", Some("MutationOps"));
        seed_member(&db, f, "MutationOps", "atomic_edit", None);
        seed_access(&db, f, "ctx", "mutation_ops.atomic_edit", 10);

        let stats = TypeTracedResolver::new(&db).resolve_all().unwrap();
        assert_eq!(stats.accesses_resolved, 1);
        assert_eq!(stats.accesses_partial, 0);

        let remaining = db.unresolved_member_accesses(100, None).unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_partial_chain_records_fractional_confidence() {
        let db = Database::in_memory().unwrap();
        let f = seed_file(&db, "src/app.py");
        seed_annotation(&db, f, "ctx", "AppContext");
        seed_member(&db, f, "AppContext", "mutation_ops", Some("MutationOps"));
        // No member for the second segment: walk stops at depth 1 of 2.
        seed_access(&db, f, "ctx", "mutation_ops.missing", 10);

        let stats = TypeTracedResolver::new(&db).resolve_all().unwrap();
        assert_eq!(stats.accesses_partial, 1);

        let partial = db.count_partial_accesses(f).unwrap();
        assert_eq!(partial, 1);
    }

    #[test]
    fn test_unknown_receiver_unresolved() {
        let db = Database::in_memory().unwrap();
        let f = seed_file(&db, "src/app.py");
        seed_access(&db, f, "mystery", "anything", 5);

        let stats = TypeTracedResolver::new(&db).resolve_all().unwrap();
        assert_eq!(stats.accesses_unresolved, 1);
        assert_eq!(stats.accesses_resolved, 0);
    }

    #[test]
    fn test_ref_upgraded_at_access_site() {
        let db = Database::in_memory().unwrap();
        let f = seed_file(&db, "src/app.py");
        seed_annotation(&db, f, "engine", "Engine");
        seed_member(&db, f, "Engine", "start", None);
        seed_access(&db, f, "engine", "start", 7);
        db.with_bulk_writer(|w| {
            w.insert_refs(&[RefFact {
                id: 0,
                file_id: f,
                token_text: "start".to_string(),
                span: Span::new(7, 7, 7, 12),
                role: RefRole::Call,
                ref_tier: RefTier::Lexical,
                certainty: FactCertainty::Uncertain,
                target_def_uid: None,
            }])
        })
        .unwrap();

        let stats = TypeTracedResolver::new(&db).resolve_all().unwrap();
        assert_eq!(stats.refs_upgraded, 1);

        let refs = db.search_refs("start", 10, None).unwrap();
        assert_eq!(refs[0].0.ref_tier, RefTier::Proven);
    }
}
