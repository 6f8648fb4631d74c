//! SQLite-backed relational store for files, contexts and fact tables.
//!
//! One writer at a time: every write transaction goes through the
//! connection mutex; epoch publication uses an immediate transaction so
//! the write lock is taken up front.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::domain::{
    decode_ambiguity_flags, encode_ambiguity_flags, AmbiguityFlag, BindTargetKind, CandidateContext,
    ContextRecord, CoreError, DefFact, Epoch, FactCertainty, FileRecord, ImportFact, LanguageFamily,
    LocalBindFact, MemberAccessFact, MemberKind, ProbeStatus, RefFact, RefRole, RefTier,
    ResolutionMethod, ScopeFact, ScopeKind, Span, TypeAnnotationFact, TypeMemberFact,
};

const WRITE_RETRIES: usize = 3;

/// New-file payload for the bulk writer.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub language_family: Option<LanguageFamily>,
    pub content_hash: String,
    pub indexed_at: Option<i64>,
    pub declared_module: Option<String>,
    pub interface_hash: Option<String>,
    pub line_count: i64,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| CoreError::storage(format!("open database: {e}")))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::storage(format!("open in-memory database: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, CoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| CoreError::storage(format!("pragmas: {e}")))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CoreError> {
        self.conn
            .lock()
            .map_err(|_| CoreError::storage("connection lock poisoned"))
    }

    fn create_schema(&self) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| CoreError::storage(format!("create schema: {e}")))?;
        conn.execute(
            "INSERT OR IGNORE INTO repo_state (id, current_epoch_id) VALUES (1, 0)",
            [],
        )
        .map_err(|e| CoreError::storage(format!("seed repo_state: {e}")))?;
        Ok(())
    }

    /// Drop every table and recreate the empty schema. Recovery path.
    pub fn wipe_all(&self) -> Result<(), CoreError> {
        {
            let conn = self.lock()?;
            conn.execute_batch(
                "DROP TABLE IF EXISTS member_access_facts;
                 DROP TABLE IF EXISTS type_member_facts;
                 DROP TABLE IF EXISTS type_annotation_facts;
                 DROP TABLE IF EXISTS scope_facts;
                 DROP TABLE IF EXISTS local_bind_facts;
                 DROP TABLE IF EXISTS import_facts;
                 DROP TABLE IF EXISTS ref_facts;
                 DROP TABLE IF EXISTS def_facts;
                 DROP TABLE IF EXISTS context_markers;
                 DROP TABLE IF EXISTS contexts;
                 DROP TABLE IF EXISTS files;
                 DROP TABLE IF EXISTS epochs;
                 DROP TABLE IF EXISTS repo_state;",
            )
            .map_err(|e| CoreError::storage(format!("wipe: {e}")))?;
        }
        self.create_schema()
    }

    /// Run `f` inside one write transaction through the bulk writer.
    pub fn with_bulk_writer<T>(
        &self,
        f: impl FnOnce(&mut BulkWriter) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| CoreError::storage(format!("begin transaction: {e}")))?;
        let mut writer = BulkWriter { tx: &tx };
        let out = f(&mut writer)?;
        tx.commit()
            .map_err(|e| CoreError::storage(format!("commit: {e}")))?;
        Ok(out)
    }

    /// Run `f` inside an immediate transaction (write lock taken up
    /// front). Busy errors are retried a few times, then surfaced as
    /// write contention.
    pub fn immediate_transaction<T>(
        &self,
        mut f: impl FnMut(&Transaction) -> Result<T, rusqlite::Error>,
    ) -> Result<T, CoreError> {
        let mut conn = self.lock()?;
        let mut last_err = None;
        for _ in 0..WRITE_RETRIES {
            let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
                Ok(tx) => tx,
                Err(e) if is_busy(&e) => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(CoreError::storage(format!("begin immediate: {e}"))),
            };
            match f(&tx) {
                Ok(value) => {
                    tx.commit()
                        .map_err(|e| CoreError::storage(format!("commit immediate: {e}")))?;
                    return Ok(value);
                }
                Err(e) if is_busy(&e) => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(CoreError::storage(format!("immediate transaction: {e}"))),
            }
        }
        Err(CoreError::WriteContention(
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    // ---- files ----------------------------------------------------------

    pub fn upsert_file(&self, file: &NewFile) -> Result<i64, CoreError> {
        let conn = self.lock()?;
        upsert_file_tx(&conn, file).map_err(|e| CoreError::storage(format!("upsert file: {e}")))
    }

    pub fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {FILE_COLS} FROM files WHERE path = ?1"),
            params![path],
            row_to_file,
        )
        .optional()
        .map_err(|e| CoreError::storage(format!("get file by path: {e}")))
    }

    pub fn get_file_by_id(&self, id: i64) -> Result<Option<FileRecord>, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {FILE_COLS} FROM files WHERE id = ?1"),
            params![id],
            row_to_file,
        )
        .optional()
        .map_err(|e| CoreError::storage(format!("get file by id: {e}")))
    }

    pub fn list_files(&self) -> Result<Vec<FileRecord>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {FILE_COLS} FROM files ORDER BY path"))
            .map_err(|e| CoreError::storage(format!("prepare list files: {e}")))?;
        let rows = stmt
            .query_map([], row_to_file)
            .map_err(|e| CoreError::storage(format!("list files: {e}")))?;
        collect_rows(rows)
    }

    pub fn files_count(&self) -> Result<u64, CoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| CoreError::storage(format!("count files: {e}")))
    }

    pub fn set_file_ambiguity(&self, file_id: i64, flags: &[AmbiguityFlag]) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE files SET ambiguity_flags = ?1 WHERE id = ?2",
            params![encode_ambiguity_flags(flags), file_id],
        )
        .map_err(|e| CoreError::storage(format!("set ambiguity: {e}")))?;
        Ok(())
    }

    /// Delete a file row and all facts hanging off it.
    pub fn delete_file_cascade(&self, file_id: i64) -> Result<(), CoreError> {
        self.with_bulk_writer(|w| {
            w.delete_facts_for_file(file_id)?;
            w.tx
                .execute("DELETE FROM files WHERE id = ?1", params![file_id])
                .map_err(|e| CoreError::storage(format!("delete file: {e}")))?;
            Ok(())
        })
    }

    // ---- contexts -------------------------------------------------------

    /// Replace the stored context set from discovery output. Returns ids
    /// in input order.
    pub fn replace_contexts(
        &self,
        contexts: &[CandidateContext],
        statuses: &[ProbeStatus],
    ) -> Result<Vec<i64>, CoreError> {
        self.with_bulk_writer(|w| {
            w.tx
                .execute("DELETE FROM context_markers", [])
                .and_then(|_| w.tx.execute("DELETE FROM contexts", []))
                .map_err(|e| CoreError::storage(format!("clear contexts: {e}")))?;

            let mut ids = Vec::with_capacity(contexts.len());
            for (ctx, status) in contexts.iter().zip(statuses) {
                w.tx.execute(
                    "INSERT INTO contexts (language_family, root_path, include_spec, exclude_spec, probe_status)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        ctx.language_family.as_str(),
                        ctx.root_path,
                        serde_json::to_string(&ctx.include_spec).unwrap_or_default(),
                        serde_json::to_string(&ctx.exclude_spec).unwrap_or_default(),
                        status.as_str(),
                    ],
                )
                .map_err(|e| CoreError::storage(format!("insert context: {e}")))?;
                let id = w.tx.last_insert_rowid();
                for marker in &ctx.markers {
                    w.tx.execute(
                        "INSERT INTO context_markers (context_id, marker, tier) VALUES (?1, ?2, ?3)",
                        params![id, marker, ctx.tier.as_str()],
                    )
                    .map_err(|e| CoreError::storage(format!("insert marker: {e}")))?;
                }
                ids.push(id);
            }
            Ok(ids)
        })
    }

    pub fn list_contexts(&self) -> Result<Vec<ContextRecord>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, language_family, root_path, include_spec, exclude_spec, probe_status
                 FROM contexts ORDER BY root_path",
            )
            .map_err(|e| CoreError::storage(format!("prepare list contexts: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ContextRecord {
                    id: row.get(0)?,
                    language_family: LanguageFamily::parse(&row.get::<_, String>(1)?)
                        .unwrap_or(LanguageFamily::Markdown),
                    root_path: row.get(2)?,
                    include_spec: serde_json::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or_default(),
                    exclude_spec: serde_json::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or_default(),
                    probe_status: ProbeStatus::parse(&row.get::<_, String>(5)?),
                })
            })
            .map_err(|e| CoreError::storage(format!("list contexts: {e}")))?;
        collect_rows(rows)
    }

    // ---- facts: reads used by resolvers and queries ---------------------

    pub fn unresolved_strong_refs(
        &self,
        limit: usize,
        file_ids: Option<&[i64]>,
    ) -> Result<Vec<RefFact>, CoreError> {
        let filter = file_filter_clause("file_id", file_ids);
        let sql = format!(
            "SELECT id, file_id, token_text, start_line, start_col, end_line, end_col,
                    role, ref_tier, certainty, target_def_uid
             FROM ref_facts
             WHERE ref_tier = 'strong' AND target_def_uid IS NULL{filter}
             LIMIT {limit}"
        );
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::storage(format!("prepare refs: {e}")))?;
        let rows = stmt
            .query_map([], row_to_ref)
            .map_err(|e| CoreError::storage(format!("query refs: {e}")))?;
        collect_rows(rows)
    }

    pub fn count_unresolved_refs(&self, file_id: i64) -> Result<u64, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM ref_facts
             WHERE file_id = ?1 AND ref_tier = 'strong' AND target_def_uid IS NULL",
            params![file_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(|e| CoreError::storage(format!("count unresolved refs: {e}")))
    }

    pub fn resolve_ref(
        &self,
        ref_id: i64,
        target_def_uid: &str,
        tier: RefTier,
        certainty: FactCertainty,
    ) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            // Later passes never demote a tier.
            "UPDATE ref_facts
             SET target_def_uid = ?1, ref_tier = ?2, certainty = ?3
             WHERE id = ?4
               AND CASE ref_tier
                     WHEN 'proven' THEN 3 WHEN 'strong' THEN 2
                     WHEN 'lexical' THEN 1 ELSE 0 END
                   <= CASE ?2
                        WHEN 'proven' THEN 3 WHEN 'strong' THEN 2
                        WHEN 'lexical' THEN 1 ELSE 0 END",
            params![target_def_uid, tier.as_str(), certainty.as_str(), ref_id],
        )
        .map_err(|e| CoreError::storage(format!("resolve ref: {e}")))?;
        Ok(())
    }

    pub fn find_ref_at(
        &self,
        file_id: i64,
        line: u32,
        token: &str,
    ) -> Result<Option<i64>, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id FROM ref_facts WHERE file_id = ?1 AND start_line = ?2 AND token_text = ?3",
            params![file_id, line, token],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CoreError::storage(format!("find ref at: {e}")))
    }

    pub fn local_bind(&self, file_id: i64, name: &str) -> Result<Option<LocalBindFact>, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT file_id, name, target_kind, target_uid FROM local_bind_facts
             WHERE file_id = ?1 AND name = ?2",
            params![file_id, name],
            |row| {
                Ok(LocalBindFact {
                    file_id: row.get(0)?,
                    name: row.get(1)?,
                    target_kind: BindTargetKind::parse(&row.get::<_, String>(2)?),
                    target_uid: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| CoreError::storage(format!("local bind: {e}")))
    }

    pub fn import_by_uid(&self, import_uid: &str) -> Result<Option<ImportFact>, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {IMPORT_COLS} FROM import_facts WHERE import_uid = ?1"),
            params![import_uid],
            row_to_import,
        )
        .optional()
        .map_err(|e| CoreError::storage(format!("import by uid: {e}")))
    }

    pub fn list_imports(&self) -> Result<Vec<ImportFact>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {IMPORT_COLS} FROM import_facts"))
            .map_err(|e| CoreError::storage(format!("prepare imports: {e}")))?;
        let rows = stmt
            .query_map([], row_to_import)
            .map_err(|e| CoreError::storage(format!("list imports: {e}")))?;
        collect_rows(rows)
    }

    pub fn update_import_resolved(
        &self,
        import_uid: &str,
        resolved_path: &str,
        certainty: FactCertainty,
    ) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE import_facts SET resolved_path = ?1, certainty = ?2 WHERE import_uid = ?3",
            params![resolved_path, certainty.as_str(), import_uid],
        )
        .map_err(|e| CoreError::storage(format!("update import: {e}")))?;
        Ok(())
    }

    pub fn delete_imports_of_kind(&self, kind: &str) -> Result<usize, CoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM import_facts WHERE import_kind = ?1", params![kind])
            .map_err(|e| CoreError::storage(format!("delete imports: {e}")))
    }

    /// Top-level definitions per file (lexical_path equals name), used
    /// for export surfaces.
    pub fn top_level_defs(&self) -> Result<Vec<DefFact>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DEF_COLS} FROM def_facts WHERE lexical_path = name"
            ))
            .map_err(|e| CoreError::storage(format!("prepare defs: {e}")))?;
        let rows = stmt
            .query_map([], row_to_def)
            .map_err(|e| CoreError::storage(format!("query defs: {e}")))?;
        collect_rows(rows)
    }

    pub fn defs_for_file(&self, file_id: i64) -> Result<Vec<DefFact>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DEF_COLS} FROM def_facts WHERE file_id = ?1 ORDER BY start_line"
            ))
            .map_err(|e| CoreError::storage(format!("prepare defs for file: {e}")))?;
        let rows = stmt
            .query_map(params![file_id], row_to_def)
            .map_err(|e| CoreError::storage(format!("defs for file: {e}")))?;
        collect_rows(rows)
    }

    pub fn search_defs(
        &self,
        name_query: &str,
        limit: usize,
        context_id: Option<i64>,
    ) -> Result<Vec<(DefFact, String)>, CoreError> {
        let ctx_filter = match context_id {
            Some(id) => format!(" AND d.unit_id = {id}"),
            None => String::new(),
        };
        let sql = format!(
            "SELECT {DEF_COLS_D}, f.path FROM def_facts d
             JOIN files f ON f.id = d.file_id
             WHERE d.name LIKE ?1{ctx_filter}
             ORDER BY d.name LIMIT {limit}"
        );
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::storage(format!("prepare search defs: {e}")))?;
        let rows = stmt
            .query_map(params![format!("%{name_query}%")], |row| {
                Ok((row_to_def(row)?, row.get::<_, String>(11)?))
            })
            .map_err(|e| CoreError::storage(format!("search defs: {e}")))?;
        collect_rows(rows)
    }

    pub fn search_refs(
        &self,
        token: &str,
        limit: usize,
        context_id: Option<i64>,
    ) -> Result<Vec<(RefFact, String)>, CoreError> {
        let ctx_filter = match context_id {
            Some(id) => {
                format!(" AND f.id IN (SELECT DISTINCT file_id FROM def_facts WHERE unit_id = {id})")
            }
            None => String::new(),
        };
        let sql = format!(
            "SELECT r.id, r.file_id, r.token_text, r.start_line, r.start_col, r.end_line,
                    r.end_col, r.role, r.ref_tier, r.certainty, r.target_def_uid, f.path
             FROM ref_facts r JOIN files f ON f.id = r.file_id
             WHERE r.token_text = ?1{ctx_filter}
             ORDER BY f.path, r.start_line LIMIT {limit}"
        );
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::storage(format!("prepare search refs: {e}")))?;
        let rows = stmt
            .query_map(params![token], |row| {
                Ok((row_to_ref(row)?, row.get::<_, String>(11)?))
            })
            .map_err(|e| CoreError::storage(format!("search refs: {e}")))?;
        collect_rows(rows)
    }

    pub fn scopes_for_file(&self, file_id: i64) -> Result<Vec<ScopeFact>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT file_id, ordinal, kind, start_line, start_col, end_line, end_col, parent_ordinal
                 FROM scope_facts WHERE file_id = ?1 ORDER BY ordinal",
            )
            .map_err(|e| CoreError::storage(format!("prepare scopes: {e}")))?;
        let rows = stmt
            .query_map(params![file_id], |row| {
                Ok(ScopeFact {
                    file_id: row.get(0)?,
                    ordinal: row.get(1)?,
                    kind: ScopeKind::parse(&row.get::<_, String>(2)?),
                    span: row_span(row, 3)?,
                    parent_ordinal: row.get(7)?,
                })
            })
            .map_err(|e| CoreError::storage(format!("scopes for file: {e}")))?;
        collect_rows(rows)
    }

    pub fn type_annotations(&self) -> Result<Vec<TypeAnnotationFact>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT file_id, scope_ordinal, target_name, base_type FROM type_annotation_facts",
            )
            .map_err(|e| CoreError::storage(format!("prepare annotations: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TypeAnnotationFact {
                    file_id: row.get(0)?,
                    scope_ordinal: row.get(1)?,
                    target_name: row.get(2)?,
                    base_type: row.get(3)?,
                })
            })
            .map_err(|e| CoreError::storage(format!("annotations: {e}")))?;
        collect_rows(rows)
    }

    pub fn type_members(&self) -> Result<Vec<TypeMemberFact>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT file_id, parent_type_name, member_name, member_kind, member_def_uid, base_type
                 FROM type_member_facts",
            )
            .map_err(|e| CoreError::storage(format!("prepare members: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TypeMemberFact {
                    file_id: row.get(0)?,
                    parent_type_name: row.get(1)?,
                    member_name: row.get(2)?,
                    member_kind: MemberKind::parse(&row.get::<_, String>(3)?),
                    member_def_uid: row.get(4)?,
                    base_type: row.get(5)?,
                })
            })
            .map_err(|e| CoreError::storage(format!("members: {e}")))?;
        collect_rows(rows)
    }

    pub fn unresolved_member_accesses(
        &self,
        limit: usize,
        file_ids: Option<&[i64]>,
    ) -> Result<Vec<MemberAccessFact>, CoreError> {
        let filter = file_filter_clause("file_id", file_ids);
        let sql = format!(
            "SELECT id, file_id, scope_ordinal, receiver_name, receiver_declared_type,
                    member_chain, start_line, start_col, end_line, end_col,
                    resolved_type_path, final_target_def_uid, resolution_method,
                    resolution_confidence
             FROM member_access_facts
             WHERE final_target_def_uid IS NULL{filter}
             LIMIT {limit}"
        );
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::storage(format!("prepare accesses: {e}")))?;
        let rows = stmt
            .query_map([], row_to_access)
            .map_err(|e| CoreError::storage(format!("accesses: {e}")))?;
        collect_rows(rows)
    }

    pub fn count_partial_accesses(&self, file_id: i64) -> Result<u64, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM member_access_facts
             WHERE file_id = ?1 AND resolution_confidence > 0 AND resolution_confidence < 1",
            params![file_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(|e| CoreError::storage(format!("count partial accesses: {e}")))
    }

    pub fn update_access_resolution(
        &self,
        access_id: i64,
        resolved_type_path: Option<&str>,
        final_target_def_uid: Option<&str>,
        method: ResolutionMethod,
        confidence: f64,
    ) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE member_access_facts
             SET resolved_type_path = ?1, final_target_def_uid = ?2,
                 resolution_method = ?3, resolution_confidence = ?4
             WHERE id = ?5",
            params![
                resolved_type_path,
                final_target_def_uid,
                method.as_str(),
                confidence,
                access_id
            ],
        )
        .map_err(|e| CoreError::storage(format!("update access: {e}")))?;
        Ok(())
    }

    // ---- epochs ---------------------------------------------------------

    /// Atomically advance the epoch counter and record the new epoch row.
    pub fn publish_epoch(
        &self,
        files_indexed: u64,
        commit_hash: Option<&str>,
    ) -> Result<Epoch, CoreError> {
        self.immediate_transaction(|tx| {
            let current: u64 = tx.query_row(
                "SELECT current_epoch_id FROM repo_state WHERE id = 1",
                [],
                |row| row.get::<_, i64>(0).map(|v| v as u64),
            )?;
            let next = current + 1;
            let now = unix_now();
            tx.execute(
                "INSERT INTO epochs (epoch_id, published_at, files_indexed, commit_hash)
                 VALUES (?1, ?2, ?3, ?4)",
                params![next as i64, now, files_indexed as i64, commit_hash],
            )?;
            tx.execute(
                "UPDATE repo_state SET current_epoch_id = ?1 WHERE id = 1",
                params![next as i64],
            )?;
            Ok(Epoch {
                epoch_id: next,
                published_at: now,
                files_indexed,
                commit_hash: commit_hash.map(String::from),
            })
        })
    }

    pub fn current_epoch(&self) -> Result<u64, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT current_epoch_id FROM repo_state WHERE id = 1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|v| v as u64)
        .map_err(|e| CoreError::storage(format!("current epoch: {e}")))
    }

    // ---- integrity support ----------------------------------------------

    pub fn count_orphans(&self, table: &str) -> Result<u64, CoreError> {
        let sql = match table {
            "ref_facts" | "def_facts" | "scope_facts" | "import_facts" | "local_bind_facts" => {
                format!("SELECT COUNT(*) FROM {table} WHERE file_id NOT IN (SELECT id FROM files)")
            }
            "context_markers" => {
                "SELECT COUNT(*) FROM context_markers WHERE context_id NOT IN (SELECT id FROM contexts)"
                    .to_string()
            }
            _ => return Err(CoreError::storage(format!("unknown table: {table}"))),
        };
        let conn = self.lock()?;
        conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| CoreError::storage(format!("count orphans: {e}")))
    }

    /// Test-only hook used to fabricate corruption.
    pub fn execute_raw(&self, sql: &str) -> Result<usize, CoreError> {
        let conn = self.lock()?;
        conn.execute(sql, [])
            .map_err(|e| CoreError::storage(format!("execute: {e}")))
    }
}

/// Batched inserts within one transaction.
pub struct BulkWriter<'a> {
    tx: &'a Transaction<'a>,
}

impl<'a> BulkWriter<'a> {
    pub fn insert_files_returning_ids(
        &mut self,
        files: &[NewFile],
    ) -> Result<HashMap<String, i64>, CoreError> {
        let mut ids = HashMap::with_capacity(files.len());
        for file in files {
            let id = upsert_file_tx(self.tx, file)
                .map_err(|e| CoreError::storage(format!("bulk upsert file: {e}")))?;
            ids.insert(file.path.clone(), id);
        }
        Ok(ids)
    }

    pub fn delete_facts_for_file(&mut self, file_id: i64) -> Result<(), CoreError> {
        for table in [
            "def_facts",
            "ref_facts",
            "import_facts",
            "local_bind_facts",
            "scope_facts",
            "type_annotation_facts",
            "type_member_facts",
            "member_access_facts",
        ] {
            self.tx
                .execute(&format!("DELETE FROM {table} WHERE file_id = ?1"), params![file_id])
                .map_err(|e| CoreError::storage(format!("delete {table}: {e}")))?;
        }
        Ok(())
    }

    pub fn insert_defs(&mut self, defs: &[DefFact]) -> Result<(), CoreError> {
        let mut stmt = self
            .tx
            .prepare_cached(
                "INSERT INTO def_facts
                 (def_uid, file_id, unit_id, kind, name, lexical_path,
                  start_line, start_col, end_line, end_col, docstring)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .map_err(|e| CoreError::storage(format!("prepare insert defs: {e}")))?;
        for d in defs {
            stmt.execute(params![
                d.def_uid,
                d.file_id,
                d.unit_id,
                d.kind,
                d.name,
                d.lexical_path,
                d.span.start_line,
                d.span.start_col,
                d.span.end_line,
                d.span.end_col,
                d.docstring,
            ])
            .map_err(|e| CoreError::storage(format!("insert def: {e}")))?;
        }
        Ok(())
    }

    pub fn insert_refs(&mut self, refs: &[RefFact]) -> Result<(), CoreError> {
        let mut stmt = self
            .tx
            .prepare_cached(
                "INSERT INTO ref_facts
                 (file_id, token_text, start_line, start_col, end_line, end_col,
                  role, ref_tier, certainty, target_def_uid)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .map_err(|e| CoreError::storage(format!("prepare insert refs: {e}")))?;
        for r in refs {
            stmt.execute(params![
                r.file_id,
                r.token_text,
                r.span.start_line,
                r.span.start_col,
                r.span.end_line,
                r.span.end_col,
                r.role.as_str(),
                r.ref_tier.as_str(),
                r.certainty.as_str(),
                r.target_def_uid,
            ])
            .map_err(|e| CoreError::storage(format!("insert ref: {e}")))?;
        }
        Ok(())
    }

    pub fn insert_imports(&mut self, imports: &[ImportFact]) -> Result<(), CoreError> {
        let mut stmt = self
            .tx
            .prepare_cached(
                "INSERT INTO import_facts
                 (import_uid, file_id, unit_id, imported_name, alias, source_literal,
                  resolved_path, import_kind, certainty, start_line, start_col, end_line, end_col)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )
            .map_err(|e| CoreError::storage(format!("prepare insert imports: {e}")))?;
        for i in imports {
            stmt.execute(params![
                i.import_uid,
                i.file_id,
                i.unit_id,
                i.imported_name,
                i.alias,
                i.source_literal,
                i.resolved_path,
                i.import_kind,
                i.certainty.as_str(),
                i.span.start_line,
                i.span.start_col,
                i.span.end_line,
                i.span.end_col,
            ])
            .map_err(|e| CoreError::storage(format!("insert import: {e}")))?;
        }
        Ok(())
    }

    pub fn insert_binds(&mut self, binds: &[LocalBindFact]) -> Result<(), CoreError> {
        let mut stmt = self
            .tx
            .prepare_cached(
                "INSERT INTO local_bind_facts (file_id, name, target_kind, target_uid)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(|e| CoreError::storage(format!("prepare insert binds: {e}")))?;
        for b in binds {
            stmt.execute(params![b.file_id, b.name, b.target_kind.as_str(), b.target_uid])
                .map_err(|e| CoreError::storage(format!("insert bind: {e}")))?;
        }
        Ok(())
    }

    pub fn insert_scopes(&mut self, scopes: &[ScopeFact]) -> Result<(), CoreError> {
        let mut stmt = self
            .tx
            .prepare_cached(
                "INSERT INTO scope_facts
                 (file_id, ordinal, kind, start_line, start_col, end_line, end_col, parent_ordinal)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(|e| CoreError::storage(format!("prepare insert scopes: {e}")))?;
        for s in scopes {
            stmt.execute(params![
                s.file_id,
                s.ordinal,
                s.kind.as_str(),
                s.span.start_line,
                s.span.start_col,
                s.span.end_line,
                s.span.end_col,
                s.parent_ordinal,
            ])
            .map_err(|e| CoreError::storage(format!("insert scope: {e}")))?;
        }
        Ok(())
    }

    pub fn insert_annotations(&mut self, anns: &[TypeAnnotationFact]) -> Result<(), CoreError> {
        let mut stmt = self
            .tx
            .prepare_cached(
                "INSERT INTO type_annotation_facts (file_id, scope_ordinal, target_name, base_type)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(|e| CoreError::storage(format!("prepare insert annotations: {e}")))?;
        for a in anns {
            stmt.execute(params![a.file_id, a.scope_ordinal, a.target_name, a.base_type])
                .map_err(|e| CoreError::storage(format!("insert annotation: {e}")))?;
        }
        Ok(())
    }

    pub fn insert_members(&mut self, members: &[TypeMemberFact]) -> Result<(), CoreError> {
        let mut stmt = self
            .tx
            .prepare_cached(
                "INSERT INTO type_member_facts
                 (file_id, parent_type_name, member_name, member_kind, member_def_uid, base_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(|e| CoreError::storage(format!("prepare insert members: {e}")))?;
        for m in members {
            stmt.execute(params![
                m.file_id,
                m.parent_type_name,
                m.member_name,
                m.member_kind.as_str(),
                m.member_def_uid,
                m.base_type,
            ])
            .map_err(|e| CoreError::storage(format!("insert member: {e}")))?;
        }
        Ok(())
    }

    pub fn insert_accesses(&mut self, accesses: &[MemberAccessFact]) -> Result<(), CoreError> {
        let mut stmt = self
            .tx
            .prepare_cached(
                "INSERT INTO member_access_facts
                 (file_id, scope_ordinal, receiver_name, receiver_declared_type, member_chain,
                  start_line, start_col, end_line, end_col, resolved_type_path,
                  final_target_def_uid, resolution_method, resolution_confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )
            .map_err(|e| CoreError::storage(format!("prepare insert accesses: {e}")))?;
        for a in accesses {
            stmt.execute(params![
                a.file_id,
                a.scope_ordinal,
                a.receiver_name,
                a.receiver_declared_type,
                a.member_chain,
                a.span.start_line,
                a.span.start_col,
                a.span.end_line,
                a.span.end_col,
                a.resolved_type_path,
                a.final_target_def_uid,
                a.resolution_method.as_str(),
                a.resolution_confidence,
            ])
            .map_err(|e| CoreError::storage(format!("insert access: {e}")))?;
        }
        Ok(())
    }
}

// ---- row mapping helpers ------------------------------------------------

const FILE_COLS: &str = "id, path, language_family, content_hash, indexed_at, declared_module, \
                         interface_hash, ambiguity_flags, line_count";
const DEF_COLS: &str = "def_uid, file_id, unit_id, kind, name, lexical_path, start_line, \
                        start_col, end_line, end_col, docstring";
const DEF_COLS_D: &str = "d.def_uid, d.file_id, d.unit_id, d.kind, d.name, d.lexical_path, \
                          d.start_line, d.start_col, d.end_line, d.end_col, d.docstring";
const IMPORT_COLS: &str = "import_uid, file_id, unit_id, imported_name, alias, source_literal, \
                           resolved_path, import_kind, certainty, start_line, start_col, \
                           end_line, end_col";

fn row_span(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<Span> {
    Ok(Span::new(
        row.get(offset)?,
        row.get(offset + 1)?,
        row.get(offset + 2)?,
        row.get(offset + 3)?,
    ))
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        language_family: row
            .get::<_, Option<String>>(2)?
            .and_then(|s| LanguageFamily::parse(&s)),
        content_hash: row.get(3)?,
        indexed_at: row.get(4)?,
        declared_module: row.get(5)?,
        interface_hash: row.get(6)?,
        ambiguity_flags: decode_ambiguity_flags(&row.get::<_, String>(7)?),
        line_count: row.get(8)?,
    })
}

fn row_to_def(row: &rusqlite::Row) -> rusqlite::Result<DefFact> {
    Ok(DefFact {
        def_uid: row.get(0)?,
        file_id: row.get(1)?,
        unit_id: row.get(2)?,
        kind: row.get(3)?,
        name: row.get(4)?,
        lexical_path: row.get(5)?,
        span: row_span(row, 6)?,
        docstring: row.get(10)?,
    })
}

fn row_to_ref(row: &rusqlite::Row) -> rusqlite::Result<RefFact> {
    Ok(RefFact {
        id: row.get(0)?,
        file_id: row.get(1)?,
        token_text: row.get(2)?,
        span: row_span(row, 3)?,
        role: RefRole::parse(&row.get::<_, String>(7)?),
        ref_tier: RefTier::parse(&row.get::<_, String>(8)?),
        certainty: FactCertainty::parse(&row.get::<_, String>(9)?),
        target_def_uid: row.get(10)?,
    })
}

fn row_to_import(row: &rusqlite::Row) -> rusqlite::Result<ImportFact> {
    Ok(ImportFact {
        import_uid: row.get(0)?,
        file_id: row.get(1)?,
        unit_id: row.get(2)?,
        imported_name: row.get(3)?,
        alias: row.get(4)?,
        source_literal: row.get(5)?,
        resolved_path: row.get(6)?,
        import_kind: row.get(7)?,
        certainty: FactCertainty::parse(&row.get::<_, String>(8)?),
        span: row_span(row, 9)?,
    })
}

fn row_to_access(row: &rusqlite::Row) -> rusqlite::Result<MemberAccessFact> {
    Ok(MemberAccessFact {
        id: row.get(0)?,
        file_id: row.get(1)?,
        scope_ordinal: row.get(2)?,
        receiver_name: row.get(3)?,
        receiver_declared_type: row.get(4)?,
        member_chain: row.get(5)?,
        span: row_span(row, 6)?,
        resolved_type_path: row.get(10)?,
        final_target_def_uid: row.get(11)?,
        resolution_method: ResolutionMethod::parse(&row.get::<_, String>(12)?),
        resolution_confidence: row.get(13)?,
    })
}

fn upsert_file_tx(conn: &Connection, file: &NewFile) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO files
         (path, language_family, content_hash, indexed_at, declared_module, interface_hash,
          ambiguity_flags, line_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, '[]', ?7)
         ON CONFLICT(path) DO UPDATE SET
           language_family = excluded.language_family,
           content_hash = excluded.content_hash,
           indexed_at = excluded.indexed_at,
           declared_module = excluded.declared_module,
           interface_hash = excluded.interface_hash,
           line_count = excluded.line_count",
        params![
            file.path,
            file.language_family.map(|f| f.as_str()),
            file.content_hash,
            file.indexed_at,
            file.declared_module,
            file.interface_hash,
            file.line_count,
        ],
    )?;
    conn.query_row("SELECT id FROM files WHERE path = ?1", params![file.path], |row| {
        row.get(0)
    })
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, CoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| CoreError::storage(format!("read row: {e}")))?);
    }
    Ok(out)
}

fn file_filter_clause(column: &str, file_ids: Option<&[i64]>) -> String {
    match file_ids {
        Some(ids) if !ids.is_empty() => {
            let list = ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!(" AND {column} IN ({list})")
        }
        Some(_) => " AND 0".to_string(),
        None => String::new(),
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    language_family TEXT,
    content_hash TEXT NOT NULL,
    indexed_at INTEGER,
    declared_module TEXT,
    interface_hash TEXT,
    ambiguity_flags TEXT NOT NULL DEFAULT '[]',
    line_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS contexts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    language_family TEXT NOT NULL,
    root_path TEXT NOT NULL,
    include_spec TEXT NOT NULL,
    exclude_spec TEXT NOT NULL,
    probe_status TEXT NOT NULL,
    UNIQUE(language_family, root_path)
);

CREATE TABLE IF NOT EXISTS context_markers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    context_id INTEGER NOT NULL,
    marker TEXT NOT NULL,
    tier TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS def_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    def_uid TEXT NOT NULL,
    file_id INTEGER NOT NULL,
    unit_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    lexical_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    start_col INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    end_col INTEGER NOT NULL,
    docstring TEXT
);

CREATE TABLE IF NOT EXISTS ref_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    token_text TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    start_col INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    end_col INTEGER NOT NULL,
    role TEXT NOT NULL,
    ref_tier TEXT NOT NULL,
    certainty TEXT NOT NULL,
    target_def_uid TEXT
);

CREATE TABLE IF NOT EXISTS import_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    import_uid TEXT NOT NULL,
    file_id INTEGER NOT NULL,
    unit_id INTEGER NOT NULL,
    imported_name TEXT NOT NULL,
    alias TEXT,
    source_literal TEXT NOT NULL,
    resolved_path TEXT,
    import_kind TEXT NOT NULL,
    certainty TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    start_col INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    end_col INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS local_bind_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    target_kind TEXT NOT NULL,
    target_uid TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scope_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    ordinal INTEGER NOT NULL,
    kind TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    start_col INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    end_col INTEGER NOT NULL,
    parent_ordinal INTEGER
);

CREATE TABLE IF NOT EXISTS type_annotation_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    scope_ordinal INTEGER,
    target_name TEXT NOT NULL,
    base_type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS type_member_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    parent_type_name TEXT NOT NULL,
    member_name TEXT NOT NULL,
    member_kind TEXT NOT NULL,
    member_def_uid TEXT NOT NULL,
    base_type TEXT
);

CREATE TABLE IF NOT EXISTS member_access_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    scope_ordinal INTEGER,
    receiver_name TEXT NOT NULL,
    receiver_declared_type TEXT,
    member_chain TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    start_col INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    end_col INTEGER NOT NULL,
    resolved_type_path TEXT,
    final_target_def_uid TEXT,
    resolution_method TEXT NOT NULL DEFAULT 'none',
    resolution_confidence REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS epochs (
    epoch_id INTEGER PRIMARY KEY,
    published_at INTEGER NOT NULL,
    files_indexed INTEGER NOT NULL,
    commit_hash TEXT
);

CREATE TABLE IF NOT EXISTS repo_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    current_epoch_id INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_def_facts_file ON def_facts(file_id);
CREATE INDEX IF NOT EXISTS idx_def_facts_name ON def_facts(name);
CREATE INDEX IF NOT EXISTS idx_def_facts_uid ON def_facts(def_uid);
CREATE INDEX IF NOT EXISTS idx_ref_facts_file ON ref_facts(file_id);
CREATE INDEX IF NOT EXISTS idx_ref_facts_token ON ref_facts(token_text);
CREATE INDEX IF NOT EXISTS idx_import_facts_file ON import_facts(file_id);
CREATE INDEX IF NOT EXISTS idx_bind_facts_file ON local_bind_facts(file_id, name);
CREATE INDEX IF NOT EXISTS idx_scope_facts_file ON scope_facts(file_id);
CREATE INDEX IF NOT EXISTS idx_access_facts_file ON member_access_facts(file_id);
"#;
