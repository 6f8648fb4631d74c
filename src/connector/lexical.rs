//! Lexical full-text layer backed by tantivy.
//!
//! Schema: `{path (raw), content (tokenized), symbols (tokenized),
//! context_id, file_id}`. Updates are idempotent (delete-by-path then
//! insert); readers observe committed writes after `reload()`.

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, Value, INDEXED, STORED, STRING, TEXT,
};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::domain::{CoreError, SearchResponse, SearchResult};

const WRITER_HEAP_BYTES: usize = 50_000_000;
const SNIPPET_LINES: usize = 3;

#[derive(Debug, Clone)]
pub struct LexicalDoc {
    pub path: String,
    pub content: String,
    pub symbols: Vec<String>,
    pub context_id: i64,
    pub file_id: i64,
}

struct Fields {
    path: Field,
    content: Field,
    symbols: Field,
    context_id: Field,
    file_id: Field,
}

/// Full-text index over file contents and symbol names. Writes are
/// serialized through the writer lock; searchers see the last `reload()`.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

impl LexicalIndex {
    pub fn open(index_dir: &Path) -> Result<Self, CoreError> {
        std::fs::create_dir_all(index_dir)?;

        let mut builder = Schema::builder();
        let path = builder.add_text_field("path", STRING | STORED);
        let content = builder.add_text_field("content", TEXT | STORED);
        let symbols = builder.add_text_field("symbols", TEXT | STORED);
        let context_id = builder.add_u64_field("context_id", INDEXED | STORED);
        let file_id = builder.add_u64_field("file_id", INDEXED | STORED);
        let schema = builder.build();

        let directory = MmapDirectory::open(index_dir)
            .map_err(|e| CoreError::lexical(format!("open directory: {e}")))?;
        let index = Index::open_or_create(directory, schema)
            .map_err(|e| CoreError::lexical(format!("open index: {e}")))?;
        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| CoreError::lexical(format!("create writer: {e}")))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| CoreError::lexical(format!("create reader: {e}")))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields: Fields {
                path,
                content,
                symbols,
                context_id,
                file_id,
            },
        })
    }

    pub fn add_file(&self, doc: &LexicalDoc) -> Result<(), CoreError> {
        self.add_files_batch(std::slice::from_ref(doc)).map(|_| ())
    }

    /// Idempotent batch upsert: each path is deleted then re-added, all
    /// committed together.
    pub fn add_files_batch(&self, docs: &[LexicalDoc]) -> Result<usize, CoreError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| CoreError::lexical("writer lock poisoned"))?;

        for d in docs {
            writer.delete_term(Term::from_field_text(self.fields.path, &d.path));
            writer
                .add_document(doc!(
                    self.fields.path => d.path.clone(),
                    self.fields.content => d.content.clone(),
                    self.fields.symbols => d.symbols.join(" "),
                    self.fields.context_id => d.context_id.max(0) as u64,
                    self.fields.file_id => d.file_id.max(0) as u64,
                ))
                .map_err(|e| CoreError::lexical(format!("add document: {e}")))?;
        }

        writer
            .commit()
            .map_err(|e| CoreError::lexical(format!("commit: {e}")))?;
        Ok(docs.len())
    }

    pub fn remove_file(&self, path: &str) -> Result<(), CoreError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| CoreError::lexical("writer lock poisoned"))?;
        writer.delete_term(Term::from_field_text(self.fields.path, path));
        writer
            .commit()
            .map_err(|e| CoreError::lexical(format!("commit delete: {e}")))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), CoreError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| CoreError::lexical("writer lock poisoned"))?;
        writer
            .delete_all_documents()
            .map_err(|e| CoreError::lexical(format!("clear: {e}")))?;
        writer
            .commit()
            .map_err(|e| CoreError::lexical(format!("commit clear: {e}")))?;
        Ok(())
    }

    /// Make committed writes visible to new searchers.
    pub fn reload(&self) -> Result<(), CoreError> {
        self.reader
            .reload()
            .map_err(|e| CoreError::lexical(format!("reload: {e}")))
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn search(
        &self,
        query: &str,
        limit: usize,
        context_id: Option<i64>,
        budget: Option<Duration>,
    ) -> Result<SearchResponse, CoreError> {
        self.search_fields(
            query,
            &[self.fields.content, self.fields.symbols, self.fields.path],
            limit,
            context_id,
            budget,
        )
    }

    pub fn search_symbols(
        &self,
        query: &str,
        limit: usize,
        context_id: Option<i64>,
    ) -> Result<SearchResponse, CoreError> {
        self.search_fields(query, &[self.fields.symbols], limit, context_id, None)
    }

    pub fn search_path(
        &self,
        pattern: &str,
        limit: usize,
        context_id: Option<i64>,
    ) -> Result<SearchResponse, CoreError> {
        self.search_fields(pattern, &[self.fields.path], limit, context_id, None)
    }

    fn search_fields(
        &self,
        query: &str,
        fields: &[Field],
        limit: usize,
        context_id: Option<i64>,
        budget: Option<Duration>,
    ) -> Result<SearchResponse, CoreError> {
        let start = Instant::now();
        let mut response = SearchResponse::default();

        let parser = QueryParser::for_index(&self.index, fields.to_vec());
        let parsed: Box<dyn Query> = match parser.parse_query(query) {
            Ok(q) => q,
            Err(e) => {
                // Syntax errors fall back to literal content matching.
                response.fallback_reason = Some(format!("query parse error: {e}"));
                self.literal_query(query, fields)
            }
        };

        let final_query: Box<dyn Query> = match context_id {
            Some(id) => {
                let ctx_term = Term::from_field_u64(self.fields.context_id, id.max(0) as u64);
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, parsed),
                    (
                        Occur::Must,
                        Box::new(TermQuery::new(ctx_term, IndexRecordOption::Basic)),
                    ),
                ]))
            }
            None => parsed,
        };

        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&final_query, &TopDocs::with_limit(limit.max(1)))
            .map_err(|e| CoreError::lexical(format!("search: {e}")))?;

        for (score, addr) in top_docs {
            if let Some(budget) = budget {
                if start.elapsed() > budget {
                    response.truncated = true;
                    break;
                }
            }
            let doc: TantivyDocument = searcher
                .doc(addr)
                .map_err(|e| CoreError::lexical(format!("fetch doc: {e}")))?;
            let path = doc
                .get_first(self.fields.path)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let content = doc
                .get_first(self.fields.content)
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let (line, snippet) = extract_snippet(content, query);
            response.results.push(SearchResult {
                path,
                line,
                column: None,
                snippet,
                score,
            });
        }

        Ok(response)
    }

    /// Literal fallback: every alphanumeric token of the raw query must
    /// match as a term.
    fn literal_query(&self, query: &str, fields: &[Field]) -> Box<dyn Query> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for term in terms {
            let mut any: Vec<(Occur, Box<dyn Query>)> = Vec::new();
            for field in fields {
                any.push((
                    Occur::Should,
                    Box::new(TermQuery::new(
                        Term::from_field_text(*field, &term),
                        IndexRecordOption::Basic,
                    )),
                ));
            }
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(any))));
        }
        Box::new(BooleanQuery::new(clauses))
    }
}

/// First matching line (1-indexed) and a small window of context around it.
fn extract_snippet(content: &str, query: &str) -> (u32, String) {
    let lines: Vec<&str> = content.lines().collect();
    let needle = query.to_lowercase();
    let tokens: Vec<&str> = needle
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .collect();

    for (i, line) in lines.iter().enumerate() {
        let lower = line.to_lowercase();
        if lower.contains(&needle) || tokens.iter().any(|t| lower.contains(t)) {
            let start = i.saturating_sub(1);
            let end = (i + SNIPPET_LINES).min(lines.len());
            return (i as u32 + 1, lines[start..end].join("\n"));
        }
    }

    (1, lines.iter().take(SNIPPET_LINES).cloned().collect::<Vec<_>>().join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with_docs(docs: &[LexicalDoc]) -> (tempfile::TempDir, LexicalIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = LexicalIndex::open(dir.path()).unwrap();
        index.add_files_batch(docs).unwrap();
        index.reload().unwrap();
        (dir, index)
    }

    fn doc(path: &str, content: &str, symbols: &[&str], context_id: i64, file_id: i64) -> LexicalDoc {
        LexicalDoc {
            path: path.to_string(),
            content: content.to_string(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            context_id,
            file_id,
        }
    }

    #[test]
    fn test_add_and_search() {
        let (_dir, index) = index_with_docs(&[
            doc("src/main.py", "def greet(name):\n    return name\n", &["greet"], 1, 1),
            doc("src/other.py", "x = 1\n", &[], 1, 2),
        ]);

        let response = index.search("greet", 10, None, None).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].path, "src/main.py");
        assert_eq!(response.results[0].line, 1);
        assert!(response.fallback_reason.is_none());
    }

    #[test]
    fn test_update_is_idempotent() {
        let (_dir, index) = index_with_docs(&[doc("a.py", "alpha\n", &[], 1, 1)]);
        index
            .add_file(&doc("a.py", "beta\n", &[], 1, 1))
            .unwrap();
        index.reload().unwrap();

        assert_eq!(index.doc_count(), 1);
        assert!(index.search("alpha", 10, None, None).unwrap().results.is_empty());
        assert_eq!(index.search("beta", 10, None, None).unwrap().results.len(), 1);
    }

    #[test]
    fn test_remove_file() {
        let (_dir, index) = index_with_docs(&[
            doc("a.py", "alpha\n", &[], 1, 1),
            doc("b.py", "beta\n", &[], 1, 2),
        ]);
        index.remove_file("a.py").unwrap();
        index.reload().unwrap();
        assert_eq!(index.doc_count(), 1);
    }

    #[test]
    fn test_context_filter() {
        let (_dir, index) = index_with_docs(&[
            doc("one/x.py", "shared_token\n", &[], 1, 1),
            doc("two/y.py", "shared_token\n", &[], 2, 2),
        ]);

        let all = index.search("shared_token", 10, None, None).unwrap();
        assert_eq!(all.results.len(), 2);

        let scoped = index.search("shared_token", 10, Some(2), None).unwrap();
        assert_eq!(scoped.results.len(), 1);
        assert_eq!(scoped.results[0].path, "two/y.py");
    }

    #[test]
    fn test_symbol_search_hits_symbols_only() {
        let (_dir, index) = index_with_docs(&[
            doc("a.py", "nothing here\n", &["greet"], 1, 1),
            doc("b.py", "greet appears in content only\n", &[], 1, 2),
        ]);

        let response = index.search_symbols("greet", 10, None).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].path, "a.py");
    }

    #[test]
    fn test_malformed_query_falls_back_to_literal() {
        let (_dir, index) = index_with_docs(&[doc("a.py", "weird AND token\n", &[], 1, 1)]);

        // Unbalanced quote is a tantivy syntax error.
        let response = index.search("\"weird", 10, None, None).unwrap();
        assert!(response.fallback_reason.is_some());
        assert_eq!(response.results.len(), 1);
    }

    #[test]
    fn test_clear_empties_index() {
        let (_dir, index) = index_with_docs(&[doc("a.py", "alpha\n", &[], 1, 1)]);
        index.clear().unwrap();
        index.reload().unwrap();
        assert_eq!(index.doc_count(), 0);
    }
}
