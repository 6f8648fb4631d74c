//! Search across the lexical and structural layers.

use std::time::Duration;

use crate::connector::lexical::LexicalIndex;
use crate::connector::storage::Database;
use crate::domain::{CoreError, SearchMode, SearchResponse, SearchResult};

/// Wall-clock budget for time-bounded lexical queries.
pub const SEARCH_BUDGET: Duration = Duration::from_millis(1500);

pub fn search(
    db: &Database,
    lexical: &LexicalIndex,
    query: &str,
    mode: SearchMode,
    limit: usize,
    context_id: Option<i64>,
) -> Result<SearchResponse, CoreError> {
    match mode {
        SearchMode::Lexical => lexical.search(query, limit, context_id, Some(SEARCH_BUDGET)),
        SearchMode::Symbol => lexical.search_symbols(query, limit, context_id),
        SearchMode::Definitions => search_definitions(db, query, limit, context_id),
        SearchMode::References => search_references(db, query, limit, context_id),
    }
}

fn search_definitions(
    db: &Database,
    query: &str,
    limit: usize,
    context_id: Option<i64>,
) -> Result<SearchResponse, CoreError> {
    let mut response = SearchResponse::default();
    for (def, path) in db.search_defs(query, limit, context_id)? {
        // Exact name matches rank above substring matches.
        let score = if def.name == query { 2.0 } else { 1.0 };
        let snippet = match &def.docstring {
            Some(doc) => format!("{} {} - {}", def.kind, def.lexical_path, first_line(doc)),
            None => format!("{} {}", def.kind, def.lexical_path),
        };
        response.results.push(SearchResult {
            path,
            line: def.span.start_line,
            column: Some(def.span.start_col),
            snippet,
            score,
        });
    }
    response
        .results
        .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(response)
}

fn search_references(
    db: &Database,
    query: &str,
    limit: usize,
    context_id: Option<i64>,
) -> Result<SearchResponse, CoreError> {
    let mut response = SearchResponse::default();
    for (r, path) in db.search_refs(query, limit, context_id)? {
        response.results.push(SearchResult {
            path,
            line: r.span.start_line,
            column: Some(r.span.start_col),
            snippet: format!("{} {} [{}]", r.role.as_str(), r.token_text, r.ref_tier.as_str()),
            score: match r.ref_tier {
                crate::domain::RefTier::Proven => 3.0,
                crate::domain::RefTier::Strong => 2.0,
                _ => 1.0,
            },
        });
    }
    response
        .results
        .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(response)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
