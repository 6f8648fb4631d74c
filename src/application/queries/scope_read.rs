//! Scope-aware reads: the smallest enclosing scope of the preferred
//! kind containing a line, with a line-window fallback when no
//! structural scope exists.

use std::path::Path;

use crate::connector::storage::Database;
use crate::domain::{
    CoreError, ScopeFact, ScopeKind, ScopePreference, ScopeRegion,
};

pub const FALLBACK_WINDOW_LINES: u32 = 25;

pub fn read_scope(
    db: &Database,
    repo_root: &Path,
    path: &str,
    line: u32,
    preference: ScopePreference,
) -> Result<ScopeRegion, CoreError> {
    let full_path = repo_root.join(path);
    let content = std::fs::read_to_string(&full_path)
        .map_err(|_| CoreError::UnknownPath(path.to_string()))?;
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len() as u32;

    if line == 0 || line > total.max(1) {
        return Err(CoreError::InvalidRange {
            start: line,
            end: line,
            total,
        });
    }

    let scopes = match db.get_file_by_path(path)? {
        Some(file) => db.scopes_for_file(file.id)?,
        None => Vec::new(),
    };

    match find_enclosing_scope(&scopes, line, preference) {
        Some(scope) => {
            let start = scope.span.start_line.max(1);
            let end = scope.span.end_line.min(total.max(1));
            Ok(ScopeRegion {
                start_line: start,
                end_line: end,
                kind: scope.kind.as_str().to_string(),
                resolved: true,
                content: slice_lines(&lines, start, end),
            })
        }
        None => {
            let start = line.saturating_sub(FALLBACK_WINDOW_LINES).max(1);
            let end = (line + FALLBACK_WINDOW_LINES).min(total.max(1));
            Ok(ScopeRegion {
                start_line: start,
                end_line: end,
                kind: "lines".to_string(),
                resolved: false,
                content: slice_lines(&lines, start, end),
            })
        }
    }
}

/// Smallest enclosing scope of the preferred kind; falls back to any
/// enclosing non-file scope, then the file scope.
fn find_enclosing_scope(
    scopes: &[ScopeFact],
    line: u32,
    preference: ScopePreference,
) -> Option<&ScopeFact> {
    let mut enclosing: Vec<&ScopeFact> = scopes
        .iter()
        .filter(|s| s.span.contains_line(line))
        .collect();
    if enclosing.is_empty() {
        return None;
    }
    // Smallest first.
    enclosing.sort_by_key(|s| s.span.line_count());

    let preferred_kinds: &[ScopeKind] = match preference {
        ScopePreference::Function => &[ScopeKind::Function, ScopeKind::Lambda],
        ScopePreference::Class => &[ScopeKind::Class],
        ScopePreference::Block => &[ScopeKind::Block, ScopeKind::Comprehension],
    };

    enclosing
        .iter()
        .find(|s| preferred_kinds.contains(&s.kind))
        .or_else(|| enclosing.iter().find(|s| s.kind != ScopeKind::File))
        .or_else(|| enclosing.first())
        .copied()
}

fn slice_lines(lines: &[&str], start: u32, end: u32) -> String {
    let start_idx = (start as usize).saturating_sub(1);
    let end_idx = (end as usize).min(lines.len());
    lines[start_idx..end_idx].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::storage::NewFile;
    use crate::domain::Span;

    fn seed_scoped_file(db: &Database, dir: &Path) -> i64 {
        let content = "class Greeter:\n    def greet(self):\n        return 1\n\nx = 2\n";
        std::fs::write(dir.join("g.py"), content).unwrap();
        let id = db
            .upsert_file(&NewFile {
                path: "g.py".to_string(),
                language_family: None,
                content_hash: "h".to_string(),
                indexed_at: Some(1),
                declared_module: None,
                interface_hash: None,
                line_count: 5,
            })
            .unwrap();
        db.with_bulk_writer(|w| {
            w.insert_scopes(&[
                ScopeFact {
                    file_id: id,
                    ordinal: 0,
                    kind: ScopeKind::File,
                    span: Span::new(1, 0, 5, 0),
                    parent_ordinal: None,
                },
                ScopeFact {
                    file_id: id,
                    ordinal: 1,
                    kind: ScopeKind::Class,
                    span: Span::new(1, 0, 3, 16),
                    parent_ordinal: Some(0),
                },
                ScopeFact {
                    file_id: id,
                    ordinal: 2,
                    kind: ScopeKind::Function,
                    span: Span::new(2, 4, 3, 16),
                    parent_ordinal: Some(1),
                },
            ])
        })
        .unwrap();
        id
    }

    #[test]
    fn test_function_preference() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        seed_scoped_file(&db, dir.path());

        let region = read_scope(&db, dir.path(), "g.py", 3, ScopePreference::Function).unwrap();
        assert!(region.resolved);
        assert_eq!(region.kind, "function");
        assert_eq!(region.start_line, 2);
        assert_eq!(region.end_line, 3);
        assert!(region.content.contains("def greet"));
    }

    #[test]
    fn test_class_preference() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        seed_scoped_file(&db, dir.path());

        let region = read_scope(&db, dir.path(), "g.py", 3, ScopePreference::Class).unwrap();
        assert_eq!(region.kind, "class");
        assert_eq!(region.start_line, 1);
    }

    #[test]
    fn test_line_outside_scopes_falls_back_to_file_scope() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        seed_scoped_file(&db, dir.path());

        let region = read_scope(&db, dir.path(), "g.py", 5, ScopePreference::Function).unwrap();
        assert!(region.resolved);
        assert_eq!(region.kind, "file");
    }

    #[test]
    fn test_unindexed_file_uses_line_window() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        let content: String = (1..=100).map(|i| format!("line {i}\n")).collect();
        std::fs::write(dir.path().join("plain.txt"), content).unwrap();

        let region =
            read_scope(&db, dir.path(), "plain.txt", 50, ScopePreference::Function).unwrap();
        assert!(!region.resolved);
        assert_eq!(region.kind, "lines");
        assert_eq!(region.start_line, 25);
        assert_eq!(region.end_line, 75);
    }

    #[test]
    fn test_missing_file_is_unknown_path() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        let err = read_scope(&db, dir.path(), "nope.py", 1, ScopePreference::Function).unwrap_err();
        assert!(matches!(err, CoreError::UnknownPath(_)));
    }

    #[test]
    fn test_out_of_bounds_line_is_invalid_range() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        std::fs::write(dir.path().join("short.py"), "x = 1\n").unwrap();

        let err = read_scope(&db, dir.path(), "short.py", 99, ScopePreference::Function).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRange { .. }));
    }
}
