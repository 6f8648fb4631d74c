//! Pass 4: config-file cross-language reference resolution.
//!
//! Re-derives `config_file_ref` import edges from quoted string
//! literals in config files that deterministically resolve to indexed
//! paths. Idempotent: existing edges of the kind are deleted first.
//! Every edge is backed by a file-existence check; no heuristics.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use tracing::{debug, info};

use crate::application::discovery::route_file;
use crate::connector::storage::Database;
use crate::domain::{
    compute_import_uid, ContextRecord, CoreError, FactCertainty, ImportFact, Span,
    IMPORT_KIND_CONFIG_REF,
};

const CONFIG_EXTENSIONS: &[&str] = &[".toml", ".yml", ".yaml", ".json", ".cfg", ".ini"];
const CONFIG_BASENAMES: &[&str] = &["makefile", "gnumakefile", "dockerfile"];

const SKIP_PREFIXES: &[&str] = &[
    "http://", "https://", "git://", "ssh://", "ftp://", "mailto:", ">=", "<=", "==", "!=", "~=",
];

const MIN_LITERAL_LEN: usize = 3;
const MAX_LITERAL_LEN: usize = 200;

pub fn is_config_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    let basename = lower.rsplit('/').next().unwrap_or(&lower);

    let name_no_ext = basename.split('.').next().unwrap_or(basename);
    if CONFIG_BASENAMES.contains(&name_no_ext) || CONFIG_BASENAMES.contains(&basename) {
        return true;
    }
    CONFIG_EXTENSIONS.iter().any(|ext| basename.ends_with(ext))
}

/// Quoted strings with their 1-indexed line numbers. Both quote styles,
/// bounded length, no embedded newlines.
fn extract_strings(content: &str) -> Vec<(String, u32)> {
    let mut results = Vec::new();
    let mut seen: BTreeSet<(String, u32)> = BTreeSet::new();

    for (line_idx, line) in content.lines().enumerate() {
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let quote = bytes[i];
            if quote != b'"' && quote != b'\'' {
                i += 1;
                continue;
            }
            let Some(close) = line[i + 1..].find(quote as char) else {
                break;
            };
            let value = line[i + 1..i + 1 + close].trim().to_string();
            i += close + 2;

            if value.len() < MIN_LITERAL_LEN || value.len() > MAX_LITERAL_LEN {
                continue;
            }
            if SKIP_PREFIXES.iter().any(|p| value.starts_with(p)) {
                continue;
            }
            let key = (value, line_idx as u32 + 1);
            if seen.insert(key.clone()) {
                results.push(key);
            }
        }
    }

    results
}

fn is_module_path(value: &str) -> bool {
    let segments: Vec<&str> = value.split('.').collect();
    segments.len() >= 2 && segments.iter().all(|s| is_identifier(s))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn resolve_module_path(dotted: &str, path_set: &BTreeSet<&str>) -> Option<String> {
    let base = dotted.replace('.', "/");
    let candidates = [
        format!("{base}.py"),
        format!("{base}/__init__.py"),
        format!("src/{base}.py"),
        format!("src/{base}/__init__.py"),
    ];
    candidates
        .into_iter()
        .find(|c| path_set.contains(c.as_str()))
}

/// Resolve one literal to a repo-relative path; all strategies require
/// the target to exist in the index.
fn try_resolve(value: &str, path_set: &BTreeSet<&str>, dir_set: &BTreeSet<String>) -> Option<String> {
    let cleaned = value.strip_prefix("./").unwrap_or(value);
    let cleaned_no_slash = cleaned.trim_end_matches('/');

    // 1. Direct path match.
    if path_set.contains(cleaned) {
        return Some(cleaned.to_string());
    }
    if !cleaned_no_slash.is_empty() && path_set.contains(cleaned_no_slash) {
        return Some(cleaned_no_slash.to_string());
    }

    // 2. Entry-point form: `module.path:object`.
    if let Some((module_part, object_part)) = cleaned.split_once(':') {
        if is_identifier(object_part)
            && (is_module_path(module_part) || is_identifier(module_part))
        {
            if let Some(resolved) = resolve_module_path(module_part, path_set) {
                return Some(resolved);
            }
        }
    }

    // 3. Dotted module path.
    if is_module_path(cleaned) {
        if let Some(resolved) = resolve_module_path(cleaned, path_set) {
            return Some(resolved);
        }
    }

    // 4. Directory to package-init file.
    if !cleaned_no_slash.is_empty() && dir_set.contains(cleaned_no_slash) {
        let init = format!("{cleaned_no_slash}/__init__.py");
        if path_set.contains(init.as_str()) {
            return Some(init);
        }
    }

    None
}

/// Scan indexed config files and rebuild their reference edges.
/// Returns the number of edges created.
pub fn resolve_config_refs(
    db: &Database,
    repo_root: &Path,
    contexts: &[ContextRecord],
) -> Result<usize, CoreError> {
    let files = db.list_files()?;
    let path_set: BTreeSet<&str> = files.iter().map(|f| f.path.as_str()).collect();

    let mut dir_set: BTreeSet<String> = BTreeSet::new();
    for path in &path_set {
        let parts: Vec<&str> = path.split('/').collect();
        for i in 1..parts.len() {
            dir_set.insert(parts[..i].join("/"));
        }
    }

    let config_files: Vec<(i64, &str)> = files
        .iter()
        .filter(|f| is_config_file(&f.path))
        .map(|f| (f.id, f.path.as_str()))
        .collect();
    if config_files.is_empty() {
        debug!("no config files in index; skipping config ref resolution");
        return Ok(0);
    }

    let unit_ids: HashMap<i64, i64> = config_files
        .iter()
        .map(|(id, path)| (*id, route_file(path, contexts).map(|c| c.id).unwrap_or(0)))
        .collect();

    db.delete_imports_of_kind(IMPORT_KIND_CONFIG_REF)?;

    let mut new_imports: Vec<ImportFact> = Vec::new();
    let mut strings_checked = 0usize;
    let mut files_scanned = 0usize;

    for (file_id, file_path) in &config_files {
        let Ok(content) = std::fs::read_to_string(repo_root.join(file_path)) else {
            continue;
        };
        files_scanned += 1;

        let strings = extract_strings(&content);
        strings_checked += strings.len();

        let mut seen_resolved: BTreeSet<String> = BTreeSet::new();
        for (value, line) in strings {
            let Some(resolved) = try_resolve(&value, &path_set, &dir_set) else {
                continue;
            };
            // No self-references, one edge per target per config file.
            if resolved == *file_path || !seen_resolved.insert(resolved.clone()) {
                continue;
            }

            let imported_name = resolved.rsplit('/').next().unwrap_or(&resolved).to_string();
            new_imports.push(ImportFact {
                import_uid: compute_import_uid(file_path, &value, &resolved, line),
                file_id: *file_id,
                unit_id: *unit_ids.get(file_id).unwrap_or(&0),
                imported_name,
                alias: None,
                source_literal: value,
                resolved_path: Some(resolved),
                import_kind: IMPORT_KIND_CONFIG_REF.to_string(),
                certainty: FactCertainty::Certain,
                span: Span::new(line, 0, line, 0),
            });
        }
    }

    if !new_imports.is_empty() {
        db.with_bulk_writer(|w| w.insert_imports(&new_imports))?;
    }

    info!(
        files_scanned,
        strings_checked,
        edges = new_imports.len(),
        "config file ref resolution finished"
    );
    Ok(new_imports.len())
}
