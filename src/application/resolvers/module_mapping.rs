//! Module path <-> file path mapping.
//!
//! Converts between dotted module paths (`pkg.sub.mod`) and repository
//! paths (`src/pkg/sub/mod.py`). Only importable language families
//! participate; data and doc formats return None.

use std::collections::HashMap;
use std::path::Path;

use crate::domain::{detect_language_family, language_def, LanguageFamily};

/// Convert a file path to a dotted module key, or None for files whose
/// family has no import system.
pub fn path_to_module(path: &str) -> Option<String> {
    let family = detect_language_family(Path::new(path))?;
    if !language_def(family).importable {
        return None;
    }

    let dot = path.rfind('.')?;
    let mut module = &path[..dot];

    if path.ends_with(".py") {
        module = module.strip_suffix("/__init__").unwrap_or(module);
    }

    Some(module.replace('/', ".").trim_matches('.').to_string())
}

/// Candidate module keys an import literal may resolve to. The `src.`
/// prefix covers the common src-layout convention.
pub fn module_to_candidate_paths(source_literal: &str) -> Vec<String> {
    vec![source_literal.to_string(), format!("src.{source_literal}")]
}

/// Resolve a Python-style relative import (`.a`, `..pkg.mod`) against
/// the importing file's package directory, returning an absolute dotted
/// module key.
pub fn resolve_relative_import(importer_path: &str, source_literal: &str) -> Option<String> {
    if !source_literal.starts_with('.') {
        return None;
    }
    let level = source_literal.chars().take_while(|c| *c == '.').count();
    let remainder = &source_literal[level..];

    let mut package: Vec<&str> = match importer_path.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    // One dot means the current package; each extra dot climbs a level.
    for _ in 1..level {
        package.pop()?;
    }
    let mut parts: Vec<&str> = package;
    if !remainder.is_empty() {
        parts.extend(remainder.split('.'));
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("."))
}

/// Lookup table from module key to file path.
pub fn build_module_index<'a>(paths: impl Iterator<Item = &'a str>) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for path in paths {
        if let Some(key) = path_to_module(path) {
            index.entry(key).or_insert_with(|| path.to_string());
        }
    }
    index
}

/// All source_literal values that could reference this file: the inverse
/// of import resolution, used when dependents must be found.
pub fn file_to_import_candidates(
    file_path: &str,
    family: Option<LanguageFamily>,
    declared_module: Option<&str>,
) -> Vec<String> {
    let mut candidates = Vec::new();

    if matches!(family, Some(LanguageFamily::Python) | Some(LanguageFamily::Lua) | None) {
        if let Some(module) = path_to_module(file_path) {
            if let Some(stripped) = module.strip_prefix("src.") {
                candidates.push(stripped.to_string());
            }
            candidates.push(module);
        }
    }

    if let Some(declared) = declared_module {
        if !candidates.iter().any(|c| c == declared) {
            candidates.push(declared.to_string());
        }
    }

    candidates
}
