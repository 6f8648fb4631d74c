//! Tree-sitter parse layer: grammar handles, compiled per-grammar fact
//! queries, and a content-hash keyed parse cache shared across workers.

mod extract;
mod queries;

pub use extract::*;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::warn;
use tree_sitter::{Language, Parser, Query, Tree};

use crate::domain::LanguageFamily;

/// Concrete grammar selected for a file. A language family can span more
/// than one grammar (javascript covers the TS/TSX grammars too).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrammarKind {
    Python,
    Rust,
    Javascript,
    Typescript,
    Tsx,
    Go,
    Php,
    Cpp,
    Swift,
    Kotlin,
    Hcl,
}

impl GrammarKind {
    fn language(&self) -> Language {
        match self {
            GrammarKind::Python => tree_sitter_python::LANGUAGE.into(),
            GrammarKind::Rust => tree_sitter_rust::LANGUAGE.into(),
            GrammarKind::Javascript => tree_sitter_javascript::LANGUAGE.into(),
            GrammarKind::Typescript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            GrammarKind::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            GrammarKind::Go => tree_sitter_go::LANGUAGE.into(),
            GrammarKind::Php => tree_sitter_php::LANGUAGE_PHP.into(),
            GrammarKind::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            GrammarKind::Swift => tree_sitter_swift::LANGUAGE.into(),
            GrammarKind::Kotlin => tree_sitter_kotlin_ng::LANGUAGE.into(),
            GrammarKind::Hcl => tree_sitter_hcl::LANGUAGE.into(),
        }
    }
}

/// Resolve the grammar for a file, honoring extension splits inside a
/// family. Returns None for lexical-only families.
pub fn grammar_for(family: LanguageFamily, path: &Path) -> Option<GrammarKind> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match family {
        LanguageFamily::Python => Some(GrammarKind::Python),
        LanguageFamily::Rust => Some(GrammarKind::Rust),
        LanguageFamily::Javascript => Some(match ext.as_str() {
            "tsx" => GrammarKind::Tsx,
            "ts" | "mts" | "cts" => GrammarKind::Typescript,
            _ => GrammarKind::Javascript,
        }),
        LanguageFamily::Go => Some(GrammarKind::Go),
        LanguageFamily::Php => Some(GrammarKind::Php),
        LanguageFamily::Cpp => Some(GrammarKind::Cpp),
        LanguageFamily::Swift => Some(GrammarKind::Swift),
        LanguageFamily::Jvm => match ext.as_str() {
            "kt" | "kts" => Some(GrammarKind::Kotlin),
            _ => None,
        },
        LanguageFamily::Terraform => Some(GrammarKind::Hcl),
        _ => None,
    }
}

/// Compiled query set for one grammar. Any query that fails to compile
/// against the linked grammar version is dropped with a warning; the
/// affected fact kind degrades gracefully.
pub struct CompiledGrammar {
    pub language: Language,
    pub defs: Option<Query>,
    pub scopes: Option<Query>,
    pub refs: Option<Query>,
    pub imports: Option<Query>,
    pub annotations: Option<Query>,
    pub accesses: Option<Query>,
    pub sem: Option<Query>,
}

fn compile(language: &Language, grammar: GrammarKind, what: &str, source: &str) -> Option<Query> {
    if source.is_empty() {
        return None;
    }
    match Query::new(language, source) {
        Ok(q) => Some(q),
        Err(e) => {
            warn!(?grammar, what, error = %e, "query failed to compile; degrading");
            None
        }
    }
}

impl CompiledGrammar {
    fn build(grammar: GrammarKind) -> Self {
        use queries::*;

        let language = grammar.language();
        let (defs, scopes, refs, imports, annotations, accesses, sem) = match grammar {
            GrammarKind::Python => (
                PYTHON_DEFS,
                PYTHON_SCOPES,
                PYTHON_REFS,
                PYTHON_IMPORTS,
                PYTHON_ANNOTATIONS,
                PYTHON_ACCESSES,
                PYTHON_SEM,
            ),
            GrammarKind::Rust => (
                RUST_DEFS,
                RUST_SCOPES,
                RUST_REFS,
                RUST_IMPORTS,
                RUST_ANNOTATIONS,
                RUST_ACCESSES,
                RUST_SEM,
            ),
            GrammarKind::Javascript => (
                JAVASCRIPT_DEFS,
                JAVASCRIPT_SCOPES,
                JAVASCRIPT_REFS,
                JAVASCRIPT_IMPORTS,
                "",
                JAVASCRIPT_ACCESSES,
                JAVASCRIPT_SEM,
            ),
            GrammarKind::Typescript | GrammarKind::Tsx => (
                TYPESCRIPT_DEFS,
                TYPESCRIPT_SCOPES,
                JAVASCRIPT_REFS,
                JAVASCRIPT_IMPORTS,
                "",
                JAVASCRIPT_ACCESSES,
                JAVASCRIPT_SEM,
            ),
            GrammarKind::Go => (GO_DEFS, GO_SCOPES, GO_REFS, GO_IMPORTS, "", "", GO_SEM),
            GrammarKind::Php => (PHP_DEFS, PHP_SCOPES, "", "", "", "", ""),
            GrammarKind::Cpp => (CPP_DEFS, CPP_SCOPES, "", "", "", "", ""),
            GrammarKind::Swift => (SWIFT_DEFS, SWIFT_SCOPES, "", "", "", "", ""),
            GrammarKind::Kotlin => (KOTLIN_DEFS, KOTLIN_SCOPES, "", "", "", "", ""),
            GrammarKind::Hcl => (HCL_DEFS, HCL_SCOPES, "", "", "", "", ""),
        };

        Self {
            defs: compile(&language, grammar, "defs", defs),
            scopes: compile(&language, grammar, "scopes", scopes),
            refs: compile(&language, grammar, "refs", refs),
            imports: compile(&language, grammar, "imports", imports),
            annotations: compile(&language, grammar, "annotations", annotations),
            accesses: compile(&language, grammar, "accesses", accesses),
            sem: compile(&language, grammar, "sem", sem),
            language,
        }
    }
}

/// A parsed file: syntax tree plus the exact bytes it was parsed from.
pub struct ParsedSource {
    pub tree: Tree,
    pub source: Vec<u8>,
}

const PARSE_CACHE_CAP: usize = 512;

/// Grammar registry plus a parse cache keyed by content hash. Entries are
/// read-only after insertion and shared across extraction workers.
pub struct TreeSitterParser {
    grammars: HashMap<GrammarKind, CompiledGrammar>,
    cache: Mutex<HashMap<String, Arc<ParsedSource>>>,
}

impl TreeSitterParser {
    pub fn new() -> Self {
        let kinds = [
            GrammarKind::Python,
            GrammarKind::Rust,
            GrammarKind::Javascript,
            GrammarKind::Typescript,
            GrammarKind::Tsx,
            GrammarKind::Go,
            GrammarKind::Php,
            GrammarKind::Cpp,
            GrammarKind::Swift,
            GrammarKind::Kotlin,
            GrammarKind::Hcl,
        ];
        let grammars = kinds
            .into_iter()
            .map(|k| (k, CompiledGrammar::build(k)))
            .collect();
        Self {
            grammars,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn grammar(&self, kind: GrammarKind) -> &CompiledGrammar {
        &self.grammars[&kind]
    }

    /// Parse bytes with the given grammar, consulting the cache first.
    /// Returns None when tree-sitter cannot produce a tree at all.
    pub fn parse(
        &self,
        kind: GrammarKind,
        content_hash: &str,
        bytes: &[u8],
    ) -> Option<Arc<ParsedSource>> {
        if let Some(hit) = self.cache.lock().ok()?.get(content_hash) {
            return Some(hit.clone());
        }

        let mut parser = Parser::new();
        parser.set_language(&self.grammars[&kind].language).ok()?;
        let tree = parser.parse(bytes, None)?;

        let parsed = Arc::new(ParsedSource {
            tree,
            source: bytes.to_vec(),
        });

        if let Ok(mut cache) = self.cache.lock() {
            if cache.len() >= PARSE_CACHE_CAP {
                cache.clear();
            }
            cache.insert(content_hash.to_string(), parsed.clone());
        }
        Some(parsed)
    }

    /// Probe validation: does this look like a parseable file of the
    /// grammar's language? Strict for code grammars, tolerant for none.
    pub fn validates(&self, kind: GrammarKind, bytes: &[u8]) -> bool {
        let mut parser = Parser::new();
        if parser.set_language(&self.grammars[&kind].language).is_err() {
            return false;
        }
        match parser.parse(bytes, None) {
            Some(tree) => !tree.root_node().has_error(),
            None => false,
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for TreeSitterParser {
    fn default() -> Self {
        Self::new()
    }
}
