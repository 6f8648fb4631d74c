//! Structural fact extraction from parsed trees.
//!
//! One pass per fact family over the compiled grammar queries, plus
//! targeted node walks where query captures alone cannot express the
//! shape (import clauses, type members, member-access chains).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use sha2::{Digest, Sha256};
use streaming_iterator::StreamingIterator;
use tree_sitter::{Node, Query, QueryCursor};

use crate::domain::{
    compute_def_uid, compute_import_uid, BindTargetKind, FactCertainty, MemberKind, RefRole,
    RefTier, ScopeKind, Span, IMPORT_KIND_MODULE, IMPORT_KIND_SYMBOL,
};

use super::{CompiledGrammar, GrammarKind, ParsedSource};

/// A definition before it is attached to a file row.
#[derive(Debug, Clone)]
pub struct RawDef {
    pub def_uid: String,
    pub kind: String,
    pub name: String,
    pub lexical_path: String,
    pub span: Span,
    pub docstring: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RawScope {
    pub ordinal: i64,
    pub kind: ScopeKind,
    pub span: Span,
    pub parent_ordinal: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RawBind {
    pub name: String,
    pub target_kind: BindTargetKind,
    pub target_uid: String,
}

#[derive(Debug, Clone)]
pub struct RawImport {
    pub import_uid: String,
    pub imported_name: String,
    pub alias: Option<String>,
    pub source_literal: String,
    pub import_kind: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct RawRef {
    pub token_text: String,
    pub span: Span,
    pub role: RefRole,
    pub ref_tier: RefTier,
    pub certainty: FactCertainty,
    pub target_def_uid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RawAnnotation {
    pub scope_ordinal: Option<i64>,
    pub target_name: String,
    pub base_type: String,
}

#[derive(Debug, Clone)]
pub struct RawMember {
    pub parent_type_name: String,
    pub member_name: String,
    pub member_kind: MemberKind,
    pub member_def_uid: String,
    pub base_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RawAccess {
    pub scope_ordinal: Option<i64>,
    pub receiver_name: String,
    pub receiver_declared_type: Option<String>,
    pub member_chain: String,
    pub span: Span,
}

/// Everything extracted from one file.
#[derive(Debug, Default)]
pub struct FileFacts {
    pub defs: Vec<RawDef>,
    pub scopes: Vec<RawScope>,
    pub binds: Vec<RawBind>,
    pub imports: Vec<RawImport>,
    pub refs: Vec<RawRef>,
    pub annotations: Vec<RawAnnotation>,
    pub members: Vec<RawMember>,
    pub accesses: Vec<RawAccess>,
    /// Definition names fed to the lexical `symbols` field.
    pub symbols: Vec<String>,
    /// Rendered semantic-evidence text appended to `symbols`.
    pub scaffold: String,
    /// SHA-256 of the canonical top-level signature rendering.
    pub interface_hash: String,
}

const SEM_CAP_PER_CATEGORY: usize = 10;

fn span_of(node: Node) -> Span {
    let start = node.start_position();
    let end = node.end_position();
    Span::new(
        start.row as u32 + 1,
        start.column as u32,
        end.row as u32 + 1,
        end.column as u32,
    )
}

fn text_of<'a>(node: Node, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

/// Reduce a type expression to its base name: strip references,
/// generics and subscripts (`Option<&str>` -> `Option`, `List[int]` -> `List`).
fn base_type_text(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_start_matches('&')
        .trim_start_matches("mut ")
        .trim();
    let cut = trimmed
        .find(|c| c == '<' || c == '[' || c == '(')
        .unwrap_or(trimmed.len());
    trimmed[..cut].trim().trim_end_matches("::").to_string()
}

fn unquote(raw: &str) -> &str {
    let t = raw.trim();
    if t.len() >= 2 {
        let bytes = t.as_bytes();
        if (bytes[0] == b'"' && bytes[t.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[t.len() - 1] == b'\'')
        {
            return &t[1..t.len() - 1];
        }
    }
    t
}

struct DefSite<'t> {
    node: Node<'t>,
    kind: String,
    name: String,
    name_span: Span,
}

/// Extract the full fact set for one parsed file.
pub fn extract_facts(
    grammar: GrammarKind,
    compiled: &CompiledGrammar,
    rel_path: &str,
    parsed: &ParsedSource,
) -> FileFacts {
    let root = parsed.tree.root_node();
    let src = parsed.source.as_slice();
    let mut facts = FileFacts::default();

    // -- definitions ------------------------------------------------------
    let def_sites = collect_defs(compiled.defs.as_ref(), root, src);
    let lexical_paths = compute_lexical_paths(&def_sites);

    let mut name_spans: BTreeSet<(u32, u32)> = BTreeSet::new();
    for (i, site) in def_sites.iter().enumerate() {
        let lexical_path = &lexical_paths[i];
        let docstring = if grammar == GrammarKind::Python {
            python_docstring(site.node, src)
        } else {
            None
        };
        let def_uid = compute_def_uid(rel_path, &site.kind, &site.name, lexical_path);
        name_spans.insert((site.name_span.start_line, site.name_span.start_col));
        facts.defs.push(RawDef {
            def_uid,
            kind: site.kind.clone(),
            name: site.name.clone(),
            lexical_path: lexical_path.clone(),
            span: span_of(site.node),
            docstring,
        });
        if !facts.symbols.contains(&site.name) {
            facts.symbols.push(site.name.clone());
        }
    }

    // -- scopes -----------------------------------------------------------
    let scope_sites = collect_scopes(compiled.scopes.as_ref(), root, src);
    facts.scopes = scope_sites.iter().map(|s| s.raw.clone()).collect();

    // -- imports ----------------------------------------------------------
    let (imports, import_binds) = collect_imports(grammar, compiled.imports.as_ref(), root, src, rel_path);
    facts.imports = imports;

    // -- local binds ------------------------------------------------------
    for (i, site) in def_sites.iter().enumerate() {
        // Only names visible at file scope bind module-level references.
        if lexical_paths[i] == site.name {
            facts.binds.push(RawBind {
                name: site.name.clone(),
                target_kind: BindTargetKind::Def,
                target_uid: facts.defs[i].def_uid.clone(),
            });
        }
    }
    facts.binds.extend(import_binds);

    // -- references -------------------------------------------------------
    let bind_lookup: HashMap<&str, (&BindTargetKind, &str)> = facts
        .binds
        .iter()
        .map(|b| (b.name.as_str(), (&b.target_kind, b.target_uid.as_str())))
        .collect();
    facts.refs = collect_refs(compiled.refs.as_ref(), root, src, &bind_lookup, &name_spans);

    // -- type annotations -------------------------------------------------
    facts.annotations =
        collect_annotations(grammar, compiled.annotations.as_ref(), root, src, &scope_sites);

    // -- type members -----------------------------------------------------
    facts.members = match grammar {
        GrammarKind::Python => python_members(&def_sites, &lexical_paths, rel_path, src),
        GrammarKind::Rust => rust_members(root, rel_path, src),
        _ => Vec::new(),
    };

    // -- member accesses --------------------------------------------------
    facts.accesses = collect_accesses(
        grammar,
        compiled.accesses.as_ref(),
        root,
        src,
        &scope_sites,
        &facts.annotations,
    );

    // -- semantic evidence scaffold ---------------------------------------
    facts.scaffold = collect_scaffold(compiled.sem.as_ref(), root, src);

    // -- interface hash ---------------------------------------------------
    facts.interface_hash = interface_hash(&facts.defs, src);

    facts
}

fn collect_defs<'t>(query: Option<&Query>, root: Node<'t>, src: &[u8]) -> Vec<DefSite<'t>> {
    let Some(query) = query else {
        return Vec::new();
    };
    let names = query.capture_names();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, root, src);
    let mut sites: Vec<DefSite> = Vec::new();
    let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();

    while let Some(m) = matches.next() {
        let mut def_node: Option<(Node, String)> = None;
        let mut name_node: Option<Node> = None;
        for cap in m.captures {
            let cap_name = names[cap.index as usize];
            if let Some(kind) = cap_name.strip_prefix("def.") {
                def_node = Some((cap.node, kind.to_string()));
            } else if cap_name == "name" {
                name_node = Some(cap.node);
            }
        }
        let (Some((node, kind)), Some(name_node)) = (def_node, name_node) else {
            continue;
        };
        if !seen.insert((node.start_byte(), node.end_byte())) {
            continue;
        }
        sites.push(DefSite {
            node,
            kind,
            name: text_of(name_node, src).to_string(),
            name_span: span_of(name_node),
        });
    }

    sites.sort_by_key(|s| (s.node.start_byte(), std::cmp::Reverse(s.node.end_byte())));
    sites
}

/// Dotted path of enclosing definition names, ending with the def's own
/// name. Containment is by byte range.
fn compute_lexical_paths(sites: &[DefSite]) -> Vec<String> {
    let ranges: Vec<(usize, usize, &str)> = sites
        .iter()
        .map(|s| (s.node.start_byte(), s.node.end_byte(), s.name.as_str()))
        .collect();

    sites
        .iter()
        .enumerate()
        .map(|(i, site)| {
            let (start, end) = (ranges[i].0, ranges[i].1);
            let mut parts: Vec<&str> = ranges
                .iter()
                .enumerate()
                .filter(|(j, (ps, pe, _))| *j != i && *ps <= start && end <= *pe)
                .map(|(_, (_, _, name))| *name)
                .collect();
            parts.push(&site.name);
            parts.join(".")
        })
        .collect()
}

fn python_docstring(def_node: Node, src: &[u8]) -> Option<String> {
    let body = def_node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    let raw = text_of(expr, src);
    let cleaned = raw
        .trim_start_matches(|c| c == 'r' || c == 'b' || c == 'f' || c == 'u')
        .trim_matches('"')
        .trim_matches('\'')
        .trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

struct ScopeSite {
    raw: RawScope,
    start_byte: usize,
    end_byte: usize,
}

fn collect_scopes(query: Option<&Query>, root: Node, src: &[u8]) -> Vec<ScopeSite> {
    let mut nodes: Vec<(Node, ScopeKind)> = Vec::new();
    if let Some(query) = query {
        let names = query.capture_names();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, root, src);
        let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();
        while let Some(m) = matches.next() {
            for cap in m.captures {
                let cap_name = names[cap.index as usize];
                let Some(kind) = cap_name.strip_prefix("scope.") else {
                    continue;
                };
                if seen.insert((cap.node.start_byte(), cap.node.end_byte())) {
                    nodes.push((cap.node, ScopeKind::parse(kind)));
                }
            }
        }
    }

    // File scope is always present as ordinal 0, parents assigned by
    // smallest strict containment.
    nodes.sort_by_key(|(n, _)| (n.start_byte(), std::cmp::Reverse(n.end_byte())));

    let mut sites: Vec<ScopeSite> = vec![ScopeSite {
        raw: RawScope {
            ordinal: 0,
            kind: ScopeKind::File,
            span: span_of(root),
            parent_ordinal: None,
        },
        start_byte: root.start_byte(),
        end_byte: root.end_byte(),
    }];

    for (i, (node, kind)) in nodes.iter().enumerate() {
        let (start, end) = (node.start_byte(), node.end_byte());
        let parent = sites
            .iter()
            .filter(|s| s.start_byte <= start && end <= s.end_byte)
            .max_by_key(|s| s.start_byte)
            .map(|s| s.raw.ordinal);
        sites.push(ScopeSite {
            raw: RawScope {
                ordinal: i as i64 + 1,
                kind: *kind,
                span: span_of(*node),
                parent_ordinal: parent,
            },
            start_byte: start,
            end_byte: end,
        });
    }

    sites
}

fn enclosing_scope_ordinal(sites: &[ScopeSite], byte: usize) -> Option<i64> {
    sites
        .iter()
        .filter(|s| s.start_byte <= byte && byte < s.end_byte && s.raw.ordinal != 0)
        .max_by_key(|s| s.start_byte)
        .map(|s| s.raw.ordinal)
}

fn collect_refs(
    query: Option<&Query>,
    root: Node,
    src: &[u8],
    binds: &HashMap<&str, (&BindTargetKind, &str)>,
    def_name_spans: &BTreeSet<(u32, u32)>,
) -> Vec<RawRef> {
    let Some(query) = query else {
        return Vec::new();
    };
    let names = query.capture_names();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, root, src);
    let mut refs: Vec<RawRef> = Vec::new();
    let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();

    while let Some(m) = matches.next() {
        for cap in m.captures {
            let cap_name = names[cap.index as usize];
            let Some(role) = cap_name.strip_prefix("ref.") else {
                continue;
            };
            let node = cap.node;
            if !seen.insert((node.start_byte(), node.end_byte())) {
                continue;
            }
            let span = span_of(node);
            // Definition name sites are definitions, not references.
            if def_name_spans.contains(&(span.start_line, span.start_col)) {
                continue;
            }
            let token = text_of(node, src);
            if token.is_empty() {
                continue;
            }

            let (tier, certainty, target) = match binds.get(token) {
                Some((BindTargetKind::Def, uid)) => {
                    (RefTier::Proven, FactCertainty::Certain, Some(uid.to_string()))
                }
                Some((BindTargetKind::Import, _)) => {
                    (RefTier::Strong, FactCertainty::Uncertain, None)
                }
                _ => (RefTier::Lexical, FactCertainty::Uncertain, None),
            };

            refs.push(RawRef {
                token_text: token.to_string(),
                span,
                role: RefRole::parse(role),
                ref_tier: tier,
                certainty,
                target_def_uid: target,
            });
        }
    }

    refs
}

fn collect_imports(
    grammar: GrammarKind,
    query: Option<&Query>,
    root: Node,
    src: &[u8],
    rel_path: &str,
) -> (Vec<RawImport>, Vec<RawBind>) {
    let Some(query) = query else {
        return (Vec::new(), Vec::new());
    };
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, root, src);
    let mut statements: Vec<Node> = Vec::new();
    while let Some(m) = matches.next() {
        for cap in m.captures {
            statements.push(cap.node);
        }
    }

    let mut imports = Vec::new();
    let mut binds = Vec::new();
    for stmt in statements {
        match grammar {
            GrammarKind::Python => python_import(stmt, src, rel_path, &mut imports, &mut binds),
            GrammarKind::Rust => rust_import(stmt, src, rel_path, &mut imports, &mut binds),
            GrammarKind::Javascript | GrammarKind::Typescript | GrammarKind::Tsx => {
                js_import(stmt, src, rel_path, &mut imports, &mut binds)
            }
            GrammarKind::Go => go_import(stmt, src, rel_path, &mut imports, &mut binds),
            _ => {}
        }
    }
    (imports, binds)
}

fn push_import(
    rel_path: &str,
    source_literal: &str,
    imported_name: &str,
    alias: Option<String>,
    kind: &str,
    span: Span,
    imports: &mut Vec<RawImport>,
    binds: &mut Vec<RawBind>,
    bind_name: &str,
) {
    if source_literal.is_empty() || imported_name.is_empty() {
        return;
    }
    let import_uid = compute_import_uid(rel_path, source_literal, imported_name, span.start_line);
    binds.push(RawBind {
        name: bind_name.to_string(),
        target_kind: BindTargetKind::Import,
        target_uid: import_uid.clone(),
    });
    imports.push(RawImport {
        import_uid,
        imported_name: imported_name.to_string(),
        alias,
        source_literal: source_literal.to_string(),
        import_kind: kind.to_string(),
        span,
    });
}

fn python_import(
    stmt: Node,
    src: &[u8],
    rel_path: &str,
    imports: &mut Vec<RawImport>,
    binds: &mut Vec<RawBind>,
) {
    let span = span_of(stmt);
    match stmt.kind() {
        "import_statement" => {
            let mut walker = stmt.walk();
            for child in stmt.named_children(&mut walker) {
                match child.kind() {
                    "dotted_name" => {
                        let source = text_of(child, src);
                        let first = source.split('.').next().unwrap_or(source);
                        let last = source.rsplit('.').next().unwrap_or(source);
                        push_import(
                            rel_path, source, last, None, IMPORT_KIND_MODULE, span, imports,
                            binds, first,
                        );
                    }
                    "aliased_import" => {
                        let name = child.child_by_field_name("name");
                        let alias = child.child_by_field_name("alias");
                        if let (Some(name), Some(alias)) = (name, alias) {
                            let source = text_of(name, src);
                            let last = source.rsplit('.').next().unwrap_or(source);
                            let alias_text = text_of(alias, src).to_string();
                            push_import(
                                rel_path,
                                source,
                                last,
                                Some(alias_text.clone()),
                                IMPORT_KIND_MODULE,
                                span,
                                imports,
                                binds,
                                &alias_text,
                            );
                        }
                    }
                    _ => {}
                }
            }
        }
        "import_from_statement" => {
            let Some(module) = stmt.child_by_field_name("module_name") else {
                return;
            };
            let source = text_of(module, src).to_string();
            let mut walker = stmt.walk();
            for child in stmt.named_children(&mut walker) {
                if child.id() == module.id() {
                    continue;
                }
                match child.kind() {
                    "dotted_name" => {
                        let name = text_of(child, src);
                        push_import(
                            rel_path, &source, name, None, IMPORT_KIND_SYMBOL, span, imports,
                            binds, name,
                        );
                    }
                    "aliased_import" => {
                        let name = child.child_by_field_name("name").map(|n| text_of(n, src));
                        let alias = child.child_by_field_name("alias").map(|n| text_of(n, src));
                        if let (Some(name), Some(alias)) = (name, alias) {
                            push_import(
                                rel_path,
                                &source,
                                name,
                                Some(alias.to_string()),
                                IMPORT_KIND_SYMBOL,
                                span,
                                imports,
                                binds,
                                alias,
                            );
                        }
                    }
                    "wildcard_import" => {
                        push_import(
                            rel_path, &source, "*", None, IMPORT_KIND_SYMBOL, span, imports,
                            binds, "*",
                        );
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn rust_import(
    stmt: Node,
    src: &[u8],
    rel_path: &str,
    imports: &mut Vec<RawImport>,
    binds: &mut Vec<RawBind>,
) {
    let Some(argument) = stmt.child_by_field_name("argument") else {
        return;
    };
    let span = span_of(stmt);
    rust_use_tree(argument, src, rel_path, "", span, imports, binds);
}

fn rust_use_tree(
    node: Node,
    src: &[u8],
    rel_path: &str,
    prefix: &str,
    span: Span,
    imports: &mut Vec<RawImport>,
    binds: &mut Vec<RawBind>,
) {
    match node.kind() {
        "identifier" | "crate" | "self" | "super" | "scoped_identifier" => {
            let tail = text_of(node, src);
            let full = if prefix.is_empty() {
                tail.to_string()
            } else {
                format!("{prefix}{tail}")
            };
            let last = full.rsplit("::").next().unwrap_or(&full).to_string();
            push_import(
                rel_path,
                &full,
                &last,
                None,
                IMPORT_KIND_SYMBOL,
                span,
                imports,
                binds,
                &last,
            );
        }
        "use_as_clause" => {
            let path = node.child_by_field_name("path").map(|n| text_of(n, src));
            let alias = node.child_by_field_name("alias").map(|n| text_of(n, src));
            if let (Some(path), Some(alias)) = (path, alias) {
                let full = if prefix.is_empty() {
                    path.to_string()
                } else {
                    format!("{prefix}{path}")
                };
                let last = full.rsplit("::").next().unwrap_or(&full).to_string();
                push_import(
                    rel_path,
                    &full,
                    &last,
                    Some(alias.to_string()),
                    IMPORT_KIND_SYMBOL,
                    span,
                    imports,
                    binds,
                    alias,
                );
            }
        }
        "scoped_use_list" => {
            let path = node
                .child_by_field_name("path")
                .map(|n| text_of(n, src))
                .unwrap_or("");
            let inner_prefix = format!("{prefix}{path}::");
            if let Some(list) = node.child_by_field_name("list") {
                let mut walker = list.walk();
                for child in list.named_children(&mut walker) {
                    rust_use_tree(child, src, rel_path, &inner_prefix, span, imports, binds);
                }
            }
        }
        "use_list" => {
            let mut walker = node.walk();
            for child in node.named_children(&mut walker) {
                rust_use_tree(child, src, rel_path, prefix, span, imports, binds);
            }
        }
        // Wildcards carry no importable name.
        "use_wildcard" => {}
        _ => {}
    }
}

fn js_import(
    stmt: Node,
    src: &[u8],
    rel_path: &str,
    imports: &mut Vec<RawImport>,
    binds: &mut Vec<RawBind>,
) {
    let Some(source_node) = stmt.child_by_field_name("source") else {
        return;
    };
    let source = unquote(text_of(source_node, src)).to_string();
    let span = span_of(stmt);
    let mut named_any = false;

    let mut walker = stmt.walk();
    for clause in stmt.named_children(&mut walker) {
        if clause.kind() != "import_clause" {
            continue;
        }
        let mut inner = clause.walk();
        for item in clause.named_children(&mut inner) {
            match item.kind() {
                "identifier" => {
                    named_any = true;
                    let name = text_of(item, src);
                    push_import(
                        rel_path, &source, name, None, IMPORT_KIND_SYMBOL, span, imports, binds,
                        name,
                    );
                }
                "named_imports" => {
                    let mut specs = item.walk();
                    for spec in item.named_children(&mut specs) {
                        if spec.kind() != "import_specifier" {
                            continue;
                        }
                        let name = spec.child_by_field_name("name").map(|n| text_of(n, src));
                        let alias = spec.child_by_field_name("alias").map(|n| text_of(n, src));
                        if let Some(name) = name {
                            named_any = true;
                            let bind = alias.unwrap_or(name);
                            push_import(
                                rel_path,
                                &source,
                                name,
                                alias.map(|a| a.to_string()),
                                IMPORT_KIND_SYMBOL,
                                span,
                                imports,
                                binds,
                                bind,
                            );
                        }
                    }
                }
                "namespace_import" => {
                    if let Some(alias) = item.named_child(0) {
                        named_any = true;
                        let alias_text = text_of(alias, src);
                        push_import(
                            rel_path,
                            &source,
                            "*",
                            Some(alias_text.to_string()),
                            IMPORT_KIND_MODULE,
                            span,
                            imports,
                            binds,
                            alias_text,
                        );
                    }
                }
                _ => {}
            }
        }
    }

    if !named_any {
        // Side-effect import: record the module edge without a binding.
        let last = source.rsplit('/').next().unwrap_or(&source).to_string();
        let import_uid = compute_import_uid(rel_path, &source, &last, span.start_line);
        imports.push(RawImport {
            import_uid,
            imported_name: last,
            alias: None,
            source_literal: source,
            import_kind: IMPORT_KIND_MODULE.to_string(),
            span,
        });
    }
}

fn go_import(
    stmt: Node,
    src: &[u8],
    rel_path: &str,
    imports: &mut Vec<RawImport>,
    binds: &mut Vec<RawBind>,
) {
    let mut specs: Vec<Node> = Vec::new();
    let mut walker = stmt.walk();
    for child in stmt.named_children(&mut walker) {
        match child.kind() {
            "import_spec" => specs.push(child),
            "import_spec_list" => {
                let mut inner = child.walk();
                for spec in child.named_children(&mut inner) {
                    if spec.kind() == "import_spec" {
                        specs.push(spec);
                    }
                }
            }
            _ => {}
        }
    }

    for spec in specs {
        let Some(path_node) = spec.child_by_field_name("path") else {
            continue;
        };
        let source = unquote(text_of(path_node, src)).to_string();
        let alias = spec.child_by_field_name("name").map(|n| text_of(n, src).to_string());
        let last = source.rsplit('/').next().unwrap_or(&source).to_string();
        let bind = alias.clone().unwrap_or_else(|| last.clone());
        push_import(
            rel_path,
            &source,
            &last,
            alias,
            IMPORT_KIND_MODULE,
            span_of(spec),
            imports,
            binds,
            &bind,
        );
    }
}

fn collect_annotations(
    grammar: GrammarKind,
    query: Option<&Query>,
    root: Node,
    src: &[u8],
    scopes: &[ScopeSite],
) -> Vec<RawAnnotation> {
    let Some(query) = query else {
        return Vec::new();
    };
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, root, src);
    let mut annotations = Vec::new();
    let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();

    while let Some(m) = matches.next() {
        for cap in m.captures {
            let node = cap.node;
            if !seen.insert((node.start_byte(), node.end_byte())) {
                continue;
            }
            let (target, type_node) = match (grammar, node.kind()) {
                (GrammarKind::Python, "typed_parameter") => {
                    let target = node
                        .named_child(0)
                        .filter(|n| n.kind() == "identifier")
                        .map(|n| text_of(n, src));
                    (target, node.child_by_field_name("type"))
                }
                (GrammarKind::Python, "assignment") => (
                    node.child_by_field_name("left")
                        .filter(|n| n.kind() == "identifier")
                        .map(|n| text_of(n, src)),
                    node.child_by_field_name("type"),
                ),
                (GrammarKind::Rust, "let_declaration") | (GrammarKind::Rust, "parameter") => (
                    node.child_by_field_name("pattern")
                        .filter(|n| n.kind() == "identifier")
                        .map(|n| text_of(n, src)),
                    node.child_by_field_name("type"),
                ),
                _ => (None, None),
            };

            if let (Some(target), Some(type_node)) = (target, type_node) {
                let base_type = base_type_text(text_of(type_node, src));
                if base_type.is_empty() {
                    continue;
                }
                annotations.push(RawAnnotation {
                    scope_ordinal: enclosing_scope_ordinal(scopes, node.start_byte()),
                    target_name: target.to_string(),
                    base_type,
                });
            }
        }
    }

    annotations
}

fn python_members(
    def_sites: &[DefSite],
    lexical_paths: &[String],
    rel_path: &str,
    src: &[u8],
) -> Vec<RawMember> {
    let mut members = Vec::new();

    for (i, site) in def_sites.iter().enumerate() {
        if site.kind != "class" {
            continue;
        }
        let class_name = &site.name;
        let class_path = &lexical_paths[i];
        let Some(body) = site.node.child_by_field_name("body") else {
            continue;
        };

        let mut walker = body.walk();
        for child in body.named_children(&mut walker) {
            match child.kind() {
                "function_definition" => {
                    push_python_method(child, None, class_name, class_path, rel_path, src, &mut members)
                }
                "decorated_definition" => {
                    let decorators: Vec<String> = {
                        let mut inner = child.walk();
                        child
                            .named_children(&mut inner)
                            .filter(|n| n.kind() == "decorator")
                            .map(|n| text_of(n, src).to_string())
                            .collect()
                    };
                    if let Some(def) = child.child_by_field_name("definition") {
                        if def.kind() == "function_definition" {
                            push_python_method(
                                def,
                                Some(&decorators),
                                class_name,
                                class_path,
                                rel_path,
                                src,
                                &mut members,
                            );
                        }
                    }
                }
                "expression_statement" => {
                    // Annotated class attribute: `x: T = ...` or `x: T`.
                    let Some(assign) = child.named_child(0) else {
                        continue;
                    };
                    if assign.kind() != "assignment" {
                        continue;
                    }
                    let target = assign
                        .child_by_field_name("left")
                        .filter(|n| n.kind() == "identifier");
                    let type_node = assign.child_by_field_name("type");
                    if let (Some(target), Some(type_node)) = (target, type_node) {
                        let name = text_of(target, src).to_string();
                        let member_path = format!("{class_path}.{name}");
                        members.push(RawMember {
                            parent_type_name: class_name.clone(),
                            member_name: name.clone(),
                            member_kind: MemberKind::Field,
                            member_def_uid: compute_def_uid(rel_path, "field", &name, &member_path),
                            base_type: Some(base_type_text(text_of(type_node, src))),
                        });
                    }
                }
                _ => {}
            }
        }
    }

    members
}

fn push_python_method(
    def: Node,
    decorators: Option<&[String]>,
    class_name: &str,
    class_path: &str,
    rel_path: &str,
    src: &[u8],
    members: &mut Vec<RawMember>,
) {
    let Some(name_node) = def.child_by_field_name("name") else {
        return;
    };
    let name = text_of(name_node, src).to_string();

    let kind = match decorators {
        Some(decs) if decs.iter().any(|d| d.contains("staticmethod")) => MemberKind::StaticMethod,
        Some(decs) if decs.iter().any(|d| d.contains("classmethod")) => MemberKind::ClassMethod,
        _ => MemberKind::Method,
    };
    let base_type = def
        .child_by_field_name("return_type")
        .map(|n| base_type_text(text_of(n, src)))
        .filter(|t| !t.is_empty());

    let member_path = format!("{class_path}.{name}");
    members.push(RawMember {
        parent_type_name: class_name.to_string(),
        member_name: name.clone(),
        member_kind: kind,
        member_def_uid: compute_def_uid(rel_path, "function", &name, &member_path),
        base_type,
    });
}

fn rust_members(root: Node, rel_path: &str, src: &[u8]) -> Vec<RawMember> {
    let mut members = Vec::new();
    let mut walker = root.walk();

    for item in root.named_children(&mut walker) {
        match item.kind() {
            "impl_item" => {
                let Some(type_node) = item.child_by_field_name("type") else {
                    continue;
                };
                let parent = base_type_text(text_of(type_node, src));
                let Some(body) = item.child_by_field_name("body") else {
                    continue;
                };
                let mut inner = body.walk();
                for member in body.named_children(&mut inner) {
                    if member.kind() != "function_item" {
                        continue;
                    }
                    let Some(name_node) = member.child_by_field_name("name") else {
                        continue;
                    };
                    let name = text_of(name_node, src).to_string();
                    let base_type = member
                        .child_by_field_name("return_type")
                        .map(|n| base_type_text(text_of(n, src)))
                        .filter(|t| !t.is_empty() && t != "Self");
                    let member_path = format!("{parent}.{name}");
                    members.push(RawMember {
                        parent_type_name: parent.clone(),
                        member_name: name.clone(),
                        member_kind: MemberKind::Method,
                        member_def_uid: compute_def_uid(rel_path, "function", &name, &member_path),
                        base_type,
                    });
                }
            }
            "struct_item" => {
                let Some(name_node) = item.child_by_field_name("name") else {
                    continue;
                };
                let parent = text_of(name_node, src).to_string();
                let Some(body) = item.child_by_field_name("body") else {
                    continue;
                };
                if body.kind() != "field_declaration_list" {
                    continue;
                }
                let mut inner = body.walk();
                for field in body.named_children(&mut inner) {
                    if field.kind() != "field_declaration" {
                        continue;
                    }
                    let name = field.child_by_field_name("name").map(|n| text_of(n, src));
                    let field_type = field.child_by_field_name("type").map(|n| text_of(n, src));
                    if let (Some(name), Some(field_type)) = (name, field_type) {
                        let member_path = format!("{parent}.{name}");
                        members.push(RawMember {
                            parent_type_name: parent.clone(),
                            member_name: name.to_string(),
                            member_kind: MemberKind::Field,
                            member_def_uid: compute_def_uid(rel_path, "field", name, &member_path),
                            base_type: Some(base_type_text(field_type)),
                        });
                    }
                }
            }
            _ => {}
        }
    }

    members
}

fn collect_accesses(
    grammar: GrammarKind,
    query: Option<&Query>,
    root: Node,
    src: &[u8],
    scopes: &[ScopeSite],
    annotations: &[RawAnnotation],
) -> Vec<RawAccess> {
    let Some(query) = query else {
        return Vec::new();
    };

    let (chain_kind, object_field, member_field) = match grammar {
        GrammarKind::Python => ("attribute", "object", "attribute"),
        GrammarKind::Rust => ("field_expression", "value", "field"),
        GrammarKind::Javascript | GrammarKind::Typescript | GrammarKind::Tsx => {
            ("member_expression", "object", "property")
        }
        _ => return Vec::new(),
    };

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, root, src);
    let mut accesses = Vec::new();
    let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();

    while let Some(m) = matches.next() {
        for cap in m.captures {
            let node = cap.node;
            // Only topmost chains: a nested access is part of its parent.
            if node.parent().map(|p| p.kind() == chain_kind).unwrap_or(false) {
                continue;
            }
            if !seen.insert((node.start_byte(), node.end_byte())) {
                continue;
            }

            let mut chain: Vec<String> = Vec::new();
            let mut current = node;
            loop {
                let Some(member) = current.child_by_field_name(member_field) else {
                    break;
                };
                chain.push(text_of(member, src).to_string());
                let Some(object) = current.child_by_field_name(object_field) else {
                    break;
                };
                if object.kind() == chain_kind {
                    current = object;
                    continue;
                }
                if object.kind() == "identifier" {
                    chain.reverse();
                    let receiver = text_of(object, src).to_string();
                    let scope_ordinal = enclosing_scope_ordinal(scopes, node.start_byte());
                    let declared = annotations
                        .iter()
                        .find(|a| {
                            a.target_name == receiver
                                && (a.scope_ordinal == scope_ordinal || a.scope_ordinal.is_none())
                        })
                        .map(|a| a.base_type.clone());
                    accesses.push(RawAccess {
                        scope_ordinal,
                        receiver_name: receiver,
                        receiver_declared_type: declared,
                        member_chain: chain.join("."),
                        span: span_of(node),
                    });
                }
                break;
            }
        }
    }

    accesses
}

fn collect_scaffold(query: Option<&Query>, root: Node, src: &[u8]) -> String {
    let Some(query) = query else {
        return String::new();
    };
    const CATEGORIES: &[(&str, &str)] = &[
        ("sem_call", "calls"),
        ("sem_field", "assigns"),
        ("sem_return", "returns"),
        ("sem_raise", "raises"),
        ("sem_key", "literals"),
    ];

    let names = query.capture_names();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, root, src);
    let mut buckets: BTreeMap<&str, Vec<String>> = BTreeMap::new();

    while let Some(m) = matches.next() {
        for cap in m.captures {
            let cap_name = names[cap.index as usize];
            let Some((_, category)) = CATEGORIES.iter().find(|(c, _)| *c == cap_name) else {
                continue;
            };
            let token = unquote(text_of(cap.node, src)).to_string();
            if token.is_empty() {
                continue;
            }
            let bucket = buckets.entry(category).or_default();
            if bucket.len() < SEM_CAP_PER_CATEGORY && !bucket.contains(&token) {
                bucket.push(token);
            }
        }
    }

    CATEGORIES
        .iter()
        .filter_map(|(_, category)| {
            buckets
                .get(category)
                .filter(|names| !names.is_empty())
                .map(|names| format!("{category}: {}", names.join(" ")))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Canonical rendering of top-level definition signatures, hashed so
/// dependents can tell whether a change affected the file's interface.
fn interface_hash(defs: &[RawDef], src: &[u8]) -> String {
    let text = String::from_utf8_lossy(src);
    let lines: Vec<&str> = text.lines().collect();

    let mut rendered: Vec<String> = defs
        .iter()
        .filter(|d| d.lexical_path == d.name)
        .map(|d| {
            let sig = lines
                .get(d.span.start_line as usize - 1)
                .map(|l| l.trim())
                .unwrap_or("");
            format!("{} {} {}", d.kind, d.name, sig)
        })
        .collect();
    rendered.sort();

    let mut hasher = Sha256::new();
    for line in &rendered {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::parser::TreeSitterParser;
    use crate::domain::compute_content_hash;

    fn extract(grammar: GrammarKind, rel_path: &str, code: &str) -> FileFacts {
        let parser = TreeSitterParser::new();
        let hash = compute_content_hash(code.as_bytes());
        let parsed = parser.parse(grammar, &hash, code.as_bytes()).unwrap();
        extract_facts(grammar, parser.grammar(grammar), rel_path, &parsed)
    }

    #[test]
    fn test_python_defs_and_span() {
        let facts = extract(
            GrammarKind::Python,
            "src/main.py",
            "def greet(name: str) -> str:\n    return \"Hello \" + name\n",
        );
        assert_eq!(facts.defs.len(), 1);
        let def = &facts.defs[0];
        assert_eq!(def.name, "greet");
        assert_eq!(def.kind, "function");
        assert_eq!(def.span.start_line, 1);
        assert_eq!(def.span.start_col, 0);
        assert_eq!(def.span.end_line, 2);
        assert!(facts.symbols.contains(&"greet".to_string()));
    }

    #[test]
    fn test_python_lexical_path_and_docstring() {
        let code = r#"
class Greeter:
    """Says hello."""

    def greet(self, name):
        return name
"#;
        let facts = extract(GrammarKind::Python, "src/g.py", code);
        let class_def = facts.defs.iter().find(|d| d.kind == "class").unwrap();
        assert_eq!(class_def.name, "Greeter");
        assert_eq!(class_def.docstring.as_deref(), Some("Says hello."));

        let method = facts.defs.iter().find(|d| d.name == "greet").unwrap();
        assert_eq!(method.lexical_path, "Greeter.greet");
    }

    #[test]
    fn test_python_same_file_ref_is_proven() {
        let code = "def foo():\n    return 1\n\ndef bar():\n    return foo()\n";
        let facts = extract(GrammarKind::Python, "src/a.py", code);
        let foo_uid = facts.defs.iter().find(|d| d.name == "foo").unwrap().def_uid.clone();
        let call = facts
            .refs
            .iter()
            .find(|r| r.token_text == "foo" && r.role == RefRole::Call)
            .unwrap();
        assert_eq!(call.ref_tier, RefTier::Proven);
        assert_eq!(call.target_def_uid.as_deref(), Some(foo_uid.as_str()));
    }

    #[test]
    fn test_python_imported_ref_is_strong() {
        let code = "from .a import foo\n\ndef bar():\n    return foo()\n";
        let facts = extract(GrammarKind::Python, "src/b.py", code);

        assert_eq!(facts.imports.len(), 1);
        let imp = &facts.imports[0];
        assert_eq!(imp.source_literal, ".a");
        assert_eq!(imp.imported_name, "foo");

        let call = facts
            .refs
            .iter()
            .find(|r| r.token_text == "foo" && r.role == RefRole::Call)
            .unwrap();
        assert_eq!(call.ref_tier, RefTier::Strong);
        assert!(call.target_def_uid.is_none());
    }

    #[test]
    fn test_python_scopes_have_file_root() {
        let code = "def f():\n    x = [i for i in range(3)]\n    return x\n";
        let facts = extract(GrammarKind::Python, "src/s.py", code);
        assert_eq!(facts.scopes[0].kind, ScopeKind::File);
        assert!(facts.scopes.iter().any(|s| s.kind == ScopeKind::Function));
        assert!(facts
            .scopes
            .iter()
            .any(|s| s.kind == ScopeKind::Comprehension && s.parent_ordinal.is_some()));
    }

    #[test]
    fn test_python_annotations_and_accesses() {
        let code = r#"
class Engine:
    def start(self) -> None:
        pass

def run(engine: Engine):
    engine.start()
"#;
        let facts = extract(GrammarKind::Python, "src/e.py", code);
        let ann = facts
            .annotations
            .iter()
            .find(|a| a.target_name == "engine")
            .unwrap();
        assert_eq!(ann.base_type, "Engine");

        let access = facts
            .accesses
            .iter()
            .find(|a| a.receiver_name == "engine")
            .unwrap();
        assert_eq!(access.member_chain, "start");
        assert_eq!(access.receiver_declared_type.as_deref(), Some("Engine"));

        let member = facts
            .members
            .iter()
            .find(|m| m.parent_type_name == "Engine" && m.member_name == "start")
            .unwrap();
        assert_eq!(member.member_kind, MemberKind::Method);
    }

    #[test]
    fn test_python_static_method_member_kind() {
        let code = r#"
class Tools:
    @staticmethod
    def version():
        return 1
"#;
        let facts = extract(GrammarKind::Python, "src/t.py", code);
        let member = facts.members.iter().find(|m| m.member_name == "version").unwrap();
        assert_eq!(member.member_kind, MemberKind::StaticMethod);
    }

    #[test]
    fn test_rust_defs_and_members() {
        let code = r#"
pub struct Pool {
    size: usize,
}

impl Pool {
    pub fn grow(&mut self, n: usize) -> usize {
        self.size += n;
        self.size
    }
}
"#;
        let facts = extract(GrammarKind::Rust, "src/pool.rs", code);
        assert!(facts.defs.iter().any(|d| d.name == "Pool" && d.kind == "struct"));
        assert!(facts.defs.iter().any(|d| d.name == "grow"));

        let field = facts
            .members
            .iter()
            .find(|m| m.parent_type_name == "Pool" && m.member_name == "size")
            .unwrap();
        assert_eq!(field.member_kind, MemberKind::Field);
        assert_eq!(field.base_type.as_deref(), Some("usize"));

        let method = facts
            .members
            .iter()
            .find(|m| m.parent_type_name == "Pool" && m.member_name == "grow")
            .unwrap();
        assert!(method.member_kind.is_callable());
    }

    #[test]
    fn test_rust_use_imports() {
        let code = "use std::collections::{HashMap, HashSet};\nuse crate::db::Database as Db;\n";
        let facts = extract(GrammarKind::Rust, "src/lib.rs", code);
        let sources: Vec<&str> = facts.imports.iter().map(|i| i.source_literal.as_str()).collect();
        assert!(sources.contains(&"std::collections::HashMap"));
        assert!(sources.contains(&"std::collections::HashSet"));
        let aliased = facts
            .imports
            .iter()
            .find(|i| i.source_literal == "crate::db::Database")
            .unwrap();
        assert_eq!(aliased.alias.as_deref(), Some("Db"));
        assert!(facts.binds.iter().any(|b| b.name == "Db"));
    }

    #[test]
    fn test_js_imports() {
        let code = "import { readFile as rf, writeFile } from 'fs/promises';\nimport './side-effect';\n";
        let facts = extract(GrammarKind::Javascript, "src/io.js", code);
        let read = facts.imports.iter().find(|i| i.imported_name == "readFile").unwrap();
        assert_eq!(read.alias.as_deref(), Some("rf"));
        assert_eq!(read.source_literal, "fs/promises");
        assert!(facts.imports.iter().any(|i| i.source_literal == "./side-effect"));
    }

    #[test]
    fn test_go_imports() {
        let code = "package main\n\nimport (\n\t\"fmt\"\n\tlog \"github.com/acme/logger\"\n)\n";
        let facts = extract(GrammarKind::Go, "main.go", code);
        assert!(facts.imports.iter().any(|i| i.source_literal == "fmt"));
        let aliased = facts
            .imports
            .iter()
            .find(|i| i.source_literal == "github.com/acme/logger")
            .unwrap();
        assert_eq!(aliased.alias.as_deref(), Some("log"));
    }

    #[test]
    fn test_scaffold_and_interface_hash() {
        let code = "def a():\n    return helper()\n\ndef helper():\n    return 1\n";
        let facts = extract(GrammarKind::Python, "src/x.py", code);
        assert!(facts.scaffold.contains("calls: helper"));
        assert_eq!(facts.interface_hash.len(), 64);

        // Body-only change keeps the interface hash stable.
        let body_changed = "def a():\n    return helper() + 0\n\ndef helper():\n    return 2\n";
        let facts2 = extract(GrammarKind::Python, "src/x.py", body_changed);
        assert_eq!(facts.interface_hash, facts2.interface_hash);

        // Signature change moves it.
        let sig_changed = "def a(flag):\n    return helper()\n\ndef helper():\n    return 1\n";
        let facts3 = extract(GrammarKind::Python, "src/x.py", sig_changed);
        assert_ne!(facts.interface_hash, facts3.interface_hash);
    }
}
