use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Source span. Lines are 1-indexed, columns 0-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// Confidence tier of a reference's resolution. Ordered: later passes
/// may only upgrade, never demote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefTier {
    Unknown,
    Lexical,
    Strong,
    Proven,
}

impl RefTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefTier::Unknown => "unknown",
            RefTier::Lexical => "lexical",
            RefTier::Strong => "strong",
            RefTier::Proven => "proven",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "lexical" => RefTier::Lexical,
            "strong" => RefTier::Strong,
            "proven" => RefTier::Proven,
            _ => RefTier::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactCertainty {
    Uncertain,
    Certain,
}

impl FactCertainty {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactCertainty::Uncertain => "uncertain",
            FactCertainty::Certain => "certain",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "certain" => FactCertainty::Certain,
            _ => FactCertainty::Uncertain,
        }
    }
}

/// Role a reference occurrence plays at its site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefRole {
    Call,
    Read,
    Type,
}

impl RefRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefRole::Call => "call",
            RefRole::Read => "read",
            RefRole::Type => "type",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "call" => RefRole::Call,
            "type" => RefRole::Type,
            _ => RefRole::Read,
        }
    }
}

/// One visible definition in a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefFact {
    pub def_uid: String,
    pub file_id: i64,
    /// Owning context id; definitions inherit their file's unit.
    pub unit_id: i64,
    pub kind: String,
    pub name: String,
    /// Dotted path of enclosing definitions within the file, e.g. `Outer.method`.
    pub lexical_path: String,
    pub span: Span,
    pub docstring: Option<String>,
}

/// Stable 16-char uid for a definition; survives reindexing as long as the
/// definition keeps its path, kind, name and lexical position.
pub fn compute_def_uid(path: &str, kind: &str, name: &str, lexical_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b"\x00");
    hasher.update(kind.as_bytes());
    hasher.update(b"\x00");
    hasher.update(name.as_bytes());
    hasher.update(b"\x00");
    hasher.update(lexical_path.as_bytes());
    let digest = hasher.finalize();
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

/// An identifier occurrence, upgraded by resolver passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefFact {
    pub id: i64,
    pub file_id: i64,
    pub token_text: String,
    pub span: Span,
    pub role: RefRole,
    pub ref_tier: RefTier,
    pub certainty: FactCertainty,
    pub target_def_uid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BindTargetKind {
    Def,
    Import,
    Param,
    Local,
}

impl BindTargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindTargetKind::Def => "DEF",
            BindTargetKind::Import => "IMPORT",
            BindTargetKind::Param => "PARAM",
            BindTargetKind::Local => "LOCAL",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "DEF" => BindTargetKind::Def,
            "IMPORT" => BindTargetKind::Import,
            "PARAM" => BindTargetKind::Param,
            _ => BindTargetKind::Local,
        }
    }
}

/// Scope-local name binding recorded by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBindFact {
    pub file_id: i64,
    pub name: String,
    pub target_kind: BindTargetKind,
    /// def_uid for DEF bindings, import_uid for IMPORT bindings.
    pub target_uid: String,
}

/// An edge from a file to another module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportFact {
    pub import_uid: String,
    pub file_id: i64,
    pub unit_id: i64,
    pub imported_name: String,
    pub alias: Option<String>,
    pub source_literal: String,
    /// Populated when the source literal deterministically maps to an
    /// indexed file.
    pub resolved_path: Option<String>,
    pub import_kind: String,
    pub certainty: FactCertainty,
    pub span: Span,
}

pub const IMPORT_KIND_MODULE: &str = "module";
pub const IMPORT_KIND_SYMBOL: &str = "symbol";
pub const IMPORT_KIND_CONFIG_REF: &str = "config_file_ref";

pub fn compute_import_uid(path: &str, source_literal: &str, imported_name: &str, line: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b"\x00");
    hasher.update(source_literal.as_bytes());
    hasher.update(b"\x00");
    hasher.update(imported_name.as_bytes());
    hasher.update(b"\x00");
    hasher.update(line.to_le_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    File,
    Class,
    Function,
    Lambda,
    Block,
    Comprehension,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::File => "file",
            ScopeKind::Class => "class",
            ScopeKind::Function => "function",
            ScopeKind::Lambda => "lambda",
            ScopeKind::Block => "block",
            ScopeKind::Comprehension => "comprehension",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "class" => ScopeKind::Class,
            "function" => ScopeKind::Function,
            "lambda" => ScopeKind::Lambda,
            "block" => ScopeKind::Block,
            "comprehension" => ScopeKind::Comprehension,
            _ => ScopeKind::File,
        }
    }
}

/// A lexical region used by scope-aware reads. `ordinal` and
/// `parent_ordinal` are per-file indexes assigned by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeFact {
    pub file_id: i64,
    pub ordinal: i64,
    pub kind: ScopeKind,
    pub span: Span,
    pub parent_ordinal: Option<i64>,
}

/// Declared type of a local, parameter or field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeAnnotationFact {
    pub file_id: i64,
    pub scope_ordinal: Option<i64>,
    pub target_name: String,
    pub base_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Field,
    Method,
    StaticMethod,
    ClassMethod,
}

impl MemberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberKind::Field => "field",
            MemberKind::Method => "method",
            MemberKind::StaticMethod => "static_method",
            MemberKind::ClassMethod => "class_method",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "method" => MemberKind::Method,
            "static_method" => MemberKind::StaticMethod,
            "class_method" => MemberKind::ClassMethod,
            _ => MemberKind::Field,
        }
    }

    pub fn is_callable(&self) -> bool {
        !matches!(self, MemberKind::Field)
    }
}

/// A member of a type, used by type-traced resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeMemberFact {
    pub file_id: i64,
    pub parent_type_name: String,
    pub member_name: String,
    pub member_kind: MemberKind,
    pub member_def_uid: String,
    /// Declared type of the member, used to advance the chain walk.
    pub base_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    None,
    TypeTraced,
    ImportedRef,
    Lexical,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::None => "none",
            ResolutionMethod::TypeTraced => "type_traced",
            ResolutionMethod::ImportedRef => "imported_ref",
            ResolutionMethod::Lexical => "lexical",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "type_traced" => ResolutionMethod::TypeTraced,
            "imported_ref" => ResolutionMethod::ImportedRef,
            "lexical" => ResolutionMethod::Lexical,
            _ => ResolutionMethod::None,
        }
    }
}

/// A dotted member access site (`recv.a.b`), resolved by Pass 3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberAccessFact {
    pub id: i64,
    pub file_id: i64,
    pub scope_ordinal: Option<i64>,
    pub receiver_name: String,
    pub receiver_declared_type: Option<String>,
    /// Dot-joined member names, excluding the receiver.
    pub member_chain: String,
    pub span: Span,
    pub resolved_type_path: Option<String>,
    pub final_target_def_uid: Option<String>,
    pub resolution_method: ResolutionMethod,
    pub resolution_confidence: f64,
}
