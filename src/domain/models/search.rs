use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Lexical,
    Symbol,
    References,
    Definitions,
}

/// One search hit. `line` is 1-indexed; `column` is present for
/// structural hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub path: String,
    pub line: u32,
    pub column: Option<u32>,
    pub snippet: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Set when the query fell back to literal matching or was truncated.
    pub fallback_reason: Option<String>,
    pub truncated: bool,
}

/// Sections a `map_repo` call may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapSection {
    Structure,
    Languages,
    Dependencies,
    TestLayout,
    EntryPoints,
    PublicApi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapRepoRequest {
    pub include: Vec<MapSection>,
    pub depth: usize,
    pub limit: usize,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub respect_gitignore: bool,
}

impl Default for MapRepoRequest {
    fn default() -> Self {
        Self {
            include: vec![
                MapSection::Structure,
                MapSection::Languages,
                MapSection::Dependencies,
                MapSection::TestLayout,
                MapSection::EntryPoints,
                MapSection::PublicApi,
            ],
            depth: 6,
            limit: 2000,
            include_globs: vec![],
            exclude_globs: vec![],
            respect_gitignore: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageShare {
    pub language: String,
    pub file_count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureSummary {
    pub root: String,
    pub file_count: usize,
    /// Indented hybrid tree: directories with inline `name:lines` files.
    pub tree: Vec<String>,
    pub contexts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySummary {
    /// Distinct external import sources, sorted.
    pub external_modules: Vec<String>,
    pub import_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLayoutSummary {
    pub test_files: Vec<String>,
    pub test_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPoint {
    pub kind: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicApiSymbol {
    pub name: String,
    pub kind: String,
    pub path: String,
    pub def_uid: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapRepoResult {
    pub structure: Option<StructureSummary>,
    pub languages: Option<Vec<LanguageShare>>,
    pub dependencies: Option<DependencySummary>,
    pub test_layout: Option<TestLayoutSummary>,
    pub entry_points: Option<Vec<EntryPoint>>,
    pub public_api: Option<Vec<PublicApiSymbol>>,
}

/// Preferred scope kind for scope-aware reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopePreference {
    Function,
    Class,
    Block,
}

/// A resolved scope region with its content. `resolved` is false when the
/// region is a line-window fallback rather than a structural scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRegion {
    pub start_line: u32,
    pub end_line: u32,
    pub kind: String,
    pub resolved: bool,
    pub content: String,
}
