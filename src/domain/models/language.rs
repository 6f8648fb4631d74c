use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Language family tags used for routing, marker detection and grammar
/// selection. A family groups languages that share a source unit model
/// (e.g. `jvm` covers Java/Kotlin/Scala).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageFamily {
    Python,
    Javascript,
    Go,
    Rust,
    Jvm,
    Dotnet,
    Cpp,
    Ruby,
    Php,
    Swift,
    Elixir,
    Haskell,
    Ocaml,
    Shell,
    Lua,
    Markdown,
    JsonYaml,
    Toml,
    Protobuf,
    Terraform,
}

impl LanguageFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageFamily::Python => "python",
            LanguageFamily::Javascript => "javascript",
            LanguageFamily::Go => "go",
            LanguageFamily::Rust => "rust",
            LanguageFamily::Jvm => "jvm",
            LanguageFamily::Dotnet => "dotnet",
            LanguageFamily::Cpp => "cpp",
            LanguageFamily::Ruby => "ruby",
            LanguageFamily::Php => "php",
            LanguageFamily::Swift => "swift",
            LanguageFamily::Elixir => "elixir",
            LanguageFamily::Haskell => "haskell",
            LanguageFamily::Ocaml => "ocaml",
            LanguageFamily::Shell => "shell",
            LanguageFamily::Lua => "lua",
            LanguageFamily::Markdown => "markdown",
            LanguageFamily::JsonYaml => "json_yaml",
            LanguageFamily::Toml => "toml",
            LanguageFamily::Protobuf => "protobuf",
            LanguageFamily::Terraform => "terraform",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ALL_FAMILIES.iter().copied().find(|f| f.as_str() == s)
    }

    /// Data and doc formats relax probe validation to "byte-readable".
    pub fn is_data_format(&self) -> bool {
        matches!(
            self,
            LanguageFamily::Markdown | LanguageFamily::JsonYaml | LanguageFamily::Toml
        )
    }
}

impl std::fmt::Display for LanguageFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub const ALL_FAMILIES: &[LanguageFamily] = &[
    LanguageFamily::Python,
    LanguageFamily::Javascript,
    LanguageFamily::Go,
    LanguageFamily::Rust,
    LanguageFamily::Jvm,
    LanguageFamily::Dotnet,
    LanguageFamily::Cpp,
    LanguageFamily::Ruby,
    LanguageFamily::Php,
    LanguageFamily::Swift,
    LanguageFamily::Elixir,
    LanguageFamily::Haskell,
    LanguageFamily::Ocaml,
    LanguageFamily::Shell,
    LanguageFamily::Lua,
    LanguageFamily::Markdown,
    LanguageFamily::JsonYaml,
    LanguageFamily::Toml,
    LanguageFamily::Protobuf,
    LanguageFamily::Terraform,
];

/// Static per-family definition driving discovery, routing and parsing.
#[derive(Debug, Clone)]
pub struct LanguageDef {
    pub family: LanguageFamily,
    pub extensions: &'static [&'static str],
    /// Filename sentinels detected regardless of extension (lowercased).
    pub filenames: &'static [&'static str],
    /// Markers that declare a workspace root (monorepo tier).
    pub markers_workspace: &'static [&'static str],
    /// Markers that declare a package root.
    pub markers_package: &'static [&'static str],
    pub include_globs: &'static [&'static str],
    /// Tree-sitter grammar name; None means lexical-only indexing.
    pub grammar: Option<&'static str>,
    pub test_patterns: &'static [&'static str],
    /// Whether files of this family can be imported by other files.
    pub importable: bool,
}

pub static LANGUAGE_DEFS: &[LanguageDef] = &[
    LanguageDef {
        family: LanguageFamily::Python,
        extensions: &[".py", ".pyi", ".pyw"],
        filenames: &["setup.py", "pyproject.toml", "pipfile"],
        markers_workspace: &["uv.lock", "poetry.lock", "Pipfile.lock", "pdm.lock"],
        markers_package: &["pyproject.toml", "setup.py", "setup.cfg", "requirements.txt"],
        include_globs: &["**/*.py", "**/*.pyi"],
        grammar: Some("python"),
        test_patterns: &["test_*.py", "*_test.py"],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Javascript,
        extensions: &[".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs", ".mts", ".cts"],
        filenames: &["package.json", "tsconfig.json", "jsconfig.json"],
        markers_workspace: &["pnpm-workspace.yaml", "lerna.json", "nx.json", "turbo.json"],
        markers_package: &["package.json", "deno.json", "tsconfig.json"],
        include_globs: &["**/*.js", "**/*.jsx", "**/*.ts", "**/*.tsx", "**/*.mjs", "**/*.cjs"],
        grammar: Some("javascript"),
        test_patterns: &["*.test.js", "*.test.ts", "*.spec.js", "*.spec.ts"],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Go,
        extensions: &[".go"],
        filenames: &["go.mod", "go.sum"],
        markers_workspace: &["go.work"],
        markers_package: &["go.mod"],
        include_globs: &["**/*.go"],
        grammar: Some("go"),
        test_patterns: &["*_test.go"],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Rust,
        extensions: &[".rs"],
        filenames: &["cargo.toml", "cargo.lock"],
        markers_workspace: &[],
        markers_package: &["Cargo.toml"],
        include_globs: &["**/*.rs"],
        grammar: Some("rust"),
        test_patterns: &[],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Jvm,
        extensions: &[".java", ".kt", ".kts", ".scala", ".groovy", ".gradle"],
        filenames: &["build.gradle", "pom.xml", "build.sbt"],
        markers_workspace: &["settings.gradle", "settings.gradle.kts"],
        markers_package: &["build.gradle", "build.gradle.kts", "pom.xml", "build.sbt"],
        include_globs: &["**/*.java", "**/*.kt", "**/*.scala"],
        grammar: Some("kotlin"),
        test_patterns: &["*Test.java", "*Test.kt", "*Spec.scala"],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Dotnet,
        extensions: &[".cs", ".fs", ".fsx", ".vb"],
        filenames: &[],
        markers_workspace: &[],
        markers_package: &[],
        include_globs: &["**/*.cs", "**/*.fs"],
        grammar: None,
        test_patterns: &["*Tests.cs", "*Test.cs"],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Cpp,
        extensions: &[".c", ".h", ".cpp", ".cc", ".cxx", ".hpp", ".hxx", ".hh"],
        filenames: &["cmakelists.txt", "makefile", "meson.build"],
        markers_workspace: &[],
        markers_package: &["CMakeLists.txt", "Makefile", "meson.build"],
        include_globs: &["**/*.cpp", "**/*.cc", "**/*.c", "**/*.h", "**/*.hpp"],
        grammar: Some("cpp"),
        test_patterns: &[],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Ruby,
        extensions: &[".rb", ".rake", ".gemspec"],
        filenames: &["gemfile", "rakefile"],
        markers_workspace: &["Gemfile.lock"],
        markers_package: &["Gemfile"],
        include_globs: &["**/*.rb"],
        grammar: None,
        test_patterns: &["*_spec.rb", "*_test.rb"],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Php,
        extensions: &[".php", ".phtml"],
        filenames: &[],
        markers_workspace: &["composer.lock"],
        markers_package: &["composer.json"],
        include_globs: &["**/*.php"],
        grammar: Some("php"),
        test_patterns: &["*Test.php"],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Swift,
        extensions: &[".swift"],
        filenames: &[],
        markers_workspace: &[],
        markers_package: &["Package.swift"],
        include_globs: &["**/*.swift"],
        grammar: Some("swift"),
        test_patterns: &["*Tests.swift"],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Elixir,
        extensions: &[".ex", ".exs"],
        filenames: &[],
        markers_workspace: &[],
        markers_package: &["mix.exs"],
        include_globs: &["**/*.ex", "**/*.exs"],
        grammar: None,
        test_patterns: &["*_test.exs"],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Haskell,
        extensions: &[".hs", ".lhs", ".cabal"],
        filenames: &[],
        markers_workspace: &[],
        markers_package: &["stack.yaml"],
        include_globs: &["**/*.hs"],
        grammar: None,
        test_patterns: &[],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Ocaml,
        extensions: &[".ml", ".mli"],
        filenames: &[],
        markers_workspace: &[],
        markers_package: &["dune-project"],
        include_globs: &["**/*.ml", "**/*.mli"],
        grammar: None,
        test_patterns: &[],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Shell,
        extensions: &[".sh", ".bash", ".zsh"],
        filenames: &[],
        markers_workspace: &[],
        markers_package: &[],
        include_globs: &["**/*.sh", "**/*.bash"],
        grammar: None,
        test_patterns: &[],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Lua,
        extensions: &[".lua"],
        filenames: &[],
        markers_workspace: &[],
        markers_package: &[],
        include_globs: &["**/*.lua"],
        grammar: None,
        test_patterns: &[],
        importable: true,
    },
    LanguageDef {
        family: LanguageFamily::Markdown,
        extensions: &[".md", ".mdx", ".markdown", ".rst", ".txt"],
        filenames: &["readme", "changelog", "license"],
        markers_workspace: &[],
        markers_package: &[],
        include_globs: &["**/*.md", "**/*.markdown"],
        grammar: None,
        test_patterns: &[],
        importable: false,
    },
    LanguageDef {
        family: LanguageFamily::JsonYaml,
        extensions: &[".json", ".jsonc", ".yaml", ".yml"],
        filenames: &[],
        markers_workspace: &[],
        markers_package: &[],
        include_globs: &["**/*.json", "**/*.yaml", "**/*.yml"],
        grammar: None,
        test_patterns: &[],
        importable: false,
    },
    LanguageDef {
        family: LanguageFamily::Toml,
        extensions: &[".toml", ".ini", ".cfg"],
        filenames: &[],
        markers_workspace: &[],
        markers_package: &[],
        include_globs: &["**/*.toml"],
        grammar: None,
        test_patterns: &[],
        importable: false,
    },
    LanguageDef {
        family: LanguageFamily::Protobuf,
        extensions: &[".proto"],
        filenames: &[],
        markers_workspace: &["buf.work.yaml"],
        markers_package: &["buf.yaml"],
        include_globs: &["**/*.proto"],
        grammar: None,
        test_patterns: &[],
        importable: false,
    },
    LanguageDef {
        family: LanguageFamily::Terraform,
        extensions: &[".tf", ".tfvars", ".hcl"],
        filenames: &["terraform.tfvars"],
        markers_workspace: &[".terraform.lock.hcl"],
        markers_package: &["main.tf", "versions.tf"],
        include_globs: &["**/*.tf", "**/*.hcl"],
        grammar: Some("hcl"),
        test_patterns: &[],
        importable: false,
    },
];

fn extension_map() -> &'static HashMap<&'static str, LanguageFamily> {
    static MAP: OnceLock<HashMap<&'static str, LanguageFamily>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut m = HashMap::new();
        for def in LANGUAGE_DEFS {
            for ext in def.extensions {
                m.entry(*ext).or_insert(def.family);
            }
        }
        m
    })
}

fn filename_map() -> &'static HashMap<&'static str, LanguageFamily> {
    static MAP: OnceLock<HashMap<&'static str, LanguageFamily>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut m = HashMap::new();
        for def in LANGUAGE_DEFS {
            for name in def.filenames {
                m.entry(*name).or_insert(def.family);
            }
        }
        m
    })
}

/// Detect a file's language family from its filename sentinel or extension.
pub fn detect_language_family(path: &Path) -> Option<LanguageFamily> {
    let name = path.file_name()?.to_str()?.to_lowercase();
    if let Some(family) = filename_map().get(name.as_str()) {
        return Some(*family);
    }
    let ext = path.extension().and_then(|e| e.to_str())?;
    extension_map().get(format!(".{}", ext.to_lowercase()).as_str()).copied()
}

pub fn language_def(family: LanguageFamily) -> &'static LanguageDef {
    LANGUAGE_DEFS
        .iter()
        .find(|d| d.family == family)
        .expect("every family has a definition")
}

/// Families participating in import graphs; data/doc formats are excluded.
pub fn importable_families() -> impl Iterator<Item = LanguageFamily> {
    LANGUAGE_DEFS.iter().filter(|d| d.importable).map(|d| d.family)
}

/// All workspace/package marker filenames, used by the discovery scan.
pub fn marker_definitions() -> Vec<(LanguageFamily, &'static [&'static str], &'static [&'static str])> {
    LANGUAGE_DEFS
        .iter()
        .filter(|d| !d.markers_workspace.is_empty() || !d.markers_package.is_empty())
        .map(|d| (d.family, d.markers_workspace, d.markers_package))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(
            detect_language_family(Path::new("src/main.py")),
            Some(LanguageFamily::Python)
        );
        assert_eq!(
            detect_language_family(Path::new("lib/util.rs")),
            Some(LanguageFamily::Rust)
        );
        assert_eq!(
            detect_language_family(Path::new("web/app.tsx")),
            Some(LanguageFamily::Javascript)
        );
        assert_eq!(detect_language_family(Path::new("a.unknownext")), None);
    }

    #[test]
    fn test_detect_by_filename_sentinel() {
        assert_eq!(
            detect_language_family(Path::new("Cargo.toml")),
            Some(LanguageFamily::Rust)
        );
        assert_eq!(
            detect_language_family(Path::new("pkg/package.json")),
            Some(LanguageFamily::Javascript)
        );
    }

    #[test]
    fn test_first_definition_wins_for_shared_extensions() {
        // .ts belongs to the javascript family, not anything later in the table
        assert_eq!(
            detect_language_family(Path::new("x.ts")),
            Some(LanguageFamily::Javascript)
        );
    }

    #[test]
    fn test_importable_excludes_data_formats() {
        let importable: Vec<_> = importable_families().collect();
        assert!(importable.contains(&LanguageFamily::Python));
        assert!(!importable.contains(&LanguageFamily::Markdown));
        assert!(!importable.contains(&LanguageFamily::JsonYaml));
    }

    #[test]
    fn test_family_roundtrip() {
        for family in ALL_FAMILIES {
            assert_eq!(LanguageFamily::parse(family.as_str()), Some(*family));
        }
    }
}
