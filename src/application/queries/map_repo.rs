//! Repository mapping: structure, languages, dependencies, test layout,
//! entry points and public API, each section optional by request.

use std::collections::BTreeMap;
use std::path::Path;

use crate::connector::ignore::{matches_glob, IgnoreChecker};
use crate::connector::storage::Database;
use crate::domain::{
    language_def, CoreError, DependencySummary, EntryPoint, FileRecord, LanguageShare,
    MapRepoRequest, MapRepoResult, MapSection, PublicApiSymbol, StructureSummary,
    TestLayoutSummary, IMPORT_KIND_CONFIG_REF,
};

const PUBLIC_API_CAP: usize = 100;
const ENTRY_POINT_NAMES: &[&str] = &["main", "app", "cli", "run"];
const ENTRY_POINT_FILES: &[&str] = &["main.py", "__main__.py", "main.go", "main.rs", "index.js", "index.ts"];

pub fn map_repo(
    db: &Database,
    repo_root: &Path,
    request: &MapRepoRequest,
) -> Result<MapRepoResult, CoreError> {
    let mut files = db.list_files()?;
    files.retain(|f| keep_file(f, request));

    if request.respect_gitignore {
        let checker = IgnoreChecker::new(repo_root, &[], true);
        files.retain(|f| !checker.is_excluded_rel(&f.path));
    }
    if files.len() > request.limit {
        files.truncate(request.limit);
    }

    let mut result = MapRepoResult::default();
    for section in &request.include {
        match section {
            MapSection::Structure => {
                result.structure = Some(build_structure(db, repo_root, &files, request.depth)?)
            }
            MapSection::Languages => result.languages = Some(build_languages(&files)),
            MapSection::Dependencies => result.dependencies = Some(build_dependencies(db)?),
            MapSection::TestLayout => result.test_layout = Some(build_test_layout(&files)),
            MapSection::EntryPoints => result.entry_points = Some(build_entry_points(db, &files)?),
            MapSection::PublicApi => result.public_api = Some(build_public_api(db, &files)?),
        }
    }
    Ok(result)
}

fn keep_file(file: &FileRecord, request: &MapRepoRequest) -> bool {
    if !request.include_globs.is_empty()
        && !request.include_globs.iter().any(|g| matches_glob(&file.path, g))
    {
        return false;
    }
    !request.exclude_globs.iter().any(|g| matches_glob(&file.path, g))
}

/// Lossless hybrid tree: indented directories with inline `name:lines`
/// files, single-child chains collapsed.
fn build_structure(
    db: &Database,
    repo_root: &Path,
    files: &[FileRecord],
    depth: usize,
) -> Result<StructureSummary, CoreError> {
    #[derive(Default)]
    struct DirNode {
        children: BTreeMap<String, DirNode>,
        files: Vec<String>,
    }

    let mut root = DirNode::default();
    for file in files {
        let label = match file.line_count {
            0 => file.path.rsplit('/').next().unwrap_or(&file.path).to_string(),
            n => format!("{}:{n}", file.path.rsplit('/').next().unwrap_or(&file.path)),
        };
        let parts: Vec<&str> = file.path.split('/').collect();
        if parts.len() == 1 {
            root.files.push(label);
            continue;
        }
        let mut node = &mut root;
        for part in &parts[..parts.len() - 1] {
            node = node.children.entry(part.to_string()).or_default();
        }
        node.files.push(label);
    }

    fn render(node: &DirNode, indent: usize, max_depth: usize, out: &mut Vec<String>) {
        if indent >= max_depth {
            return;
        }
        for (name, child) in &node.children {
            // Collapse single-child directory chains without files.
            let mut chain = vec![name.clone()];
            let mut cursor = child;
            while cursor.files.is_empty() {
                let mut children = cursor.children.iter();
                match (children.next(), children.next()) {
                    (Some((only_name, only_child)), None) => {
                        chain.push(only_name.clone());
                        cursor = only_child;
                    }
                    _ => break,
                }
            }

            let prefix = "  ".repeat(indent);
            let label = format!("{}/", chain.join("/"));
            if cursor.files.is_empty() {
                out.push(format!("{prefix}{label}"));
            } else {
                out.push(format!("{prefix}{label} {}", cursor.files.join(" | ")));
            }
            render(cursor, indent + 1, max_depth, out);
        }
    }

    let mut tree = Vec::new();
    render(&root, 0, depth.max(1), &mut tree);
    if !root.files.is_empty() {
        tree.push(root.files.join(" | "));
    }

    let contexts = db
        .list_contexts()?
        .into_iter()
        .map(|c| {
            let root = if c.root_path.is_empty() { "." } else { &c.root_path };
            format!("{} {root}", c.language_family)
        })
        .collect();

    Ok(StructureSummary {
        root: repo_root.display().to_string(),
        file_count: files.len(),
        tree,
        contexts,
    })
}

fn build_languages(files: &[FileRecord]) -> Vec<LanguageShare> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for file in files {
        let tag = file.language_family.map(|f| f.as_str()).unwrap_or("other");
        *counts.entry(tag).or_default() += 1;
    }
    let total = files.len().max(1) as f64;

    let mut shares: Vec<LanguageShare> = counts
        .into_iter()
        .map(|(language, file_count)| LanguageShare {
            language: language.to_string(),
            file_count,
            percentage: file_count as f64 / total * 100.0,
        })
        .collect();
    shares.sort_by(|a, b| b.file_count.cmp(&a.file_count));
    shares
}

/// Distinct external import sources: language imports that never
/// resolved to a repo file. Config-file edges are excluded.
fn build_dependencies(db: &Database) -> Result<DependencySummary, CoreError> {
    let mut external: Vec<String> = Vec::new();
    let mut import_count = 0usize;

    for import in db.list_imports()? {
        if import.import_kind == IMPORT_KIND_CONFIG_REF {
            continue;
        }
        import_count += 1;
        if import.resolved_path.is_none() {
            let root = import
                .source_literal
                .split(['.', ':', '/'])
                .next()
                .unwrap_or(&import.source_literal)
                .to_string();
            if !root.is_empty() && !root.starts_with('.') && !external.contains(&root) {
                external.push(root);
            }
        }
    }
    external.sort();

    Ok(DependencySummary {
        external_modules: external,
        import_count,
    })
}

fn build_test_layout(files: &[FileRecord]) -> TestLayoutSummary {
    let mut test_files = Vec::new();
    for file in files {
        let Some(family) = file.language_family else {
            continue;
        };
        let basename = file.path.rsplit('/').next().unwrap_or(&file.path);
        let is_test = language_def(family)
            .test_patterns
            .iter()
            .any(|pat| matches_glob(basename, pat))
            || file.path.starts_with("tests/")
            || file.path.contains("/tests/");
        if is_test {
            test_files.push(file.path.clone());
        }
    }
    test_files.sort();
    let test_count = test_files.len();
    TestLayoutSummary {
        test_files,
        test_count,
    }
}

fn build_entry_points(db: &Database, files: &[FileRecord]) -> Result<Vec<EntryPoint>, CoreError> {
    let paths: std::collections::BTreeSet<&str> =
        files.iter().map(|f| f.path.as_str()).collect();
    let mut entry_points = Vec::new();

    for def in db.top_level_defs()? {
        if !ENTRY_POINT_NAMES.contains(&def.name.as_str()) {
            continue;
        }
        if let Some(file) = files.iter().find(|f| f.id == def.file_id) {
            entry_points.push(EntryPoint {
                kind: def.kind,
                name: def.name,
                path: file.path.clone(),
            });
        }
    }

    for file in files {
        let basename = file.path.rsplit('/').next().unwrap_or(&file.path);
        if ENTRY_POINT_FILES.contains(&basename) && paths.contains(file.path.as_str()) {
            let already = entry_points.iter().any(|e| e.path == file.path);
            if !already {
                entry_points.push(EntryPoint {
                    kind: "file".to_string(),
                    name: basename.to_string(),
                    path: file.path.clone(),
                });
            }
        }
    }

    entry_points.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entry_points)
}

/// Convention-derived public surface: top-level definitions without a
/// leading underscore.
fn build_public_api(db: &Database, files: &[FileRecord]) -> Result<Vec<PublicApiSymbol>, CoreError> {
    let mut api = Vec::new();
    for def in db.top_level_defs()? {
        if def.name.starts_with('_') {
            continue;
        }
        let Some(file) = files.iter().find(|f| f.id == def.file_id) else {
            continue;
        };
        api.push(PublicApiSymbol {
            name: def.name,
            kind: def.kind,
            path: file.path.clone(),
            def_uid: def.def_uid,
        });
        if api.len() >= PUBLIC_API_CAP {
            break;
        }
    }
    api.sort_by(|a, b| (&a.path, &a.name).cmp(&(&b.path, &b.name)));
    Ok(api)
}
