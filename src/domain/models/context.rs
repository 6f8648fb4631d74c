use serde::{Deserialize, Serialize};

use super::language::LanguageFamily;

/// Marker tier: workspace markers declare monorepo roots, package markers
/// declare individual source units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerTier {
    Workspace,
    Package,
}

impl MarkerTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerTier::Workspace => "workspace",
            MarkerTier::Package => "package",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "workspace" => MarkerTier::Workspace,
            _ => MarkerTier::Package,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Pending,
    Valid,
    Invalid,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Pending => "pending",
            ProbeStatus::Valid => "valid",
            ProbeStatus::Invalid => "invalid",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "valid" => ProbeStatus::Valid,
            "invalid" => ProbeStatus::Invalid,
            _ => ProbeStatus::Pending,
        }
    }
}

/// A context candidate produced by marker scanning, before probe
/// validation and membership assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateContext {
    pub language_family: LanguageFamily,
    /// Repo-relative root; empty string means the repository root itself.
    pub root_path: String,
    pub tier: MarkerTier,
    /// Marker filenames observed at the root.
    pub markers: Vec<String>,
    pub include_spec: Vec<String>,
    pub exclude_spec: Vec<String>,
}

impl CandidateContext {
    pub fn root_depth(&self) -> usize {
        if self.root_path.is_empty() {
            0
        } else {
            self.root_path.split('/').count()
        }
    }
}

/// A validated, stored context: one coherent source unit of one language
/// family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRecord {
    pub id: i64,
    pub language_family: LanguageFamily,
    pub root_path: String,
    pub include_spec: Vec<String>,
    pub exclude_spec: Vec<String>,
    pub probe_status: ProbeStatus,
}

impl ContextRecord {
    pub fn root_depth(&self) -> usize {
        if self.root_path.is_empty() {
            0
        } else {
            self.root_path.split('/').count()
        }
    }
}

/// Is `path` inside `root` (both repo-relative, forward slashes)?
/// An empty root contains every path.
pub fn is_inside(path: &str, root: &str) -> bool {
    if root.is_empty() {
        return true;
    }
    path == root || path.starts_with(&format!("{root}/"))
}

/// Strip `root` from `path`; returns `path` unchanged when not inside.
pub fn relative_to_root<'a>(path: &'a str, root: &str) -> &'a str {
    if root.is_empty() {
        return path;
    }
    path.strip_prefix(root)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_inside() {
        assert!(is_inside("src/a.py", ""));
        assert!(is_inside("src/a.py", "src"));
        assert!(is_inside("src", "src"));
        assert!(!is_inside("srcx/a.py", "src"));
        assert!(!is_inside("lib/a.py", "src"));
    }

    #[test]
    fn test_relative_to_root() {
        assert_eq!(relative_to_root("src/a.py", "src"), "a.py");
        assert_eq!(relative_to_root("src/a.py", ""), "src/a.py");
        assert_eq!(relative_to_root("packages/core/i.js", "packages/core"), "i.js");
    }

    #[test]
    fn test_root_depth() {
        let ctx = CandidateContext {
            language_family: crate::domain::models::language::LanguageFamily::Python,
            root_path: String::new(),
            tier: MarkerTier::Package,
            markers: vec![],
            include_spec: vec![],
            exclude_spec: vec![],
        };
        assert_eq!(ctx.root_depth(), 0);

        let deeper = CandidateContext {
            root_path: "packages/core".to_string(),
            ..ctx
        };
        assert_eq!(deeper.root_depth(), 2);
    }
}
