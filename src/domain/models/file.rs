use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::language::LanguageFamily;

/// An indexed file row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// Repo-relative, forward-slash path.
    pub path: String,
    pub language_family: Option<LanguageFamily>,
    /// SHA-256 of the bytes last fed to the extractor.
    pub content_hash: String,
    /// Unix seconds; None until the file has been structurally indexed.
    pub indexed_at: Option<i64>,
    /// Module name declared inside the file, for declaration-based
    /// languages (Go package path, Rust crate path, ...).
    pub declared_module: Option<String>,
    /// Hash of the file's top-level definition signatures.
    pub interface_hash: Option<String>,
    /// Closed set of ambiguity markers recorded during extraction.
    pub ambiguity_flags: Vec<AmbiguityFlag>,
    pub line_count: i64,
}

impl FileRecord {
    pub fn is_certain(&self) -> bool {
        self.ambiguity_flags.is_empty()
    }
}

/// Closed vocabulary for extraction-time ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityFlag {
    /// Lexical or strong references left without a target after resolution.
    UnresolvedRefs,
    /// A member-access chain resolved only partially.
    PartialTypeTrace,
}

pub fn encode_ambiguity_flags(flags: &[AmbiguityFlag]) -> String {
    serde_json::to_string(flags).unwrap_or_else(|_| "[]".to_string())
}

pub fn decode_ambiguity_flags(raw: &str) -> Vec<AmbiguityFlag> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// SHA-256 of file bytes, lowercase hex.
pub fn compute_content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Normalize a path to the repo-relative forward-slash form stored in the
/// index.
pub fn normalize_rel_path(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    s.trim_start_matches("./").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One delta produced by the reconciler. The reconciler never writes; it
/// only reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedFile {
    pub kind: ChangeKind,
    pub path: String,
    pub new_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_sha256_hex() {
        let hash = compute_content_hash(b"fn main() {}");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_content_hash(b"fn main() {}"));
        assert_ne!(hash, compute_content_hash(b"fn main() { }"));
    }

    #[test]
    fn test_ambiguity_flags_roundtrip() {
        let flags = vec![AmbiguityFlag::UnresolvedRefs, AmbiguityFlag::PartialTypeTrace];
        let encoded = encode_ambiguity_flags(&flags);
        assert_eq!(decode_ambiguity_flags(&encoded), flags);
        assert!(decode_ambiguity_flags("").is_empty());
        assert!(decode_ambiguity_flags("garbage").is_empty());
    }

    #[test]
    fn test_normalize_rel_path() {
        assert_eq!(normalize_rel_path(Path::new("./src/main.py")), "src/main.py");
    }
}
