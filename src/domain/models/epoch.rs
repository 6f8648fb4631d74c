use serde::{Deserialize, Serialize};

/// A committed snapshot of the index. Readers that observe an epoch see
/// the fully committed write set for it and everything earlier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epoch {
    pub epoch_id: u64,
    /// Unix seconds at publication.
    pub published_at: i64,
    pub files_indexed: u64,
    pub commit_hash: Option<String>,
}

/// Singleton row carrying the current epoch pointer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RepoState {
    pub current_epoch_id: u64,
}
