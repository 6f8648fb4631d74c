use serde::{Deserialize, Serialize};

/// Content coherence axis of file state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Freshness {
    /// `indexed_at` is set and the stored content hash matches disk.
    Clean,
    /// Never indexed, or disk content no longer matches the index.
    Unindexed,
}

/// Resolution confidence axis of file state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StateCertainty {
    Certain,
    /// Ambiguity flags were recorded during extraction or resolution.
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub freshness: Freshness,
    pub certainty: StateCertainty,
}

impl FileState {
    pub fn unindexed() -> Self {
        Self {
            freshness: Freshness::Unindexed,
            certainty: StateCertainty::Uncertain,
        }
    }
}

/// Outcome of the mutation gate over a set of files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationGateResult {
    /// CLEAN + CERTAIN: automatic mutation allowed.
    pub allowed: Vec<i64>,
    /// CLEAN + UNCERTAIN: caller must obtain explicit confirmation.
    pub needs_decision: Vec<i64>,
    /// UNINDEXED or unknown files, with the blocking reason.
    pub blocked: Vec<(i64, String)>,
}

impl MutationGateResult {
    pub fn all_allowed(&self) -> bool {
        self.needs_decision.is_empty() && self.blocked.is_empty()
    }
}
