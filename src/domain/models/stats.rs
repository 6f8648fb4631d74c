use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Result of `initialize()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitResult {
    pub contexts_discovered: usize,
    pub contexts_valid: usize,
    pub contexts_failed: usize,
    pub files_indexed: usize,
    pub errors: Vec<String>,
    pub files_by_ext: HashMap<String, usize>,
}

/// Result of a reindex run (incremental or full).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files_processed: usize,
    pub files_added: usize,
    pub files_updated: usize,
    pub files_removed: usize,
    pub symbols_indexed: usize,
    pub duration_seconds: f64,
    pub epoch_id: u64,
}

/// Statistics from import-chain resolution (Pass 2).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub refs_processed: usize,
    pub refs_resolved: usize,
    pub refs_unresolved: usize,
}

/// Statistics from type-traced resolution (Pass 3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TypeTracedStats {
    pub accesses_processed: usize,
    pub accesses_resolved: usize,
    pub accesses_partial: usize,
    pub accesses_unresolved: usize,
    pub refs_upgraded: usize,
}
