//! File state computation for mutation gating.
//!
//! Freshness is content coherence (index hash vs disk), certainty is
//! resolution confidence (ambiguity flags recorded during extraction).
//! CLEAN+CERTAIN files may be mutated automatically; CLEAN+UNCERTAIN
//! files need an explicit decision; everything else is blocked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::connector::storage::Database;
use crate::domain::{
    compute_content_hash, CoreError, FileState, Freshness, MutationGateResult, StateCertainty,
};

/// Memo key: (file_id, context_id). The per-request memo map keeps
/// dependency walks cycle-safe.
pub type StateMemo = HashMap<(i64, i64), FileState>;

pub struct FileStateService<'a> {
    db: &'a Database,
    repo_root: PathBuf,
}

impl<'a> FileStateService<'a> {
    pub fn new(db: &'a Database, repo_root: &Path) -> Self {
        Self {
            db,
            repo_root: repo_root.to_path_buf(),
        }
    }

    pub fn get_file_state(
        &self,
        file_id: i64,
        context_id: i64,
        memo: &mut StateMemo,
    ) -> Result<FileState, CoreError> {
        let key = (file_id, context_id);
        if let Some(state) = memo.get(&key) {
            return Ok(*state);
        }
        // Seed the memo so re-entrant walks terminate.
        memo.insert(key, FileState::unindexed());

        let state = self.compute_state(file_id)?;
        memo.insert(key, state);
        Ok(state)
    }

    pub fn get_file_states_batch(
        &self,
        file_ids: &[i64],
        context_id: i64,
    ) -> Result<HashMap<i64, FileState>, CoreError> {
        let mut memo = StateMemo::new();
        let mut result = HashMap::with_capacity(file_ids.len());
        for &file_id in file_ids {
            result.insert(file_id, self.get_file_state(file_id, context_id, &mut memo)?);
        }
        Ok(result)
    }

    pub fn check_mutation_gate(
        &self,
        file_ids: &[i64],
        context_id: i64,
    ) -> Result<MutationGateResult, CoreError> {
        let states = self.get_file_states_batch(file_ids, context_id)?;
        let mut gate = MutationGateResult::default();

        // Preserve request order in the verdict lists.
        for &file_id in file_ids {
            let state = states
                .get(&file_id)
                .copied()
                .unwrap_or_else(FileState::unindexed);
            match (state.freshness, state.certainty) {
                (Freshness::Clean, StateCertainty::Certain) => gate.allowed.push(file_id),
                (Freshness::Clean, StateCertainty::Uncertain) => {
                    gate.needs_decision.push(file_id)
                }
                (Freshness::Unindexed, _) => {
                    gate.blocked.push((file_id, "unindexed".to_string()))
                }
            }
        }

        Ok(gate)
    }

    fn compute_state(&self, file_id: i64) -> Result<FileState, CoreError> {
        let Some(file) = self.db.get_file_by_id(file_id)? else {
            return Ok(FileState::unindexed());
        };
        if file.indexed_at.is_none() {
            return Ok(FileState::unindexed());
        }

        let on_disk = std::fs::read(self.repo_root.join(&file.path)).ok();
        let fresh = on_disk
            .map(|bytes| compute_content_hash(&bytes) == file.content_hash)
            .unwrap_or(false);
        if !fresh {
            return Ok(FileState::unindexed());
        }

        Ok(FileState {
            freshness: Freshness::Clean,
            certainty: if file.is_certain() {
                StateCertainty::Certain
            } else {
                StateCertainty::Uncertain
            },
        })
    }
}
