//! Working tree snapshot

use serde::{Deserialize, Serialize};

/// Transient view of the workbench's own working tree.
///
/// Recomputed on every request; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRepoState {
    pub branch: String,
    pub commit: String,
    pub message: String,
    pub dirty: bool,
    pub dirty_files: Vec<String>,
    /// Commits in HEAD not on the canonical remote
    pub ahead: u32,
    /// Commits on the canonical remote not in HEAD
    pub behind: u32,
    pub tag: String,
    pub log: Vec<String>,
}

impl CanonicalRepoState {
    /// One-line sync summary
    pub fn sync_summary(&self) -> String {
        if self.ahead > 0 {
            format!("{} commit(s) ahead of canonical, push needed", self.ahead)
        } else if self.behind > 0 {
            format!("{} commit(s) behind canonical", self.behind)
        } else {
            "in sync with canonical".to_string()
        }
    }
}
