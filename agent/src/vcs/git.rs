//! Git gateway scoped to one working tree
//!
//! Query operations are best effort: a failing git invocation degrades to
//! an empty or placeholder value instead of an error, so status views keep
//! working when repository metadata is partial. Mutating operations return
//! a [`VcsResult`] whose success flag comes from the exit status; the
//! captured output is diagnostic only.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::models::repo::CanonicalRepoState;
use crate::vcs::process::{
    validate_ref_name, validate_tree_path, CommandOutput, CommandRunner, CommandSpec,
};

/// Placeholder for values git could not report
pub const UNKNOWN: &str = "unknown";

/// Placeholder when no tag is reachable
pub const NO_TAG: &str = "none";

/// Outcome of a mutating git operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsResult {
    pub success: bool,
    pub output: String,
}

impl VcsResult {
    fn rejected(reason: String) -> Self {
        Self {
            success: false,
            output: reason,
        }
    }

    fn from_output(output: &CommandOutput) -> Self {
        Self {
            success: output.success(),
            output: output.combined(),
        }
    }
}

/// Git operations against a single working tree
#[derive(Clone)]
pub struct GitGateway {
    runner: Arc<dyn CommandRunner>,
    tree: PathBuf,
    timeout: Duration,
}

impl GitGateway {
    pub fn new(runner: Arc<dyn CommandRunner>, tree: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            runner,
            tree: tree.into(),
            timeout,
        }
    }

    /// Working tree this gateway operates on
    pub fn tree(&self) -> &Path {
        &self.tree
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// Whether the tree carries git metadata (`.git` directory or file)
    pub fn has_metadata(&self) -> bool {
        self.tree.join(".git").exists()
    }

    async fn git<I, S>(&self, args: I) -> CommandOutput
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Err(reason) = validate_tree_path(&self.tree) {
            return CommandOutput::spawn_failure(reason);
        }
        let spec = CommandSpec::new("git", args, self.timeout).in_dir(&self.tree);
        let output = self.runner.run(&spec).await;
        if !output.success() {
            debug!("{} failed in {:?}: {}", spec.display(), self.tree, output.combined());
        }
        output
    }

    /// Trimmed stdout of a successful query, or `None`
    async fn query<I, S>(&self, args: I) -> Option<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let output = self.git(args).await;
        if !output.success() {
            return None;
        }
        let value = output.stdout.trim();
        (!value.is_empty()).then(|| value.to_string())
    }

    pub async fn current_branch(&self) -> String {
        self.query(["branch", "--show-current"])
            .await
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    /// Current commit; short form falls back to `unknown`, full form to empty
    pub async fn current_commit(&self, short: bool) -> String {
        if short {
            self.query(["rev-parse", "--short", "HEAD"])
                .await
                .unwrap_or_else(|| UNKNOWN.to_string())
        } else {
            self.query(["rev-parse", "HEAD"]).await.unwrap_or_default()
        }
    }

    pub async fn last_commit_message(&self) -> String {
        self.query(["log", "-1", "--pretty=%s"]).await.unwrap_or_default()
    }

    /// Dirty flag and the porcelain lines of changed paths
    pub async fn is_dirty(&self) -> (bool, Vec<String>) {
        let output = self.git(["status", "--porcelain"]).await;
        if !output.success() {
            return (false, Vec::new());
        }
        let paths: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        (!paths.is_empty(), paths)
    }

    /// Fetch the remote; failures are logged and ignored
    pub async fn fetch_remote(&self, remote: &str) {
        if validate_ref_name(remote).is_err() {
            warn!("Refusing to fetch invalid remote {:?}", remote);
            return;
        }
        let output = self.git(["fetch", remote, "--quiet"]).await;
        if !output.success() {
            warn!("git fetch {} failed: {}", remote, output.combined());
        }
    }

    /// `(ahead, behind)` of HEAD relative to `remote_ref` (e.g. `origin/main`)
    pub async fn ahead_behind(&self, remote_ref: &str) -> (u32, u32) {
        if validate_ref_name(remote_ref).is_err() {
            return (0, 0);
        }
        let count = |range: String| async move {
            self.query(["rev-list", "--count", range.as_str()])
                .await
                .and_then(|n| n.parse::<u32>().ok())
                .unwrap_or(0)
        };
        let behind = count(format!("HEAD..{}", remote_ref)).await;
        let ahead = count(format!("{}..HEAD", remote_ref)).await;
        (ahead, behind)
    }

    pub async fn latest_tag(&self) -> String {
        self.query(["describe", "--tags", "--abbrev=0"])
            .await
            .unwrap_or_else(|| NO_TAG.to_string())
    }

    /// Last `n` commits in one-line form
    pub async fn recent_log(&self, n: usize) -> Vec<String> {
        let limit = format!("-{}", n);
        self.query(["log", "--oneline", limit.as_str()])
            .await
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Stage everything and commit it
    pub async fn commit_all(&self, message: &str) -> VcsResult {
        let add = self.git(["add", "-A"]).await;
        if !add.success() {
            return VcsResult::from_output(&add);
        }
        let commit = self.git(["commit", "-m", message]).await;
        info!("Committed workbench changes: {}", message);
        VcsResult::from_output(&commit)
    }

    pub async fn push(&self, remote: &str, branch: &str) -> VcsResult {
        if let Err(reason) = validate_ref_name(remote).and_then(|_| validate_ref_name(branch)) {
            return VcsResult::rejected(reason);
        }
        let output = self.git(["push", remote, branch]).await;
        VcsResult::from_output(&output)
    }

    /// Fetch `branch` from `remote` and hard reset the tree onto it
    pub async fn reset_hard_to_remote(&self, remote: &str, branch: &str) -> VcsResult {
        if let Err(reason) = validate_ref_name(remote).and_then(|_| validate_ref_name(branch)) {
            return VcsResult::rejected(reason);
        }

        let fetch = self.git(["fetch", remote, branch]).await;
        if !fetch.success() {
            return VcsResult::from_output(&fetch);
        }

        let target = format!("{}/{}", remote, branch);
        let reset = self.git(["reset", "--hard", target.as_str()]).await;

        let mut result = VcsResult::from_output(&reset);
        let fetch_log = fetch.combined();
        if !fetch_log.is_empty() {
            result.output = format!("{}\n{}", fetch_log, result.output);
        }
        result
    }

    /// Full status view of the tree against `remote/branch`
    pub async fn snapshot(&self, remote: &str, branch: &str) -> CanonicalRepoState {
        self.fetch_remote(remote).await;
        let (dirty, dirty_files) = self.is_dirty().await;
        let (ahead, behind) = self.ahead_behind(&format!("{}/{}", remote, branch)).await;

        CanonicalRepoState {
            branch: self.current_branch().await,
            commit: self.current_commit(true).await,
            message: self.last_commit_message().await,
            dirty,
            dirty_files,
            ahead,
            behind,
            tag: self.latest_tag().await,
            log: self.recent_log(10).await,
        }
    }
}
