//! Self-update executor

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use control_api::StatusResponse;

use crate::errors::AgentError;
use crate::models::deployment::{DeployMethod, DeployOutcome};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::update::archive::{self, ArchiveSource};
use crate::utils::{first_line, version_info};
use crate::vcs::git::GitGateway;
use crate::vcs::process::{validate_tree_path, CommandRunner};

/// Slug reported for an instance updating its own tree
pub const SELF_SLUG: &str = "self";

/// Self-update options
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Canonical remote name
    pub remote: String,

    /// Canonical branch
    pub branch: String,

    /// Snapshot used when a tree has no version control metadata
    pub archive: Option<ArchiveSource>,

    /// Version file read after an archive swap
    pub version_file: String,

    /// Parent directory for per-update scratch directories
    pub scratch_dir: PathBuf,

    /// Report a failed reset as a failed update
    pub strict_vcs: bool,

    /// Timeout for each git invocation
    pub command_timeout: Duration,

    /// Timeout for the archive download
    pub download_timeout: Duration,
}

impl UpdateOptions {
    pub fn from_settings(settings: &Settings, layout: &StorageLayout) -> Self {
        let canonical = &settings.canonical;
        Self {
            remote: canonical.remote.clone(),
            branch: canonical.branch.clone(),
            archive: ArchiveSource::resolve(
                &canonical.remote_url,
                &canonical.branch,
                canonical.archive_url.as_deref(),
                canonical.archive_root.as_deref(),
            ),
            version_file: canonical.version_file.clone(),
            scratch_dir: layout.scratch_dir().path().to_path_buf(),
            strict_vcs: settings.update.strict_vcs,
            command_timeout: Duration::from_secs(settings.local.command_timeout_secs),
            download_timeout: Duration::from_secs(settings.update.download_timeout_secs),
        }
    }
}

/// What [`SelfUpdater::inspect`] found in a working tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeState {
    pub installed: bool,
    pub has_vcs: bool,
    /// Short commit, empty without version control
    pub commit: String,
    /// Version file contents, or the commit when absent
    pub version: String,
}

impl TreeState {
    /// Status payload for a tree on this host
    pub fn into_status(self, site_url: &str, auto_update: bool) -> StatusResponse {
        StatusResponse {
            site_url: site_url.to_string(),
            version: self.version,
            commit: self.commit,
            has_vcs: self.has_vcs,
            auto_update,
            runtime_version: version_info().version,
            host_version: sysinfo::System::long_os_version().unwrap_or_default(),
            checked_at: Utc::now(),
        }
    }
}

/// Self-update seam used by the scheduled worker
#[async_trait]
pub trait SelfUpdaterExt: Send + Sync {
    async fn update(&self, slug: &str, tree: &Path) -> DeployOutcome;
}

#[async_trait]
impl SelfUpdaterExt for SelfUpdater {
    async fn update(&self, slug: &str, tree: &Path) -> DeployOutcome {
        SelfUpdater::update(self, slug, tree).await
    }
}

/// Brings working trees to the tip of the canonical branch.
///
/// Updates against the same tree are serialized; distinct trees proceed
/// independently.
pub struct SelfUpdater {
    options: UpdateOptions,
    runner: Arc<dyn CommandRunner>,
    client: reqwest::Client,
    tree_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SelfUpdater {
    pub fn new(options: UpdateOptions, runner: Arc<dyn CommandRunner>) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(options.download_timeout)
            .build()?;

        Ok(Self {
            options,
            runner,
            client,
            tree_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    /// Gateway for `tree` sharing this updater's runner
    pub fn gateway(&self, tree: &Path) -> GitGateway {
        GitGateway::new(self.runner.clone(), tree, self.options.command_timeout)
    }

    async fn tree_lock(&self, tree: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.tree_locks.lock().await;
        locks
            .entry(tree.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Update `tree`, reporting the attempt under `slug`. Never returns an
    /// error; every failure is described by the outcome.
    pub async fn update(&self, slug: &str, tree: &Path) -> DeployOutcome {
        let git = self.gateway(tree);
        let method = if git.has_metadata() {
            DeployMethod::VcsReset
        } else {
            DeployMethod::ArchiveSwap
        };

        if let Err(reason) = validate_tree_path(tree) {
            return DeployOutcome::failed(slug, method, reason);
        }
        if !tree.is_dir() {
            return DeployOutcome::failed(
                slug,
                method,
                format!("working tree {} does not exist", tree.display()),
            );
        }

        let lock = self.tree_lock(tree).await;
        let _guard = lock.lock().await;

        let outcome = match method {
            DeployMethod::VcsReset => self.update_vcs(slug, &git).await,
            _ => self.update_archive(slug, tree).await,
        };

        if outcome.success {
            info!(
                slug = %outcome.slug,
                method = %outcome.method,
                before = ?outcome.before_version,
                after = ?outcome.after_version,
                "Self-update finished"
            );
        } else {
            warn!(slug = %outcome.slug, method = %outcome.method, "Self-update failed: {}", outcome.message);
        }
        outcome
    }

    async fn update_vcs(&self, slug: &str, git: &GitGateway) -> DeployOutcome {
        let remote = &self.options.remote;
        let branch = &self.options.branch;

        let (_, changed) = git.is_dirty().await;
        let tracked = changed.iter().filter(|line| !line.starts_with("??")).count();
        if tracked > 0 {
            return DeployOutcome::failed(
                slug,
                DeployMethod::VcsReset,
                format!(
                    "working tree has {} uncommitted change(s); refusing to reset",
                    tracked
                ),
            );
        }

        let before = git.current_commit(true).await;
        let reset = git.reset_hard_to_remote(remote, branch).await;
        let after = git.current_commit(true).await;

        if !reset.success && self.options.strict_vcs {
            return DeployOutcome::failed(
                slug,
                DeployMethod::VcsReset,
                format!(
                    "reset to {}/{} failed: {}",
                    remote,
                    branch,
                    first_line(&reset.output)
                ),
            );
        }

        let mut message = if before == after {
            format!("already at {}", after)
        } else {
            format!("updated {} -> {}", before, after)
        };
        if !reset.success {
            message.push_str(&format!(
                " (reset reported errors: {})",
                first_line(&reset.output)
            ));
        }

        DeployOutcome::succeeded(
            slug,
            DeployMethod::VcsReset,
            Some(before),
            Some(after),
            message,
        )
    }

    async fn update_archive(&self, slug: &str, tree: &Path) -> DeployOutcome {
        let Some(source) = &self.options.archive else {
            return DeployOutcome::failed(
                slug,
                DeployMethod::ArchiveSwap,
                "no archive source configured for a tree without version control",
            );
        };

        let version_file = &self.options.version_file;
        let before = archive::read_version(tree, version_file).await;

        let installed =
            match archive::swap(&self.client, source, &self.options.scratch_dir, tree).await {
                Ok(installed) => installed,
                Err(e) => return DeployOutcome::failed(slug, DeployMethod::ArchiveSwap, e.to_string()),
            };

        let (after, message) = match archive::read_version(tree, version_file).await {
            Some(version) => {
                let message = format!("installed {} from archive", version);
                (version, message)
            }
            None => {
                let message = format!(
                    "installed {} from archive, {} not found",
                    installed.root, version_file
                );
                (installed.root, message)
            }
        };

        DeployOutcome::succeeded(slug, DeployMethod::ArchiveSwap, before, Some(after), message)
    }

    /// Presence, version control state and version of `tree`
    pub async fn inspect(&self, tree: &Path) -> TreeState {
        if !tree.is_dir() {
            return TreeState::default();
        }

        let git = self.gateway(tree);
        let has_vcs = git.has_metadata();
        let commit = if has_vcs {
            git.current_commit(true).await
        } else {
            String::new()
        };
        let version = archive::read_version(tree, &self.options.version_file)
            .await
            .unwrap_or_else(|| commit.clone());

        TreeState {
            installed: true,
            has_vcs,
            commit,
            version,
        }
    }
}
