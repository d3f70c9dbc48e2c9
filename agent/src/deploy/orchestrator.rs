//! Deploy orchestrator
//!
//! Drives the workbench's "commit, push, then fan out" workflow and the
//! push-less redeploy of one or all sites. Fan-out is sequential in
//! registry order; one site's failure never stops the others, while a
//! failed commit or push stops the run before any site is touched.
//! Outcomes are collected first and the registry is written once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use control_api::StatusResponse;

use crate::errors::AgentError;
use crate::http::client::PeerClient;
use crate::models::deployment::{DeployMethod, DeployOutcome, DeployReport};
use crate::models::repo::CanonicalRepoState;
use crate::registry::site::{SiteDescriptor, SiteKind};
use crate::registry::store::RegistryStore;
use crate::storage::settings::Settings;
use crate::update::executor::SelfUpdater;
use crate::utils::first_line;
use crate::vcs::git::{GitGateway, UNKNOWN};
use crate::vcs::process::CommandSpec;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Canonical remote name
    pub remote: String,

    /// Canonical branch
    pub branch: String,

    /// Commit message when none is supplied for a dirty workbench
    pub default_commit_message: String,

    /// Helper invoked as `<script> <slug>` for LOCAL sites without a path
    pub deploy_script: Option<PathBuf>,

    /// Timeout for the helper script
    pub command_timeout: Duration,
}

impl DeployConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            remote: settings.canonical.remote.clone(),
            branch: settings.canonical.branch.clone(),
            default_commit_message: settings.canonical.default_commit_message.clone(),
            deploy_script: settings.local.deploy_script.clone(),
            command_timeout: Duration::from_secs(settings.local.command_timeout_secs),
        }
    }
}

/// Sites a deploy run targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployTarget {
    /// Every enabled site
    All,
    /// One site by slug, enabled or not
    Site(String),
}

/// Status of one site next to the workbench
#[derive(Debug, Clone)]
pub struct SiteStatus {
    pub slug: String,
    pub kind: SiteKind,
    /// `None` when the site could not be queried or has no tree on this host
    pub status: Option<StatusResponse>,
    /// Whether the site runs the workbench commit; `None` when either side
    /// has no known commit
    pub in_sync: Option<bool>,
}

pub struct Orchestrator {
    config: DeployConfig,
    git: GitGateway,
    updater: Arc<SelfUpdater>,
    peers: Arc<PeerClient>,
    store: Arc<dyn RegistryStore>,
    run_lock: Mutex<()>,
}

impl Orchestrator {
    /// `git` operates on the workbench's own working tree
    pub fn new(
        config: DeployConfig,
        git: GitGateway,
        updater: Arc<SelfUpdater>,
        peers: Arc<PeerClient>,
        store: Arc<dyn RegistryStore>,
    ) -> Self {
        Self {
            config,
            git,
            updater,
            peers,
            store,
            run_lock: Mutex::new(()),
        }
    }

    /// Current state of the workbench tree against the canonical branch
    pub async fn repo_state(&self) -> CanonicalRepoState {
        self.git.snapshot(&self.config.remote, &self.config.branch).await
    }

    /// Commit pending workbench changes, push to the canonical branch, and
    /// deploy every enabled site
    pub async fn push_and_deploy_all(
        &self,
        commit_message: Option<String>,
    ) -> Result<DeployReport, AgentError> {
        let _run = self.run_lock.lock().await;
        let mut report = DeployReport::default();
        let remote = &self.config.remote;
        let branch = &self.config.branch;

        let (dirty, paths) = self.git.is_dirty().await;
        if dirty {
            let message = commit_message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| self.config.default_commit_message.clone());

            let commit = self.git.commit_all(&message).await;
            if !commit.success {
                report.aborted = Some(format!("commit failed: {}", first_line(&commit.output)));
                warn!("Aborting deploy: workbench commit failed");
                return Ok(report);
            }
            report.note(format!("✓ Committed {} change(s): {}", paths.len(), message));
        }

        let push = self.git.push(remote, branch).await;
        if !push.success {
            report.aborted = Some(format!(
                "push to {}/{} failed: {}",
                remote,
                branch,
                first_line(&push.output)
            ));
            warn!("Aborting deploy: push to {}/{} failed", remote, branch);
            return Ok(report);
        }
        report.note(format!("✓ Pushed to {}/{}", remote, branch));

        self.fan_out(DeployTarget::All, report).await
    }

    /// Deploy one or all sites without committing or pushing
    pub async fn deploy(&self, target: DeployTarget) -> Result<DeployReport, AgentError> {
        let _run = self.run_lock.lock().await;
        self.fan_out(target, DeployReport::default()).await
    }

    async fn fan_out(
        &self,
        target: DeployTarget,
        mut report: DeployReport,
    ) -> Result<DeployReport, AgentError> {
        let mut snapshot = self.store.load().await?;

        let sites: Vec<SiteDescriptor> = match &target {
            DeployTarget::All => snapshot.sites.enabled().cloned().collect(),
            DeployTarget::Site(slug) => match snapshot.sites.get(slug) {
                Some(site) => vec![site.clone()],
                None => {
                    report.aborted = Some(format!("unknown site: {}", slug));
                    return Ok(report);
                }
            },
        };

        if sites.is_empty() {
            report.note("No enabled sites to deploy");
            return Ok(report);
        }

        for site in &sites {
            info!(slug = %site.slug, kind = %site.kind, "Deploying site");
            let outcome = self.dispatch(site).await;
            if !outcome.success {
                warn!(slug = %site.slug, "Deploy failed: {}", outcome.message);
            }
            report.outcomes.push(outcome);
        }

        let finished_at = Utc::now();
        for outcome in &report.outcomes {
            if let Some(site) = snapshot.sites.get_mut(&outcome.slug) {
                site.record_outcome(outcome, finished_at);
            }
        }

        if let Err(e) = self.store.save(&snapshot).await {
            error!("Failed to record deploy outcomes: {}", e);
            report.registry_error = Some(e.to_string());
        }

        info!(
            "Deploy finished: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }

    async fn dispatch(&self, site: &SiteDescriptor) -> DeployOutcome {
        match site.kind {
            SiteKind::Remote => self.peers.trigger_pull(site).await,
            SiteKind::Local => match (&site.local_path, &self.config.deploy_script) {
                (Some(path), _) => self.updater.update(&site.slug, path).await,
                (None, Some(script)) => self.run_deploy_script(script, &site.slug).await,
                (None, None) => DeployOutcome::failed(
                    &site.slug,
                    DeployMethod::Script,
                    "no local path or deploy script configured",
                ),
            },
        }
    }

    async fn run_deploy_script(&self, script: &Path, slug: &str) -> DeployOutcome {
        let spec = CommandSpec::new(
            script.to_string_lossy().into_owned(),
            [slug],
            self.config.command_timeout,
        )
        .in_dir(self.git.tree());

        let output = self.git.runner().run(&spec).await;
        if !output.success() {
            let status = match output.exit_code {
                Some(code) => format!("exited with {}", code),
                None if output.timed_out => "timed out".to_string(),
                None => "did not run".to_string(),
            };
            return DeployOutcome::failed(
                slug,
                DeployMethod::Script,
                format!("deploy script {}: {}", status, first_line(&output.combined())),
            );
        }

        let version = self.git.current_commit(true).await;
        DeployOutcome::succeeded(
            slug,
            DeployMethod::Script,
            None,
            Some(version.clone()),
            format!("deploy script finished at {}", version),
        )
    }

    /// Query every site's status, compare it with the workbench commit and
    /// record the answers. REMOTE sites are asked over their control
    /// endpoint; LOCAL sites with a path are inspected in place.
    pub async fn refresh_statuses(&self) -> Result<Vec<SiteStatus>, AgentError> {
        let _run = self.run_lock.lock().await;
        let mut snapshot = self.store.load().await?;
        if snapshot.sites.is_empty() {
            return Ok(Vec::new());
        }

        let workbench = self.git.current_commit(true).await;
        let sites: Vec<SiteDescriptor> = snapshot.sites.iter().cloned().collect();

        let mut statuses = Vec::with_capacity(sites.len());
        for site in &sites {
            let status = match (site.kind, &site.local_path) {
                (SiteKind::Remote, _) => self.peers.fetch_status(site).await,
                (SiteKind::Local, Some(path)) => {
                    let tree = self.updater.inspect(path).await;
                    if tree.installed {
                        Some(tree.into_status(site.url.as_deref().unwrap_or(""), false))
                    } else {
                        None
                    }
                }
                (SiteKind::Local, None) => None,
            };
            if status.is_none() {
                warn!(slug = %site.slug, "Status unavailable");
            }

            let in_sync = status
                .as_ref()
                .and_then(|status| same_commit(&status.commit, &workbench));
            statuses.push(SiteStatus {
                slug: site.slug.clone(),
                kind: site.kind,
                status,
                in_sync,
            });
        }

        for entry in &statuses {
            let (Some(site), Some(status)) = (snapshot.sites.get_mut(&entry.slug), &entry.status)
            else {
                continue;
            };
            if !status.commit.is_empty() {
                site.last_known_version = Some(status.commit.clone());
            }
            site.last_status_snapshot = Some(status.clone());
        }

        self.store.save(&snapshot).await?;
        Ok(statuses)
    }
}

/// Compare short hashes, which git may abbreviate to different lengths
fn same_commit(reported: &str, workbench: &str) -> Option<bool> {
    let known = |commit: &str| !commit.is_empty() && commit != UNKNOWN;
    if !known(reported) || !known(workbench) {
        return None;
    }
    Some(reported.starts_with(workbench) || workbench.starts_with(reported))
}
