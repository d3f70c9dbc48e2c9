//! Server state

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::DeploySecret;
use crate::models::deployment::{DeployMethod, DeployOutcome};
use crate::storage::settings::Settings;
use crate::update::executor::SelfUpdater;

/// What the control endpoint knows about its own instance
#[derive(Debug, Clone)]
pub struct InstanceOptions {
    /// Public URL reported by the status route
    pub site_url: String,

    /// Tree a pull updates
    pub working_tree: PathBuf,

    /// Secret callers must present
    pub deploy_secret: DeploySecret,

    /// The workbench pushes; it never resets its own tree
    pub is_workbench: bool,

    /// Whether the scheduled self-update is on
    pub auto_update: bool,

    /// Version file inside the working tree
    pub version_file: String,
}

impl InstanceOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            site_url: settings.instance.site_url.clone(),
            working_tree: settings.instance.working_tree.clone(),
            deploy_secret: settings.instance.deploy_secret.clone(),
            is_workbench: settings.instance.is_workbench,
            auto_update: settings.instance.auto_update && !settings.instance.is_workbench,
            version_file: settings.canonical.version_file.clone(),
        }
    }

    /// Failed outcome for a self-update this instance must not run
    pub fn refuse_self_update(&self, slug: &str) -> Option<DeployOutcome> {
        self.is_workbench.then(|| {
            DeployOutcome::failed(
                slug,
                DeployMethod::VcsReset,
                "refusing to update the workbench; it pushes and does not pull",
            )
        })
    }
}

/// Server state shared across handlers
pub struct ServerState {
    pub instance: InstanceOptions,
    pub updater: Arc<SelfUpdater>,
}

impl ServerState {
    pub fn new(instance: InstanceOptions, updater: Arc<SelfUpdater>) -> Self {
        Self { instance, updater }
    }
}
