//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::deploy::orchestrator::{DeployConfig, Orchestrator};
use crate::errors::AgentError;
use crate::http::client::{PeerClient, PeerClientOptions};
use crate::registry::store::{FileRegistry, RegistryStore};
use crate::server::state::{InstanceOptions, ServerState};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::update::executor::{SelfUpdater, UpdateOptions};
use crate::vcs::git::GitGateway;
use crate::vcs::process::{CommandRunner, SystemRunner};

/// Main application state
pub struct AppState {
    /// This instance's identity and secret
    pub instance: InstanceOptions,

    /// Self-update executor shared by the endpoint, the worker and LOCAL dispatch
    pub updater: Arc<SelfUpdater>,

    /// Site registry
    pub registry: Arc<dyn RegistryStore>,

    /// Fleet deploy orchestrator
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Initialize application state with real processes and the on-disk
    /// registry
    pub fn init(settings: &Settings, layout: &StorageLayout) -> Result<Self, AgentError> {
        Self::with_runner(settings, layout, Arc::new(SystemRunner))
    }

    pub fn with_runner(
        settings: &Settings,
        layout: &StorageLayout,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        let instance = InstanceOptions::from_settings(settings);

        let updater = Arc::new(SelfUpdater::new(
            UpdateOptions::from_settings(settings, layout),
            runner.clone(),
        )?);

        let peers = Arc::new(PeerClient::new(PeerClientOptions::from_settings(
            &settings.remote,
        ))?);

        let registry: Arc<dyn RegistryStore> =
            Arc::new(FileRegistry::new(layout.registry_file()));

        let workbench = GitGateway::new(
            runner,
            instance.working_tree.clone(),
            Duration::from_secs(settings.local.command_timeout_secs),
        );

        let orchestrator = Arc::new(Orchestrator::new(
            DeployConfig::from_settings(settings),
            workbench,
            updater.clone(),
            peers,
            registry.clone(),
        ));

        Ok(Self {
            instance,
            updater,
            registry,
            orchestrator,
        })
    }

    /// State for the control endpoint handlers
    pub fn server_state(&self) -> ServerState {
        ServerState::new(self.instance.clone(), self.updater.clone())
    }
}
