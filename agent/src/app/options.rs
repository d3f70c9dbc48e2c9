//! Application configuration options

use std::time::Duration;

use crate::storage::settings::Settings;
use crate::workers::auto_update;

/// Options for a long-running `serve` process
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Run the scheduled self-update worker; off on the workbench, whose
    /// tree holds unpushed work
    pub enable_auto_update: bool,

    /// Auto-update worker options
    pub auto_update: auto_update::Options,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            enable_auto_update: settings.instance.auto_update && !settings.instance.is_workbench,
            auto_update: auto_update::Options::from_settings(
                &settings.scheduler,
                settings.instance.working_tree.clone(),
            ),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Control endpoint options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
