//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::DeploySecret;
use crate::logs::LogLevel;

/// Agent settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// This instance's own identity and working tree
    #[serde(default)]
    pub instance: InstanceSettings,

    /// Canonical remote every deploy converges on
    #[serde(default)]
    pub canonical: CanonicalSettings,

    /// Control endpoint bind address
    #[serde(default)]
    pub server: ServerSettings,

    /// Calls to remote control endpoints
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Deploys to sites sharing this host
    #[serde(default)]
    pub local: LocalSettings,

    /// Self-update behaviour
    #[serde(default)]
    pub update: UpdateSettings,

    /// Scheduled self-update
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

fn default_true() -> bool {
    true
}

/// Instance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSettings {
    /// Public URL of this instance, reported by the status route
    #[serde(default)]
    pub site_url: String,

    /// Working tree this instance runs from and updates in place
    #[serde(default = "default_working_tree")]
    pub working_tree: PathBuf,

    /// Secret callers must present to the control endpoint
    #[serde(default)]
    pub deploy_secret: DeploySecret,

    /// Whether this instance is the workbench that pushes and fans out
    #[serde(default)]
    pub is_workbench: bool,

    /// Run the scheduled self-update; never honoured on the workbench
    #[serde(default)]
    pub auto_update: bool,
}

fn default_working_tree() -> PathBuf {
    PathBuf::from("/srv/app")
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            working_tree: default_working_tree(),
            deploy_secret: DeploySecret::default(),
            is_workbench: false,
            auto_update: false,
        }
    }
}

/// Canonical remote settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalSettings {
    /// Remote name in the working tree
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Remote URL, used to derive the archive location
    #[serde(default)]
    pub remote_url: String,

    /// Canonical branch
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Explicit archive URL, overriding the derived one
    #[serde(default)]
    pub archive_url: Option<String>,

    /// Expected top-level directory inside the archive
    #[serde(default)]
    pub archive_root: Option<String>,

    /// File in the working tree holding the version identifier
    #[serde(default = "default_version_file")]
    pub version_file: String,

    /// Commit message used when the workbench tree is dirty
    #[serde(default = "default_commit_message")]
    pub default_commit_message: String,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_version_file() -> String {
    "VERSION".to_string()
}

fn default_commit_message() -> String {
    "chore: workbench auto-commit".to_string()
}

impl Default for CanonicalSettings {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            remote_url: String::new(),
            branch: default_branch(),
            archive_url: None,
            archive_root: None,
            version_file: default_version_file(),
            default_commit_message: default_commit_message(),
        }
    }
}

/// Control endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Remote control endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Timeout for a pull; the peer may be downloading an archive
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,

    /// Timeout for an advisory status query
    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,

    /// Retries for pulls that never reached the peer
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Covers a peer running every git step of an update at the command
/// timeout, or an archive download and swap
fn default_pull_timeout() -> u64 {
    900
}

fn default_status_timeout() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    2
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            pull_timeout_secs: default_pull_timeout(),
            status_timeout_secs: default_status_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Local deploy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Helper script invoked as `<script> <slug>` for LOCAL sites without a path
    #[serde(default)]
    pub deploy_script: Option<PathBuf>,

    /// Timeout for each version control or helper invocation
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    120
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            deploy_script: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Self-update settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Fail a version control update whose reset exits non-zero
    #[serde(default = "default_true")]
    pub strict_vcs: bool,

    /// Timeout for downloading the canonical archive
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

fn default_download_timeout() -> u64 {
    120
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            strict_vcs: true,
            download_timeout_secs: default_download_timeout(),
        }
    }
}

/// Scheduled self-update settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Interval between scheduled self-updates
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Delay before the first scheduled self-update
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
}

fn default_interval() -> u64 {
    86_400
}

fn default_initial_delay() -> u64 {
    60
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            initial_delay_secs: default_initial_delay(),
        }
    }
}

impl SchedulerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}
