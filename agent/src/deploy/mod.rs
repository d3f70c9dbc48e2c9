//! Fleet deploys driven from the workbench

pub mod orchestrator;

pub use orchestrator::{DeployConfig, DeployTarget, Orchestrator, SiteStatus};
