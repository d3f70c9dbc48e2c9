//! Deployment and repository models

pub mod deployment;
pub mod repo;

pub use deployment::{DeployMethod, DeployOutcome, DeployReport};
pub use repo::CanonicalRepoState;
