//! Secret-gated access to the control endpoint

pub mod secret;

pub use secret::{provided_secret, verify, DeploySecret};
