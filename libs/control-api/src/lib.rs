//! Control endpoint wire contract
//!
//! Shared by the endpoint handlers and the remote deploy client so both
//! sides of a pull agree on routes, headers and payload shapes.

pub mod models;

pub use models::*;

/// Route that triggers a self-update on the receiving instance
pub const PULL_ROUTE: &str = "/deploy/pull";

/// Route that reports the receiving instance's current version
pub const STATUS_ROUTE: &str = "/deploy/status";

/// Header carrying the shared deploy secret
pub const SECRET_HEADER: &str = "X-Deploy-Secret";

/// Query or body parameter carrying the shared deploy secret
pub const SECRET_PARAM: &str = "secret";
