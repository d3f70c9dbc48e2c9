//! fleetsync
//!
//! Keeps a fleet of sites at the tip of one canonical branch. The
//! workbench instance commits, pushes and fans a deploy out to every
//! registered site; every instance exposes a secret-gated control endpoint
//! that updates its own working tree on request and once a day.

pub mod app;
pub mod auth;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod registry;
pub mod server;
pub mod storage;
pub mod update;
pub mod utils;
pub mod vcs;
pub mod workers;
