//! Outbound HTTP to peer instances

pub mod client;

pub use client::{PeerClient, PeerClientOptions};
