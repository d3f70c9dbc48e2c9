//! Bringing a working tree to the canonical tip

pub mod archive;
pub mod executor;

pub use archive::ArchiveSource;
pub use executor::{SelfUpdater, SelfUpdaterExt, TreeState, UpdateOptions, SELF_SLUG};
