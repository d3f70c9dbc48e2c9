//! Registry of deployment targets

pub mod ops;
pub mod site;
pub mod store;

pub use site::{slug_from_url, SiteDescriptor, SiteKind};
pub use store::{FileRegistry, RegistrySnapshot, RegistryStore, Sites};
