//! Site registry persistence

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::registry::site::SiteDescriptor;

/// Current on-disk schema
pub const SCHEMA_VERSION: u32 = 1;

/// Registered sites in insertion order, unique by slug
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sites(Vec<SiteDescriptor>);

impl Sites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.get(slug).is_some()
    }

    pub fn get(&self, slug: &str) -> Option<&SiteDescriptor> {
        self.0.iter().find(|s| s.slug == slug)
    }

    pub fn get_mut(&mut self, slug: &str) -> Option<&mut SiteDescriptor> {
        self.0.iter_mut().find(|s| s.slug == slug)
    }

    /// Append a site; slugs are unique
    pub fn insert(&mut self, site: SiteDescriptor) -> Result<(), AgentError> {
        if self.contains(&site.slug) {
            return Err(AgentError::ValidationError(format!(
                "site {} is already registered",
                site.slug
            )));
        }
        self.0.push(site);
        Ok(())
    }

    pub fn remove(&mut self, slug: &str) -> Option<SiteDescriptor> {
        let index = self.0.iter().position(|s| s.slug == slug)?;
        Some(self.0.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SiteDescriptor> {
        self.0.iter()
    }

    /// Enabled sites in registry order
    pub fn enabled(&self) -> impl Iterator<Item = &SiteDescriptor> {
        self.0.iter().filter(|s| s.enabled)
    }
}

impl FromIterator<SiteDescriptor> for Sites {
    fn from_iter<T: IntoIterator<Item = SiteDescriptor>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The registry as read at one point in time
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// Revision the snapshot was loaded at; a save must find the same
    /// revision on disk
    pub revision: u64,
    pub sites: Sites,
}

/// Whole-collection registry storage
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn load(&self) -> Result<RegistrySnapshot, AgentError>;

    /// Persist the snapshot, returning the new revision. Fails with
    /// [`AgentError::RegistryConflict`] when the stored revision moved on
    /// since the snapshot was loaded.
    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<u64, AgentError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryDocument {
    schema_version: u32,
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    sites: Sites,
}

/// Registry kept in a single JSON file, replaced atomically on save
pub struct FileRegistry {
    file: File,
    write_lock: Mutex<()>,
}

impl FileRegistry {
    pub fn new(file: File) -> Self {
        Self {
            file,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    async fn read_document(&self) -> Result<RegistryDocument, AgentError> {
        if !self.file.exists().await {
            debug!("No registry at {:?}, starting empty", self.file.path());
            return Ok(RegistryDocument {
                schema_version: SCHEMA_VERSION,
                revision: 0,
                sites: Sites::new(),
            });
        }

        let document: RegistryDocument = self.file.read_json().await.map_err(|e| {
            AgentError::RegistryError(format!("failed to read {:?}: {}", self.file.path(), e))
        })?;

        if document.schema_version > SCHEMA_VERSION {
            return Err(AgentError::RegistryError(format!(
                "unsupported registry schema version {}",
                document.schema_version
            )));
        }
        Ok(document)
    }
}

#[async_trait]
impl RegistryStore for FileRegistry {
    async fn load(&self) -> Result<RegistrySnapshot, AgentError> {
        let document = self.read_document().await?;

        let mut sites = Sites::new();
        for site in document.sites.0 {
            site.validate()
                .map_err(|e| AgentError::RegistryError(format!("corrupt entry: {}", e)))?;
            sites
                .insert(site)
                .map_err(|e| AgentError::RegistryError(format!("corrupt registry: {}", e)))?;
        }

        Ok(RegistrySnapshot {
            revision: document.revision,
            sites,
        })
    }

    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<u64, AgentError> {
        let _guard = self.write_lock.lock().await;

        let found = self.read_document().await?.revision;
        if found != snapshot.revision {
            return Err(AgentError::RegistryConflict {
                loaded: snapshot.revision,
                found,
            });
        }

        let revision = found + 1;
        let document = RegistryDocument {
            schema_version: SCHEMA_VERSION,
            revision,
            sites: snapshot.sites.clone(),
        };
        self.file.write_json_private(&document).await?;

        info!(
            "Saved {} site(s) to registry at revision {}",
            snapshot.sites.len(),
            revision
        );
        Ok(revision)
    }
}
