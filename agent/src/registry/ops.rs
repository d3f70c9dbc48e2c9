//! Operator registry management

use std::path::PathBuf;

use tracing::info;

use crate::auth::DeploySecret;
use crate::errors::AgentError;
use crate::registry::site::{slug_from_url, validate_slug, SiteDescriptor, SiteKind};
use crate::registry::store::{RegistryStore, Sites};

/// Request to register a site
#[derive(Debug, Clone)]
pub struct NewSite {
    pub kind: SiteKind,
    pub url: Option<String>,
    /// Derived from `url` when absent
    pub slug: Option<String>,
    /// Defaults to the slug
    pub label: Option<String>,
    pub local_path: Option<PathBuf>,
}

/// Register a site. REMOTE sites get a freshly generated deploy secret,
/// which the caller must hand to the target instance.
pub async fn add_site(store: &dyn RegistryStore, new: NewSite) -> Result<SiteDescriptor, AgentError> {
    let url = new
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());

    let slug = match (new.slug, &url) {
        (Some(slug), _) => slug.trim().to_lowercase(),
        (None, Some(url)) => slug_from_url(url),
        (None, None) => {
            return Err(AgentError::ValidationError(
                "a slug or url is required".to_string(),
            ))
        }
    };
    validate_slug(&slug)?;

    if let Some(path) = &new.local_path {
        let is_dir = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(AgentError::ValidationError(format!(
                "local path {} is not a directory",
                path.display()
            )));
        }
    }

    let label = new
        .label
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| slug.clone());

    let site = match new.kind {
        SiteKind::Remote => {
            if new.local_path.is_some() {
                return Err(AgentError::ValidationError(
                    "remote sites do not take a local path".to_string(),
                ));
            }
            let url = url.ok_or_else(|| {
                AgentError::ValidationError("remote sites require a url".to_string())
            })?;
            SiteDescriptor::remote(slug, label, url, DeploySecret::generate())?
        }
        SiteKind::Local => SiteDescriptor::local(slug, label, url, new.local_path)?,
    };

    let mut snapshot = store.load().await?;
    snapshot.sites.insert(site.clone())?;
    store.save(&snapshot).await?;

    info!(slug = %site.slug, kind = %site.kind, "Registered site");
    Ok(site)
}

/// Remove a site permanently
pub async fn remove_site(store: &dyn RegistryStore, slug: &str) -> Result<SiteDescriptor, AgentError> {
    let mut snapshot = store.load().await?;
    let removed = snapshot
        .sites
        .remove(slug)
        .ok_or_else(|| AgentError::UnknownSite(slug.to_string()))?;
    store.save(&snapshot).await?;

    info!(slug = %slug, "Removed site");
    Ok(removed)
}

/// Enable or disable a site for fan-out
pub async fn set_enabled(
    store: &dyn RegistryStore,
    slug: &str,
    enabled: bool,
) -> Result<SiteDescriptor, AgentError> {
    let mut snapshot = store.load().await?;
    let site = snapshot
        .sites
        .get_mut(slug)
        .ok_or_else(|| AgentError::UnknownSite(slug.to_string()))?;

    if site.enabled == enabled {
        return Ok(site.clone());
    }
    site.enabled = enabled;
    let updated = site.clone();
    store.save(&snapshot).await?;

    info!(slug = %slug, enabled, "Updated site");
    Ok(updated)
}

/// All registered sites in registry order
pub async fn list(store: &dyn RegistryStore) -> Result<Sites, AgentError> {
    Ok(store.load().await?.sites)
}
