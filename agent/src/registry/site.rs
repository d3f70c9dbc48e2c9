//! Site descriptors

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use control_api::StatusResponse;

use crate::auth::DeploySecret;
use crate::errors::AgentError;
use crate::models::deployment::DeployOutcome;

/// How the orchestrator reaches a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SiteKind {
    /// Shares a filesystem with the workbench, or is reachable through the
    /// host deploy script
    Local,
    /// Reachable only through its control endpoint
    Remote,
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteKind::Local => f.pad("LOCAL"),
            SiteKind::Remote => f.pad("REMOTE"),
        }
    }
}

/// A registered deployment target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteDescriptor {
    /// Unique key, fixed at creation
    pub slug: String,

    pub kind: SiteKind,

    /// Control endpoint base URL for REMOTE sites, descriptive for LOCAL ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    pub label: String,

    /// Disabled sites are skipped by fan-out
    pub enabled: bool,

    /// Secret the site's control endpoint expects
    #[serde(default)]
    pub deploy_secret: DeploySecret,

    /// Working tree of a LOCAL site
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,

    /// Last successful deploy
    #[serde(default)]
    pub last_deploy_at: Option<DateTime<Utc>>,

    /// Version reached by the last successful deploy
    #[serde(default)]
    pub last_known_version: Option<String>,

    /// Last status the site reported; advisory and possibly stale
    #[serde(default)]
    pub last_status_snapshot: Option<StatusResponse>,

    pub created_at: DateTime<Utc>,
}

impl SiteDescriptor {
    /// A LOCAL site, deployed through `local_path` or the host deploy script
    pub fn local(
        slug: impl Into<String>,
        label: impl Into<String>,
        url: Option<String>,
        local_path: Option<PathBuf>,
    ) -> Result<Self, AgentError> {
        let site = Self {
            slug: slug.into(),
            kind: SiteKind::Local,
            url: url.filter(|u| !u.trim().is_empty()),
            label: label.into(),
            enabled: true,
            deploy_secret: DeploySecret::default(),
            local_path,
            last_deploy_at: None,
            last_known_version: None,
            last_status_snapshot: None,
            created_at: Utc::now(),
        };
        site.validate()?;
        Ok(site)
    }

    /// A REMOTE site reached at `url` with `deploy_secret`
    pub fn remote(
        slug: impl Into<String>,
        label: impl Into<String>,
        url: impl Into<String>,
        deploy_secret: DeploySecret,
    ) -> Result<Self, AgentError> {
        let site = Self {
            slug: slug.into(),
            kind: SiteKind::Remote,
            url: Some(url.into().trim().trim_end_matches('/').to_string()),
            label: label.into(),
            enabled: true,
            deploy_secret,
            local_path: None,
            last_deploy_at: None,
            last_known_version: None,
            last_status_snapshot: None,
            created_at: Utc::now(),
        };
        site.validate()?;
        Ok(site)
    }

    /// Check the descriptor invariants
    pub fn validate(&self) -> Result<(), AgentError> {
        validate_slug(&self.slug)?;

        if self.kind == SiteKind::Remote {
            let url = self.url.as_deref().unwrap_or("");
            if url.is_empty() {
                return Err(AgentError::ValidationError(format!(
                    "remote site {} has no url",
                    self.slug
                )));
            }
            let parsed = url::Url::parse(url).map_err(|e| {
                AgentError::ValidationError(format!("remote site {} url {:?}: {}", self.slug, url, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AgentError::ValidationError(format!(
                    "remote site {} url must be http or https",
                    self.slug
                )));
            }
            if self.deploy_secret.is_empty() {
                return Err(AgentError::ValidationError(format!(
                    "remote site {} has no deploy secret",
                    self.slug
                )));
            }
        }

        if let Some(path) = &self.local_path {
            if !path.is_absolute() {
                return Err(AgentError::ValidationError(format!(
                    "local path for {} must be absolute",
                    self.slug
                )));
            }
        }
        Ok(())
    }

    /// Control endpoint base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.url.as_deref().unwrap_or("").trim_end_matches('/')
    }

    /// Fold a deploy outcome into the last-known-good fields. Failed
    /// outcomes leave them untouched.
    pub fn record_outcome(&mut self, outcome: &DeployOutcome, at: DateTime<Utc>) {
        if !outcome.success {
            return;
        }
        self.last_deploy_at = Some(at);
        if let Some(version) = outcome.after_version.as_ref().filter(|v| !v.is_empty()) {
            self.last_known_version = Some(version.clone());
        }
    }
}

/// Reject slugs outside `[a-z0-9_-]`
pub fn validate_slug(slug: &str) -> Result<(), AgentError> {
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid {
        return Err(AgentError::ValidationError(format!(
            "invalid site slug {:?}",
            slug
        )));
    }
    Ok(())
}

/// Derive a slug from a site URL: lower-cased, scheme and leading `www.`
/// stripped, dots turned into hyphens, everything else outside the slug
/// charset collapsed into single hyphens.
pub fn slug_from_url(url: &str) -> String {
    let lower = url.trim().to_lowercase();
    let without_scheme = lower
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&lower);
    let host_and_path = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);

    let mut slug = String::with_capacity(host_and_path.len());
    for c in host_and_path.chars() {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            c
        } else {
            '-'
        };
        if mapped == '-' && (slug.is_empty() || slug.ends_with('-')) {
            continue;
        }
        slug.push(mapped);
    }
    slug.trim_end_matches('-').to_string()
}
