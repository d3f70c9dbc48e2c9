//! Control endpoint models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an instance brought itself to the canonical tip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMethod {
    Vcs,
    Archive,
}

impl UpdateMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMethod::Vcs => "vcs",
            UpdateMethod::Archive => "archive",
        }
    }
}

/// Response to `POST /deploy/pull`
///
/// Successful pulls carry `method`, `after` and `updated`; failed pulls
/// carry only `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<UpdateMethod>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PullResponse {
    pub fn succeeded(
        method: UpdateMethod,
        before: Option<String>,
        after: String,
        updated: bool,
    ) -> Self {
        Self {
            success: true,
            method: Some(method),
            before,
            after: Some(after),
            updated: Some(updated),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            method: None,
            before: None,
            after: None,
            updated: None,
            error: Some(error.into()),
        }
    }
}

/// Response to `GET /deploy/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub site_url: String,
    pub version: String,
    pub commit: String,
    pub has_vcs: bool,
    pub auto_update: bool,
    pub runtime_version: String,
    pub host_version: String,
    pub checked_at: DateTime<Utc>,
}

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}
