//! Client for peer control endpoints

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use control_api::{PullResponse, StatusResponse, PULL_ROUTE, SECRET_HEADER, STATUS_ROUTE};

use crate::errors::AgentError;
use crate::models::deployment::{DeployMethod, DeployOutcome};
use crate::registry::site::SiteDescriptor;
use crate::storage::settings::RemoteSettings;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Peer client options
#[derive(Debug, Clone)]
pub struct PeerClientOptions {
    /// Pulls may run an archive swap on the peer before answering
    pub pull_timeout: Duration,
    pub status_timeout: Duration,
    /// Extra attempts for pulls that never reached the peer
    pub max_retries: u32,
    pub backoff: CooldownOptions,
}

impl PeerClientOptions {
    pub fn from_settings(settings: &RemoteSettings) -> Self {
        Self {
            pull_timeout: Duration::from_secs(settings.pull_timeout_secs),
            status_timeout: Duration::from_secs(settings.status_timeout_secs),
            max_retries: settings.max_retries,
            backoff: CooldownOptions::default(),
        }
    }
}

impl Default for PeerClientOptions {
    fn default() -> Self {
        Self::from_settings(&RemoteSettings::default())
    }
}

/// Issues authenticated pull and status calls to REMOTE sites
pub struct PeerClient {
    client: Client,
    options: PeerClientOptions,
}

impl PeerClient {
    pub fn new(options: PeerClientOptions) -> Result<Self, AgentError> {
        let client = Client::builder()
            .user_agent(concat!("fleetsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, options })
    }

    fn authorized(&self, request: RequestBuilder, site: &SiteDescriptor) -> RequestBuilder {
        let secret = site.deploy_secret.expose();
        request
            .header(SECRET_HEADER, secret)
            .header(header::AUTHORIZATION, format!("Bearer {}", secret))
    }

    /// Ask the site to update itself. Transport failures, rejections and
    /// peer-reported failures all come back as failed outcomes.
    pub async fn trigger_pull(&self, site: &SiteDescriptor) -> DeployOutcome {
        let url = format!("{}{}", site.base_url(), PULL_ROUTE);
        debug!("POST {} for {}", url, site.slug);

        let mut attempt = 0;
        let response = loop {
            let request = self.authorized(
                self.client.post(&url).timeout(self.options.pull_timeout),
                site,
            );
            match request.send().await {
                Ok(response) => break response,
                Err(e) if e.is_connect() && attempt < self.options.max_retries => {
                    let delay = calc_exp_backoff(&self.options.backoff, attempt);
                    warn!(
                        slug = %site.slug,
                        "Could not reach peer (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return DeployOutcome::failed(
                        &site.slug,
                        DeployMethod::RemotePing,
                        format!("{}: {}", site.slug, describe_transport_error(&e)),
                    );
                }
            }
        };

        pull_outcome(site, response).await
    }

    /// Advisory status of the site; `None` on any failure
    pub async fn fetch_status(&self, site: &SiteDescriptor) -> Option<StatusResponse> {
        let url = format!("{}{}", site.base_url(), STATUS_ROUTE);
        debug!("GET {} for {}", url, site.slug);

        let request = self.authorized(
            self.client.get(&url).timeout(self.options.status_timeout),
            site,
        );
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(slug = %site.slug, "Status request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(slug = %site.slug, "Status request returned {}", response.status());
            return None;
        }

        match response.json::<StatusResponse>().await {
            Ok(status) => Some(status),
            Err(e) => {
                debug!(slug = %site.slug, "Unreadable status payload: {}", e);
                None
            }
        }
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("could not connect: {}", e)
    } else {
        format!("request failed: {}", e)
    }
}

async fn pull_outcome(site: &SiteDescriptor, response: Response) -> DeployOutcome {
    let status = response.status();
    let slug = site.slug.as_str();

    if status == StatusCode::FORBIDDEN {
        return DeployOutcome::failed(slug, DeployMethod::RemotePing, "authentication rejected by peer");
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            return DeployOutcome::failed(
                slug,
                DeployMethod::RemotePing,
                format!("{}: failed to read response: {}", slug, e),
            )
        }
    };

    let parsed: PullResponse = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(_) => {
            return DeployOutcome::failed(
                slug,
                DeployMethod::RemotePing,
                format!("{}: unexpected response (HTTP {})", slug, status.as_u16()),
            )
        }
    };

    if !parsed.success || !status.is_success() {
        let error = parsed
            .error
            .unwrap_or_else(|| format!("peer reported failure (HTTP {})", status.as_u16()));
        return DeployOutcome::failed(slug, DeployMethod::RemotePing, format!("{}: {}", slug, error));
    }

    let via = parsed
        .method
        .map(|m| m.as_str())
        .unwrap_or("unknown method");
    let message = match (&parsed.after, parsed.updated) {
        (Some(after), Some(true)) => format!("updated to {} via {}", after, via),
        (Some(after), _) => format!("already at {}", after),
        (None, _) => format!("pulled via {}", via),
    };

    DeployOutcome::succeeded(slug, DeployMethod::RemotePing, parsed.before, parsed.after, message)
}
