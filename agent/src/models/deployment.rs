//! Deployment models

use std::fmt;

use serde::{Deserialize, Serialize};

use control_api::UpdateMethod;

/// How a site was brought to the canonical tip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMethod {
    /// Fetch and hard reset of a local working tree
    VcsReset,
    /// Downloaded archive copied over a working tree
    ArchiveSwap,
    /// Pull triggered on a remote control endpoint
    RemotePing,
    /// Host helper script for a LOCAL site without a path
    Script,
}

impl DeployMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployMethod::VcsReset => "vcs_reset",
            DeployMethod::ArchiveSwap => "archive_swap",
            DeployMethod::RemotePing => "remote_ping",
            DeployMethod::Script => "script",
        }
    }

    /// Method as reported on the control endpoint wire
    pub fn wire(&self) -> Option<UpdateMethod> {
        match self {
            DeployMethod::VcsReset => Some(UpdateMethod::Vcs),
            DeployMethod::ArchiveSwap => Some(UpdateMethod::Archive),
            DeployMethod::RemotePing | DeployMethod::Script => None,
        }
    }
}

impl fmt::Display for DeployMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one deploy attempt against one site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutcome {
    /// Site the attempt targeted
    pub slug: String,

    pub success: bool,

    /// Operator-facing description of what happened
    pub message: String,

    pub before_version: Option<String>,

    pub after_version: Option<String>,

    pub method: DeployMethod,
}

impl DeployOutcome {
    pub fn succeeded(
        slug: impl Into<String>,
        method: DeployMethod,
        before_version: Option<String>,
        after_version: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            slug: slug.into(),
            success: true,
            message: message.into(),
            before_version,
            after_version,
            method,
        }
    }

    pub fn failed(slug: impl Into<String>, method: DeployMethod, message: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            success: false,
            message: message.into(),
            before_version: None,
            after_version: None,
            method,
        }
    }

    /// Whether the attempt moved the site to a different version
    pub fn updated(&self) -> bool {
        self.success && self.before_version != self.after_version
    }

    /// One report line, prefixed with a success or failure marker
    pub fn report_line(&self) -> String {
        let marker = if self.success { "✓" } else { "✗" };
        format!("{} [{}] {} ({})", marker, self.slug, self.message, self.method)
    }
}

/// Aggregated operator report for one orchestration run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployReport {
    /// Preamble lines (commit, push) preceding the per-site outcomes
    pub preamble: Vec<String>,

    /// Per-site outcomes in dispatch order
    pub outcomes: Vec<DeployOutcome>,

    /// Set when the run stopped before fanning out
    pub aborted: Option<String>,

    /// Set when the outcomes could not be written back to the registry
    pub registry_error: Option<String>,
}

impl DeployReport {
    pub fn note(&mut self, line: impl Into<String>) {
        self.preamble.push(line.into());
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }

    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.registry_error.is_none() && self.failed() == 0
    }

    pub fn outcome(&self, slug: &str) -> Option<&DeployOutcome> {
        self.outcomes.iter().find(|o| o.slug == slug)
    }

    /// Render the multi-line report shown to the operator
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self.preamble.clone();

        if let Some(reason) = &self.aborted {
            lines.push(format!("✗ {}", reason));
        }

        lines.extend(self.outcomes.iter().map(DeployOutcome::report_line));

        if let Some(error) = &self.registry_error {
            lines.push(format!("✗ registry not updated: {}", error));
        }

        if self.aborted.is_none() {
            lines.push(format!(
                "{} site(s) deployed, {} failed",
                self.succeeded(),
                self.failed()
            ));
        }

        lines.join("\n")
    }
}
