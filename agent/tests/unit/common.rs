//! Shared test doubles

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fleetsync::auth::DeploySecret;
use fleetsync::deploy::{DeployConfig, Orchestrator};
use fleetsync::errors::AgentError;
use fleetsync::http::{PeerClient, PeerClientOptions};
use fleetsync::server::InstanceOptions;
use fleetsync::registry::{RegistrySnapshot, RegistryStore, SiteDescriptor, Sites};
use fleetsync::update::{ArchiveSource, SelfUpdater, UpdateOptions};
use fleetsync::utils::CooldownOptions;
use fleetsync::vcs::{CommandOutput, CommandRunner, CommandSpec, GitGateway};

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
        timed_out: false,
    }
}

pub fn fail(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
        timed_out: false,
    }
}

struct Rule {
    program: String,
    prefix: Vec<String>,
    /// Answered in order; the last one repeats
    outputs: VecDeque<CommandOutput>,
    delay: Option<Duration>,
}

/// Command runner answering from scripted rules and recording every call.
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
    finished: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, program: &str, prefix: &[&str], outputs: Vec<CommandOutput>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.into(),
            delay: None,
        });
        self
    }

    /// Make the most recently added rule take `delay` before answering
    pub fn with_delay(self, delay: Duration) -> Self {
        if let Some(rule) = self.rules.lock().unwrap().last_mut() {
            rule.delay = Some(delay);
        }
        self
    }

    pub fn git(self, prefix: &[&str], outputs: Vec<CommandOutput>) -> Self {
        self.on("git", prefix, outputs)
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Argument lists of every git call starting with `subcommand`
    pub fn git_calls(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == "git" && c.args.first().map(String::as_str) == Some(subcommand))
            .map(|c| c.args)
            .collect()
    }

    /// Argument lists of git calls starting with `subcommand` that ran to
    /// completion
    pub fn finished_git_calls(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.finished
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program == "git" && c.args.first().map(String::as_str) == Some(subcommand))
            .map(|c| c.args.clone())
            .collect()
    }

    /// Position of the first call matching `program` and `subcommand`
    pub fn position(&self, program: &str, subcommand: &str) -> Option<usize> {
        self.calls()
            .iter()
            .position(|c| c.program == program && c.args.first().map(String::as_str) == Some(subcommand))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> CommandOutput {
        self.calls.lock().unwrap().push(spec.clone());

        let (output, delay) = {
            let mut rules = self.rules.lock().unwrap();
            match rules
                .iter_mut()
                .find(|r| r.program == spec.program && spec.args.starts_with(&r.prefix))
            {
                Some(rule) if rule.outputs.len() > 1 => (rule.outputs.pop_front().unwrap(), rule.delay),
                Some(rule) => (
                    rule.outputs.front().cloned().unwrap_or_else(|| ok("")),
                    rule.delay,
                ),
                None => (ok(""), None),
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.finished.lock().unwrap().push(spec.clone());
        output
    }
}

/// In-memory registry counting loads and saves
#[derive(Default)]
pub struct CountingStore {
    snapshot: Mutex<RegistrySnapshot>,
    pub loads: AtomicUsize,
    pub saves: AtomicUsize,
}

impl CountingStore {
    pub fn with_sites(sites: Vec<SiteDescriptor>) -> Self {
        Self {
            snapshot: Mutex::new(RegistrySnapshot {
                revision: 0,
                sites: sites.into_iter().collect::<Sites>(),
            }),
            ..Default::default()
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn site(&self, slug: &str) -> Option<SiteDescriptor> {
        self.snapshot.lock().unwrap().sites.get(slug).cloned()
    }
}

#[async_trait]
impl RegistryStore for CountingStore {
    async fn load(&self) -> Result<RegistrySnapshot, AgentError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<u64, AgentError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.snapshot.lock().unwrap();
        if stored.revision != snapshot.revision {
            return Err(AgentError::RegistryConflict {
                loaded: snapshot.revision,
                found: stored.revision,
            });
        }
        stored.sites = snapshot.sites.clone();
        stored.revision += 1;
        Ok(stored.revision)
    }
}

pub fn update_options(scratch: &Path, archive: Option<ArchiveSource>) -> UpdateOptions {
    UpdateOptions {
        remote: "origin".to_string(),
        branch: "main".to_string(),
        archive,
        version_file: "VERSION".to_string(),
        scratch_dir: scratch.to_path_buf(),
        strict_vcs: true,
        command_timeout: Duration::from_secs(5),
        download_timeout: Duration::from_secs(5),
    }
}

pub fn peer_client() -> PeerClient {
    PeerClient::new(PeerClientOptions {
        pull_timeout: Duration::from_secs(5),
        status_timeout: Duration::from_secs(2),
        max_retries: 0,
        backoff: CooldownOptions::default(),
    })
    .unwrap()
}

/// A directory that looks like a git working tree
pub fn git_tree() -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join(".git")).unwrap();
    dir
}

/// Control endpoint view of a site instance serving `tree`
pub fn instance(tree: &Path, secret: &str) -> InstanceOptions {
    InstanceOptions {
        site_url: "https://bar.example".to_string(),
        working_tree: tree.to_path_buf(),
        deploy_secret: DeploySecret::new(secret),
        is_workbench: false,
        auto_update: true,
        version_file: "VERSION".to_string(),
    }
}

pub fn remote_site(slug: &str, url: &str) -> SiteDescriptor {
    SiteDescriptor::remote(slug, slug, url, DeploySecret::new(format!("{}-secret", slug))).unwrap()
}

pub fn local_site(slug: &str, path: Option<PathBuf>) -> SiteDescriptor {
    SiteDescriptor::local(slug, slug, None, path).unwrap()
}

/// Orchestrator over a scripted workbench and an in-memory registry
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub runner: Arc<ScriptedRunner>,
    pub store: Arc<CountingStore>,
    pub workbench: tempfile::TempDir,
    pub scratch: tempfile::TempDir,
}

pub fn harness(
    runner: ScriptedRunner,
    sites: Vec<SiteDescriptor>,
    deploy_script: Option<PathBuf>,
) -> Harness {
    let runner = Arc::new(runner);
    let store = Arc::new(CountingStore::with_sites(sites));
    let workbench = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();

    let updater = SelfUpdater::new(update_options(scratch.path(), None), runner.clone()).unwrap();
    let git = GitGateway::new(runner.clone(), workbench.path(), Duration::from_secs(5));

    let orchestrator = Orchestrator::new(
        DeployConfig {
            remote: "origin".to_string(),
            branch: "main".to_string(),
            default_commit_message: "chore: workbench auto-commit".to_string(),
            deploy_script,
            command_timeout: Duration::from_secs(5),
        },
        git,
        Arc::new(updater),
        Arc::new(peer_client()),
        store.clone(),
    );

    Harness {
        orchestrator,
        runner,
        store,
        workbench,
        scratch,
    }
}

pub const PULL_OK_ABC123: &str =
    r#"{"success":true,"method":"vcs","before":"9f8e7d6","after":"abc123","updated":true}"#;
