//! fleetsync - Entry Point
//!
//! One binary for every instance: `serve` runs the control endpoint and the
//! scheduled self-update; the remaining commands drive the workbench.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::{error, info, warn};

use fleetsync::app::{self, AppOptions, AppState};
use fleetsync::deploy::DeployTarget;
use fleetsync::logs::{init_logging, LogOptions};
use fleetsync::models::{CanonicalRepoState, DeployReport};
use fleetsync::registry::ops::{self, NewSite};
use fleetsync::registry::{SiteDescriptor, SiteKind};
use fleetsync::storage::layout::{StorageLayout, HOME_ENV_VAR};
use fleetsync::storage::settings::Settings;
use fleetsync::update::SELF_SLUG;
use fleetsync::utils::version_info;

#[derive(Debug, Parser)]
#[command(name = "fleetsync", version, about = "Deploy orchestration for a fleet of sites")]
struct Cli {
    /// Directory holding settings.json, sites.json and logs
    #[arg(long, env = HOME_ENV_VAR, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the control endpoint and the scheduled self-update
    Serve,
    /// Show the workbench tree against the canonical branch
    Status,
    /// Commit pending changes, push, and deploy every enabled site
    Push {
        /// Commit message for pending changes
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Redeploy one site, or every enabled site, without pushing
    Deploy {
        /// Site to deploy
        slug: Option<String>,
    },
    /// Fetch the status of every remote site
    Refresh,
    /// Update this instance's own working tree
    SelfUpdate,
    /// Manage registered sites
    Sites {
        #[command(subcommand)]
        command: SitesCommand,
    },
    /// Print version information
    Version,
}

#[derive(Debug, Subcommand)]
enum SitesCommand {
    /// List registered sites
    List,
    /// Register a site
    Add {
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Control endpoint base URL (required for remote sites)
        #[arg(long)]
        url: Option<String>,
        /// Unique key, derived from the URL when omitted
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        label: Option<String>,
        /// Working tree of a local site
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Remove a site
    Remove { slug: String },
    /// Include a site in fan-out
    Enable { slug: String },
    /// Skip a site during fan-out
    Disable { slug: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Local,
    Remote,
}

impl From<KindArg> for SiteKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Local => SiteKind::Local,
            KindArg::Remote => SiteKind::Remote,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        return match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e.to_string().red());
                ExitCode::FAILURE
            }
        };
    }

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Run a command; `Ok(false)` when it completed with failures
async fn execute(cli: Cli) -> anyhow::Result<bool> {
    let layout = cli
        .base_dir
        .map(StorageLayout::new)
        .unwrap_or_default();
    let settings = load_settings(&layout).await?;

    let serving = matches!(cli.command, Command::Serve);
    let log_dir = match layout.setup().await {
        Ok(()) => Some(layout.logs_dir().path().to_path_buf()),
        Err(e) => {
            eprintln!("{} {}", "warning:".yellow(), e);
            None
        }
    };
    let _log_guard = init_logging(LogOptions {
        log_level: settings.log_level.clone(),
        stdout: serving,
        log_dir,
        json_format: false,
    })
    .context("failed to initialize logging")?;

    let state = Arc::new(AppState::init(&settings, &layout)?);

    match cli.command {
        Command::Serve => {
            let options = AppOptions::from_settings(&settings);
            info!("Serving with options: {:?}", options);
            app::run(options, state, await_shutdown_signal()).await?;
            Ok(true)
        }
        Command::Status => {
            print_repo_state(&state.orchestrator.repo_state().await);
            Ok(true)
        }
        Command::Push { message } => {
            if !settings.instance.is_workbench {
                warn!("Pushing from an instance that is not marked as the workbench");
            }
            let report = state.orchestrator.push_and_deploy_all(message).await?;
            print_report(&report);
            Ok(report.is_clean())
        }
        Command::Deploy { slug } => {
            let target = slug.map(DeployTarget::Site).unwrap_or(DeployTarget::All);
            let report = state.orchestrator.deploy(target).await?;
            print_report(&report);
            Ok(report.is_clean())
        }
        Command::Refresh => {
            let statuses = state.orchestrator.refresh_statuses().await?;
            if statuses.is_empty() {
                println!("No sites registered");
            }
            let mut all_reachable = true;
            for entry in statuses {
                match entry.status {
                    Some(status) => {
                        let sync = match entry.in_sync {
                            Some(true) => "in sync".green(),
                            Some(false) => "behind workbench".yellow(),
                            None => "sync unknown".dimmed(),
                        };
                        println!(
                            "{} [{}] {:<6} {} ({}) {}, checked {}",
                            "✓".green(),
                            entry.slug,
                            entry.kind,
                            status.version,
                            if status.has_vcs { status.commit.as_str() } else { "no vcs" },
                            sync,
                            status.checked_at.format("%Y-%m-%d %H:%M:%S UTC")
                        );
                    }
                    None if entry.kind == SiteKind::Local => {
                        println!("{} [{}] no tree on this host", "-".dimmed(), entry.slug);
                    }
                    None => {
                        all_reachable = false;
                        println!("{} [{}] status unavailable", "✗".red(), entry.slug);
                    }
                }
            }
            Ok(all_reachable)
        }
        Command::SelfUpdate => {
            let outcome = match state.instance.refuse_self_update(SELF_SLUG) {
                Some(refusal) => refusal,
                None => {
                    state
                        .updater
                        .update(SELF_SLUG, &state.instance.working_tree)
                        .await
                }
            };
            print_line(&outcome.report_line());
            Ok(outcome.success)
        }
        Command::Sites { command } => {
            manage_sites(state.registry.as_ref(), command).await?;
            Ok(true)
        }
        Command::Version => Ok(true),
    }
}

async fn load_settings(layout: &StorageLayout) -> anyhow::Result<Settings> {
    let file = layout.settings_file();
    if !file.exists().await {
        eprintln!(
            "{} no settings at {}, using defaults",
            "warning:".yellow(),
            file.path().display()
        );
        return Ok(Settings::default());
    }
    file.read_json::<Settings>()
        .await
        .with_context(|| format!("unable to read settings file {}", file.path().display()))
}

async fn manage_sites(
    registry: &dyn fleetsync::registry::RegistryStore,
    command: SitesCommand,
) -> anyhow::Result<()> {
    match command {
        SitesCommand::List => {
            let sites = ops::list(registry).await?;
            if sites.is_empty() {
                println!("No sites registered");
            }
            for site in sites.iter() {
                print_site(site);
            }
        }
        SitesCommand::Add {
            kind,
            url,
            slug,
            label,
            path,
        } => {
            let site = ops::add_site(
                registry,
                NewSite {
                    kind: kind.into(),
                    url,
                    slug,
                    label,
                    local_path: path,
                },
            )
            .await?;
            println!("{} Registered {} ({})", "✓".green(), site.slug, site.kind);
            if site.kind == SiteKind::Remote {
                println!(
                    "Deploy secret, set it as instance.deploy_secret on {}:\n  {}",
                    site.base_url(),
                    site.deploy_secret.expose().bold()
                );
            }
        }
        SitesCommand::Remove { slug } => {
            let site = ops::remove_site(registry, &slug).await?;
            println!("{} Removed {}", "✓".green(), site.slug);
        }
        SitesCommand::Enable { slug } => {
            ops::set_enabled(registry, &slug, true).await?;
            println!("{} Enabled {}", "✓".green(), slug);
        }
        SitesCommand::Disable { slug } => {
            ops::set_enabled(registry, &slug, false).await?;
            println!("{} Disabled {}", "✓".green(), slug);
        }
    }
    Ok(())
}

fn print_line(line: &str) {
    if line.starts_with('✓') {
        println!("{}", line.green());
    } else if line.starts_with('✗') {
        println!("{}", line.red());
    } else {
        println!("{}", line);
    }
}

fn print_report(report: &DeployReport) {
    for line in report.render().lines() {
        print_line(line);
    }
}

fn print_repo_state(state: &CanonicalRepoState) {
    println!("{:<8} {} @ {}", "Branch:".bold(), state.branch, state.commit);
    println!("{:<8} {}", "Commit:".bold(), state.message);
    println!("{:<8} {}", "Tag:".bold(), state.tag);

    let sync = state.sync_summary();
    if state.ahead > 0 || state.behind > 0 {
        println!("{:<8} {}", "Sync:".bold(), sync.yellow());
    } else {
        println!("{:<8} {}", "Sync:".bold(), sync.green());
    }

    if state.dirty {
        println!(
            "{:<8} {}",
            "Dirty:".bold(),
            format!("{} uncommitted change(s)", state.dirty_files.len()).yellow()
        );
        for path in &state.dirty_files {
            println!("  {}", path);
        }
    } else {
        println!("{:<8} clean", "Dirty:".bold());
    }

    if !state.log.is_empty() {
        println!("{}", "Recent:".bold());
        for entry in &state.log {
            println!("  {}", entry);
        }
    }
}

fn print_site(site: &SiteDescriptor) {
    let state = if site.enabled {
        "enabled".green()
    } else {
        "disabled".dimmed()
    };
    let target = match (&site.local_path, &site.url) {
        (Some(path), _) => path.display().to_string(),
        (None, Some(url)) => url.clone(),
        (None, None) => "-".to_string(),
    };
    let version = site.last_known_version.as_deref().unwrap_or("-");
    let deployed = site
        .last_deploy_at
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());

    println!(
        "{:<24} {:<6} {:<8} {:<40} {:<12} {}",
        site.slug.bold(),
        site.kind,
        state,
        target,
        version,
        deployed
    );
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, shutting down...");
                    }
                    _ = sigint.recv() => {
                        info!("SIGINT received, shutting down...");
                    }
                }
                return;
            }
            _ => error!("Unable to install signal handlers, falling back to Ctrl+C"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received, shutting down...");
}
