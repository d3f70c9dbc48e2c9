//! Scheduled self-update worker

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tracing::{error, info};

use crate::storage::settings::SchedulerSettings;
use crate::update::executor::{SelfUpdaterExt, SELF_SLUG};

/// Auto-update worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between updates
    pub interval: Duration,

    /// Delay before the first update
    pub initial_delay: Duration,

    /// Tree to keep at the canonical tip
    pub working_tree: PathBuf,
}

impl Options {
    pub fn from_settings(scheduler: &SchedulerSettings, working_tree: PathBuf) -> Self {
        Self {
            interval: scheduler.interval(),
            initial_delay: scheduler.initial_delay(),
            working_tree,
        }
    }
}

/// Run the auto-update worker
pub async fn run<U, S, F>(
    options: &Options,
    updater: &U,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    U: SelfUpdaterExt + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!(
        "Auto-update worker starting (every {:?}, first in {:?})...",
        options.interval, options.initial_delay
    );

    let mut wait = options.initial_delay;
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Auto-update worker shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {}
        }
        wait = options.interval;

        let outcome = updater.update(SELF_SLUG, &options.working_tree).await;
        if outcome.success {
            info!("Scheduled self-update: {}", outcome.message);
        } else {
            error!("Scheduled self-update failed: {}", outcome.message);
        }
    }
}
