//! Deploy job reaper worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::deploy::DeployRunner;

/// Job reaper worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// How often finished jobs are checked against the retention window
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Run the job reaper worker
pub async fn run<S, F>(
    options: &Options,
    runner: &DeployRunner,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Job reaper worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Job reaper worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let pruned = runner.prune_expired();
        if pruned > 0 {
            info!("Pruned {} expired deploy job(s)", pruned);
        } else {
            debug!("No expired deploy jobs, {} retained", runner.retained());
        }
    }
}
