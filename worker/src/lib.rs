pub mod config;
pub mod error;
mod hold;
mod joint_map;
pub mod metrics;
pub mod solver;
mod state;
pub mod worker;

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::info;
use tokio::{task, time};

pub use config::WorkerConfig;
pub use error::{Result, WorkerErr};
pub use hold::HoldSolver;
pub use joint_map::{JointMapErr, JointNameMap};
pub use metrics::WorkerMetrics;
pub use solver::{Introspection, SolutionDebug, Solver, SolverErr, SolverTimings};
pub use state::ControllerState;
pub use worker::{ClusterWorker, Phase};

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// Bootstraps a worker and runs its solve loop on the blocking pool until `shutdown` is set.
///
/// # Arguments
/// * `cfg` - The worker's startup parameters.
/// * `solver` - The controller to drive.
/// * `shutdown` - Set by the caller to stop the worker at the next poll.
///
/// # Returns
/// The worker's counters, or `None` if the session ended before it started.
///
/// # Errors
/// Any fatal initialization or serving error.
pub async fn launch<S>(cfg: WorkerConfig, solver: S, shutdown: Arc<AtomicBool>) -> Result<Option<WorkerMetrics>>
where
    S: Solver + 'static,
{
    let worker_index = cfg.worker_index;

    let worker = tokio::select! {
        res = ClusterWorker::bootstrap(cfg, solver) => res?,
        _ = interrupted(&shutdown) => {
            info!(worker_index = worker_index; "interrupted before the session started");
            return Ok(None);
        }
    };
    let Some(mut worker) = worker else {
        return Ok(None);
    };

    let metrics = task::spawn_blocking(move || {
        worker.run(&shutdown)?;
        Ok::<_, WorkerErr>(worker.metrics().clone())
    })
    .await
    .map_err(|e| io::Error::other(format!("solve loop join error: {e}")))??;

    Ok(Some(metrics))
}

async fn interrupted(flag: &AtomicBool) {
    while !flag.load(Ordering::Acquire) {
        time::sleep(SHUTDOWN_POLL).await;
    }
}
