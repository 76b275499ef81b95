use std::{
    env, io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::info;
use tokio::signal;

use worker::{HoldSolver, WorkerConfig};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let cfg = match env::var("WORKER_CONFIG") {
        Ok(path) => WorkerConfig::from_json_file(path)?,
        Err(_) => WorkerConfig::from_env()?,
    };
    info!(worker_index = cfg.worker_index; "connecting to {}", cfg.endpoint);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received SIGINT");
            flag.store(true, Ordering::Release);
        }
    });

    let solver = HoldSolver::new(cfg.joint_names.clone());
    match worker::launch(cfg, solver, shutdown).await? {
        Some(metrics) => info!(
            solves = metrics.solves,
            failures = metrics.failures,
            resets = metrics.resets;
            "wrapping up"
        ),
        None => info!("session ended before it started"),
    }

    Ok(())
}
