use std::{
    env, io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::{error, info, warn};
use tokio::{runtime::Runtime, signal};

use client::{ClientErr, ClusterClient, SessionFile};

fn main() -> io::Result<()> {
    env_logger::init();

    let path = env::var("CLIENT_SESSION")
        .map_err(|_| io::Error::other("CLIENT_SESSION must point to a session file"))?;
    let SessionFile { client: cfg, geometry } = SessionFile::from_json_file(path)?;

    let mut client = ClusterClient::new(cfg)?;
    info!("workers should connect to {}", client.local_addr());
    client.handshake(geometry)?;

    let signals = Runtime::new()?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    signals.spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received SIGINT");
            flag.store(true, Ordering::Release);
        }
    });

    let mut state = client.new_state()?;
    for slot in 0..state.cluster_size() {
        state.row_mut(slot)?.root_orientation()[0] = 1.0;
    }

    let period = Duration::from_secs_f64(client.rate().cluster_dt());
    let mut next = Instant::now();
    while !shutdown.load(Ordering::Acquire) {
        match client.tick(&state) {
            Ok(_) => {}
            Err(ClientErr::BarrierTimeout { slots } | ClientErr::WorkerLost { slots }) => {
                warn!(slots:? = slots; "continuing without unresponsive slots");
            }
            Err(e) => {
                error!("tick failed: {e}");
                return Err(e.into());
            }
        }

        next += period;
        match next.checked_duration_since(Instant::now()) {
            Some(rest) => thread::sleep(rest),
            None => next = Instant::now(),
        }
    }

    let metrics = client.metrics();
    info!(
        ticks = metrics.solution_counter,
        mean_tick_us = metrics.mean_tick_dt().unwrap_or_default().as_micros() as u64;
        "wrapping up"
    );
    Ok(())
}
