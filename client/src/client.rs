use std::{
    fs,
    net::SocketAddr,
    time::{Duration, Instant},
};

use comms::{
    HandshakeServer,
    specs::{ClusterGeometry, GeometryProposal, SessionSpec},
};
use log::{debug, error, info, warn};
use shm::{
    ClusterStatusBlock, CommandBuffer, PollBackoff, ProfilingBlock, ProfilingSnapshot, SlotRecord,
    SlotSnapshot, StateBuffer, TickSnapshot, Waiter,
};
use tokio::runtime::Runtime;

use crate::{
    ClientConfig, ClientErr, ClientMetrics, ClusterCommands, ClusterState, ControlRate, Result,
};

/// The regions the client allocates once the geometry is agreed.
struct Regions {
    geometry: ClusterGeometry,
    status: ClusterStatusBlock,
    state: StateBuffer,
    cmds: CommandBuffer,
    profiling: ProfilingBlock,
    commands: ClusterCommands,
}

impl Regions {
    fn create(cfg: &ClientConfig, geometry: ClusterGeometry) -> Result<Self> {
        let (dir, ns) = (cfg.shm_dir.as_path(), cfg.namespace.as_str());
        fs::create_dir_all(dir)?;

        Ok(Self {
            status: ClusterStatusBlock::create(dir, ns, &geometry)?,
            state: StateBuffer::create(dir, ns, &geometry)?,
            cmds: CommandBuffer::create(dir, ns, &geometry)?,
            profiling: ProfilingBlock::create(dir, ns, &geometry)?,
            commands: ClusterCommands::new(&geometry),
            geometry,
        })
    }

    fn slot(&self, idx: usize) -> Result<&SlotRecord> {
        Ok(self.status.slot(idx)?)
    }
}

/// Drives the cluster: performs the handshake, then feeds state to the
/// workers and gathers their commands once per tick.
///
/// Owns a tokio runtime for the handshake, every other call is synchronous.
pub struct ClusterClient {
    runtime: Runtime,
    cfg: ClientConfig,
    addr: SocketAddr,
    server: Option<HandshakeServer>,
    regions: Option<Regions>,
    rate: ControlRate,
    backoff: PollBackoff,
    metrics: ClientMetrics,
}

impl ClusterClient {
    /// Creates a new `ClusterClient` and binds its handshake endpoint.
    ///
    /// # Arguments
    /// * `cfg` - The client configuration.
    ///
    /// # Errors
    /// `Io` if the endpoint cannot be bound, `Config` on invalid control periods.
    pub fn new(cfg: ClientConfig) -> Result<Self> {
        let rate = ControlRate::new(cfg.control_dt, cfg.cluster_dt)?;
        let runtime = Runtime::new()?;
        let server = runtime.block_on(HandshakeServer::bind(
            cfg.bind_addr.as_str(),
            cfg.handshake_timeout(),
        ))?;
        let addr = server.local_addr()?;
        info!("handshake endpoint bound at {addr}");

        Ok(Self {
            runtime,
            backoff: PollBackoff::new(cfg.poll),
            cfg,
            addr,
            server: Some(server),
            regions: None,
            rate,
            metrics: ClientMetrics::default(),
        })
    }

    /// The address workers must connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Validates the geometry, allocates every region and waits for every worker to attach.
    ///
    /// # Arguments
    /// * `proposal` - The geometry to offer.
    ///
    /// # Returns
    /// The agreed geometry.
    ///
    /// # Errors
    /// `Geometry` before anything is allocated if the proposal is invalid,
    /// `HandshakeSpent` on a second attempt, `Handshake` if the rendezvous
    /// fails (the regions are then released).
    pub fn handshake(&mut self, proposal: GeometryProposal) -> Result<&ClusterGeometry> {
        let geometry = proposal.validate()?;
        let server = self.server.take().ok_or(ClientErr::HandshakeSpent)?;

        let regions = Regions::create(&self.cfg, geometry.clone())?;
        let session = SessionSpec {
            geometry,
            namespace: self.cfg.namespace.clone(),
            shm_dir: self.cfg.shm_dir.clone(),
        };
        info!(
            cluster_size = session.geometry.cluster_size(),
            n_dofs = session.geometry.n_dofs();
            "offering session {:?}", session.namespace
        );
        self.runtime.block_on(server.offer(&session))?;

        let regions = self.regions.insert(regions);
        info!(active_count = regions.status.active_count(); "cluster ready");
        Ok(&regions.geometry)
    }

    /// True once the handshake completed and every region is allocated.
    pub fn is_ready(&self) -> bool {
        self.regions.is_some()
    }

    pub fn geometry(&self) -> Option<&ClusterGeometry> {
        self.regions.as_ref().map(|r| &r.geometry)
    }

    pub fn rate(&self) -> &ControlRate {
        &self.rate
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    fn regions(&self) -> Result<&Regions> {
        self.regions.as_ref().ok_or(ClientErr::NotReady)
    }

    /// A zeroed state aggregate shaped for the agreed geometry.
    pub fn new_state(&self) -> Result<ClusterState> {
        Ok(ClusterState::new(&self.regions()?.geometry))
    }

    /// Drives every active slot with `state`.
    ///
    /// # Errors
    /// See `tick_subset`.
    pub fn tick(&mut self, state: &ClusterState) -> Result<&ClusterCommands> {
        let slots: Vec<usize> = self
            .regions()?
            .status
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_active())
            .map(|(idx, _)| idx)
            .collect();
        self.drive(state, &slots)
    }

    /// Drives only `slots`, inactive ones are skipped.
    ///
    /// Writes each driven slot's state row before raising its trigger, then
    /// waits until every raised trigger is cleared and gathers the command rows.
    ///
    /// # Errors
    /// `NotReady` before the handshake, `ShapeMismatch` if `state` was built for
    /// another geometry, `SlotOutOfRange`, `TriggerInFlight` if a slot still
    /// solves a previous tick (nothing is raised then), `WorkerLost` when a
    /// driven worker terminates before answering and `BarrierTimeout` when the
    /// watchdog excludes stuck slots. Both exclude the offending slots.
    pub fn tick_subset(&mut self, state: &ClusterState, slots: &[usize]) -> Result<&ClusterCommands> {
        let regions = self.regions()?;
        let mut driven = Vec::with_capacity(slots.len());
        for &idx in slots {
            if regions.slot(idx)?.is_active() {
                driven.push(idx);
            } else {
                warn!(worker_index = idx; "slot is inactive, skipped");
            }
        }
        driven.sort_unstable();
        driven.dedup();
        self.drive(state, &driven)
    }

    fn drive(&mut self, state: &ClusterState, slots: &[usize]) -> Result<&ClusterCommands> {
        let started = Instant::now();
        let regions = self.regions.as_mut().ok_or(ClientErr::NotReady)?;

        let expected = regions.geometry.cluster_size() * regions.state.layout().width;
        if state.layout() != regions.state.layout() || state.as_slice().len() != expected {
            return Err(ClientErr::ShapeMismatch {
                got: state.as_slice().len(),
                expected,
            });
        }

        for &idx in slots {
            if regions.slot(idx)?.trigger_raised() {
                return Err(ClientErr::TriggerInFlight(idx));
            }
        }

        for &idx in slots {
            regions
                .state
                .row_mut(idx)?
                .as_slice_mut()
                .copy_from_slice(state.row(idx)?.as_slice());
            if !regions.slot(idx)?.raise_trigger() {
                return Err(ClientErr::TriggerInFlight(idx));
            }
        }

        let deadline = self.cfg.barrier_timeout().map(|t| started + t);
        let status = &regions.status;
        let answered = |idx: usize| status.slot(idx).is_ok_and(|s| !s.trigger_raised());
        let lost = |idx: usize| status.slot(idx).is_ok_and(|s| !s.is_registered());
        self.backoff.poll_until(deadline, || {
            slots.iter().all(|&idx| answered(idx) || lost(idx))
        });

        let pending: Vec<usize> = slots.iter().copied().filter(|&idx| !answered(idx)).collect();
        if !pending.is_empty() {
            for &idx in &pending {
                if let Ok(slot) = status.slot(idx) {
                    slot.set_active(false);
                }
            }
            let (gone, stuck): (Vec<usize>, Vec<usize>) =
                pending.into_iter().partition(|&idx| lost(idx));

            if !stuck.is_empty() {
                error!(slots:? = stuck; "barrier timed out, excluding unresponsive slots");
            }
            if gone.is_empty() {
                return Err(ClientErr::BarrierTimeout { slots: stuck });
            }
            error!(slots:? = gone; "workers terminated mid-tick, excluding their slots");
            return Err(ClientErr::WorkerLost { slots: gone });
        }

        for &idx in slots {
            regions
                .commands
                .raw_row_mut(idx)?
                .copy_from_slice(regions.cmds.row(idx)?.as_slice());
        }

        let dt = started.elapsed();
        self.metrics.record_tick(dt);
        regions.profiling.record_tick(dt);
        debug!(
            driven = slots.len(),
            tick = self.metrics.solution_counter,
            tick_us = dt.as_micros() as u64;
            "tick completed"
        );

        Ok(&regions.commands)
    }

    /// Asks the worker of `slot` to re-initialize its solver.
    pub fn request_reset(&self, slot: usize) -> Result<()> {
        self.regions()?.slot(slot)?.request_reset();
        info!(worker_index = slot; "reset requested");
        Ok(())
    }

    /// Whether the reset requested for `slot` is still unserved.
    pub fn reset_pending(&self, slot: usize) -> Result<bool> {
        Ok(self.regions()?.slot(slot)?.reset_requested())
    }

    /// Includes or excludes `slot` from future ticks.
    pub fn set_active(&self, slot: usize, active: bool) -> Result<()> {
        self.regions()?.slot(slot)?.set_active(active);
        info!(worker_index = slot, active = active; "slot activation changed");
        Ok(())
    }

    /// Advisory read of a slot's flags and telemetry, may be slightly stale.
    pub fn slot_snapshot(&self, slot: usize) -> Result<SlotSnapshot> {
        Ok(self.regions()?.slot(slot)?.snapshot())
    }

    /// Advisory read of a slot's solve timings.
    pub fn profiling_snapshot(&self, slot: usize) -> Result<ProfilingSnapshot> {
        Ok(self.regions()?.profiling.snapshot(slot)?)
    }

    pub fn tick_snapshot(&self) -> Result<TickSnapshot> {
        Ok(self.regions()?.profiling.tick_snapshot())
    }

    /// Number of registered workers.
    pub fn active_count(&self) -> Result<u64> {
        Ok(self.regions()?.status.active_count())
    }

    /// Waits until the registered worker count drops to `count` or `timeout` passes.
    pub fn wait_active_count(&mut self, count: u64, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let regions = self.regions.as_ref().ok_or(ClientErr::NotReady)?;
        Ok(self
            .backoff
            .poll_until(Some(deadline), || regions.status.active_count() == count))
    }
}
