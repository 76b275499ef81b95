use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use comms::{
    HandshakeClient,
    specs::{ClusterGeometry, SessionSpec},
};
use log::{debug, error, info, warn};
use shm::{
    ClusterStatusBlock, CommandBuffer, CommandLayout, CommandRowMut, PollBackoff, ProfilingBlock,
    SolutionDebugRegion, SolveTimings, StateBuffer, Waiter,
};

use crate::{
    JointNameMap, Result, WorkerConfig, WorkerErr,
    metrics::WorkerMetrics,
    solver::{Introspection, Solver},
    state::ControllerState,
};

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Registered,
    Idle,
    Solving,
    Publishing,
    Terminated,
}

/// The mappings a worker holds, closed in field order on termination.
struct Regions {
    cmds: CommandBuffer,
    state: StateBuffer,
    status: ClusterStatusBlock,
    profiling: Option<ProfilingBlock>,
    debug: Option<SolutionDebugRegion>,
}

/// Drives one slot of the cluster: waits for its trigger, solves, publishes.
pub struct ClusterWorker<S: Solver> {
    worker_index: usize,
    geometry: ClusterGeometry,
    solver: S,
    phase: Phase,
    regions: Option<Regions>,
    joints: JointNameMap,
    quat_order: [usize; 4],
    ctrl_state: ControllerState,
    /// Command row published when a solve fails, in environment order.
    fallback: Vec<f32>,
    backoff: PollBackoff,
    metrics: WorkerMetrics,
}

impl<S: Solver> ClusterWorker<S> {
    /// Performs the worker side of the handshake and registers with the cluster.
    ///
    /// # Arguments
    /// * `cfg` - The worker's startup parameters.
    /// * `solver` - The controller this worker drives.
    ///
    /// # Returns
    /// `Ok(None)` if the client disconnected before offering a session.
    ///
    /// # Errors
    /// Any initialization failure, after rejecting the offer with its message.
    pub async fn bootstrap(cfg: WorkerConfig, solver: S) -> Result<Option<Self>> {
        let worker_index = cfg.worker_index;
        let mut handshake = HandshakeClient::connect(
            &cfg.endpoint,
            worker_index,
            cfg.connect_retries,
            cfg.retry_interval(),
        )
        .await?;

        let Some(session) = handshake.recv_offer().await? else {
            return Ok(None);
        };

        match Self::attach(&cfg, solver, &session) {
            Ok(worker) => {
                handshake.confirm().await?;
                info!(worker_index = worker_index; "registered with the cluster");
                Ok(Some(worker))
            }
            Err(e) => {
                error!(worker_index = worker_index; "initialization failed: {e}");
                if let Err(send) = handshake.reject(&e.to_string()).await {
                    warn!(worker_index = worker_index; "could not report the failure: {send}");
                }
                Err(e)
            }
        }
    }

    /// Attaches to the session's regions, prepares the solver and registers.
    ///
    /// # Errors
    /// Fatal initialization errors: a region that does not attach, a joint
    /// name mismatch, a failing solver hook or an invalid quaternion order.
    pub fn attach(cfg: &WorkerConfig, mut solver: S, session: &SessionSpec) -> Result<Self> {
        let geometry = session.geometry.clone();
        let worker_index = cfg.worker_index;
        if let Some(configured) = cfg.cluster_size.filter(|n| *n != geometry.cluster_size()) {
            return Err(WorkerErr::ClusterSizeMismatch {
                configured,
                offered: geometry.cluster_size(),
            });
        }

        let (dir, ns) = (session.shm_dir.as_path(), session.namespace.as_str());
        let status = ClusterStatusBlock::attach(dir, ns, &geometry)?;
        let state = StateBuffer::attach(dir, ns, &geometry)?;
        let mut cmds = CommandBuffer::attach(dir, ns, &geometry)?;
        let profiling = match cfg.profiling {
            true => Some(ProfilingBlock::attach(dir, ns, &geometry)?),
            false => None,
        };

        solver
            .init_problem(&geometry)
            .map_err(|source| WorkerErr::Solver {
                hook: "init_problem",
                source,
            })?;
        let joints = JointNameMap::new(geometry.jnt_names(), solver.joint_names())?;

        let quat_order = solver.quaternion_order();
        if !is_permutation(&quat_order) {
            return Err(WorkerErr::InvalidQuaternionOrder(quat_order));
        }

        solver
            .init_task_refs()
            .map_err(|source| WorkerErr::Solver {
                hook: "init_task_refs",
                source,
            })?;

        let debug = match (cfg.debug_solution, solver.introspection()) {
            (true, Introspection::Enabled(src)) => Some(SolutionDebugRegion::create(
                dir,
                ns,
                worker_index,
                &geometry,
                src.schema(),
            )?),
            (true, Introspection::Disabled) => {
                warn!(worker_index = worker_index; "debug_solution is set but the solver exposes no solution");
                None
            }
            (false, _) => None,
        };

        let fallback = homing_command(&solver, &joints, cmds.layout())?;
        cmds.row_mut(worker_index)?
            .as_slice_mut()
            .copy_from_slice(&fallback);

        status.register(worker_index)?;
        debug!(worker_index = worker_index, identity_map = joints.is_identity(); "attached to {}", dir.display());

        Ok(Self {
            worker_index,
            ctrl_state: ControllerState::new(geometry.n_dofs(), geometry.n_contacts()),
            geometry,
            solver,
            phase: Phase::Registered,
            regions: Some(Regions {
                cmds,
                state,
                status,
                profiling,
                debug,
            }),
            joints,
            quat_order,
            fallback,
            backoff: PollBackoff::new(cfg.poll),
            metrics: WorkerMetrics::default(),
        })
    }

    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn geometry(&self) -> &ClusterGeometry {
        &self.geometry
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Serves resets and triggers until `shutdown` is set, then terminates.
    ///
    /// # Errors
    /// `SetupSkipped` if the worker is not registered, or any fatal error
    /// raised while serving. The worker is terminated either way.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        if !matches!(self.phase, Phase::Registered | Phase::Idle) {
            return Err(WorkerErr::SetupSkipped("register with the cluster before serving"));
        }

        info!(worker_index = self.worker_index; "serving triggers");
        let res = self.serve(shutdown);
        if let Err(e) = &res {
            error!(worker_index = self.worker_index; "solve loop aborted: {e}");
        }
        self.terminate();
        res
    }

    fn serve(&mut self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::Acquire) {
            if self.session_closed() {
                info!(worker_index = self.worker_index; "the client closed the session");
                break;
            }
            if self.step()? {
                self.backoff.reset();
            } else {
                self.backoff.wait();
            }
        }
        Ok(())
    }

    /// Whether the client released the session, or the worker is no longer attached.
    pub fn session_closed(&self) -> bool {
        self.regions
            .as_ref()
            .is_none_or(|regions| regions.status.is_closed())
    }

    /// Polls the slot once, serving a pending reset before a pending trigger.
    ///
    /// # Returns
    /// Whether there was anything to serve.
    pub fn step(&mut self) -> Result<bool> {
        let Some(regions) = self.regions.as_ref() else {
            return Err(WorkerErr::SetupSkipped("attach the shared regions"));
        };
        let slot = regions.status.slot(self.worker_index)?;
        let (reset, trigger) = (slot.reset_requested(), slot.trigger_raised());
        self.phase = Phase::Idle;

        if reset {
            self.serve_reset()?;
        } else if trigger {
            self.serve_trigger()?;
        }
        Ok(reset || trigger)
    }

    fn serve_reset(&mut self) -> Result<()> {
        let idx = self.worker_index;
        self.solver.reset().map_err(|source| WorkerErr::Solver {
            hook: "reset",
            source,
        })?;

        let Some(regions) = self.regions.as_ref() else {
            return Err(WorkerErr::SetupSkipped("attach the shared regions"));
        };
        self.fallback = homing_command(&self.solver, &self.joints, regions.cmds.layout())?;
        let resets = regions.status.complete_reset(idx)?;

        self.metrics.bump_reset();
        info!(worker_index = idx, reset_count = resets; "reset served");
        Ok(())
    }

    /// Serves one trigger. The trigger is cleared whatever happens: on a fatal
    /// error the slot answers with the fallback command and is marked failed.
    fn serve_trigger(&mut self) -> Result<()> {
        let idx = self.worker_index;
        let res = self.solve_and_publish();

        let Some(regions) = self.regions.as_mut() else {
            return Err(WorkerErr::SetupSkipped("attach the shared regions"));
        };
        if let Err(e) = &res {
            if let Ok(mut row) = regions.cmds.row_mut(idx) {
                row.as_slice_mut().copy_from_slice(&self.fallback);
            }
            let fails = regions.status.slot(idx).map(|slot| slot.mark_failed());
            error!(worker_index = idx, fail_count:? = fails.ok(); "publishing the fallback command after a fatal error: {e}");
        }

        regions.status.slot(idx)?.clear_trigger();
        self.phase = Phase::Idle;
        res
    }

    fn solve_and_publish(&mut self) -> Result<()> {
        let started = Instant::now();
        let idx = self.worker_index;
        let Some(regions) = self.regions.as_mut() else {
            return Err(WorkerErr::SetupSkipped("attach the shared regions"));
        };

        self.phase = Phase::Solving;
        self.ctrl_state
            .load(&regions.state.row(idx)?, &self.joints, &self.quat_order);
        let solve_started = Instant::now();
        let ok = self.solver.solve(&self.ctrl_state);
        let solve_dt = solve_started.elapsed();

        self.phase = Phase::Publishing;
        let slot = regions.status.slot(idx)?;
        let mut row = regions.cmds.row_mut(idx)?;
        if ok {
            write_command(&self.solver, &self.joints, &mut row)?;
            self.fallback.copy_from_slice(row.as_slice_mut());
        } else {
            let fails = slot.mark_failed();
            warn!(worker_index = idx, fail_count = fails; "solve failed, publishing the fallback command");
            row.as_slice_mut().copy_from_slice(&self.fallback);
        }

        slot.publish_solution(
            self.solver.cost(),
            self.solver.constraint_violation(),
            self.solver.iterations(),
        );
        if let (Some(debug), Introspection::Enabled(src)) =
            (regions.debug.as_mut(), self.solver.introspection())
        {
            debug.publish(|frame| src.fill(frame));
        }

        let loop_dt = started.elapsed();
        if let Some(profiling) = &regions.profiling {
            let timings = SolveTimings {
                loop_dt,
                solve_dt,
                problem_update_dt: self.solver.timings().problem_update_dt,
            };
            profiling.record_solve(idx, &timings)?;
        }

        self.metrics.record_solve(solve_dt, loop_dt, ok);
        debug!(worker_index = idx, ok = ok, solve_us = solve_dt.as_micros() as u64; "trigger served");
        Ok(())
    }

    /// Closes the command and state buffers, deregisters and closes the rest.
    ///
    /// Idempotent, a terminated worker ignores further calls.
    pub fn terminate(&mut self) {
        if self.phase == Phase::Terminated {
            return;
        }
        self.phase = Phase::Terminated;

        let Some(regions) = self.regions.take() else {
            return;
        };
        let Regions {
            cmds,
            state,
            status,
            profiling,
            debug,
        } = regions;

        drop(cmds);
        drop(state);
        if let Err(e) = status.deregister(self.worker_index) {
            warn!(worker_index = self.worker_index; "could not deregister: {e}");
        }
        drop(status);
        drop(profiling);
        drop(debug);

        info!(
            worker_index = self.worker_index,
            solves = self.metrics.solves,
            failures = self.metrics.failures;
            "terminated"
        );
    }
}

impl<S: Solver> Drop for ClusterWorker<S> {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn is_permutation(order: &[usize; 4]) -> bool {
    let mut seen = [false; 4];
    order
        .iter()
        .all(|&i| i < 4 && !std::mem::replace(&mut seen[i], true))
}

fn check_len(field: &'static str, got: usize, expected: usize) -> Result<()> {
    match got == expected {
        true => Ok(()),
        false => Err(WorkerErr::CommandShape {
            field,
            got,
            expected,
        }),
    }
}

/// The homing posture with zero velocity, effort and extra info.
fn homing_command<S: Solver>(solver: &S, joints: &JointNameMap, layout: &CommandLayout) -> Result<Vec<f32>> {
    let mut row = vec![0.0; layout.width];
    if let Some(homing) = solver.homing_position() {
        check_len("homing_position", homing.len(), joints.len())?;
        joints.scatter(homing, &mut row[layout.jnt_q.clone()]);
    }
    Ok(row)
}

fn write_command<S: Solver>(solver: &S, joints: &JointNameMap, row: &mut CommandRowMut<'_>) -> Result<()> {
    let n = joints.len();
    let (q, v, eff, extra) = (
        solver.joint_position(),
        solver.joint_velocity(),
        solver.joint_effort(),
        solver.extra_info(),
    );
    check_len("joint_position", q.len(), n)?;
    check_len("joint_velocity", v.len(), n)?;
    check_len("joint_effort", eff.len(), n)?;
    if !extra.is_empty() {
        check_len("extra_info", extra.len(), row.extra_info().len())?;
    }

    joints.scatter(q, row.jnt_q());
    joints.scatter(v, row.jnt_v());
    joints.scatter(eff, row.jnt_eff());
    match extra.is_empty() {
        true => row.extra_info().fill(0.0),
        false => row.extra_info().copy_from_slice(extra),
    }
    Ok(())
}
