//! The capability interface a receding-horizon controller offers the worker.

use std::{error::Error, fmt, time::Duration};

use comms::specs::ClusterGeometry;
use shm::{DebugFrameMut, DebugSchema};

use crate::state::ControllerState;

/// A failure of a solver hook other than `solve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverErr {
    detail: String,
}

impl SolverErr {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for SolverErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

impl Error for SolverErr {}

/// Timings the solver measures itself.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SolverTimings {
    pub problem_update_dt: Option<Duration>,
}

/// Whether the solver exposes its internal solution.
pub enum Introspection<'a> {
    Disabled,
    Enabled(&'a dyn SolutionDebug),
}

/// Access to the internal solution, published to the debug region.
pub trait SolutionDebug {
    /// Describes the frame, fixed for the whole session.
    fn schema(&self) -> DebugSchema;

    /// Copies the last solution into `frame`.
    fn fill(&self, frame: &mut DebugFrameMut<'_>);
}

/// A receding-horizon controller driven by a `ClusterWorker`.
///
/// Every joint vector is in controller order, `joint_names` defines it.
pub trait Solver: Send {
    /// Builds the problem for the negotiated geometry.
    fn init_problem(&mut self, geometry: &ClusterGeometry) -> Result<(), SolverErr>;

    /// The controller's joint order. Valid after `init_problem`.
    fn joint_names(&self) -> &[String];

    /// Builds the task references, after the joint map exists.
    fn init_task_refs(&mut self) -> Result<(), SolverErr> {
        Ok(())
    }

    /// Solves for the measured `state`.
    ///
    /// # Returns
    /// `false` if the solve failed, the worker then publishes its fallback command.
    fn solve(&mut self, state: &ControllerState) -> bool;

    /// Re-initializes the internal solver state.
    fn reset(&mut self) -> Result<(), SolverErr>;

    fn joint_position(&self) -> &[f32];

    fn joint_velocity(&self) -> &[f32];

    fn joint_effort(&self) -> &[f32];

    /// Trailing solver-specific values, exactly `extra_width` of them.
    fn extra_info(&self) -> &[f32] {
        &[]
    }

    fn cost(&self) -> f64;

    fn constraint_violation(&self) -> f64;

    fn iterations(&self) -> u32;

    /// Posture commanded before the first successful solve, zeros if `None`.
    fn homing_position(&self) -> Option<&[f32]> {
        None
    }

    /// `order[i]` is the component of the shared `w, x, y, z` quaternion the
    /// solver expects at position `i`.
    fn quaternion_order(&self) -> [usize; 4] {
        [0, 1, 2, 3]
    }

    fn timings(&self) -> SolverTimings {
        SolverTimings::default()
    }

    fn introspection(&self) -> Introspection<'_> {
        Introspection::Disabled
    }
}
