use comms::specs::ClusterGeometry;

use crate::{
    solver::{Solver, SolverErr},
    state::ControllerState,
};

/// Commands the measured joint posture with zero velocity and effort.
///
/// Bundled with the worker binary to exercise a cluster without a real
/// optimizer. A measured posture with non-finite values counts as a failed solve.
#[derive(Debug, Default)]
pub struct HoldSolver {
    names: Vec<String>,
    q: Vec<f32>,
    zeros: Vec<f32>,
}

impl HoldSolver {
    /// # Arguments
    /// * `joint_names` - Controller joint order, the negotiated order if `None`.
    pub fn new(joint_names: Option<Vec<String>>) -> Self {
        Self {
            names: joint_names.unwrap_or_default(),
            ..Default::default()
        }
    }
}

impl Solver for HoldSolver {
    fn init_problem(&mut self, geometry: &ClusterGeometry) -> Result<(), SolverErr> {
        if self.names.is_empty() {
            self.names = geometry.jnt_names().to_vec();
        }
        if self.names.len() != geometry.n_dofs() {
            return Err(SolverErr::new(format!(
                "{} joint names configured for {} dofs",
                self.names.len(),
                geometry.n_dofs()
            )));
        }

        self.q = vec![0.0; geometry.n_dofs()];
        self.zeros = vec![0.0; geometry.n_dofs()];
        Ok(())
    }

    fn joint_names(&self) -> &[String] {
        &self.names
    }

    fn solve(&mut self, state: &ControllerState) -> bool {
        if state.jnt_q.iter().any(|q| !q.is_finite()) {
            return false;
        }
        self.q.copy_from_slice(&state.jnt_q);
        true
    }

    fn reset(&mut self) -> Result<(), SolverErr> {
        self.q.fill(0.0);
        Ok(())
    }

    fn joint_position(&self) -> &[f32] {
        &self.q
    }

    fn joint_velocity(&self) -> &[f32] {
        &self.zeros
    }

    fn joint_effort(&self) -> &[f32] {
        &self.zeros
    }

    fn cost(&self) -> f64 {
        0.0
    }

    fn constraint_violation(&self) -> f64 {
        0.0
    }

    fn iterations(&self) -> u32 {
        1
    }
}
