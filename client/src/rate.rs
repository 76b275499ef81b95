use std::num::NonZeroUsize;

use log::{info, warn};

use crate::{ClientErr, Result};

/// Relates the simulation step to the cluster's solve rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlRate {
    control_dt: f64,
    cluster_dt: f64,
    steps_per_solve: NonZeroUsize,
}

impl ControlRate {
    /// # Arguments
    /// * `control_dt` - Simulation (control) step, in seconds.
    /// * `cluster_dt` - Desired solve period, snapped to a multiple of `control_dt`.
    ///
    /// # Errors
    /// `Config` if either period is not a positive, finite number.
    pub fn new(control_dt: f64, cluster_dt: f64) -> Result<Self> {
        for (name, dt) in [("control_dt", control_dt), ("cluster_dt", cluster_dt)] {
            if !dt.is_finite() || dt <= 0.0 {
                return Err(ClientErr::Config(format!("{name} must be positive, got {dt}")));
            }
        }

        let steps = if cluster_dt < control_dt {
            warn!("cluster_dt ({cluster_dt}) is shorter than control_dt ({control_dt}), solving every step");
            1
        } else {
            (cluster_dt / control_dt).round().max(1.0) as usize
        };
        let steps_per_solve = NonZeroUsize::new(steps).unwrap_or(NonZeroUsize::MIN);
        let cluster_dt = control_dt * steps as f64;

        info!(steps_per_solve = steps; "cluster runs at {:.1} Hz", 1.0 / cluster_dt);
        Ok(Self {
            control_dt,
            cluster_dt,
            steps_per_solve,
        })
    }

    pub fn control_dt(&self) -> f64 {
        self.control_dt
    }

    pub fn cluster_dt(&self) -> f64 {
        self.cluster_dt
    }

    pub fn steps_per_solve(&self) -> usize {
        self.steps_per_solve.get()
    }

    /// Returns true if control step `step` ends a cluster period.
    #[inline]
    pub fn is_cluster_instant(&self, step: usize) -> bool {
        (step + 1) % self.steps_per_solve.get() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_instants() {
        let rate = ControlRate::new(0.01, 0.03).unwrap();
        assert_eq!(rate.steps_per_solve(), 3);
        assert!(!rate.is_cluster_instant(0));
        assert!(!rate.is_cluster_instant(1));
        assert!(rate.is_cluster_instant(2));
        assert!(!rate.is_cluster_instant(3));
        assert!(!rate.is_cluster_instant(4));
        assert!(rate.is_cluster_instant(5));
    }

    #[test]
    fn cluster_dt_snaps_to_a_multiple() {
        let rate = ControlRate::new(0.01, 0.034).unwrap();
        assert_eq!(rate.steps_per_solve(), 3);
        assert!((rate.cluster_dt() - 0.03).abs() < 1e-12);
    }

    #[test]
    fn short_cluster_dt_solves_every_step() {
        let rate = ControlRate::new(0.02, 0.005).unwrap();
        assert_eq!(rate.steps_per_solve(), 1);
        assert!(rate.is_cluster_instant(0));
        assert_eq!(rate.cluster_dt(), 0.02);
    }

    #[test]
    fn periods_must_be_positive() {
        assert!(matches!(ControlRate::new(0.0, 0.1), Err(ClientErr::Config(_))));
        assert!(matches!(ControlRate::new(0.01, f64::NAN), Err(ClientErr::Config(_))));
    }
}
