use std::time::Duration;

/// Process-local counters of one worker, complementing the shared slot record.
#[derive(Debug, Default, Clone)]
pub struct WorkerMetrics {
    pub solve_time: Duration,
    pub loop_time: Duration,

    pub solves: u64,
    pub failures: u64,
    pub resets: u64,
}

impl WorkerMetrics {
    #[inline]
    pub fn record_solve(&mut self, solve_dt: Duration, loop_dt: Duration, ok: bool) {
        self.solves += 1;
        self.solve_time += solve_dt;
        self.loop_time += loop_dt;
        if !ok {
            self.failures += 1;
        }
    }

    #[inline]
    pub fn bump_reset(&mut self) {
        self.resets += 1;
    }
}
