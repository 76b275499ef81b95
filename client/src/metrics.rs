use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct ClientMetrics {
    /// Ticks whose barrier cleared.
    pub solution_counter: u64,
    pub last_tick_dt: Duration,
    pub cumulative_tick_dt: Duration,
}

impl ClientMetrics {
    #[inline]
    pub fn record_tick(&mut self, dt: Duration) {
        self.solution_counter += 1;
        self.last_tick_dt = dt;
        self.cumulative_tick_dt += dt;
    }

    pub fn mean_tick_dt(&self) -> Option<Duration> {
        u32::try_from(self.solution_counter)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| self.cumulative_tick_dt / n)
    }
}
