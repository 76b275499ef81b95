use std::{
    hint, thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Tuning of `PollBackoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Spin-loop hints issued before the first sleep.
    pub spins: u32,
    /// First sleep, in microseconds.
    pub initial_us: u64,
    /// Sleep ceiling, in microseconds.
    pub max_us: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            spins: 64,
            initial_us: 20,
            max_us: 500,
        }
    }
}

/// A way of waiting between two polls of a shared flag.
///
/// Callers only depend on this trait, so a blocking wake-up primitive can
/// replace the sleeping one without touching them.
pub trait Waiter {
    /// Waits once.
    fn wait(&mut self);

    /// Called after the awaited condition was observed, restarts the schedule.
    fn reset(&mut self);

    /// Polls `done` until it holds or `deadline` passes.
    ///
    /// # Returns
    /// Whether `done` held.
    fn poll_until<F>(&mut self, deadline: Option<Instant>, mut done: F) -> bool
    where
        Self: Sized,
        F: FnMut() -> bool,
    {
        loop {
            if done() {
                self.reset();
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                self.reset();
                return false;
            }
            self.wait();
        }
    }
}

/// Spins briefly, then sleeps with a doubling interval capped at `max_us`.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    cfg: PollConfig,
    spun: u32,
    sleep: Duration,
}

impl PollBackoff {
    pub fn new(cfg: PollConfig) -> Self {
        Self {
            cfg,
            spun: 0,
            sleep: Duration::from_micros(cfg.initial_us),
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.cfg
    }
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::new(PollConfig::default())
    }
}

impl Waiter for PollBackoff {
    fn wait(&mut self) {
        if self.spun < self.cfg.spins {
            self.spun += 1;
            hint::spin_loop();
            return;
        }

        thread::sleep(self.sleep);
        let max = Duration::from_micros(self.cfg.max_us.max(self.cfg.initial_us));
        self.sleep = (self.sleep * 2).min(max);
    }

    fn reset(&mut self) {
        self.spun = 0;
        self.sleep = Duration::from_micros(self.cfg.initial_us);
    }
}
