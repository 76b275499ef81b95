//! Read-only telemetry sink, polled by monitors.
//!
//! Durations are stored as `f64` seconds in atomic words. Every word has a
//! single writer (the slot's worker, or the client for the header), so
//! relaxed ordering is enough: readers only ever see slightly stale values.

use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use comms::specs::ClusterGeometry;

use crate::{RegionKind, Result, SharedRegion, ShmErr, region_path};

#[repr(C)]
struct TickRecord {
    ticks: AtomicU64,
    last_tick_dt: AtomicU64,
    cumulative_tick_dt: AtomicU64,
    _reserved: [AtomicU64; 5],
}

#[repr(C)]
struct SolveRecord {
    solve_loop_dt: AtomicU64,
    solve_dt: AtomicU64,
    problem_update_dt: AtomicU64,
    cumulative_solve_loop_dt: AtomicU64,
    samples: AtomicU64,
    _reserved: [AtomicU64; 3],
}

const _: () = assert!(size_of::<TickRecord>() == 64 && size_of::<SolveRecord>() == 64);

fn store(word: &AtomicU64, secs: f64) {
    word.store(secs.to_bits(), Ordering::Relaxed);
}

fn add(word: &AtomicU64, secs: f64) {
    // Single writer: a load followed by a store cannot lose updates.
    let prev = f64::from_bits(word.load(Ordering::Relaxed));
    store(word, prev + secs);
}

fn load(word: &AtomicU64) -> f64 {
    f64::from_bits(word.load(Ordering::Relaxed))
}

/// Durations measured around one solve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SolveTimings {
    /// From trigger observed to trigger cleared.
    pub loop_dt: Duration,
    /// Time spent inside the solver's `solve`.
    pub solve_dt: Duration,
    /// Reported by the solver, if it measures it.
    pub problem_update_dt: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProfilingSnapshot {
    pub solve_loop_dt: f64,
    pub solve_dt: f64,
    pub problem_update_dt: f64,
    pub cumulative_solve_loop_dt: f64,
    pub samples: u64,
}

impl ProfilingSnapshot {
    /// Average solve-loop duration in seconds, `None` before the first sample.
    pub fn mean_solve_loop_dt(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.cumulative_solve_loop_dt / self.samples as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickSnapshot {
    pub ticks: u64,
    pub last_tick_dt: f64,
    pub cumulative_tick_dt: f64,
}

/// Cluster-wide tick timings followed by one solve record per slot.
pub struct ProfilingBlock {
    region: SharedRegion,
    cluster_size: usize,
}

impl ProfilingBlock {
    fn payload_len(cluster_size: usize) -> usize {
        size_of::<TickRecord>() + cluster_size * size_of::<SolveRecord>()
    }

    pub fn create(dir: &Path, namespace: &str, geometry: &ClusterGeometry) -> Result<Self> {
        let cluster_size = geometry.cluster_size();
        let region = SharedRegion::create(
            region_path(dir, namespace, RegionKind::Profiling, None),
            RegionKind::Profiling,
            geometry.fingerprint(),
            Self::payload_len(cluster_size),
        )?;
        Ok(Self {
            region,
            cluster_size,
        })
    }

    pub fn attach(dir: &Path, namespace: &str, geometry: &ClusterGeometry) -> Result<Self> {
        let cluster_size = geometry.cluster_size();
        let region = SharedRegion::attach(
            region_path(dir, namespace, RegionKind::Profiling, None),
            RegionKind::Profiling,
            geometry.fingerprint(),
            Self::payload_len(cluster_size),
        )?;
        Ok(Self {
            region,
            cluster_size,
        })
    }

    fn ticks(&self) -> &TickRecord {
        // SAFETY: the payload starts with a TickRecord, made of atomics only.
        unsafe { &self.region.slice::<TickRecord>(0, 1)[0] }
    }

    fn solve(&self, idx: usize) -> Result<&SolveRecord> {
        // SAFETY: `cluster_size` SolveRecords follow the header, atomics only.
        let records = unsafe {
            self.region
                .slice::<SolveRecord>(size_of::<TickRecord>(), self.cluster_size)
        };
        records.get(idx).ok_or(ShmErr::SlotOutOfRange {
            slot: idx,
            cluster_size: self.cluster_size,
        })
    }

    /// Records one served trigger of slot `idx`.
    pub fn record_solve(&self, idx: usize, timings: &SolveTimings) -> Result<()> {
        let rec = self.solve(idx)?;
        let loop_dt = timings.loop_dt.as_secs_f64();
        store(&rec.solve_loop_dt, loop_dt);
        store(&rec.solve_dt, timings.solve_dt.as_secs_f64());
        if let Some(dt) = timings.problem_update_dt {
            store(&rec.problem_update_dt, dt.as_secs_f64());
        }
        add(&rec.cumulative_solve_loop_dt, loop_dt);
        rec.samples.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Records one completed client tick.
    pub fn record_tick(&self, dt: Duration) {
        let rec = self.ticks();
        store(&rec.last_tick_dt, dt.as_secs_f64());
        add(&rec.cumulative_tick_dt, dt.as_secs_f64());
        rec.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, idx: usize) -> Result<ProfilingSnapshot> {
        let rec = self.solve(idx)?;
        Ok(ProfilingSnapshot {
            solve_loop_dt: load(&rec.solve_loop_dt),
            solve_dt: load(&rec.solve_dt),
            problem_update_dt: load(&rec.problem_update_dt),
            cumulative_solve_loop_dt: load(&rec.cumulative_solve_loop_dt),
            samples: rec.samples.load(Ordering::Relaxed),
        })
    }

    pub fn tick_snapshot(&self) -> TickSnapshot {
        let rec = self.ticks();
        TickSnapshot {
            ticks: rec.ticks.load(Ordering::Relaxed),
            last_tick_dt: load(&rec.last_tick_dt),
            cumulative_tick_dt: load(&rec.cumulative_tick_dt),
        }
    }
}
