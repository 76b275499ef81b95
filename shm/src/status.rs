//! Per-slot coordination flags and counters.
//!
//! Ordering: the client writes a state row and then raises the trigger with
//! `Release`; a worker observes it with `Acquire`, writes its command row and
//! telemetry and then clears the trigger with `Release`; the client observes
//! the clear with `Acquire` before reading the command row.

use std::{
    path::Path,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use comms::specs::ClusterGeometry;
use log::debug;

use crate::{RegionKind, Result, SharedRegion, ShmErr, region_path};

#[repr(C)]
struct StatusHeader {
    cluster_size: AtomicU64,
    active_count: AtomicU64,
    /// Non-zero once the owner has released the session.
    closed: AtomicU64,
    _reserved: [AtomicU64; 5],
}

const _: () = assert!(size_of::<StatusHeader>() == 64);

/// The coordination record of one slot, shared by the client and its worker.
#[repr(C)]
pub struct SlotRecord {
    registered: AtomicU32,
    active: AtomicU32,
    trigger: AtomicU32,
    reset_request: AtomicU32,
    fail: AtomicU32,
    iterations: AtomicU32,
    fail_count: AtomicU64,
    reset_count: AtomicU64,
    solve_count: AtomicU64,
    cost: AtomicU64,
    constraint_violation: AtomicU64,
}

const _: () = assert!(size_of::<SlotRecord>() == 64);

/// A point-in-time copy of a `SlotRecord`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotSnapshot {
    pub registered: bool,
    pub active: bool,
    pub trigger: bool,
    pub reset_request: bool,
    pub fail: bool,
    pub fail_count: u64,
    pub reset_count: u64,
    pub solve_count: u64,
    pub cost: f64,
    pub constraint_violation: f64,
    pub iterations: u32,
}

impl SlotRecord {
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire) != 0
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) != 0
    }

    /// Inactive slots are skipped by the client: never triggered, never awaited.
    pub fn set_active(&self, active: bool) {
        self.active.store(active as u32, Ordering::Release);
    }

    /// Raises the trigger after the state row was written.
    ///
    /// # Returns
    /// `false` if the trigger was already raised, the slot's last solve is
    /// still in flight.
    pub fn raise_trigger(&self) -> bool {
        self.trigger
            .compare_exchange(0, 1, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    pub fn trigger_raised(&self) -> bool {
        self.trigger.load(Ordering::Acquire) != 0
    }

    /// Clears the trigger after the command row and telemetry were written.
    pub fn clear_trigger(&self) {
        self.trigger.store(0, Ordering::Release);
    }

    pub fn request_reset(&self) {
        self.reset_request.store(1, Ordering::Release);
    }

    pub fn reset_requested(&self) -> bool {
        self.reset_request.load(Ordering::Acquire) != 0
    }

    pub fn clear_reset_request(&self) {
        self.reset_request.store(0, Ordering::Release);
    }

    /// Flags the last solve as failed.
    ///
    /// # Returns
    /// The number of failures since the last served reset.
    pub fn mark_failed(&self) -> u64 {
        self.fail.store(1, Ordering::Relaxed);
        self.fail_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Clears the fail flag, keeping the count.
    pub fn clear_fail_flag(&self) {
        self.fail.store(0, Ordering::Relaxed);
    }

    /// Clears the fail flag and zeroes the failure count, as a served reset does.
    pub fn clear_failure(&self) {
        self.fail.store(0, Ordering::Relaxed);
        self.fail_count.store(0, Ordering::Relaxed);
    }

    pub fn failed(&self) -> bool {
        self.fail.load(Ordering::Acquire) != 0
    }

    pub fn fail_count(&self) -> u64 {
        self.fail_count.load(Ordering::Acquire)
    }

    pub(crate) fn bump_reset_count(&self) -> u64 {
        self.reset_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_count(&self) -> u64 {
        self.reset_count.load(Ordering::Acquire)
    }

    pub fn solve_count(&self) -> u64 {
        self.solve_count.load(Ordering::Acquire)
    }

    /// Publishes the solver telemetry of the last solve.
    pub fn publish_solution(&self, cost: f64, constraint_violation: f64, iterations: u32) {
        self.cost.store(cost.to_bits(), Ordering::Relaxed);
        self.constraint_violation
            .store(constraint_violation.to_bits(), Ordering::Relaxed);
        self.iterations.store(iterations, Ordering::Relaxed);
        self.solve_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            registered: self.is_registered(),
            active: self.is_active(),
            trigger: self.trigger_raised(),
            reset_request: self.reset_requested(),
            fail: self.failed(),
            fail_count: self.fail_count(),
            reset_count: self.reset_count(),
            solve_count: self.solve_count(),
            cost: f64::from_bits(self.cost.load(Ordering::Acquire)),
            constraint_violation: f64::from_bits(self.constraint_violation.load(Ordering::Acquire)),
            iterations: self.iterations.load(Ordering::Acquire),
        }
    }

    fn reset_flags(&self) {
        for flag in [&self.trigger, &self.reset_request, &self.fail] {
            flag.store(0, Ordering::Relaxed);
        }
    }
}

/// The cluster-wide status region: a header plus one `SlotRecord` per slot.
pub struct ClusterStatusBlock {
    region: SharedRegion,
    cluster_size: usize,
}

impl ClusterStatusBlock {
    fn payload_len(cluster_size: usize) -> usize {
        size_of::<StatusHeader>() + cluster_size * size_of::<SlotRecord>()
    }

    /// Creates the zeroed status region, every slot unregistered and idle.
    pub fn create(dir: &Path, namespace: &str, geometry: &ClusterGeometry) -> Result<Self> {
        let cluster_size = geometry.cluster_size();
        let path = region_path(dir, namespace, RegionKind::Status, None);
        let region = SharedRegion::create(
            path,
            RegionKind::Status,
            geometry.fingerprint(),
            Self::payload_len(cluster_size),
        )?;

        let block = Self {
            region,
            cluster_size,
        };
        block
            .header()
            .cluster_size
            .store(cluster_size as u64, Ordering::Release);
        Ok(block)
    }

    pub fn attach(dir: &Path, namespace: &str, geometry: &ClusterGeometry) -> Result<Self> {
        let cluster_size = geometry.cluster_size();
        let path = region_path(dir, namespace, RegionKind::Status, None);
        let region = SharedRegion::attach(
            path,
            RegionKind::Status,
            geometry.fingerprint(),
            Self::payload_len(cluster_size),
        )?;
        Ok(Self {
            region,
            cluster_size,
        })
    }

    fn header(&self) -> &StatusHeader {
        // SAFETY: the payload starts with a StatusHeader, made of atomics only.
        unsafe { &self.region.slice::<StatusHeader>(0, 1)[0] }
    }

    fn slots(&self) -> &[SlotRecord] {
        // SAFETY: `cluster_size` records follow the header, made of atomics only.
        unsafe {
            self.region
                .slice::<SlotRecord>(size_of::<StatusHeader>(), self.cluster_size)
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    /// The record of slot `idx`.
    ///
    /// # Errors
    /// `SlotOutOfRange` if `idx` is not a slot of this cluster.
    pub fn slot(&self, idx: usize) -> Result<&SlotRecord> {
        self.slots().get(idx).ok_or(ShmErr::SlotOutOfRange {
            slot: idx,
            cluster_size: self.cluster_size,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotRecord> {
        self.slots().iter()
    }

    /// Number of workers currently registered.
    pub fn active_count(&self) -> u64 {
        self.header().active_count.load(Ordering::Acquire)
    }

    /// Marks the session closed, workers stop serving once they observe it.
    ///
    /// Called by the owner when it drops the block.
    pub fn close(&self) {
        self.header().closed.store(1, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.header().closed.load(Ordering::Acquire) != 0
    }

    /// Registers the worker of slot `idx` and marks the slot active.
    ///
    /// Registering an already registered slot leaves the count unchanged.
    pub fn register(&self, idx: usize) -> Result<()> {
        let slot = self.slot(idx)?;
        slot.reset_flags();
        slot.set_active(true);
        if slot.registered.swap(1, Ordering::AcqRel) == 0 {
            let count = self.header().active_count.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(worker_index = idx, active_count = count; "slot registered");
        }
        Ok(())
    }

    /// Deregisters the worker of slot `idx` and marks the slot inactive.
    ///
    /// Idempotent, only the first call decrements the count.
    pub fn deregister(&self, idx: usize) -> Result<()> {
        let slot = self.slot(idx)?;
        slot.set_active(false);
        if slot.registered.swap(0, Ordering::AcqRel) == 1 {
            let count = self.header().active_count.fetch_sub(1, Ordering::AcqRel) - 1;
            debug!(worker_index = idx, active_count = count; "slot deregistered");
        }
        Ok(())
    }

    /// Marks a served reset on slot `idx`: clears the failure state, bumps the
    /// reset count and finally clears the request.
    pub fn complete_reset(&self, idx: usize) -> Result<u64> {
        let slot = self.slot(idx)?;
        slot.clear_failure();
        let resets = slot.bump_reset_count();
        slot.clear_reset_request();
        Ok(resets)
    }
}

impl Drop for ClusterStatusBlock {
    fn drop(&mut self) {
        if self.region.is_owner() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use comms::specs::GeometryProposal;

    use super::*;

    fn geometry(cluster_size: usize) -> ClusterGeometry {
        GeometryProposal {
            cluster_size,
            n_dofs: 1,
            n_contacts: 0,
            extra_width: 0,
            jnt_names: vec!["j".into()],
            root_acc: false,
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn fresh_block_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let block = ClusterStatusBlock::create(dir.path(), "t", &geometry(3)).unwrap();
        assert_eq!(block.active_count(), 0);
        for slot in block.iter() {
            let snap = slot.snapshot();
            assert!(!snap.registered && !snap.trigger && !snap.fail);
        }
        assert!(matches!(
            block.slot(3),
            Err(ShmErr::SlotOutOfRange { slot: 3, cluster_size: 3 })
        ));
    }

    #[test]
    fn registration_is_counted_once() {
        let dir = tempfile::tempdir().unwrap();
        let client = ClusterStatusBlock::create(dir.path(), "t", &geometry(2)).unwrap();
        let worker = ClusterStatusBlock::attach(dir.path(), "t", &geometry(2)).unwrap();

        worker.register(1).unwrap();
        worker.register(1).unwrap();
        assert_eq!(client.active_count(), 1);
        assert!(client.slot(1).unwrap().is_active());

        worker.deregister(1).unwrap();
        worker.deregister(1).unwrap();
        assert_eq!(client.active_count(), 0);
        assert!(!client.slot(1).unwrap().is_active());
    }

    #[test]
    fn dropping_the_owner_closes_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let client = ClusterStatusBlock::create(dir.path(), "t", &geometry(1)).unwrap();
        let worker = ClusterStatusBlock::attach(dir.path(), "t", &geometry(1)).unwrap();
        assert!(!worker.is_closed());

        drop(ClusterStatusBlock::attach(dir.path(), "t", &geometry(1)).unwrap());
        assert!(!worker.is_closed());

        drop(client);
        assert!(worker.is_closed());
    }

    #[test]
    fn trigger_cannot_be_raised_twice() {
        let dir = tempfile::tempdir().unwrap();
        let block = ClusterStatusBlock::create(dir.path(), "t", &geometry(1)).unwrap();
        let slot = block.slot(0).unwrap();

        assert!(slot.raise_trigger());
        assert!(!slot.raise_trigger());
        slot.clear_trigger();
        assert!(slot.raise_trigger());
    }

    #[test]
    fn served_reset_clears_failures() {
        let dir = tempfile::tempdir().unwrap();
        let block = ClusterStatusBlock::create(dir.path(), "t", &geometry(1)).unwrap();
        let slot = block.slot(0).unwrap();

        assert_eq!(slot.mark_failed(), 1);
        assert_eq!(slot.mark_failed(), 2);
        slot.request_reset();

        assert_eq!(block.complete_reset(0).unwrap(), 1);
        let snap = slot.snapshot();
        assert!(!snap.fail && !snap.reset_request);
        assert_eq!((snap.fail_count, snap.reset_count), (0, 1));
    }

    #[test]
    fn telemetry_is_visible_after_the_trigger_clears() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ClusterStatusBlock::create(dir.path(), "t", &geometry(1)).unwrap());
        let worker = ClusterStatusBlock::attach(dir.path(), "t", &geometry(1)).unwrap();

        client.slot(0).unwrap().raise_trigger();
        let handle = thread::spawn(move || {
            let slot = worker.slot(0).unwrap();
            while !slot.trigger_raised() {
                std::hint::spin_loop();
            }
            slot.publish_solution(1.5, 0.25, 7);
            slot.clear_trigger();
        });

        let slot = client.slot(0).unwrap();
        while slot.trigger_raised() {
            std::hint::spin_loop();
        }
        let snap = slot.snapshot();
        assert_eq!((snap.cost, snap.constraint_violation, snap.iterations), (1.5, 0.25, 7));
        assert_eq!(snap.solve_count, 1);
        handle.join().unwrap();
    }
}
