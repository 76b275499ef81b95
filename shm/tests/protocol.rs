use std::{path::PathBuf, thread};

use comms::specs::{ClusterGeometry, GeometryProposal};
use rand::{Rng, SeedableRng, rngs::StdRng};
use shm::{ClusterStatusBlock, CommandBuffer, PollBackoff, StateBuffer, Waiter, offsets};

const ROUNDS: usize = 500;

fn geometry(cluster_size: usize, n_dofs: usize) -> ClusterGeometry {
    GeometryProposal {
        cluster_size,
        n_dofs,
        n_contacts: 2,
        extra_width: 1,
        jnt_names: (0..n_dofs).map(|i| format!("j{i}")).collect(),
        root_acc: false,
    }
    .validate()
    .unwrap()
}

fn checksum(values: &[f32]) -> f32 {
    values.iter().enumerate().map(|(i, v)| v * (i + 1) as f32).sum()
}

/// Serves `ROUNDS` triggers of `slot` from its own mappings: answers every
/// state row with its checksum in `extra_info` and its joint positions doubled.
fn serve(dir: PathBuf, geometry: ClusterGeometry, slot: usize) {
    let status = ClusterStatusBlock::attach(&dir, "p", &geometry).unwrap();
    let state = StateBuffer::attach(&dir, "p", &geometry).unwrap();
    let mut cmds = CommandBuffer::attach(&dir, "p", &geometry).unwrap();
    status.register(slot).unwrap();

    let record = status.slot(slot).unwrap();
    let mut backoff = PollBackoff::default();
    for _ in 0..ROUNDS {
        assert!(backoff.poll_until(None, || record.trigger_raised()));
        let row = state.row(slot).unwrap();
        let sum = checksum(row.as_slice());
        let doubled: Vec<f32> = row.jnt_q().iter().map(|q| q * 2.0).collect();

        let mut out = cmds.row_mut(slot).unwrap();
        out.jnt_q().copy_from_slice(&doubled);
        out.extra_info()[0] = sum;
        record.publish_solution(sum as f64, 0.0, 1);
        record.clear_trigger();
    }
    status.deregister(slot).unwrap();
}

#[test]
fn every_round_sees_the_state_written_before_the_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let geometry = geometry(3, 5);
    let status = ClusterStatusBlock::create(dir.path(), "p", &geometry).unwrap();
    let mut state = StateBuffer::create(dir.path(), "p", &geometry).unwrap();
    let cmds = CommandBuffer::create(dir.path(), "p", &geometry).unwrap();

    let workers: Vec<_> = (0..3)
        .map(|slot| {
            let dir = dir.path().to_path_buf();
            let geometry = geometry.clone();
            thread::spawn(move || serve(dir, geometry, slot))
        })
        .collect();

    let mut backoff = PollBackoff::default();
    assert!(backoff.poll_until(None, || status.active_count() == 3));

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let width = offsets(5, 2, 1, false).state.width;
    for _ in 0..ROUNDS {
        let mut expected = Vec::new();
        for slot in 0..3 {
            let values: Vec<f32> = (0..width).map(|_| rng.random_range(-1.0..1.0)).collect();
            state.row_mut(slot).unwrap().as_slice_mut().copy_from_slice(&values);
            expected.push(values);
            assert!(status.slot(slot).unwrap().raise_trigger());
        }

        assert!(backoff.poll_until(None, || status.iter().all(|s| !s.trigger_raised())));

        for (slot, values) in expected.iter().enumerate() {
            let row = cmds.row(slot).unwrap();
            assert_eq!(row.extra_info()[0], checksum(values));
            let q = &values[state.layout().jnt_q.clone()];
            let doubled: Vec<f32> = q.iter().map(|q| q * 2.0).collect();
            assert_eq!(row.jnt_q(), doubled.as_slice());
        }
    }

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(status.active_count(), 0);
    assert_eq!(status.slot(1).unwrap().solve_count(), ROUNDS as u64);
}
