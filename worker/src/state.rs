use shm::StateRow;

use crate::JointNameMap;

/// The measured state handed to the solver, in controller order.
///
/// Buffers are allocated once per session and overwritten on every trigger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    pub root_position: [f32; 3],
    pub root_orientation: [f32; 4],
    pub root_lin_vel: [f32; 3],
    pub root_ang_vel: [f32; 3],
    pub root_lin_acc: Option<[f32; 3]>,
    pub root_ang_acc: Option<[f32; 3]>,
    pub jnt_q: Vec<f32>,
    pub jnt_v: Vec<f32>,
    pub jnt_eff: Vec<f32>,
    /// Environment contact order, 6 values per contact.
    pub contact_wrenches: Vec<f32>,
}

impl ControllerState {
    pub fn new(n_dofs: usize, n_contacts: usize) -> Self {
        Self {
            jnt_q: vec![0.0; n_dofs],
            jnt_v: vec![0.0; n_dofs],
            jnt_eff: vec![0.0; n_dofs],
            contact_wrenches: vec![0.0; 6 * n_contacts],
            ..Default::default()
        }
    }

    /// Copies a state row in, reordering joints and quaternion components.
    pub fn load(&mut self, row: &StateRow<'_>, joints: &JointNameMap, quat_order: &[usize; 4]) {
        self.root_position.copy_from_slice(row.root_position());
        let quat = row.root_orientation();
        for (dst, &src) in self.root_orientation.iter_mut().zip(quat_order) {
            *dst = quat[src];
        }
        self.root_lin_vel.copy_from_slice(row.root_lin_vel());
        self.root_ang_vel.copy_from_slice(row.root_ang_vel());
        self.root_lin_acc = row.root_lin_acc().map(triple);
        self.root_ang_acc = row.root_ang_acc().map(triple);

        joints.gather(row.jnt_q(), &mut self.jnt_q);
        joints.gather(row.jnt_v(), &mut self.jnt_v);
        joints.gather(row.jnt_eff(), &mut self.jnt_eff);
        self.contact_wrenches.copy_from_slice(row.contact_wrenches());
    }
}

fn triple(values: &[f32]) -> [f32; 3] {
    [values[0], values[1], values[2]]
}

#[cfg(test)]
mod tests {
    use shm::offsets;

    use super::*;

    #[test]
    fn load_applies_both_remaps() {
        let layout = offsets(2, 1, 0, true).state;
        let mut data: Vec<f32> = (0..layout.width).map(|i| i as f32).collect();
        data[layout.jnt_q.clone()].copy_from_slice(&[10.0, 20.0]);
        let row = StateRow::new(&layout, &data);

        let env = vec!["a".to_string(), "b".to_string()];
        let ctrl = vec!["b".to_string(), "a".to_string()];
        let joints = JointNameMap::new(&env, &ctrl).unwrap();

        let mut state = ControllerState::new(2, 1);
        state.load(&row, &joints, &[1, 2, 3, 0]);

        assert_eq!(state.root_position, [0.0, 1.0, 2.0]);
        assert_eq!(state.root_orientation, [4.0, 5.0, 6.0, 3.0]);
        assert_eq!(state.root_lin_acc, Some([13.0, 14.0, 15.0]));
        assert_eq!(state.jnt_q, vec![20.0, 10.0]);
        assert_eq!(state.contact_wrenches.len(), 6);
    }
}
