//! Field offsets of a state row and a command row.
//!
//! Both rows are flat `f32` arrays. Every process computes the same offsets
//! from the negotiated geometry, nothing about the layout is stored in the
//! regions themselves.

use std::ops::Range;

use comms::specs::ClusterGeometry;

pub const ROOT_POSITION_WIDTH: usize = 3;
/// Quaternion, stored `w, x, y, z`.
pub const ROOT_ORIENTATION_WIDTH: usize = 4;
pub const ROOT_TWIST_WIDTH: usize = 3;
/// Force then torque, per contact.
pub const WRENCH_WIDTH: usize = 6;

/// Names a field of either row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    RootPosition,
    RootOrientation,
    RootLinVel,
    RootAngVel,
    RootLinAcc,
    RootAngAcc,
    JntQ,
    JntV,
    JntEff,
    ContactWrenches,
    ExtraInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    pub root_position: Range<usize>,
    pub root_orientation: Range<usize>,
    pub root_lin_vel: Range<usize>,
    pub root_ang_vel: Range<usize>,
    pub root_lin_acc: Option<Range<usize>>,
    pub root_ang_acc: Option<Range<usize>>,
    pub jnt_q: Range<usize>,
    pub jnt_v: Range<usize>,
    pub jnt_eff: Range<usize>,
    pub contact_wrenches: Range<usize>,
    pub width: usize,
}

impl StateLayout {
    /// Every present field with its range, in row order.
    pub fn fields(&self) -> Vec<(Field, Range<usize>)> {
        let mut fields = vec![
            (Field::RootPosition, self.root_position.clone()),
            (Field::RootOrientation, self.root_orientation.clone()),
            (Field::RootLinVel, self.root_lin_vel.clone()),
            (Field::RootAngVel, self.root_ang_vel.clone()),
        ];
        if let Some(r) = &self.root_lin_acc {
            fields.push((Field::RootLinAcc, r.clone()));
        }
        if let Some(r) = &self.root_ang_acc {
            fields.push((Field::RootAngAcc, r.clone()));
        }
        fields.extend([
            (Field::JntQ, self.jnt_q.clone()),
            (Field::JntV, self.jnt_v.clone()),
            (Field::JntEff, self.jnt_eff.clone()),
            (Field::ContactWrenches, self.contact_wrenches.clone()),
        ]);
        fields
    }

    /// The wrench of contact `idx`, if it exists.
    pub fn contact_wrench(&self, idx: usize) -> Option<Range<usize>> {
        let start = self.contact_wrenches.start + idx * WRENCH_WIDTH;
        let end = start + WRENCH_WIDTH;
        (end <= self.contact_wrenches.end).then_some(start..end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLayout {
    pub jnt_q: Range<usize>,
    pub jnt_v: Range<usize>,
    pub jnt_eff: Range<usize>,
    pub extra_info: Range<usize>,
    pub width: usize,
}

impl CommandLayout {
    pub fn fields(&self) -> Vec<(Field, Range<usize>)> {
        vec![
            (Field::JntQ, self.jnt_q.clone()),
            (Field::JntV, self.jnt_v.clone()),
            (Field::JntEff, self.jnt_eff.clone()),
            (Field::ExtraInfo, self.extra_info.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOffsets {
    pub state: StateLayout,
    pub command: CommandLayout,
}

impl FieldOffsets {
    pub fn state(&self) -> &StateLayout {
        &self.state
    }

    pub fn command(&self) -> &CommandLayout {
        &self.command
    }

    pub fn for_geometry(geometry: &ClusterGeometry) -> Self {
        offsets(
            geometry.n_dofs(),
            geometry.n_contacts(),
            geometry.extra_width(),
            geometry.root_acc(),
        )
    }
}

struct Cursor(usize);

impl Cursor {
    fn take(&mut self, n: usize) -> Range<usize> {
        let range = self.0..self.0 + n;
        self.0 += n;
        range
    }
}

/// Computes the row layouts for the given dimensions.
///
/// # Arguments
/// * `n_dofs` - Actuated joints per robot.
/// * `n_contacts` - Contact wrenches in the state row.
/// * `extra_width` - Trailing solver-specific values in the command row.
/// * `root_acc` - Whether the state row carries root accelerations.
///
/// # Returns
/// Contiguous, non-overlapping ranges covering exactly `width` values per row.
pub fn offsets(n_dofs: usize, n_contacts: usize, extra_width: usize, root_acc: bool) -> FieldOffsets {
    let mut c = Cursor(0);
    let state = StateLayout {
        root_position: c.take(ROOT_POSITION_WIDTH),
        root_orientation: c.take(ROOT_ORIENTATION_WIDTH),
        root_lin_vel: c.take(ROOT_TWIST_WIDTH),
        root_ang_vel: c.take(ROOT_TWIST_WIDTH),
        root_lin_acc: root_acc.then(|| c.take(ROOT_TWIST_WIDTH)),
        root_ang_acc: root_acc.then(|| c.take(ROOT_TWIST_WIDTH)),
        jnt_q: c.take(n_dofs),
        jnt_v: c.take(n_dofs),
        jnt_eff: c.take(n_dofs),
        contact_wrenches: c.take(WRENCH_WIDTH * n_contacts),
        width: 0,
    };
    let state = StateLayout { width: c.0, ..state };

    let mut c = Cursor(0);
    let command = CommandLayout {
        jnt_q: c.take(n_dofs),
        jnt_v: c.take(n_dofs),
        jnt_eff: c.take(n_dofs),
        extra_info: c.take(extra_width),
        width: 0,
    };
    let command = CommandLayout {
        width: c.0,
        ..command
    };

    FieldOffsets { state, command }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(fields: &[(Field, Range<usize>)], width: usize) {
        let mut next = 0;
        for (field, range) in fields {
            assert_eq!(range.start, next, "{field:?} does not start where the previous field ends");
            next = range.end;
        }
        assert_eq!(next, width);
    }

    #[test]
    fn state_row_is_tiled_without_gaps() {
        let off = offsets(12, 4, 0, false);
        assert_eq!(off.state.width, 13 + 3 * 12 + 6 * 4);
        assert_eq!(off.state.root_orientation, 3..7);
        assert_eq!(off.state.root_ang_vel, 10..13);
        assert_eq!(off.state.jnt_q, 13..25);
        assert_tiles(&off.state.fields(), off.state.width);
    }

    #[test]
    fn root_acc_extends_the_state_row() {
        let off = offsets(2, 1, 0, true);
        assert_eq!(off.state.root_lin_acc, Some(13..16));
        assert_eq!(off.state.root_ang_acc, Some(16..19));
        assert_eq!(off.state.jnt_q, 19..21);
        assert_tiles(&off.state.fields(), off.state.width);
    }

    #[test]
    fn command_row_tail_is_extra_info() {
        let off = offsets(3, 0, 5, false);
        assert_eq!(off.command.jnt_eff, 6..9);
        assert_eq!(off.command.extra_info, 9..14);
        assert_eq!(off.command.width, 14);
        assert_tiles(&off.command.fields(), off.command.width);
    }

    #[test]
    fn zero_contacts_leave_an_empty_wrench_block() {
        let off = offsets(1, 0, 0, false);
        assert!(off.state.contact_wrenches.is_empty());
        assert_eq!(off.state.contact_wrench(0), None);
    }

    #[test]
    fn contact_wrench_addresses_one_contact() {
        let off = offsets(1, 3, 0, false);
        let start = off.state.contact_wrenches.start;
        assert_eq!(off.state.contact_wrench(2), Some(start + 12..start + 18));
        assert_eq!(off.state.contact_wrench(3), None);
    }
}
