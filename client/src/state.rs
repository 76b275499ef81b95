//! Process-local aggregates the client exchanges with the shared buffers.

use comms::specs::ClusterGeometry;
use shm::{CommandLayout, CommandRow, FieldOffsets, StateLayout, StateRow, StateRowMut};

use crate::{ClientErr, Result};

fn bounds(idx: usize, rows: usize, width: usize) -> Result<std::ops::Range<usize>> {
    if idx >= rows {
        return Err(ClientErr::SlotOutOfRange {
            slot: idx,
            cluster_size: rows,
        });
    }
    Ok(idx * width..(idx + 1) * width)
}

/// The measured state of every robot, one state row per slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterState {
    layout: StateLayout,
    rows: usize,
    data: Vec<f32>,
}

impl ClusterState {
    pub fn new(geometry: &ClusterGeometry) -> Self {
        let layout = FieldOffsets::for_geometry(geometry).state;
        let rows = geometry.cluster_size();
        Self {
            data: vec![0.0; rows * layout.width],
            layout,
            rows,
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.rows
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn row(&self, idx: usize) -> Result<StateRow<'_>> {
        let range = bounds(idx, self.rows, self.layout.width)?;
        Ok(StateRow::new(&self.layout, &self.data[range]))
    }

    pub fn row_mut(&mut self, idx: usize) -> Result<StateRowMut<'_>> {
        let range = bounds(idx, self.rows, self.layout.width)?;
        Ok(StateRowMut::new(&self.layout, &mut self.data[range]))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// The commands gathered by the last tick, one command row per slot.
///
/// Rows of slots that were not driven keep their previous values.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCommands {
    layout: CommandLayout,
    rows: usize,
    data: Vec<f32>,
}

impl ClusterCommands {
    pub fn new(geometry: &ClusterGeometry) -> Self {
        let layout = FieldOffsets::for_geometry(geometry).command;
        let rows = geometry.cluster_size();
        Self {
            data: vec![0.0; rows * layout.width],
            layout,
            rows,
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.rows
    }

    pub fn layout(&self) -> &CommandLayout {
        &self.layout
    }

    pub fn row(&self, idx: usize) -> Result<CommandRow<'_>> {
        let range = bounds(idx, self.rows, self.layout.width)?;
        Ok(CommandRow::new(&self.layout, &self.data[range]))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn raw_row_mut(&mut self, idx: usize) -> Result<&mut [f32]> {
        let range = bounds(idx, self.rows, self.layout.width)?;
        Ok(&mut self.data[range])
    }
}

#[cfg(test)]
mod tests {
    use comms::specs::GeometryProposal;

    use super::*;

    #[test]
    fn rows_follow_the_shared_layout() {
        let geometry = GeometryProposal {
            cluster_size: 2,
            n_dofs: 2,
            n_contacts: 1,
            extra_width: 3,
            jnt_names: vec!["a".into(), "b".into()],
            root_acc: false,
        }
        .validate()
        .unwrap();

        let mut state = ClusterState::new(&geometry);
        state.row_mut(1).unwrap().jnt_v().copy_from_slice(&[5.0, 6.0]);
        let width = state.layout().width;
        assert_eq!(state.as_slice().len(), 2 * width);
        assert_eq!(&state.as_slice()[width + state.layout().jnt_v.start..][..2], &[5.0, 6.0]);
        assert!(matches!(state.row(2), Err(ClientErr::SlotOutOfRange { slot: 2, .. })));

        let cmds = ClusterCommands::new(&geometry);
        assert_eq!(cmds.row(0).unwrap().extra_info().len(), 3);
    }
}
