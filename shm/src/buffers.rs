use std::{ops::Range, path::Path};

use comms::specs::ClusterGeometry;

use crate::{
    CommandLayout, FieldOffsets, RegionKind, Result, SharedRegion, ShmErr, StateLayout,
    region_path,
};

/// `count` rows of `width` floats laid out back to back in a region.
struct Rows {
    region: SharedRegion,
    width: usize,
    count: usize,
}

impl Rows {
    fn create(path: &Path, kind: RegionKind, geometry: &ClusterGeometry, width: usize) -> Result<Self> {
        let count = geometry.cluster_size();
        let len = width * count * size_of::<f32>();
        let region = SharedRegion::create(path.to_path_buf(), kind, geometry.fingerprint(), len)?;
        Ok(Self {
            region,
            width,
            count,
        })
    }

    fn attach(path: &Path, kind: RegionKind, geometry: &ClusterGeometry, width: usize) -> Result<Self> {
        let count = geometry.cluster_size();
        let len = width * count * size_of::<f32>();
        let region = SharedRegion::attach(path.to_path_buf(), kind, geometry.fingerprint(), len)?;
        Ok(Self {
            region,
            width,
            count,
        })
    }

    fn check(&self, idx: usize) -> Result<Range<usize>> {
        if idx >= self.count {
            return Err(ShmErr::SlotOutOfRange {
                slot: idx,
                cluster_size: self.count,
            });
        }
        Ok(idx * self.width..(idx + 1) * self.width)
    }

    fn row(&self, idx: usize) -> Result<&[f32]> {
        let range = self.check(idx)?;
        // SAFETY: f32 accepts any bit pattern, the payload holds count * width floats.
        let all = unsafe { self.region.slice::<f32>(0, self.count * self.width) };
        Ok(&all[range])
    }

    fn row_mut(&mut self, idx: usize) -> Result<&mut [f32]> {
        let range = self.check(idx)?;
        let len = self.count * self.width;
        // SAFETY: as in `row`. The trigger of slot `idx` hands the row to exactly one side.
        let all = unsafe { self.region.slice_mut::<f32>(0, len) };
        Ok(&mut all[range])
    }
}

macro_rules! field {
    ($name:ident, $field:ident) => {
        pub fn $name(&self) -> &[f32] {
            &self.data[self.layout.$field.clone()]
        }
    };
    (mut $name:ident, $field:ident) => {
        pub fn $name(&mut self) -> &mut [f32] {
            &mut self.data[self.layout.$field.clone()]
        }
    };
}

/// Read view of one robot's state row.
#[derive(Clone, Copy)]
pub struct StateRow<'a> {
    layout: &'a StateLayout,
    data: &'a [f32],
}

impl<'a> StateRow<'a> {
    pub fn new(layout: &'a StateLayout, data: &'a [f32]) -> Self {
        Self { layout, data }
    }

    field!(root_position, root_position);
    field!(root_orientation, root_orientation);
    field!(root_lin_vel, root_lin_vel);
    field!(root_ang_vel, root_ang_vel);
    field!(jnt_q, jnt_q);
    field!(jnt_v, jnt_v);
    field!(jnt_eff, jnt_eff);
    field!(contact_wrenches, contact_wrenches);

    pub fn root_lin_acc(&self) -> Option<&[f32]> {
        self.layout.root_lin_acc.clone().map(|r| &self.data[r])
    }

    pub fn root_ang_acc(&self) -> Option<&[f32]> {
        self.layout.root_ang_acc.clone().map(|r| &self.data[r])
    }

    pub fn contact_wrench(&self, idx: usize) -> Option<&[f32]> {
        self.layout.contact_wrench(idx).map(|r| &self.data[r])
    }

    pub fn layout(&self) -> &StateLayout {
        self.layout
    }

    pub fn as_slice(&self) -> &[f32] {
        self.data
    }
}

/// Write view of one robot's state row.
pub struct StateRowMut<'a> {
    layout: &'a StateLayout,
    data: &'a mut [f32],
}

impl<'a> StateRowMut<'a> {
    pub fn new(layout: &'a StateLayout, data: &'a mut [f32]) -> Self {
        Self { layout, data }
    }

    field!(mut root_position, root_position);
    field!(mut root_orientation, root_orientation);
    field!(mut root_lin_vel, root_lin_vel);
    field!(mut root_ang_vel, root_ang_vel);
    field!(mut jnt_q, jnt_q);
    field!(mut jnt_v, jnt_v);
    field!(mut jnt_eff, jnt_eff);
    field!(mut contact_wrenches, contact_wrenches);

    pub fn root_lin_acc(&mut self) -> Option<&mut [f32]> {
        self.layout.root_lin_acc.clone().map(|r| &mut self.data[r])
    }

    pub fn root_ang_acc(&mut self) -> Option<&mut [f32]> {
        self.layout.root_ang_acc.clone().map(|r| &mut self.data[r])
    }

    pub fn as_slice_mut(&mut self) -> &mut [f32] {
        &mut *self.data
    }

    pub fn as_row(&self) -> StateRow<'_> {
        StateRow::new(self.layout, &*self.data)
    }
}

/// Read view of one robot's command row.
#[derive(Clone, Copy)]
pub struct CommandRow<'a> {
    layout: &'a CommandLayout,
    data: &'a [f32],
}

impl<'a> CommandRow<'a> {
    pub fn new(layout: &'a CommandLayout, data: &'a [f32]) -> Self {
        Self { layout, data }
    }

    field!(jnt_q, jnt_q);
    field!(jnt_v, jnt_v);
    field!(jnt_eff, jnt_eff);
    field!(extra_info, extra_info);

    pub fn as_slice(&self) -> &[f32] {
        self.data
    }
}

/// Write view of one robot's command row.
pub struct CommandRowMut<'a> {
    layout: &'a CommandLayout,
    data: &'a mut [f32],
}

impl<'a> CommandRowMut<'a> {
    pub fn new(layout: &'a CommandLayout, data: &'a mut [f32]) -> Self {
        Self { layout, data }
    }

    field!(mut jnt_q, jnt_q);
    field!(mut jnt_v, jnt_v);
    field!(mut jnt_eff, jnt_eff);
    field!(mut extra_info, extra_info);

    pub fn as_slice_mut(&mut self) -> &mut [f32] {
        &mut *self.data
    }
}

/// The `cluster_size x state_width` matrix written by the client.
pub struct StateBuffer {
    rows: Rows,
    layout: StateLayout,
}

impl StateBuffer {
    pub fn create(dir: &Path, namespace: &str, geometry: &ClusterGeometry) -> Result<Self> {
        let layout = FieldOffsets::for_geometry(geometry).state;
        let path = region_path(dir, namespace, RegionKind::State, None);
        let rows = Rows::create(&path, RegionKind::State, geometry, layout.width)?;
        Ok(Self { rows, layout })
    }

    pub fn attach(dir: &Path, namespace: &str, geometry: &ClusterGeometry) -> Result<Self> {
        let layout = FieldOffsets::for_geometry(geometry).state;
        let path = region_path(dir, namespace, RegionKind::State, None);
        let rows = Rows::attach(&path, RegionKind::State, geometry, layout.width)?;
        Ok(Self { rows, layout })
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn row(&self, idx: usize) -> Result<StateRow<'_>> {
        Ok(StateRow::new(&self.layout, self.rows.row(idx)?))
    }

    pub fn row_mut(&mut self, idx: usize) -> Result<StateRowMut<'_>> {
        let data = self.rows.row_mut(idx)?;
        Ok(StateRowMut::new(&self.layout, data))
    }
}

/// The `cluster_size x command_width` matrix written by the workers.
pub struct CommandBuffer {
    rows: Rows,
    layout: CommandLayout,
}

impl CommandBuffer {
    pub fn create(dir: &Path, namespace: &str, geometry: &ClusterGeometry) -> Result<Self> {
        let layout = FieldOffsets::for_geometry(geometry).command;
        let path = region_path(dir, namespace, RegionKind::Command, None);
        let rows = Rows::create(&path, RegionKind::Command, geometry, layout.width)?;
        Ok(Self { rows, layout })
    }

    pub fn attach(dir: &Path, namespace: &str, geometry: &ClusterGeometry) -> Result<Self> {
        let layout = FieldOffsets::for_geometry(geometry).command;
        let path = region_path(dir, namespace, RegionKind::Command, None);
        let rows = Rows::attach(&path, RegionKind::Command, geometry, layout.width)?;
        Ok(Self { rows, layout })
    }

    pub fn layout(&self) -> &CommandLayout {
        &self.layout
    }

    pub fn row(&self, idx: usize) -> Result<CommandRow<'_>> {
        Ok(CommandRow::new(&self.layout, self.rows.row(idx)?))
    }

    pub fn row_mut(&mut self, idx: usize) -> Result<CommandRowMut<'_>> {
        let data = self.rows.row_mut(idx)?;
        Ok(CommandRowMut::new(&self.layout, data))
    }
}
