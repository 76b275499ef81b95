//! Extended solution data of one slot, for monitors.
//!
//! Payload: a generation counter, the JSON schema length, the schema itself
//! (padded to 8 bytes) and then the frame of `f32` values it describes. The
//! worker owns the region; readers never block it and may observe a frame
//! that is being overwritten, the generation tells them when it changed.

use std::{
    ops::Range,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use comms::specs::ClusterGeometry;
use serde::{Deserialize, Serialize};

use crate::{RegionKind, Result, SharedRegion, ShmErr, layout::WRENCH_WIDTH, region_path};

const PREFIX_LEN: usize = 2 * size_of::<u64>();

/// A per-node trajectory the solver can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeField {
    Q,
    V,
    A,
    Eff,
    F,
}

impl NodeField {
    /// Values per node.
    pub fn width(self, n_dofs: usize, n_contacts: usize) -> usize {
        match self {
            Self::Q | Self::V | Self::A | Self::Eff => n_dofs,
            Self::F => WRENCH_WIDTH * n_contacts,
        }
    }
}

/// A named cost or constraint term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    pub dim: usize,
}

/// What a debug region holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugSchema {
    pub n_nodes: usize,
    pub n_dofs: usize,
    pub n_contacts: usize,
    pub fields: Vec<NodeField>,
    #[serde(default)]
    pub costs: Vec<Term>,
    #[serde(default)]
    pub constraints: Vec<Term>,
}

#[derive(Debug, Clone)]
struct FrameLayout {
    fields: Vec<(NodeField, Range<usize>)>,
    costs: Vec<(String, Range<usize>)>,
    constraints: Vec<(String, Range<usize>)>,
    len: usize,
}

impl FrameLayout {
    fn new(schema: &DebugSchema) -> Self {
        let mut next = 0;
        let mut take = |n: usize| {
            let r = next..next + n;
            next += n;
            r
        };

        let fields = schema
            .fields
            .iter()
            .map(|f| (*f, take(schema.n_nodes * f.width(schema.n_dofs, schema.n_contacts))))
            .collect();
        let costs = schema
            .costs
            .iter()
            .map(|t| (t.name.clone(), take(t.dim)))
            .collect();
        let constraints = schema
            .constraints
            .iter()
            .map(|t| (t.name.clone(), take(t.dim)))
            .collect();

        Self {
            fields,
            costs,
            constraints,
            len: next,
        }
    }

    fn field(&self, field: NodeField) -> Option<Range<usize>> {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, r)| r.clone())
    }

    fn term(terms: &[(String, Range<usize>)], name: &str) -> Option<Range<usize>> {
        terms.iter().find(|(n, _)| n == name).map(|(_, r)| r.clone())
    }
}

/// Write access to the frame during `publish`.
pub struct DebugFrameMut<'a> {
    layout: &'a FrameLayout,
    data: &'a mut [f32],
}

impl DebugFrameMut<'_> {
    /// All nodes of `field`, node-major, `None` if the schema does not carry it.
    pub fn field(&mut self, field: NodeField) -> Option<&mut [f32]> {
        self.layout.field(field).map(|r| &mut self.data[r])
    }

    pub fn cost(&mut self, name: &str) -> Option<&mut [f32]> {
        FrameLayout::term(&self.layout.costs, name).map(|r| &mut self.data[r])
    }

    pub fn constraint(&mut self, name: &str) -> Option<&mut [f32]> {
        FrameLayout::term(&self.layout.constraints, name).map(|r| &mut self.data[r])
    }
}

fn payload_len(schema_len: usize, frame_len: usize) -> usize {
    PREFIX_LEN + schema_len.next_multiple_of(8) + frame_len * size_of::<f32>()
}

/// The writer side, created by a worker with introspection enabled.
pub struct SolutionDebugRegion {
    region: SharedRegion,
    schema: DebugSchema,
    layout: FrameLayout,
    data_offset: usize,
}

impl SolutionDebugRegion {
    /// Creates the region of slot `slot` and stores `schema` in it.
    pub fn create(
        dir: &Path,
        namespace: &str,
        slot: usize,
        geometry: &ClusterGeometry,
        schema: DebugSchema,
    ) -> Result<Self> {
        let json = serde_json::to_vec(&schema)?;
        let layout = FrameLayout::new(&schema);
        let mut region = SharedRegion::create(
            region_path(dir, namespace, RegionKind::Debug, Some(slot)),
            RegionKind::Debug,
            geometry.fingerprint(),
            payload_len(json.len(), layout.len),
        )?;

        // SAFETY: the prefix and the schema fit in the payload by construction
        // and nobody else writes them.
        unsafe {
            region.slice_mut::<u64>(size_of::<u64>(), 1)[0] = json.len() as u64;
            region
                .slice_mut::<u8>(PREFIX_LEN, json.len())
                .copy_from_slice(&json);
        }

        Ok(Self {
            region,
            schema,
            layout,
            data_offset: PREFIX_LEN + json.len().next_multiple_of(8),
        })
    }

    pub fn schema(&self) -> &DebugSchema {
        &self.schema
    }

    /// Fills the frame and bumps the generation.
    ///
    /// # Returns
    /// The new generation.
    pub fn publish<F>(&mut self, fill: F) -> u64
    where
        F: FnOnce(&mut DebugFrameMut<'_>),
    {
        // SAFETY: the frame follows the schema, f32 accepts any bit pattern.
        let data = unsafe { self.region.slice_mut::<f32>(self.data_offset, self.layout.len) };
        fill(&mut DebugFrameMut {
            layout: &self.layout,
            data,
        });

        // SAFETY: the first payload word is the generation counter.
        let generation = unsafe { &self.region.slice::<AtomicU64>(0, 1)[0] };
        generation.fetch_add(1, Ordering::Release) + 1
    }
}

/// The reader side, for monitors.
pub struct DebugView {
    region: SharedRegion,
    schema: DebugSchema,
    layout: FrameLayout,
    data_offset: usize,
}

impl DebugView {
    /// Attaches to the debug region of slot `slot`.
    ///
    /// # Errors
    /// `Missing` if the worker has not created it, `Schema` if the stored
    /// schema cannot be decoded, any other attach error otherwise.
    pub fn attach(dir: &Path, namespace: &str, slot: usize, geometry: &ClusterGeometry) -> Result<Self> {
        let path = region_path(dir, namespace, RegionKind::Debug, Some(slot));
        let region = SharedRegion::open(path, RegionKind::Debug, geometry.fingerprint(), None)?;
        let total = region.payload_len();
        let truncated = |expected| ShmErr::Truncated {
            path: region.path().to_path_buf(),
            len: total,
            expected,
        };

        if total < PREFIX_LEN {
            return Err(truncated(PREFIX_LEN));
        }
        // SAFETY: the prefix is in bounds, checked above.
        let schema_len = unsafe { region.slice::<u64>(size_of::<u64>(), 1)[0] } as usize;
        let schema_end = PREFIX_LEN.checked_add(schema_len).unwrap_or(usize::MAX);
        if total < schema_end {
            return Err(truncated(schema_end));
        }
        // SAFETY: the schema bytes are in bounds, checked above.
        let json = unsafe { region.slice::<u8>(PREFIX_LEN, schema_len) };
        let schema: DebugSchema = serde_json::from_slice(json)?;

        let layout = FrameLayout::new(&schema);
        let expected = payload_len(schema_len, layout.len);
        if total != expected {
            return Err(truncated(expected));
        }

        Ok(Self {
            region,
            schema,
            layout,
            data_offset: PREFIX_LEN + schema_len.next_multiple_of(8),
        })
    }

    pub fn schema(&self) -> &DebugSchema {
        &self.schema
    }

    /// Number of frames published so far.
    pub fn generation(&self) -> u64 {
        // SAFETY: the first payload word is the generation counter.
        unsafe { self.region.slice::<AtomicU64>(0, 1)[0].load(Ordering::Acquire) }
    }

    fn frame(&self) -> &[f32] {
        // SAFETY: bounds checked in `attach`.
        unsafe { self.region.slice::<f32>(self.data_offset, self.layout.len) }
    }

    pub fn field(&self, field: NodeField) -> Option<&[f32]> {
        self.layout.field(field).map(|r| &self.frame()[r])
    }

    /// The values of `field` at node `node`.
    pub fn node(&self, field: NodeField, node: usize) -> Option<&[f32]> {
        let width = field.width(self.schema.n_dofs, self.schema.n_contacts);
        let values = self.field(field)?;
        values.get(node * width..(node + 1) * width)
    }

    pub fn cost(&self, name: &str) -> Option<&[f32]> {
        FrameLayout::term(&self.layout.costs, name).map(|r| &self.frame()[r])
    }

    pub fn constraint(&self, name: &str) -> Option<&[f32]> {
        FrameLayout::term(&self.layout.constraints, name).map(|r| &self.frame()[r])
    }
}

#[cfg(test)]
mod tests {
    use comms::specs::GeometryProposal;

    use super::*;

    fn geometry() -> ClusterGeometry {
        GeometryProposal {
            cluster_size: 2,
            n_dofs: 2,
            n_contacts: 1,
            extra_width: 0,
            jnt_names: vec!["hip".into(), "knee".into()],
            root_acc: false,
        }
        .validate()
        .unwrap()
    }

    fn schema() -> DebugSchema {
        DebugSchema {
            n_nodes: 3,
            n_dofs: 2,
            n_contacts: 1,
            fields: vec![NodeField::Q, NodeField::F],
            costs: vec![Term {
                name: "track_base".into(),
                dim: 3,
            }],
            constraints: vec![Term {
                name: "dynamics".into(),
                dim: 1,
            }],
        }
    }

    #[test]
    fn monitor_reads_published_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = SolutionDebugRegion::create(dir.path(), "t", 1, &geometry(), schema()).unwrap();
        let view = DebugView::attach(dir.path(), "t", 1, &geometry()).unwrap();
        assert_eq!(view.schema(), &schema());
        assert_eq!(view.generation(), 0);

        let generation = region.publish(|frame| {
            frame.field(NodeField::Q).unwrap().copy_from_slice(&[0., 1., 2., 3., 4., 5.]);
            frame.field(NodeField::F).unwrap().fill(9.0);
            frame.cost("track_base").unwrap().fill(0.5);
            assert!(frame.field(NodeField::V).is_none());
        });

        assert_eq!((generation, view.generation()), (1, 1));
        assert_eq!(view.node(NodeField::Q, 2), Some(&[4.0, 5.0][..]));
        assert_eq!(view.node(NodeField::F, 0).unwrap().len(), 6);
        assert_eq!(view.cost("track_base"), Some(&[0.5; 3][..]));
        assert_eq!(view.constraint("dynamics"), Some(&[0.0][..]));
        assert_eq!(view.cost("missing"), None);
    }

    #[test]
    fn corrupt_schema_length_is_truncated() {
        use std::{
            fs::OpenOptions,
            io::{Seek, SeekFrom, Write},
        };

        use crate::region::HEADER_LEN;

        let dir = tempfile::tempdir().unwrap();
        let _region = SolutionDebugRegion::create(dir.path(), "t", 0, &geometry(), schema()).unwrap();
        let path = region_path(dir.path(), "t", RegionKind::Debug, Some(0));

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start((HEADER_LEN + size_of::<u64>()) as u64)).unwrap();
        file.write_all(&u64::MAX.to_ne_bytes()).unwrap();
        file.sync_all().unwrap();

        let err = DebugView::attach(dir.path(), "t", 0, &geometry()).err().unwrap();
        assert!(matches!(err, ShmErr::Truncated { expected: usize::MAX, .. }));
    }

    #[test]
    fn view_needs_the_worker_region() {
        let dir = tempfile::tempdir().unwrap();
        let err = DebugView::attach(dir.path(), "t", 0, &geometry()).err().unwrap();
        assert!(matches!(err, ShmErr::Missing(_)));
    }
}
