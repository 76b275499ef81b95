//! Shared-memory plumbing of the control cluster.
//!
//! Every region is a file under the session's shared-memory directory, mapped
//! by the client (which creates it) and by every worker (which attaches to it).
//! All processes derive the byte layout from the same `ClusterGeometry`, so
//! nothing but the geometry ever travels over the handshake channel.

mod buffers;
mod debug;
mod error;
pub mod layout;
mod poll;
mod profiling;
mod region;
mod status;

pub use buffers::{CommandBuffer, CommandRow, CommandRowMut, StateBuffer, StateRow, StateRowMut};
pub use debug::{DebugFrameMut, DebugSchema, DebugView, NodeField, SolutionDebugRegion, Term};
pub use error::{Result, ShmErr};
pub use layout::{CommandLayout, Field, FieldOffsets, StateLayout, offsets};
pub use poll::{PollBackoff, PollConfig, Waiter};
pub use profiling::{ProfilingBlock, ProfilingSnapshot, SolveTimings, TickSnapshot};
pub use region::{RegionKind, SharedRegion, region_path};
pub use status::{ClusterStatusBlock, SlotRecord, SlotSnapshot};
