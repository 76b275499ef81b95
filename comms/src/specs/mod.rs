mod geometry;
mod session;

pub use geometry::{ClusterGeometry, GeometryErr, GeometryProposal};
pub use session::SessionSpec;
