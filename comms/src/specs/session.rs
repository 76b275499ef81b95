use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ClusterGeometry;

/// Everything a worker needs to find and interpret the cluster's shared regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub geometry: ClusterGeometry,
    /// Prefix of every region name of this session.
    pub namespace: String,
    /// Directory holding the region files.
    pub shm_dir: PathBuf,
}
