use std::{
    error::Error,
    fmt, io,
    path::{Path, PathBuf},
};

use crate::RegionKind;

/// The shm module's result type.
pub type Result<T> = std::result::Result<T, ShmErr>;

/// Failures creating, attaching to or addressing a shared region.
#[derive(Debug)]
pub enum ShmErr {
    Io {
        path: PathBuf,
        op: &'static str,
        source: io::Error,
    },
    /// The region does not exist yet, the creator has not allocated it.
    Missing(PathBuf),
    Truncated {
        path: PathBuf,
        len: usize,
        expected: usize,
    },
    BadMagic(PathBuf),
    KindMismatch {
        path: PathBuf,
        expected: RegionKind,
        found: u32,
    },
    /// The region was created for a different geometry.
    GeometryMismatch {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
    SlotOutOfRange {
        slot: usize,
        cluster_size: usize,
    },
    Schema(serde_json::Error),
}

impl ShmErr {
    pub(crate) fn io(path: &Path, op: &'static str, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            op,
            source,
        }
    }
}

impl fmt::Display for ShmErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, op, source } => {
                write!(f, "failed to {op} region {}: {source}", path.display())
            }
            Self::Missing(path) => write!(f, "region {} does not exist", path.display()),
            Self::Truncated {
                path,
                len,
                expected,
            } => write!(
                f,
                "region {} holds {len} bytes, expected {expected}",
                path.display()
            ),
            Self::BadMagic(path) => write!(f, "{} is not a cluster region", path.display()),
            Self::KindMismatch {
                path,
                expected,
                found,
            } => write!(
                f,
                "region {} has kind {found}, expected {expected:?}",
                path.display()
            ),
            Self::GeometryMismatch {
                path,
                expected,
                found,
            } => write!(
                f,
                "region {} was created for geometry {found:#018x}, expected {expected:#018x}",
                path.display()
            ),
            Self::SlotOutOfRange { slot, cluster_size } => {
                write!(f, "slot {slot} is out of range for a cluster of {cluster_size}")
            }
            Self::Schema(e) => write!(f, "invalid debug schema: {e}"),
        }
    }
}

impl Error for ShmErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Schema(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ShmErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Schema(value)
    }
}
