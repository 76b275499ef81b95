use std::{error::Error, fmt, io};

use comms::HandshakeErr;
use shm::ShmErr;

use crate::{joint_map::JointMapErr, solver::SolverErr};

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker failures. Every variant is fatal: solve failures are not errors,
/// they are recorded in the slot and the loop goes on.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Handshake(HandshakeErr),
    Shm(ShmErr),
    JointMap(JointMapErr),
    Config(String),
    ClusterSizeMismatch {
        configured: usize,
        offered: usize,
    },
    InvalidQuaternionOrder([usize; 4]),
    /// A solver hook other than `solve` failed.
    Solver {
        hook: &'static str,
        source: SolverErr,
    },
    /// The solver produced a command vector of the wrong length.
    CommandShape {
        field: &'static str,
        got: usize,
        expected: usize,
    },
    /// A step of the lifecycle ran before the one it depends on.
    SetupSkipped(&'static str),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Handshake(e) => write!(f, "handshake failed: {e}"),
            WorkerErr::Shm(e) => write!(f, "shared memory: {e}"),
            WorkerErr::JointMap(e) => write!(f, "joint names: {e}"),
            WorkerErr::Config(detail) => write!(f, "invalid configuration: {detail}"),
            WorkerErr::ClusterSizeMismatch {
                configured,
                offered,
            } => write!(
                f,
                "configured for a cluster of {configured}, offered a cluster of {offered}"
            ),
            WorkerErr::InvalidQuaternionOrder(order) => {
                write!(f, "quaternion order {order:?} is not a permutation of 0..4")
            }
            WorkerErr::Solver { hook, source } => write!(f, "solver {hook} failed: {source}"),
            WorkerErr::CommandShape {
                field,
                got,
                expected,
            } => write!(
                f,
                "solver produced {got} values for {field}, expected {expected}"
            ),
            WorkerErr::SetupSkipped(step) => write!(f, "required setup step skipped: {step}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Handshake(e) => Some(e),
            WorkerErr::Shm(e) => Some(e),
            WorkerErr::JointMap(e) => Some(e),
            WorkerErr::Solver { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<HandshakeErr> for WorkerErr {
    fn from(value: HandshakeErr) -> Self {
        Self::Handshake(value)
    }
}

impl From<ShmErr> for WorkerErr {
    fn from(value: ShmErr) -> Self {
        Self::Shm(value)
    }
}

impl From<JointMapErr> for WorkerErr {
    fn from(value: JointMapErr) -> Self {
        Self::JointMap(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
