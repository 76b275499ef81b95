use std::{error::Error, fmt, io};

use comms::{HandshakeErr, specs::GeometryErr};
use shm::ShmErr;

/// The client module's result type.
pub type Result<T> = std::result::Result<T, ClientErr>;

/// Client failures.
#[derive(Debug)]
pub enum ClientErr {
    Io(io::Error),
    Handshake(HandshakeErr),
    Geometry(GeometryErr),
    Shm(ShmErr),
    Config(String),
    /// The session was already offered, successfully or not.
    HandshakeSpent,
    /// Called before the handshake completed.
    NotReady,
    SlotOutOfRange {
        slot: usize,
        cluster_size: usize,
    },
    /// The state aggregate was built for another geometry.
    ShapeMismatch {
        got: usize,
        expected: usize,
    },
    /// The slot's previous trigger has not been cleared yet.
    TriggerInFlight(usize),
    /// The barrier did not clear in time, the listed slots were excluded.
    BarrierTimeout {
        slots: Vec<usize>,
    },
    /// The workers of the listed slots terminated before answering, the slots were deactivated.
    WorkerLost {
        slots: Vec<usize>,
    },
}

impl fmt::Display for ClientErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientErr::Io(e) => write!(f, "io error: {e}"),
            ClientErr::Handshake(e) => write!(f, "handshake failed: {e}"),
            ClientErr::Geometry(e) => write!(f, "invalid geometry: {e}"),
            ClientErr::Shm(e) => write!(f, "shared memory: {e}"),
            ClientErr::Config(detail) => write!(f, "invalid configuration: {detail}"),
            ClientErr::HandshakeSpent => write!(f, "the handshake can only be performed once"),
            ClientErr::NotReady => write!(f, "the cluster is not ready, perform the handshake first"),
            ClientErr::SlotOutOfRange { slot, cluster_size } => {
                write!(f, "slot {slot} is out of range for a cluster of {cluster_size}")
            }
            ClientErr::ShapeMismatch { got, expected } => write!(
                f,
                "state aggregate holds {got} values, the cluster expects {expected}"
            ),
            ClientErr::TriggerInFlight(slot) => {
                write!(f, "slot {slot} is still solving the previous tick")
            }
            ClientErr::BarrierTimeout { slots } => {
                write!(f, "slots {slots:?} did not answer in time and were deactivated")
            }
            ClientErr::WorkerLost { slots } => {
                write!(f, "the workers of slots {slots:?} terminated mid-tick")
            }
        }
    }
}

impl Error for ClientErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientErr::Io(e) => Some(e),
            ClientErr::Handshake(e) => Some(e),
            ClientErr::Geometry(e) => Some(e),
            ClientErr::Shm(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<HandshakeErr> for ClientErr {
    fn from(value: HandshakeErr) -> Self {
        Self::Handshake(value)
    }
}

impl From<GeometryErr> for ClientErr {
    fn from(value: GeometryErr) -> Self {
        Self::Geometry(value)
    }
}

impl From<ShmErr> for ClientErr {
    fn from(value: ShmErr) -> Self {
        match value {
            ShmErr::SlotOutOfRange { slot, cluster_size } => {
                Self::SlotOutOfRange { slot, cluster_size }
            }
            other => Self::Shm(other),
        }
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ClientErr> for io::Error {
    fn from(value: ClientErr) -> Self {
        match value {
            ClientErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
