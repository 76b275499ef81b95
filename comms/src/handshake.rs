//! One-shot rendezvous that fixes the session before any worker attaches.
//!
//! The client binds a `HandshakeServer` and calls `offer` once. Each worker
//! connects through a `HandshakeClient`, claims its slot, receives the
//! `SessionSpec`, attaches to the shared regions and then confirms or rejects.

use std::{error::Error, fmt, io, net::SocketAddr, time::Duration};

use futures::future;
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpListener, TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::{self, Instant},
};

use crate::{
    CtlReceiver, CtlSender,
    msg::{Command, Msg},
    specs::SessionSpec,
};

/// The handshake module's result type.
pub type Result<T> = std::result::Result<T, HandshakeErr>;

type NetRx = CtlReceiver<OwnedReadHalf>;
type NetTx = CtlSender<OwnedWriteHalf>;

/// Handshake failures, on either side of the channel.
#[derive(Debug)]
pub enum HandshakeErr {
    Io(io::Error),
    /// The deadline passed before every slot was claimed and confirmed.
    Timeout {
        connected: usize,
        expected: usize,
    },
    /// A worker could not reach the client endpoint.
    ConnectionFailed {
        endpoint: String,
        attempts: u32,
        source: io::Error,
    },
    WorkerIndexOutOfRange {
        worker_index: usize,
        cluster_size: usize,
    },
    DuplicateWorker(usize),
    /// The counterpart answered with an error frame.
    Rejected {
        worker_index: usize,
        detail: String,
    },
    UnexpectedMessage(&'static str),
}

impl fmt::Display for HandshakeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Timeout {
                connected,
                expected,
            } => write!(
                f,
                "handshake timed out with {connected} of {expected} workers"
            ),
            Self::ConnectionFailed {
                endpoint,
                attempts,
                source,
            } => write!(
                f,
                "could not reach {endpoint} after {attempts} attempts: {source}"
            ),
            Self::WorkerIndexOutOfRange {
                worker_index,
                cluster_size,
            } => write!(
                f,
                "worker index {worker_index} is out of range for a cluster of {cluster_size}"
            ),
            Self::DuplicateWorker(idx) => write!(f, "slot {idx} was claimed twice"),
            Self::Rejected {
                worker_index,
                detail,
            } => write!(f, "slot {worker_index} rejected the session: {detail}"),
            Self::UnexpectedMessage(kind) => write!(f, "unexpected {kind} message"),
        }
    }
}

impl Error for HandshakeErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::ConnectionFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for HandshakeErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

struct Peer {
    rx: NetRx,
    tx: NetTx,
}

impl Peer {
    async fn recv_hello(&mut self) -> Result<usize> {
        let mut buf = Vec::new();
        match self.rx.recv_into(&mut buf).await? {
            Msg::Control(Command::Hello { worker_index }) => Ok(worker_index),
            other => Err(HandshakeErr::UnexpectedMessage(other.kind())),
        }
    }

    async fn recv_attached(&mut self, worker_index: usize) -> Result<()> {
        let mut buf = Vec::new();
        match self.rx.recv_into(&mut buf).await? {
            Msg::Control(Command::Attached { worker_index: idx }) if idx == worker_index => {
                debug!(worker_index = worker_index; "worker attached");
                Ok(())
            }
            Msg::Err(detail) => Err(HandshakeErr::Rejected {
                worker_index,
                detail: detail.into_owned(),
            }),
            other => Err(HandshakeErr::UnexpectedMessage(other.kind())),
        }
    }

    async fn refuse(&mut self, detail: &str) {
        let msg = Msg::Err(detail.into());
        if let Err(e) = self.tx.send(&msg).await {
            warn!("could not notify refused worker: {e}");
        }
    }
}

/// Client side of the handshake.
pub struct HandshakeServer {
    listener: TcpListener,
    timeout: Duration,
}

impl HandshakeServer {
    /// Binds the rendezvous endpoint.
    ///
    /// # Arguments
    /// * `addr` - Address to listen on, port `0` picks a free one.
    /// * `timeout` - Bound on the whole `offer` exchange.
    pub async fn bind<A: ToSocketAddrs>(addr: A, timeout: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, timeout })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for every slot to be claimed, sends the session and waits for every confirmation.
    ///
    /// Consumes the server, a session is offered exactly once. On failure every
    /// connected worker is told to disconnect.
    ///
    /// # Errors
    /// `Timeout` if the deadline passes, `WorkerIndexOutOfRange` or `DuplicateWorker`
    /// on a bad claim and `Rejected` if a worker refuses the session.
    pub async fn offer(self, session: &SessionSpec) -> Result<()> {
        let expected = session.geometry.cluster_size();
        let mut peers: Vec<Option<Peer>> = (0..expected).map(|_| None).collect();

        info!(cluster_size = expected; "waiting for workers at {:?}", self.listener.local_addr());
        let deadline = Instant::now() + self.timeout;
        let res = self.rendezvous(session, &mut peers, deadline).await;

        if res.is_err() {
            let msg = Msg::Control(Command::Disconnect);
            let connected = peers
                .iter_mut()
                .enumerate()
                .filter_map(|(idx, peer)| peer.as_mut().map(|peer| (idx, peer)));
            for (idx, peer) in connected {
                if let Err(e) = peer.tx.send(&msg).await {
                    debug!(worker_index = idx; "could not send Disconnect: {e}");
                }
            }
        } else {
            info!(cluster_size = expected; "handshake completed");
        }

        res
    }

    async fn rendezvous(
        &self,
        session: &SessionSpec,
        peers: &mut [Option<Peer>],
        deadline: Instant,
    ) -> Result<()> {
        let expected = peers.len();
        let mut connected = 0;
        let timeout = |connected| HandshakeErr::Timeout {
            connected,
            expected,
        };

        while connected < expected {
            let (stream, addr) = time::timeout_at(deadline, self.listener.accept())
                .await
                .map_err(|_| timeout(connected))??;
            stream.set_nodelay(true)?;

            let (rx, tx) = stream.into_split();
            let (rx, tx) = crate::channel(rx, tx);
            let mut peer = Peer { rx, tx };

            let worker_index = time::timeout_at(deadline, peer.recv_hello())
                .await
                .map_err(|_| timeout(connected))??;

            if worker_index >= expected {
                let err = HandshakeErr::WorkerIndexOutOfRange {
                    worker_index,
                    cluster_size: expected,
                };
                peer.refuse(&err.to_string()).await;
                return Err(err);
            }

            if peers[worker_index].is_some() {
                let err = HandshakeErr::DuplicateWorker(worker_index);
                peer.refuse(&err.to_string()).await;
                return Err(err);
            }

            debug!(worker_index = worker_index; "slot claimed from {addr}");
            peers[worker_index] = Some(peer);
            connected += 1;
        }

        let msg = Msg::Control(Command::Offer(session.clone()));
        for peer in peers.iter_mut().flatten() {
            peer.tx.send(&msg).await?;
        }

        let confirmations = peers
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, peer)| peer.as_mut().map(|peer| (idx, peer)))
            .map(|(idx, peer)| peer.recv_attached(idx));

        time::timeout_at(deadline, future::try_join_all(confirmations))
            .await
            .map_err(|_| timeout(connected))??;

        Ok(())
    }
}

/// Worker side of the handshake.
pub struct HandshakeClient {
    worker_index: usize,
    rx: NetRx,
    tx: NetTx,
    buf: Vec<u8>,
}

impl HandshakeClient {
    /// Connects to the client endpoint with bounded retries and claims `worker_index`.
    ///
    /// # Arguments
    /// * `endpoint` - The client's rendezvous address.
    /// * `worker_index` - The slot this worker drives.
    /// * `retries` - Extra attempts after the first failed connection.
    /// * `interval` - Pause between attempts.
    ///
    /// # Errors
    /// `ConnectionFailed` once every attempt has failed.
    pub async fn connect(
        endpoint: &str,
        worker_index: usize,
        retries: u32,
        interval: Duration,
    ) -> Result<Self> {
        let mut attempts = 0;

        let stream = loop {
            attempts += 1;
            match TcpStream::connect(endpoint).await {
                Ok(stream) => break stream,
                Err(e) if attempts > retries => {
                    return Err(HandshakeErr::ConnectionFailed {
                        endpoint: endpoint.to_string(),
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    debug!(worker_index = worker_index; "connect attempt {attempts} failed: {e}");
                    time::sleep(interval).await;
                }
            }
        };

        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (rx, mut tx) = crate::channel(rx, tx);

        tx.send(&Msg::Control(Command::Hello { worker_index }))
            .await?;
        info!(worker_index = worker_index; "connected to {endpoint}");

        Ok(Self {
            worker_index,
            rx,
            tx,
            buf: Vec::new(),
        })
    }

    /// Waits for the session offer.
    ///
    /// # Returns
    /// `Ok(Some(session))` on `Offer`, `Ok(None)` if the client disconnects first.
    ///
    /// # Errors
    /// `Rejected` if the client refused this worker's claim.
    pub async fn recv_offer(&mut self) -> Result<Option<SessionSpec>> {
        loop {
            match self.rx.recv_into(&mut self.buf).await? {
                Msg::Control(Command::Offer(session)) => return Ok(Some(session)),
                Msg::Control(Command::Disconnect) => {
                    info!(worker_index = self.worker_index; "received Disconnect before the offer");
                    return Ok(None);
                }
                Msg::Err(detail) => {
                    return Err(HandshakeErr::Rejected {
                        worker_index: self.worker_index,
                        detail: detail.into_owned(),
                    });
                }
                other => warn!("expected Offer, got {}", other.kind()),
            }
        }
    }

    /// Tells the client this worker is attached and registered.
    pub async fn confirm(mut self) -> Result<()> {
        let msg = Msg::Control(Command::Attached {
            worker_index: self.worker_index,
        });
        self.tx.send(&msg).await?;
        Ok(())
    }

    /// Tells the client this worker refuses the session.
    pub async fn reject(mut self, detail: &str) -> Result<()> {
        self.tx.send(&Msg::Err(detail.into())).await?;
        Ok(())
    }
}
