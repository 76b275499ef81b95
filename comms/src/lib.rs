mod codec;
pub mod handshake;
pub mod msg;
mod receiver;
mod sender;
pub mod specs;

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::{Deserialize, Serialize};
pub use handshake::{HandshakeClient, HandshakeErr, HandshakeServer};
pub use receiver::CtlReceiver;
pub use sender::CtlSender;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Upper bound for a single control-plane frame.
const MAX_FRAME_LEN: usize = 1 << 20;

/// Creates both `CtlReceiver` and `CtlSender` control channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of a control receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (CtlReceiver<R>, CtlSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (CtlReceiver::new(rx), CtlSender::new(tx))
}
