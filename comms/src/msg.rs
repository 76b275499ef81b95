use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize, specs::SessionSpec};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// First frame sent by a worker, claiming its slot.
    Hello { worker_index: usize },
    /// The agreed session, sent by the client once every slot has been claimed.
    Offer(SessionSpec),
    /// Sent by a worker after attaching to every region and registering.
    Attached { worker_index: usize },
    Disconnect,
}

/// The control-plane message for the whole cluster.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Err(_) => "err",
            Msg::Control(Command::Hello { .. }) => "control/hello",
            Msg::Control(Command::Offer(_)) => "control/offer",
            Msg::Control(Command::Attached { .. }) => "control/attached",
            Msg::Control(Command::Disconnect) => "control/disconnect",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let Some((kind_buf, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
            return Self::buf_is_too_small(buf.len());
        };

        match Header::from_be_bytes(*kind_buf) {
            ERR_H => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn err_frame_is_zero_copy() {
        let msg = Msg::Err(Cow::Borrowed("joint names differ"));
        let mut buf = Vec::new();

        let tail = msg.serialize(&mut buf).unwrap().unwrap();
        assert_eq!(buf, ERR_H.to_be_bytes());
        assert_eq!(tail, b"joint names differ");
    }

    #[test]
    fn rejects_unknown_kind() {
        let buf = 7u32.to_be_bytes();
        assert!(Msg::deserialize(&buf).is_err());
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(Msg::deserialize(&[0, 1]).is_err());
    }

    #[test]
    fn control_frame_roundtrip() {
        let msg = Msg::Control(Command::Hello { worker_index: 3 });
        let mut buf = Vec::new();
        assert!(msg.serialize(&mut buf).unwrap().is_none());

        let Msg::Control(Command::Hello { worker_index }) = Msg::deserialize(&buf).unwrap() else {
            panic!("unexpected message kind");
        };
        assert_eq!(worker_index, 3);
    }
}
