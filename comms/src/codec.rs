//! Frame payload encoding shared by `CtlSender` and `CtlReceiver`.

use std::io;

/// Encodes a value as the payload of one frame.
pub trait Serialize<'a> {
    /// Writes the framed representation of `self` into `buf`.
    ///
    /// # Returns
    /// An optional trailing slice that is sent right after `buf` without copying it.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}

/// Decodes a value from a complete frame payload, possibly borrowing from it.
pub trait Deserialize<'a>: Sized {
    /// # Errors
    /// `InvalidData` if `buf` is not a valid payload.
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
