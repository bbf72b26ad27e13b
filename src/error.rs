use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("frame carries {got} samples, negotiated format requires {expected}")]
    InvalidFrame { expected: usize, got: usize },

    #[error("frame duration {got_ms}ms does not match negotiated {expected_ms}ms")]
    InvalidFrameDuration { expected_ms: u64, got_ms: u64 },

    #[error("datagram of {len} bytes is shorter than the {header} byte header")]
    MalformedPacket { len: usize, header: usize },

    #[error("payload of {len} bytes is not whole 16-bit samples")]
    MalformedPayload { len: usize },

    #[error("encoded packet of {len} bytes exceeds the {max} byte datagram limit")]
    PacketTooLarge { len: usize, max: usize },

    #[error("session is closed")]
    SessionClosed,
}
