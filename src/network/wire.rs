//! Wire format for voice datagrams.
//!
//! Every datagram is one packet with a fixed 14-byte header, all fields
//! network byte order:
//!
//! ```text
//! offset 0  : u32 sequence
//! offset 4  : u64 timestamp_us
//! offset 12 : u16 session_id
//! offset 14 : payload (raw s16le PCM; empty for keepalives)
//! ```
//!
//! Fixed widths keep receive-side parsing branchless and allocation happens
//! once for the payload copy. Out-of-order and duplicate sequence numbers are
//! not wire errors; ordering policy belongs to the jitter buffer.

use crate::audio::frame::{AudioFormat, AudioFrame};
use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 14;

/// One UDP datagram's worth of voice data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Monotonic per-sender counter, wraps at 2^32.
    pub sequence: u32,
    /// Capture time, microseconds on the sender's monotonic clock.
    pub timestamp_us: u64,
    pub session_id: u16,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Keepalives are ordinary headers with no payload.
    pub fn keepalive(sequence: u32, timestamp_us: u64, session_id: u16) -> Self {
        Self {
            sequence,
            timestamp_us,
            session_id,
            payload: Vec::new(),
        }
    }

    pub fn is_keepalive(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp_us.to_be_bytes());
        buf.extend_from_slice(&self.session_id.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a datagram. Truncated (shorter than the header) and oversized
    /// (beyond `max_datagram`) input is rejected.
    pub fn unmarshal(buf: &[u8], max_datagram: usize) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::MalformedPacket {
                len: buf.len(),
                header: HEADER_LEN,
            });
        }
        if buf.len() > max_datagram {
            return Err(Error::PacketTooLarge {
                len: buf.len(),
                max: max_datagram,
            });
        }
        Ok(Self {
            sequence: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            timestamp_us: u64::from_be_bytes([
                buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
            ]),
            session_id: u16::from_be_bytes([buf[12], buf[13]]),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Turn a captured frame into a packet. Pure and deterministic.
///
/// Fails if the frame does not match the session's negotiated format or if
/// the encoded packet would exceed the datagram limit.
pub fn packetize(
    frame: &AudioFrame,
    sequence: u32,
    timestamp_us: u64,
    session_id: u16,
    format: AudioFormat,
    max_datagram: usize,
) -> Result<Packet> {
    if frame.format() != format {
        return Err(if frame.format().frame_duration != format.frame_duration {
            Error::InvalidFrameDuration {
                expected_ms: format.frame_duration.as_millis() as u64,
                got_ms: frame.format().frame_duration.as_millis() as u64,
            }
        } else {
            Error::InvalidFrame {
                expected: format.samples_per_frame(),
                got: frame.samples().len(),
            }
        });
    }
    let payload = frame.payload_bytes();
    let len = HEADER_LEN + payload.len();
    if len > max_datagram {
        return Err(Error::PacketTooLarge {
            len,
            max: max_datagram,
        });
    }
    Ok(Packet {
        sequence,
        timestamp_us,
        session_id,
        payload,
    })
}

/// Recover the audio frame carried by a packet.
pub fn depacketize(packet: &Packet, format: AudioFormat) -> Result<AudioFrame> {
    AudioFrame::from_payload(format, &packet.payload)
}

/// Extends wrapping u32 sequence numbers into a monotonic u64 playout index.
///
/// The first sequence seen anchors the index space; later sequences are
/// placed by shortest signed distance from the highest index so far, so
/// reordering across a wrap boundary still maps correctly.
#[derive(Debug, Default)]
pub struct SequenceExtender {
    highest: Option<u64>,
}

impl SequenceExtender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, sequence: u32) -> u64 {
        let Some(highest) = self.highest else {
            let index = sequence as u64;
            self.highest = Some(index);
            return index;
        };

        let delta = sequence.wrapping_sub(highest as u32) as i32 as i64;
        let index = (highest as i64 + delta).max(0) as u64;
        if index > highest {
            self.highest = Some(index);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_format() -> AudioFormat {
        AudioFormat::new(8_000, 1, Duration::from_millis(20))
    }

    fn test_frame(format: AudioFormat) -> AudioFrame {
        let samples: Vec<i16> = (0..format.samples_per_frame())
            .map(|i| (i as i16).wrapping_mul(31))
            .collect();
        AudioFrame::new(format, samples).unwrap()
    }

    #[test]
    fn packetize_marshal_round_trip() {
        let format = test_format();
        let frame = test_frame(format);

        let packet = packetize(&frame, 7, 123_456, 0xBEEF, format, 4096).unwrap();
        let bytes = packet.marshal();
        assert_eq!(bytes.len(), HEADER_LEN + format.frame_bytes());

        let parsed = Packet::unmarshal(&bytes, 4096).unwrap();
        assert_eq!(parsed, packet);

        let recovered = depacketize(&parsed, format).unwrap();
        assert_eq!(recovered, frame);
    }

    #[test]
    fn header_layout_is_network_byte_order() {
        let packet = Packet {
            sequence: 0x0102_0304,
            timestamp_us: 0x1112_1314_1516_1718,
            session_id: 0xAABB,
            payload: vec![0xFF, 0xEE],
        };
        let bytes = packet.marshal();
        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(
            &bytes[4..12],
            &[0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]
        );
        assert_eq!(&bytes[12..14], &[0xAA, 0xBB]);
        assert_eq!(&bytes[14..], &[0xFF, 0xEE]);
    }

    #[test]
    fn truncated_datagram_rejected() {
        let err = Packet::unmarshal(&[0u8; 13], 4096).unwrap_err();
        assert_eq!(
            err,
            Error::MalformedPacket {
                len: 13,
                header: HEADER_LEN
            }
        );
    }

    #[test]
    fn oversized_datagram_rejected() {
        let buf = vec![0u8; 200];
        let err = Packet::unmarshal(&buf, 100).unwrap_err();
        assert_eq!(err, Error::PacketTooLarge { len: 200, max: 100 });
    }

    #[test]
    fn packetize_rejects_format_mismatch() {
        let session_format = test_format();
        let other = AudioFormat::new(8_000, 1, Duration::from_millis(10));
        let frame = test_frame(other);

        let err = packetize(&frame, 0, 0, 1, session_format, 4096).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidFrameDuration {
                expected_ms: 20,
                got_ms: 10
            }
        );
    }

    #[test]
    fn packetize_rejects_oversized_frame() {
        let format = test_format();
        let frame = test_frame(format);
        let err = packetize(&frame, 0, 0, 1, format, 100).unwrap_err();
        assert_eq!(
            err,
            Error::PacketTooLarge {
                len: HEADER_LEN + format.frame_bytes(),
                max: 100
            }
        );
    }

    #[test]
    fn keepalive_has_empty_payload() {
        let ka = Packet::keepalive(3, 9, 77);
        assert!(ka.is_keepalive());
        let parsed = Packet::unmarshal(&ka.marshal(), 4096).unwrap();
        assert!(parsed.is_keepalive());
        assert_eq!(parsed.sequence, 3);
    }

    #[test]
    fn extender_is_monotonic_across_wrap() {
        let mut ext = SequenceExtender::new();
        assert_eq!(ext.extend(u32::MAX - 1), (u32::MAX - 1) as u64);
        assert_eq!(ext.extend(u32::MAX), u32::MAX as u64);
        assert_eq!(ext.extend(0), u32::MAX as u64 + 1);
        assert_eq!(ext.extend(1), u32::MAX as u64 + 2);
        // Reordered packet from before the wrap keeps its old index.
        assert_eq!(ext.extend(u32::MAX), u32::MAX as u64);
        assert_eq!(ext.extend(2), u32::MAX as u64 + 3);
    }
}
