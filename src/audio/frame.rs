use std::time::Duration;

use crate::error::{Error, Result};

/// PCM format shared by both ends of a session.
///
/// Samples are interleaved signed 16-bit; a frame covers exactly one
/// `frame_duration` of audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub frame_duration: Duration,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, frame_duration: Duration) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
            frame_duration,
        }
    }

    /// Total interleaved samples in one frame (all channels).
    pub fn samples_per_frame(&self) -> usize {
        let per_channel =
            self.sample_rate as u64 * self.frame_duration.as_micros() as u64 / 1_000_000;
        per_channel as usize * self.channels as usize
    }

    /// Encoded payload size of one frame in bytes.
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * 2
    }
}

impl Default for AudioFormat {
    /// 48kHz stereo s16, 20ms frames.
    fn default() -> Self {
        Self::new(48_000, 2, Duration::from_millis(20))
    }
}

/// One frame duration of raw PCM, immutable once constructed.
///
/// Produced by the capture side of the audio bridge, consumed by the
/// packetizer; reconstructed from payload bytes on receive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioFrame {
    format: AudioFormat,
    samples: Vec<i16>,
}

impl AudioFrame {
    /// Wrap interleaved samples; the length must match the format exactly.
    pub fn new(format: AudioFormat, samples: Vec<i16>) -> Result<Self> {
        let expected = format.samples_per_frame();
        if samples.len() != expected {
            return Err(Error::InvalidFrame {
                expected,
                got: samples.len(),
            });
        }
        Ok(Self { format, samples })
    }

    /// A zeroed frame, used wherever a missing frame must be concealed.
    pub fn silence(format: AudioFormat) -> Self {
        Self {
            format,
            samples: vec![0; format.samples_per_frame()],
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn is_silence(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Payload bytes for the wire: s16le, interleaved.
    pub fn payload_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    /// Rebuild a frame from wire payload bytes.
    pub fn from_payload(format: AudioFormat, payload: &[u8]) -> Result<Self> {
        if payload.len() % 2 != 0 {
            return Err(Error::MalformedPayload { len: payload.len() });
        }
        let samples: Vec<i16> = payload
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(format, samples)
    }
}
