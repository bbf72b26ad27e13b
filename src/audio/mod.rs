//! Audio-side building blocks: PCM frames, the jitter buffer, and the
//! bridge seam to real capture/playback devices.

pub mod bridge;
pub mod frame;
pub mod jitter;

pub use bridge::{CaptureSource, PlaybackSink};
pub use frame::{AudioFormat, AudioFrame};
pub use jitter::{JitterBuffer, JitterState, JitterStats};
