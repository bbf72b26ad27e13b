//! The audio I/O bridge seam.
//!
//! The transport core does not talk to sound devices. It sees capture as a
//! queue it awaits frames from and playback as a queue it submits frames to,
//! non-blockingly. Device code (cpal, JACK, a file reader) lives on the far
//! side of these traits.

use std::f32::consts::TAU;

use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::warn;

use crate::audio::frame::{AudioFormat, AudioFrame};

/// Source of captured frames, one per frame duration.
pub trait CaptureSource: Send + 'static {
    /// Wait for the next captured frame. `None` means the source is closed.
    fn next_frame(&mut self) -> impl Future<Output = Option<AudioFrame>> + Send;
}

/// Sink for frames headed to the output device.
pub trait PlaybackSink: Send + 'static {
    /// Hand a frame to the device queue without blocking.
    ///
    /// Returns `false` if the queue is full and the frame was dropped.
    fn submit(&mut self, frame: AudioFrame) -> bool;
}

/// Capture side of a queue-backed bridge; the device side holds the sender.
pub struct ChannelCapture {
    rx: mpsc::UnboundedReceiver<AudioFrame>,
}

/// Build the capture half of a bridge. The returned sender is given to the
/// device callback, the [`ChannelCapture`] to the session.
pub fn capture_channel() -> (mpsc::UnboundedSender<AudioFrame>, ChannelCapture) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ChannelCapture { rx })
}

impl CaptureSource for ChannelCapture {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }
}

/// Playback side of a queue-backed bridge; the device side holds the receiver.
pub struct ChannelPlayback {
    tx: mpsc::Sender<AudioFrame>,
}

/// Build the playback half of a bridge with a bounded device queue.
pub fn playback_channel(capacity: usize) -> (ChannelPlayback, mpsc::Receiver<AudioFrame>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelPlayback { tx }, rx)
}

impl PlaybackSink for ChannelPlayback {
    fn submit(&mut self, frame: AudioFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("playback queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Synthetic capture source: a paced sine tone.
///
/// Stands in for a microphone in the demo binary and end-to-end tests. Emits
/// one frame per frame duration, up to an optional frame budget.
pub struct ToneSource {
    format: AudioFormat,
    ticker: Interval,
    frequency: f32,
    amplitude: f32,
    phase: f32,
    remaining: Option<u64>,
}

impl ToneSource {
    pub fn new(format: AudioFormat, frequency: f32, frames: Option<u64>) -> Self {
        let mut ticker = interval(format.frame_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            format,
            ticker,
            frequency,
            amplitude: 0.4,
            phase: 0.0,
            remaining: frames,
        }
    }

    fn synthesize(&mut self) -> AudioFrame {
        let channels = self.format.channels as usize;
        let step = TAU * self.frequency / self.format.sample_rate as f32;
        let total = self.format.samples_per_frame();
        let mut samples = Vec::with_capacity(total);
        for _ in 0..total / channels {
            let value = (self.phase.sin() * self.amplitude * i16::MAX as f32) as i16;
            self.phase = (self.phase + step) % TAU;
            for _ in 0..channels {
                samples.push(value);
            }
        }
        // Length is samples_per_frame by construction.
        AudioFrame::new(self.format, samples).unwrap()
    }
}

impl CaptureSource for ToneSource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.remaining == Some(0) {
            return None;
        }
        self.ticker.tick().await;
        if let Some(n) = &mut self.remaining {
            *n -= 1;
        }
        Some(self.synthesize())
    }
}

/// Capture source that never produces a frame; the session falls back to
/// keepalives. Useful for listen-only peers and tests.
pub struct SilentCapture;

impl CaptureSource for SilentCapture {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn small_format() -> AudioFormat {
        AudioFormat::new(8_000, 1, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn capture_channel_delivers_in_order() {
        let format = small_format();
        let (tx, mut capture) = capture_channel();

        for marker in 1..=3i16 {
            let mut samples = vec![0i16; format.samples_per_frame()];
            samples[0] = marker;
            tx.send(AudioFrame::new(format, samples).unwrap()).unwrap();
        }
        drop(tx);

        for marker in 1..=3i16 {
            let frame = capture.next_frame().await.unwrap();
            assert_eq!(frame.samples()[0], marker);
        }
        assert!(capture.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn playback_drops_when_full() {
        let format = small_format();
        let (mut playback, mut rx) = playback_channel(2);

        assert!(playback.submit(AudioFrame::silence(format)));
        assert!(playback.submit(AudioFrame::silence(format)));
        assert!(!playback.submit(AudioFrame::silence(format)));

        assert!(rx.recv().await.is_some());
        assert!(playback.submit(AudioFrame::silence(format)));
    }

    #[tokio::test]
    async fn tone_source_respects_budget_and_format() {
        let format = small_format();
        let mut tone = ToneSource::new(format, 440.0, Some(2));

        let first = tone.next_frame().await.unwrap();
        assert_eq!(first.samples().len(), format.samples_per_frame());
        assert!(!first.is_silence());

        assert!(tone.next_frame().await.is_some());
        assert!(tone.next_frame().await.is_none());
    }
}
