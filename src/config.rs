//! Configuration for a voice transport session.

use std::time::Duration;

use crate::audio::AudioFormat;

/// Tunables for a single peer session.
///
/// `Default` gives the values a LAN voice link wants: 20ms frames of 48kHz
/// stereo PCM, three frames (~60ms) of jitter cushion, 5s liveness.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Negotiated audio format; both peers must use the same one.
    pub format: AudioFormat,
    /// Jitter buffer fill target, in frames. Playback starts this many frame
    /// durations behind the newest packet.
    pub target_depth: usize,
    /// How long the jitter buffer waits with no arrivals before draining.
    pub silence_timeout: Duration,
    /// How long with no incoming datagrams before the peer is considered gone.
    pub liveness_timeout: Duration,
    /// Cadence of empty-payload keepalives while no audio is flowing.
    pub keepalive_interval: Duration,
    /// Upper bound on encoded datagram size (header + payload).
    ///
    /// 20ms of 48kHz stereo s16 PCM is 3854 bytes encoded, so the default
    /// assumes loopback/LAN paths. Lower it for formats that fit a real MTU.
    pub max_datagram: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            target_depth: 3,
            silence_timeout: Duration::from_secs(2),
            liveness_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_millis(500),
            max_datagram: 4096,
        }
    }
}
