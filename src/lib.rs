//! Real-time peer-to-peer voice streaming over UDP.
//!
//! Raw PCM frames come in from an audio bridge, get packetized with a fixed
//! 14-byte header, and travel as UDP datagrams; on the far side a jitter
//! buffer reorders and paces them for playback, concealing losses with
//! silence. One [`Session`] manages one peer: send, receive and playback
//! loops, keepalives, and liveness detection.
//!
//! ```no_run
//! use p2p_voice::audio::bridge::{SilentCapture, playback_channel};
//! use p2p_voice::{Session, SessionConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let (playback, mut speaker) = playback_channel(64);
//! let (session, mut events) = Session::connect(
//!     SessionConfig::default(),
//!     "0.0.0.0:7667".parse()?,
//!     "192.168.1.20:7667".parse()?,
//!     SilentCapture,
//!     playback,
//! )?;
//! while let Some(frame) = speaker.recv().await {
//!     // hand `frame` to the output device
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Codecs, NAT traversal and encryption are out of scope; the transport
//! assumes PCM in, PCM out on a path that carries the datagram size.

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod session;

pub use audio::{AudioFormat, AudioFrame, JitterBuffer, JitterState, JitterStats};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use network::wire::Packet;
pub use session::{DisconnectReason, Session, SessionEvent, SessionState, SessionStats};
