//! Jitter buffer: absorbs network jitter and reordering, emits a steady
//! cadence of frames for playback, and conceals missing frames with silence.
//!
//! State machine: `Empty → Filling → Steady → Draining → Empty`.
//!
//! - `Filling` accumulates until the target depth is reached; pops emit
//!   silence so playback starts a fixed latency behind the sender.
//! - `Steady` pops exactly one frame per call: the frame at the playout
//!   cursor if it arrived, silence otherwise. The cursor always advances,
//!   so output is contiguous and never blocks.
//! - `Draining` is entered after the silence timeout; buffered frames are
//!   replayed in order, then the buffer returns to `Empty`.
//!
//! Entries are indexed by the extended (wrap-free) playout index produced by
//! [`SequenceExtender`](crate::network::wire::SequenceExtender). The buffer
//! is the single structure shared between the receive and playback loops, so
//! callers hold it behind one mutex; every operation here is short.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::audio::frame::{AudioFormat, AudioFrame};

/// Where the buffer is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JitterState {
    Empty,
    Filling,
    Steady,
    Draining,
}

/// A buffered packet plus its arrival bookkeeping.
#[derive(Debug)]
struct JitterEntry {
    frame: AudioFrame,
    arrived: Instant,
    /// Latest point this entry is still useful; kept for diagnostics.
    deadline: Instant,
}

/// Counters for buffer behavior, snapshot with [`JitterBuffer::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JitterStats {
    /// Packets accepted into the buffer.
    pub received: u64,
    /// Frames handed to playback from a real packet.
    pub played: u64,
    /// Silence frames synthesized for gaps and underruns.
    pub concealed: u64,
    /// Packets older than the playout cursor, dropped.
    pub late_dropped: u64,
    /// Packets whose sequence was already buffered, dropped.
    pub duplicates: u64,
    /// Packets too far ahead of the playout cursor, dropped.
    pub overflow_dropped: u64,
}

/// Accepted insert window, in multiples of the target depth. Anything
/// further ahead of the playout cursor is dropped so a reorder storm (or a
/// hostile peer jumping sequences) cannot grow the buffer without bound.
const WINDOW_FACTOR: u64 = 8;

pub struct JitterBuffer {
    format: AudioFormat,
    target_depth: usize,
    /// Highest accepted distance from the cursor, `target_depth * WINDOW_FACTOR`.
    max_window: u64,
    silence_timeout: Duration,
    state: JitterState,
    entries: BTreeMap<u64, JitterEntry>,
    /// Next playout index to emit. Valid outside `Empty`.
    cursor: u64,
    last_arrival: Option<Instant>,
    stats: JitterStats,
}

impl JitterBuffer {
    pub fn new(format: AudioFormat, target_depth: usize, silence_timeout: Duration) -> Self {
        let target_depth = target_depth.max(1);
        Self {
            format,
            target_depth,
            max_window: target_depth as u64 * WINDOW_FACTOR,
            silence_timeout,
            state: JitterState::Empty,
            entries: BTreeMap::new(),
            cursor: 0,
            last_arrival: None,
            stats: JitterStats::default(),
        }
    }

    pub fn state(&self) -> JitterState {
        self.state
    }

    /// Frames currently buffered (gaps not counted).
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> JitterStats {
        self.stats
    }

    /// Insert a received frame at its extended playout index.
    ///
    /// Late frames (index behind the playout cursor), duplicates, and frames
    /// beyond the accepted window ahead of the cursor are dropped; the first
    /// arrival for an index wins.
    pub fn insert(&mut self, index: u64, frame: AudioFrame) {
        let now = Instant::now();
        self.last_arrival = Some(now);

        match self.state {
            JitterState::Empty => {
                self.cursor = index;
                self.state = JitterState::Filling;
            }
            JitterState::Filling | JitterState::Steady | JitterState::Draining => {
                if index < self.cursor {
                    self.stats.late_dropped += 1;
                    debug!(index, cursor = self.cursor, "dropping late packet");
                    return;
                }
                if self.entries.contains_key(&index) {
                    self.stats.duplicates += 1;
                    debug!(index, "dropping duplicate packet");
                    return;
                }
                if index - self.cursor >= self.max_window {
                    self.stats.overflow_dropped += 1;
                    debug!(index, cursor = self.cursor, "dropping far-ahead packet");
                    return;
                }
            }
        }

        let deadline = now + self.format.frame_duration * self.target_depth as u32;
        self.entries.insert(
            index,
            JitterEntry {
                frame,
                arrived: now,
                deadline,
            },
        );
        self.stats.received += 1;

        match self.state {
            JitterState::Filling if self.entries.len() >= self.target_depth => {
                debug!(depth = self.entries.len(), "jitter buffer filled");
                self.state = JitterState::Steady;
            }
            // Fresh traffic ends a drain.
            JitterState::Draining => self.state = JitterState::Steady,
            _ => {}
        }
    }

    /// Produce the next playback frame. Never blocks: a missing frame is
    /// concealed with silence and the cursor advances regardless.
    pub fn pop(&mut self) -> AudioFrame {
        let now = Instant::now();

        if matches!(self.state, JitterState::Filling | JitterState::Steady) {
            if let Some(last) = self.last_arrival {
                if now.duration_since(last) >= self.silence_timeout {
                    debug!(buffered = self.entries.len(), "silence timeout, draining");
                    self.state = JitterState::Draining;
                }
            }
        }

        match self.state {
            JitterState::Empty => self.conceal(),
            JitterState::Filling => self.conceal(),
            JitterState::Steady => self.advance(),
            JitterState::Draining => {
                if self.entries.is_empty() {
                    self.state = JitterState::Empty;
                    self.last_arrival = None;
                    return self.conceal();
                }
                self.advance()
            }
        }
    }

    /// Emit the frame at the cursor (or silence) and move the cursor on.
    fn advance(&mut self) -> AudioFrame {
        let index = self.cursor;
        self.cursor += 1;
        match self.entries.remove(&index) {
            Some(entry) => {
                if Instant::now() > entry.deadline {
                    debug!(index, ?entry.arrived, "frame played past its deadline");
                }
                self.stats.played += 1;
                entry.frame
            }
            None => {
                self.stats.concealed += 1;
                AudioFrame::silence(self.format)
            }
        }
    }

    fn conceal(&mut self) -> AudioFrame {
        self.stats.concealed += 1;
        AudioFrame::silence(self.format)
    }
}
