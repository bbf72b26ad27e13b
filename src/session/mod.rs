//! Transport session: one UDP peer relationship.
//!
//! A [`Session`] runs three tokio tasks:
//!
//! - **send loop**: awaits captured frames from the bridge, packetizes them
//!   with the next sequence number, and transmits. Falls back to
//!   empty-payload keepalives when no audio is flowing. No retransmission:
//!   voice is loss-tolerant and latency-sensitive, so retransmitted audio is
//!   worse than dropped audio.
//! - **receive loop**: awaits datagrams, validates the wire format and the
//!   peer's session id, refreshes liveness, and feeds audio packets into the
//!   jitter buffer. Loss is observed for diagnostics, never recovered.
//! - **playback loop**: ticks at the frame duration, pops from the jitter
//!   buffer (which conceals with silence rather than blocking) and submits
//!   to the bridge's playback sink.
//!
//! State machine: `Connecting → Connected` on the first valid packet from the
//! peer, `Connected → Disconnected` on liveness timeout or [`Session::close`].
//! `Disconnected` is terminal; reconnecting is the owner's policy.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::audio::bridge::{CaptureSource, PlaybackSink};
use crate::audio::frame::AudioFrame;
use crate::audio::jitter::{JitterBuffer, JitterStats};
use crate::config::SessionConfig;
use crate::network;
use crate::network::wire::{self, Packet, SequenceExtender};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Nothing received within the liveness timeout.
    Timeout,
    /// The owner called [`Session::close`].
    Closed,
}

/// Observability events delivered to the session owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { remote: SocketAddr },
    Disconnected(DisconnectReason),
    /// A socket-level send failure. The session keeps sending; UDP errors
    /// (often ICMP-triggered) are transient.
    SendError(std::io::ErrorKind),
}

/// Snapshot of session counters.
#[derive(Clone, Copy, Debug)]
pub struct SessionStats {
    pub state: SessionState,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub keepalives_sent: u64,
    pub keepalives_received: u64,
    pub malformed_packets: u64,
    pub send_errors: u64,
    pub playback_dropped: u64,
    pub session_mismatches: u64,
    /// Sequence gaps observed on the receive path. Diagnostics only.
    pub observed_loss: u64,
    pub last_remote_timestamp_us: u64,
    pub jitter: JitterStats,
}

#[derive(Default)]
struct Counters {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    keepalives_sent: AtomicU64,
    keepalives_received: AtomicU64,
    malformed_packets: AtomicU64,
    send_errors: AtomicU64,
    playback_dropped: AtomicU64,
    session_mismatches: AtomicU64,
    last_remote_timestamp_us: AtomicU64,
}

/// A hole older than this many frames behind the newest arrival will never
/// be filled by reordering; it is written off as lost so `pending` stays
/// bounded for the lifetime of the session.
const REORDER_WINDOW: u64 = 512;

/// Receive-side sequence bookkeeping: wrap extension plus a sorted set of
/// out-of-order arrivals ahead of the contiguous prefix.
#[derive(Default)]
struct ReceiveState {
    extender: SequenceExtender,
    highest_contiguous: Option<u64>,
    pending: BTreeSet<u64>,
    /// Holes written off after falling out of the reorder window.
    lost: u64,
}

impl ReceiveState {
    fn record(&mut self, index: u64) {
        let Some(hc) = self.highest_contiguous else {
            self.highest_contiguous = Some(index);
            return;
        };
        if index <= hc {
            return;
        }
        if index == hc + 1 {
            let mut hc = index;
            while self.pending.remove(&(hc + 1)) {
                hc += 1;
            }
            self.highest_contiguous = Some(hc);
        } else {
            self.pending.insert(index);
            self.write_off_stale_holes();
        }
    }

    /// Advance the contiguous prefix past holes older than the reorder
    /// window, counting every skipped index as lost.
    fn write_off_stale_holes(&mut self) {
        let Some(&newest) = self.pending.iter().next_back() else {
            return;
        };
        let floor = newest.saturating_sub(REORDER_WINDOW);
        let Some(mut hc) = self.highest_contiguous else {
            return;
        };
        while hc < floor {
            hc += 1;
            if !self.pending.remove(&hc) {
                self.lost += 1;
            }
            while self.pending.remove(&(hc + 1)) {
                hc += 1;
            }
        }
        self.highest_contiguous = Some(hc);
    }

    /// Written-off holes plus holes still open inside the reorder window.
    fn observed_loss(&self) -> u64 {
        let open = match (self.highest_contiguous, self.pending.iter().next_back()) {
            (Some(hc), Some(&max)) => (max - hc) - self.pending.len() as u64,
            _ => 0,
        };
        self.lost + open
    }
}

struct Shared {
    config: SessionConfig,
    local_session_id: u16,
    epoch: Instant,
    state: Mutex<SessionState>,
    jitter: Mutex<JitterBuffer>,
    recv: Mutex<ReceiveState>,
    remote_session_id: Mutex<Option<u16>>,
    last_received: Mutex<Instant>,
    counters: Counters,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Shared {
    /// Microseconds on the session's monotonic clock.
    fn timestamp_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Move to `Disconnected` if not there yet. Returns whether this call
    /// performed the transition, so the event fires exactly once.
    fn transition_disconnected(&self, reason: DisconnectReason) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == SessionState::Disconnected {
            return false;
        }
        *state = SessionState::Disconnected;
        drop(state);
        let _ = self.events.send(SessionEvent::Disconnected(reason));
        true
    }

    fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let packet = match Packet::unmarshal(data, self.config.max_datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.counters.malformed_packets.fetch_add(1, Ordering::Relaxed);
                debug!("dropping malformed datagram from {from}: {e}");
                return;
            }
        };

        // The first valid packet's session id is the peer's id for the rest
        // of this session; anything else is stray traffic.
        {
            let mut remote_id = self.remote_session_id.lock().unwrap();
            match *remote_id {
                None => {
                    info!(session_id = packet.session_id, "peer session id learned");
                    *remote_id = Some(packet.session_id);
                }
                Some(id) if id != packet.session_id => {
                    self.counters.session_mismatches.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        got = packet.session_id,
                        expected = id,
                        "dropping datagram with foreign session id"
                    );
                    return;
                }
                Some(_) => {}
            }
        }

        *self.last_received.lock().unwrap() = Instant::now();

        {
            let mut state = self.state.lock().unwrap();
            if *state == SessionState::Connecting {
                *state = SessionState::Connected;
                drop(state);
                info!("session connected to {from}");
                let _ = self.events.send(SessionEvent::Connected { remote: from });
            }
        }

        self.counters
            .last_remote_timestamp_us
            .store(packet.timestamp_us, Ordering::Relaxed);

        if packet.is_keepalive() {
            self.counters.keepalives_received.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let frame = match wire::depacketize(&packet, self.config.format) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.malformed_packets.fetch_add(1, Ordering::Relaxed);
                debug!("dropping packet with bad payload from {from}: {e}");
                return;
            }
        };

        let index = {
            let mut recv = self.recv.lock().unwrap();
            let index = recv.extender.extend(packet.sequence);
            recv.record(index);
            index
        };

        self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
        self.jitter.lock().unwrap().insert(index, frame);
    }
}

/// A live peer session. Dropping it signals shutdown; [`Session::close`]
/// additionally waits for the loops to finish.
pub struct Session {
    shared: Arc<Shared>,
    remote: SocketAddr,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Bind `local` and connect to `remote`. Must run inside a tokio runtime.
    pub fn connect<C, P>(
        config: SessionConfig,
        local: SocketAddr,
        remote: SocketAddr,
        capture: C,
        playback: P,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)>
    where
        C: CaptureSource,
        P: PlaybackSink,
    {
        let socket = network::bind_udp(local)?;
        Self::with_socket(socket, config, remote, capture, playback)
    }

    /// Build a session over an already-bound non-blocking UDP socket.
    pub fn with_socket<C, P>(
        socket: std::net::UdpSocket,
        config: SessionConfig,
        remote: SocketAddr,
        capture: C,
        playback: P,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)>
    where
        C: CaptureSource,
        P: PlaybackSink,
    {
        let local_addr = socket.local_addr().context("Failed to read local addr")?;
        let socket = Arc::new(
            UdpSocket::from_std(socket).context("Failed to convert to tokio UdpSocket")?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let local_session_id: u16 = rand::random();

        let shared = Arc::new(Shared {
            jitter: Mutex::new(JitterBuffer::new(
                config.format,
                config.target_depth,
                config.silence_timeout,
            )),
            config,
            local_session_id,
            epoch: Instant::now(),
            state: Mutex::new(SessionState::Connecting),
            recv: Mutex::new(ReceiveState::default()),
            remote_session_id: Mutex::new(None),
            last_received: Mutex::new(Instant::now()),
            counters: Counters::default(),
            events: events_tx,
        });

        info!(
            session_id = local_session_id,
            %local_addr,
            %remote,
            "session starting"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(send_loop(
                socket.clone(),
                remote,
                capture,
                shared.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(recv_loop(socket, shared.clone(), shutdown_rx.clone())),
            tokio::spawn(playback_loop(playback, shared.clone(), shutdown_rx)),
        ];

        Ok((
            Self {
                shared,
                remote,
                local_addr,
                shutdown: shutdown_tx,
                tasks,
            },
            events_rx,
        ))
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().unwrap()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn session_id(&self) -> u16 {
        self.shared.local_session_id
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.shared.counters;
        SessionStats {
            state: self.state(),
            packets_sent: c.packets_sent.load(Ordering::Relaxed),
            packets_received: c.packets_received.load(Ordering::Relaxed),
            keepalives_sent: c.keepalives_sent.load(Ordering::Relaxed),
            keepalives_received: c.keepalives_received.load(Ordering::Relaxed),
            malformed_packets: c.malformed_packets.load(Ordering::Relaxed),
            send_errors: c.send_errors.load(Ordering::Relaxed),
            playback_dropped: c.playback_dropped.load(Ordering::Relaxed),
            session_mismatches: c.session_mismatches.load(Ordering::Relaxed),
            observed_loss: self.shared.recv.lock().unwrap().observed_loss(),
            last_remote_timestamp_us: c.last_remote_timestamp_us.load(Ordering::Relaxed),
            jitter: self.shared.jitter.lock().unwrap().stats(),
        }
    }

    /// Tear the session down: unblocks all three loops, waits for them, and
    /// emits `Disconnected(Closed)` if the session was still live.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        if self.shared.transition_disconnected(DisconnectReason::Closed) {
            info!("session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn next_capture<C: CaptureSource>(capture: &mut Option<C>) -> Option<AudioFrame> {
    match capture {
        Some(source) => source.next_frame().await,
        None => std::future::pending().await,
    }
}

async fn send_loop<C: CaptureSource>(
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    capture: C,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sequence: u32 = 0;
    let mut capture = Some(capture);
    // First tick fires immediately: the opening keepalive doubles as the
    // hello that lets the peer leave Connecting.
    let mut keepalive = interval(shared.config.keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = next_capture(&mut capture) => match frame {
                Some(frame) => {
                    let timestamp_us = shared.timestamp_us();
                    match wire::packetize(
                        &frame,
                        sequence,
                        timestamp_us,
                        shared.local_session_id,
                        shared.config.format,
                        shared.config.max_datagram,
                    ) {
                        Ok(packet) => {
                            if send_packet(&socket, &packet, remote, &shared).await {
                                sequence = sequence.wrapping_add(1);
                                shared.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                            }
                            // Audio traffic carries liveness by itself.
                            keepalive.reset();
                        }
                        Err(e) => {
                            warn!("dropping capture frame: {e}");
                        }
                    }
                }
                None => {
                    info!("capture source closed, continuing with keepalives");
                    capture = None;
                }
            },
            _ = keepalive.tick() => {
                // Keepalives carry the next unsent sequence without consuming
                // it; they never reach the peer's jitter buffer, so consuming
                // numbers would punch phantom gaps into playback.
                let packet =
                    Packet::keepalive(sequence, shared.timestamp_us(), shared.local_session_id);
                if send_packet(&socket, &packet, remote, &shared).await {
                    shared.counters.keepalives_sent.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    debug!("send loop stopped");
}

async fn send_packet(
    socket: &UdpSocket,
    packet: &Packet,
    remote: SocketAddr,
    shared: &Shared,
) -> bool {
    let bytes = packet.marshal();
    match socket.send_to(&bytes, remote).await {
        Ok(sent) => {
            if sent < bytes.len() {
                warn!("partial send: {sent} of {} bytes", bytes.len());
            }
            true
        }
        Err(e) => {
            warn!("failed to send packet to {remote}: {e}");
            shared.counters.send_errors.fetch_add(1, Ordering::Relaxed);
            let _ = shared.events.send(SessionEvent::SendError(e.kind()));
            false
        }
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; 65536];
    let check_period = (shared.config.liveness_timeout / 4).max(Duration::from_millis(10));
    let mut liveness = interval(check_period);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = liveness.tick() => {
                let elapsed = shared.last_received.lock().unwrap().elapsed();
                if elapsed >= shared.config.liveness_timeout
                    && shared.transition_disconnected(DisconnectReason::Timeout)
                {
                    warn!(?elapsed, "nothing heard from peer, session disconnected");
                }
            }
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => shared.handle_datagram(&buf[..len], from),
                Err(e) => {
                    // Transient (often ICMP-surfaced) errors must not kill
                    // the receive path.
                    warn!("failed to receive UDP packet: {e}");
                }
            },
        }
    }

    debug!("receive loop stopped");
}

async fn playback_loop<P: PlaybackSink>(
    mut playback: P,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(shared.config.format.frame_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let frame = shared.jitter.lock().unwrap().pop();
                if !playback.submit(frame) {
                    shared.counters.playback_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    debug!("playback loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::bridge::{SilentCapture, ToneSource, playback_channel};
    use crate::audio::frame::{AudioFormat, AudioFrame};
    use tokio::time::{sleep, timeout};

    fn test_config() -> SessionConfig {
        SessionConfig {
            format: AudioFormat::new(8_000, 1, Duration::from_millis(20)),
            target_depth: 4,
            silence_timeout: Duration::from_secs(2),
            liveness_timeout: Duration::from_millis(200),
            keepalive_interval: Duration::from_millis(50),
            max_datagram: 4096,
        }
    }

    fn marked(format: AudioFormat, marker: i16) -> AudioFrame {
        let mut samples = vec![0i16; format.samples_per_frame()];
        samples[0] = marker;
        AudioFrame::new(format, samples).unwrap()
    }

    #[test]
    fn receive_state_tracks_loss() {
        let mut recv = ReceiveState::default();
        for index in [0u64, 1, 2] {
            recv.record(index);
        }
        assert_eq!(recv.observed_loss(), 0);

        recv.record(5);
        recv.record(7);
        // 3, 4 and 6 are missing.
        assert_eq!(recv.observed_loss(), 3);

        recv.record(3);
        recv.record(4);
        // Contiguous prefix absorbs 5; only 6 remains missing.
        assert_eq!(recv.observed_loss(), 1);

        recv.record(6);
        assert_eq!(recv.observed_loss(), 0);
        assert_eq!(recv.highest_contiguous, Some(7));
    }

    #[test]
    fn receive_state_stays_bounded_after_permanent_loss() {
        let mut recv = ReceiveState::default();
        recv.record(0);
        // Index 1 never arrives; hours of traffic follow.
        let mut max_pending = 0;
        for index in 2..10_000u64 {
            recv.record(index);
            max_pending = max_pending.max(recv.pending.len());
        }

        assert!(
            max_pending <= REORDER_WINDOW as usize,
            "pending grew to {max_pending} entries"
        );
        // Once the hole fell out of the window it was written off and the
        // prefix caught back up.
        assert!(recv.pending.is_empty());
        assert_eq!(recv.highest_contiguous, Some(9_999));
        assert_eq!(recv.observed_loss(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn liveness_timeout_disconnects_exactly_once() {
        // Peer exists but never answers.
        let peer = network::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let (playback, _playback_rx) = playback_channel(8);
        let (session, mut events) = Session::connect(
            test_config(),
            "127.0.0.1:0".parse().unwrap(),
            peer_addr,
            SilentCapture,
            playback,
        )
        .unwrap();

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("expected a timeout event")
            .unwrap();
        assert_eq!(event, SessionEvent::Disconnected(DisconnectReason::Timeout));
        assert_eq!(session.state(), SessionState::Disconnected);

        // Terminal: further silence re-emits nothing.
        let second = timeout(Duration::from_millis(400), events.recv()).await;
        assert!(second.is_err(), "unexpected second event: {second:?}");

        // Still inspectable after disconnect.
        assert!(session.stats().keepalives_sent > 0);
        session.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keepalives_flow_while_idle_without_consuming_sequences() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let (playback, _playback_rx) = playback_channel(8);
        let (session, _events) = Session::connect(
            test_config(),
            "127.0.0.1:0".parse().unwrap(),
            peer_addr,
            SilentCapture,
            playback,
        )
        .unwrap();

        let mut buf = [0u8; 2048];
        let mut sequences = Vec::new();
        for _ in 0..3 {
            let (len, _) = timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
                .await
                .expect("expected a keepalive")
                .unwrap();
            let packet = Packet::unmarshal(&buf[..len], 4096).unwrap();
            assert!(packet.is_keepalive());
            assert_eq!(packet.session_id, session.session_id());
            sequences.push(packet.sequence);
        }
        // No audio was sent, so the counter never moved.
        assert!(sequences.iter().all(|&s| s == 0), "{sequences:?}");
        assert!(session.stats().keepalives_sent >= 3);
        session.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn receiver_plays_every_frame_despite_reorder_delay() {
        let mut config = test_config();
        // Extra cushion so the delayed packet lands well before its slot.
        config.target_depth = 5;
        let format = config.format;
        let total: u32 = 10;

        let sender = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let sender_addr = sender.local_addr().unwrap();

        let receiver_socket = network::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let receiver_addr = receiver_socket.local_addr().unwrap();

        let (playback, mut playback_rx) = playback_channel(256);
        let (session, mut events) = Session::with_socket(
            receiver_socket,
            config.clone(),
            sender_addr,
            SilentCapture,
            playback,
        )
        .unwrap();

        let session_id = 0x5151u16;
        let delayed: u32 = 5;

        let feeder = {
            let sender = sender.clone();
            tokio::spawn(async move {
                let mut delayed_send = None;
                for seq in 0..total {
                    let frame = marked(format, seq as i16 + 1);
                    let packet =
                        wire::packetize(&frame, seq, seq as u64 * 20_000, session_id, format, 4096)
                            .unwrap();
                    if seq == delayed {
                        // One-shot 50ms extra delay: the packet arrives
                        // behind seq 6 and 7.
                        let sender = sender.clone();
                        delayed_send = Some(tokio::spawn(async move {
                            sleep(Duration::from_millis(50)).await;
                            sender
                                .send_to(&packet.marshal(), receiver_addr)
                                .await
                                .unwrap();
                        }));
                    } else {
                        sender
                            .send_to(&packet.marshal(), receiver_addr)
                            .await
                            .unwrap();
                    }
                    sleep(format.frame_duration).await;
                }
                if let Some(task) = delayed_send {
                    task.await.unwrap();
                }
            })
        };

        let first = timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("expected Connected")
            .unwrap();
        assert_eq!(first, SessionEvent::Connected { remote: sender_addr });

        // Collect playback output; silence frames (marker 0) pad startup and
        // concealment, every real frame must appear exactly once, in order.
        let mut markers = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while markers.len() < total as usize && Instant::now() < deadline {
            match timeout(Duration::from_millis(200), playback_rx.recv()).await {
                Ok(Some(frame)) => {
                    let marker = frame.samples()[0];
                    if marker != 0 {
                        markers.push(marker);
                    }
                }
                Ok(None) => break,
                Err(_) => {}
            }
        }

        let expected: Vec<i16> = (1..=total as i16).collect();
        assert_eq!(markers, expected);

        let stats = session.stats();
        assert_eq!(stats.packets_received, total as u64);
        assert_eq!(stats.jitter.late_dropped, 0);
        assert_eq!(stats.observed_loss, 0);

        session.close().await;
        feeder.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn two_sessions_exchange_audio_over_loopback() {
        let mut config = test_config();
        config.liveness_timeout = Duration::from_secs(2);
        let format = config.format;

        let socket_a = network::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let socket_b = network::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr_a = socket_a.local_addr().unwrap();
        let addr_b = socket_b.local_addr().unwrap();

        let (playback_a, _playback_a_rx) = playback_channel(256);
        let (playback_b, mut playback_b_rx) = playback_channel(256);

        let tone = ToneSource::new(format, 440.0, Some(25));
        let (session_a, mut events_a) =
            Session::with_socket(socket_a, config.clone(), addr_b, tone, playback_a).unwrap();
        let (session_b, mut events_b) =
            Session::with_socket(socket_b, config, addr_a, SilentCapture, playback_b).unwrap();

        let connected_a = timeout(Duration::from_secs(1), events_a.recv()).await;
        let connected_b = timeout(Duration::from_secs(1), events_b.recv()).await;
        assert!(matches!(
            connected_a,
            Ok(Some(SessionEvent::Connected { .. }))
        ));
        assert!(matches!(
            connected_b,
            Ok(Some(SessionEvent::Connected { .. }))
        ));

        // B should hear A's tone among the startup silences.
        let mut heard_tone = false;
        let deadline = Instant::now() + Duration::from_secs(3);
        while !heard_tone && Instant::now() < deadline {
            match timeout(Duration::from_millis(200), playback_b_rx.recv()).await {
                Ok(Some(frame)) => heard_tone = !frame.is_silence(),
                Ok(None) => break,
                Err(_) => {}
            }
        }
        assert!(heard_tone, "B never received audible frames from A");

        let stats_b = session_b.stats();
        assert!(stats_b.packets_received > 0);
        assert!(stats_b.jitter.played > 0);

        // A hears only keepalives from B; liveness still holds.
        let stats_a = session_a.stats();
        assert!(stats_a.packets_sent > 0);
        assert_eq!(stats_a.packets_received, 0);
        assert!(stats_a.keepalives_received > 0);
        assert_eq!(session_a.state(), SessionState::Connected);

        session_a.close().await;
        session_b.close().await;
    }
}
