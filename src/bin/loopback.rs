//! Loopback demo: two sessions on one machine streaming tones at each other.
//!
//! Peer A sends a 440Hz tone, peer B a 660Hz tone; each plays what it hears.
//! Run with `RUST_LOG=debug` for per-packet detail.

use std::time::Duration;

use anyhow::Result;
use tracing::info;

use p2p_voice::audio::bridge::{ToneSource, playback_channel};
use p2p_voice::network::bind_udp;
use p2p_voice::{Session, SessionConfig};

const DEMO_FRAMES: u64 = 250; // 5 seconds of 20ms frames

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = SessionConfig::default();
    let format = config.format;

    let socket_a = bind_udp("127.0.0.1:0".parse()?)?;
    let socket_b = bind_udp("127.0.0.1:0".parse()?)?;
    let addr_a = socket_a.local_addr()?;
    let addr_b = socket_b.local_addr()?;

    let (playback_a, mut speaker_a) = playback_channel(64);
    let (playback_b, mut speaker_b) = playback_channel(64);

    let (session_a, mut events_a) = Session::with_socket(
        socket_a,
        config.clone(),
        addr_b,
        ToneSource::new(format, 440.0, Some(DEMO_FRAMES)),
        playback_a,
    )?;
    let (session_b, mut events_b) = Session::with_socket(
        socket_b,
        config,
        addr_a,
        ToneSource::new(format, 660.0, Some(DEMO_FRAMES)),
        playback_b,
    )?;

    info!("peer A on {addr_a}, peer B on {addr_b}");

    // A real application would feed these to output devices; the demo just
    // counts what would have been audible.
    let drain_a = tokio::spawn(async move {
        let mut audible = 0u64;
        while let Some(frame) = speaker_a.recv().await {
            if !frame.is_silence() {
                audible += 1;
            }
        }
        audible
    });
    let drain_b = tokio::spawn(async move {
        let mut audible = 0u64;
        while let Some(frame) = speaker_b.recv().await {
            if !frame.is_silence() {
                audible += 1;
            }
        }
        audible
    });

    let report = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events_a.recv() => match event {
                    Some(event) => info!("peer A: {event:?}"),
                    None => break,
                },
                event = events_b.recv() => match event {
                    Some(event) => info!("peer B: {event:?}"),
                    None => break,
                },
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(DEMO_FRAMES * 20 + 500)).await;

    let stats_a = session_a.stats();
    let stats_b = session_b.stats();
    info!(
        "peer A: sent {} received {} concealed {}",
        stats_a.packets_sent, stats_a.packets_received, stats_a.jitter.concealed
    );
    info!(
        "peer B: sent {} received {} concealed {}",
        stats_b.packets_sent, stats_b.packets_received, stats_b.jitter.concealed
    );

    session_a.close().await;
    session_b.close().await;

    let audible_a = drain_a.await?;
    let audible_b = drain_b.await?;
    info!("audible frames: A heard {audible_a}, B heard {audible_b}");

    report.abort();
    Ok(())
}
