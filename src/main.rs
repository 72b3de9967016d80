//! Bluetooth audio loopback demo
//!
//! Streams a sine tone through an A2DP sink profile over a local socket pair.
//! The far end decodes the SBC packets the way headphones would.
//!
//! Run with: cargo run -- [--seconds N] [--debug]

use std::f64::consts::TAU;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use btaudio_core::{Profile, StreamConfig, TransportError, TransportState, Usec};
use btaudio_device::{CallbackObserver, DeviceContext, ProfileController, ProfileEvent};
use btaudio_sbc::{CodecRole, SbcCapabilities, SbcCodecState};
use btaudio_stream::path::decode_packet;
use btaudio_stream::PlaybackSink;
use btaudio_transport::{seqpacket_pair, AcquiredTransport, SeqPacketSocket, StreamSocket, Transport};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 44.1 kHz joint stereo, 16 blocks, 8 subbands, loudness, bitpool 2..53.
const SBC_CONFIG: [u8; 4] = [0x21, 0x15, 2, 53];
const LINK_MTU: usize = 672;

/// Hands out the local end of the socket pair, once.
struct LoopbackTransport {
    fd: Arc<Mutex<Option<OwnedFd>>>,
}

impl Transport for LoopbackTransport {
    fn profile(&self) -> Profile {
        Profile::A2dpSink
    }

    fn state(&self) -> TransportState {
        TransportState::Playing
    }

    fn acquire(&mut self, _optional: bool) -> Result<AcquiredTransport, TransportError> {
        let fd = self
            .fd
            .lock()
            .map_err(|_| TransportError::Busy)?
            .take()
            .ok_or(TransportError::Busy)?;
        Ok(AcquiredTransport {
            fd,
            read_mtu: LINK_MTU,
            write_mtu: LINK_MTU,
        })
    }

    fn release(&mut self) {}

    fn configuration(&self) -> Vec<u8> {
        SBC_CONFIG.to_vec()
    }
}

struct Tone {
    phase: f64,
    step: f64,
}

impl Tone {
    fn new(frequency: f64, rate: f64) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / rate,
        }
    }
}

impl PlaybackSink for Tone {
    fn render_full(&mut self, buf: &mut [u8]) {
        for frame in buf.chunks_exact_mut(4) {
            let v = (self.phase.sin() * 10_000.0) as i16;
            frame[..2].copy_from_slice(&v.to_le_bytes());
            frame[2..].copy_from_slice(&v.to_le_bytes());
            self.phase = (self.phase + self.step) % TAU;
        }
    }

    fn update_latency(&mut self, max_request: usize, fixed_latency: Usec) {
        info!(
            "Playback geometry: {} bytes per request, {} us link latency",
            max_request, fixed_latency
        );
    }
}

/// Decode everything arriving on `remote` until the link closes.
fn run_headphones(remote: OwnedFd, decoded: Arc<AtomicU64>) -> anyhow::Result<()> {
    let caps = SbcCapabilities::from_a2dp_bytes(&SBC_CONFIG)?;
    let mut decoder = SbcCodecState::configure(&caps, CodecRole::Decode)?;
    let mut socket = SeqPacketSocket::new(remote.as_raw_fd());
    let mut packet = vec![0u8; 2 * LINK_MTU];
    let mut pcm = Vec::new();

    loop {
        let received = socket.recv(&mut packet).context("headphones recv")?;
        if received.len == 0 {
            return Ok(());
        }
        let n = decode_packet(&mut decoder, &packet[..received.len], &mut pcm)?;
        decoded.fetch_add(n as u64, Ordering::Relaxed);
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let debug = args.iter().any(|a| a == "--debug");
    let seconds: u64 = match args.iter().position(|a| a == "--seconds") {
        Some(i) => args
            .get(i + 1)
            .context("--seconds needs a value")?
            .parse()
            .context("--seconds must be a whole number")?,
        None => 3,
    };
    if seconds == 0 {
        bail!("--seconds must be at least 1");
    }

    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();

    println!("=== Bluetooth Audio Loopback ===");
    println!("Profile: {}", Profile::A2dpSink);
    println!("Duration: {}s", seconds);

    let (local, remote) = seqpacket_pair().context("creating link socket pair")?;
    let decoded = Arc::new(AtomicU64::new(0));
    let headphones = {
        let decoded = decoded.clone();
        thread::Builder::new()
            .name("headphones".into())
            .spawn(move || run_headphones(remote, decoded))?
    };

    let context = DeviceContext::new(StreamConfig::default())
        .with_observer(Arc::new(CallbackObserver::new(|event| match event {
            ProfileEvent::Failed { profile, reason } => warn!("{} failed: {}", profile, reason),
            other => info!("Profile event: {:?}", other),
        })))
        .with_playback(Box::new(|_| Box::new(Tone::new(440.0, 44_100.0))));

    let mut controller = ProfileController::new(context);
    controller.add_transport(Box::new(LoopbackTransport {
        fd: Arc::new(Mutex::new(Some(local))),
    }))?;
    controller.set_profile(Some(Profile::A2dpSink))?;

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(100));
        controller.process_notifications();
        if controller.profile().is_none() {
            break;
        }
    }

    let stats = controller.stats();
    controller.set_profile(None)?;

    match headphones.join() {
        Ok(result) => result?,
        Err(_) => bail!("headphones thread panicked"),
    }

    println!("\n=== Statistics ===");
    match stats {
        Some(s) => {
            println!("Packets written:     {}", s.packets_written);
            println!("PCM bytes written:   {}", s.bytes_written);
            println!("Bytes skipped:       {}", s.bytes_skipped);
            println!("Bitpool reductions:  {}", s.bitpool_reductions);
            println!("Write anomalies:     {}", s.write_anomalies);
        }
        None => println!("Stream was not running"),
    }
    println!("PCM bytes decoded:   {}", decoded.load(Ordering::Relaxed));

    Ok(())
}
