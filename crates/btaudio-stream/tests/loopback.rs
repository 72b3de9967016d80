//! End-to-end I/O thread tests over a local SEQPACKET link.
//!
//! A fake transport hands the loop one end of a socketpair. A peer thread on
//! the other end plays the remote device.

use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use btaudio_core::{Direction, Profile, StreamConfig, TransportError, TransportState, Usec};
use btaudio_sbc::{CodecRole, SbcCapabilities, SbcCodecState};
use btaudio_stream::path::decode_packet;
use btaudio_stream::{CaptureSink, IoEventLoop, IoThread, PlaybackSink, RtpFramer, Stream};
use btaudio_timing::RtClock;
use btaudio_transport::{
    seqpacket_pair, AcquiredTransport, SeqPacketSocket, StreamSocket, Transport, TransportSession,
};
use crossbeam_channel::unbounded;

const SBC_CONFIG: [u8; 4] = [0x21, 0x15, 2, 53];

struct PairTransport {
    profile: Profile,
    fd: Arc<Mutex<Option<OwnedFd>>>,
    mtu: usize,
    releases: Arc<AtomicUsize>,
}

impl Transport for PairTransport {
    fn profile(&self) -> Profile {
        self.profile
    }

    fn state(&self) -> TransportState {
        TransportState::Playing
    }

    fn acquire(&mut self, _optional: bool) -> Result<AcquiredTransport, TransportError> {
        let fd = self.fd.lock().unwrap().take().ok_or(TransportError::Busy)?;
        Ok(AcquiredTransport {
            fd,
            read_mtu: self.mtu,
            write_mtu: self.mtu,
        })
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn configuration(&self) -> Vec<u8> {
        SBC_CONFIG.to_vec()
    }
}

/// Sine tone counting rendered bytes.
struct ToneSource {
    phase: f64,
    rendered: Arc<AtomicUsize>,
}

impl PlaybackSink for ToneSource {
    fn render_full(&mut self, buf: &mut [u8]) {
        for frame in buf.chunks_exact_mut(2) {
            let v = (self.phase.sin() * 8_000.0) as i16;
            frame.copy_from_slice(&v.to_le_bytes());
            self.phase += 0.03;
        }
        self.rendered.fetch_add(buf.len(), Ordering::SeqCst);
    }

    fn update_latency(&mut self, _max_request: usize, _fixed_latency: Usec) {}
}

struct CountingSink {
    received: Arc<AtomicUsize>,
}

impl CaptureSink for CountingSink {
    fn post(&mut self, pcm: &[u8], _timestamp: Usec) {
        self.received.fetch_add(pcm.len(), Ordering::SeqCst);
    }

    fn set_fixed_latency(&mut self, _latency: Usec) {}
}

fn session(profile: Profile, fd: OwnedFd, mtu: usize, releases: Arc<AtomicUsize>) -> TransportSession {
    let transport = PairTransport {
        profile,
        fd: Arc::new(Mutex::new(Some(fd))),
        mtu,
        releases,
    };
    let mut session = TransportSession::new(Box::new(transport));
    session.acquire(false).unwrap();
    session
}

#[test]
fn a2dp_sink_streams_decodable_sbc() {
    let (local, remote) = seqpacket_pair().unwrap();
    let releases = Arc::new(AtomicUsize::new(0));
    let session = session(Profile::A2dpSink, local, 672, releases.clone());

    let caps = SbcCapabilities::from_a2dp_bytes(&SBC_CONFIG).unwrap();
    let codec = SbcCodecState::configure(&caps, CodecRole::Encode).unwrap();
    let config = StreamConfig::default();
    let stream = Stream::new(session, Some(codec), config.sco_sample_spec).unwrap();

    // Remote headphones: decode everything until the link closes
    let peer = thread::spawn(move || {
        let mut decoder = SbcCodecState::configure(&caps, CodecRole::Decode).unwrap();
        let mut socket = SeqPacketSocket::new(remote.as_raw_fd());
        let mut packet = vec![0u8; 1344];
        let mut pcm = Vec::new();
        let mut decoded = 0;
        let mut expected = 0;
        let mut sequence = Vec::new();
        loop {
            let received = socket.recv(&mut packet).unwrap();
            if received.len == 0 {
                break;
            }
            let (frames, _) = RtpFramer::parse_header(&packet[..received.len]).unwrap();
            expected += frames as usize * decoder.codesize();
            sequence.push(u16::from_be_bytes([packet[2], packet[3]]));
            decoded += decode_packet(&mut decoder, &packet[..received.len], &mut pcm).unwrap();
        }
        assert_eq!(decoded, expected);
        (decoded, sequence)
    });

    let rendered = Arc::new(AtomicUsize::new(0));
    let (tx, notifications) = unbounded();
    let (event_loop, control) =
        IoEventLoop::new(stream, config, Arc::new(RtClock::new()), tx).unwrap();
    let event_loop = event_loop.with_playback(Box::new(ToneSource {
        phase: 0.0,
        rendered: rendered.clone(),
    }));
    let io = IoThread::spawn(event_loop, control).unwrap();

    thread::sleep(Duration::from_millis(200));
    let stats = io.stats().snapshot();
    let session = io.shutdown().unwrap();
    assert!(!session.is_acquired());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(notifications.try_recv().is_err());

    let (decoded, sequence) = peer.join().unwrap();
    assert!(stats.packets_written >= 2);
    assert!(sequence.len() >= 2);
    assert!(rendered.load(Ordering::SeqCst) >= decoded);
    for pair in sequence.windows(2) {
        assert_eq!(pair[1], pair[0].wrapping_add(1));
    }
}

#[test]
fn sco_duplex_follows_incoming_packets() {
    let (local, remote) = seqpacket_pair().unwrap();
    let releases = Arc::new(AtomicUsize::new(0));
    let session = session(Profile::HeadsetHeadUnit, local, 48, releases.clone());
    let config = StreamConfig::default();
    let stream = Stream::new(session, None, config.sco_sample_spec).unwrap();

    // Remote headset: echo every packet until the link closes
    let peer = thread::spawn(move || {
        let mut socket = SeqPacketSocket::new(remote.as_raw_fd());
        let mut buf = [0u8; 64];
        let mut echoed = 0;
        loop {
            // Teardown may reset the link mid-read
            let Ok(received) = socket.recv(&mut buf) else {
                break;
            };
            if received.len == 0 {
                break;
            }
            assert_eq!(received.len, 48);
            if socket.send(&buf[..received.len]).is_err() {
                break;
            }
            echoed += 1;
        }
        echoed
    });

    let rendered = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(AtomicUsize::new(0));
    let (tx, _notifications) = unbounded();
    let (event_loop, control) =
        IoEventLoop::new(stream, config, Arc::new(RtClock::new()), tx).unwrap();
    let event_loop = event_loop
        .with_playback(Box::new(ToneSource {
            phase: 0.0,
            rendered: rendered.clone(),
        }))
        .with_capture(Box::new(CountingSink {
            received: received.clone(),
        }));
    let io = IoThread::spawn(event_loop, control).unwrap();

    thread::sleep(Duration::from_millis(100));
    assert!(io.control().latency(Direction::Output).is_some());
    assert!(io.control().latency(Direction::Input).is_some());
    drop(io);

    let echoed = peer.join().unwrap();
    assert!(echoed >= 2);
    assert!(received.load(Ordering::SeqCst) >= 48);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}
