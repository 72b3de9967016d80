//! Profile lifecycle over real socket pairs.
//!
//! The fake transport plays the Bluetooth daemon: it hands out one end of a
//! socketpair per acquire and reports acquire failures while it has none.

use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use btaudio_core::{
    Direction, Profile, StreamConfig, TransportError, TransportState, Usec, USEC_PER_MSEC,
};
use btaudio_device::{
    CallbackObserver, ControllerState, DeviceContext, ProfileController, ProfileEvent,
};
use btaudio_sbc::{CodecRole, SbcCapabilities, SbcCodecState};
use btaudio_stream::path::decode_packet;
use btaudio_stream::PlaybackSink;
use btaudio_transport::{seqpacket_pair, AcquiredTransport, SeqPacketSocket, StreamSocket, Transport};

const SBC_CONFIG: [u8; 4] = [0x21, 0x15, 2, 53];

#[derive(Clone, Default)]
struct Daemon {
    fds: Arc<Mutex<Vec<OwnedFd>>>,
    releases: Arc<AtomicUsize>,
}

impl Daemon {
    /// Make one link available and return its remote end.
    fn offer_link(&self) -> OwnedFd {
        let (local, remote) = seqpacket_pair().unwrap();
        self.fds.lock().unwrap().push(local);
        remote
    }
}

struct DaemonTransport {
    profile: Profile,
    daemon: Daemon,
}

impl Transport for DaemonTransport {
    fn profile(&self) -> Profile {
        self.profile
    }

    fn state(&self) -> TransportState {
        if self.daemon.fds.lock().unwrap().is_empty() {
            TransportState::Idle
        } else {
            TransportState::Playing
        }
    }

    fn acquire(&mut self, _optional: bool) -> Result<AcquiredTransport, TransportError> {
        let fd = self
            .daemon
            .fds
            .lock()
            .unwrap()
            .pop()
            .ok_or(TransportError::NoTransport)?;
        Ok(AcquiredTransport {
            fd,
            read_mtu: 672,
            write_mtu: 672,
        })
    }

    fn release(&mut self) {
        self.daemon.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn configuration(&self) -> Vec<u8> {
        SBC_CONFIG.to_vec()
    }
}

struct Ramp(i16);

impl PlaybackSink for Ramp {
    fn render_full(&mut self, buf: &mut [u8]) {
        for sample in buf.chunks_exact_mut(2) {
            sample.copy_from_slice(&self.0.to_le_bytes());
            self.0 = self.0.wrapping_add(64);
        }
    }

    fn update_latency(&mut self, _max_request: usize, _fixed_latency: Usec) {}
}

fn recorded_context(events: Arc<Mutex<Vec<ProfileEvent>>>) -> DeviceContext {
    DeviceContext::new(StreamConfig::default())
        .with_observer(Arc::new(CallbackObserver::new(move |event| {
            events.lock().unwrap().push(event);
        })))
        .with_playback(Box::new(|_| Box::new(Ramp(0))))
}

#[test]
fn source_comes_up_when_transport_starts_playing() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let daemon = Daemon::default();
    let mut controller = ProfileController::new(recorded_context(events.clone()));
    controller
        .add_transport(Box::new(DaemonTransport {
            profile: Profile::A2dpSource,
            daemon: daemon.clone(),
        }))
        .unwrap();

    // No link yet: the source role waits instead of failing
    controller.set_profile(Some(Profile::A2dpSource)).unwrap();
    assert_eq!(controller.state(), ControllerState::Acquiring);
    assert!(!events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, ProfileEvent::Failed { .. })));

    let _remote = daemon.offer_link();
    controller
        .on_transport_state_changed(Profile::A2dpSource, TransportState::Playing)
        .unwrap();
    assert_eq!(controller.state(), ControllerState::Active);
    // Nothing received yet: only the fixed record latency
    assert_eq!(controller.latency(Direction::Input), Some(25 * USEC_PER_MSEC));
    assert_eq!(controller.latency(Direction::Output), Some(0));

    controller.set_profile(None).unwrap();
    assert_eq!(daemon.releases.load(Ordering::SeqCst), 1);
    assert_eq!(
        events.lock().unwrap().last(),
        Some(&ProfileEvent::StateChanged {
            profile: None,
            state: ControllerState::Off,
        })
    );
}

#[test]
fn sink_streams_until_transport_goes_idle() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let daemon = Daemon::default();
    let remote = daemon.offer_link();
    let mut controller = ProfileController::new(recorded_context(events.clone()));
    controller
        .add_transport(Box::new(DaemonTransport {
            profile: Profile::A2dpSink,
            daemon: daemon.clone(),
        }))
        .unwrap();

    let peer = thread::spawn(move || {
        let caps = SbcCapabilities::from_a2dp_bytes(&SBC_CONFIG).unwrap();
        let mut decoder = SbcCodecState::configure(&caps, CodecRole::Decode).unwrap();
        let mut socket = SeqPacketSocket::new(remote.as_raw_fd());
        let mut packet = vec![0u8; 1344];
        let mut pcm = Vec::new();
        let mut decoded = 0;
        loop {
            let received = socket.recv(&mut packet).unwrap();
            if received.len == 0 {
                return decoded;
            }
            decoded += decode_packet(&mut decoder, &packet[..received.len], &mut pcm).unwrap();
        }
    });

    controller.set_profile(Some(Profile::A2dpSink)).unwrap();
    assert_eq!(controller.state(), ControllerState::Active);

    let deadline = Instant::now() + Duration::from_secs(2);
    while controller.stats().map_or(0, |s| s.packets_written) < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    controller
        .on_transport_state_changed(Profile::A2dpSink, TransportState::Idle)
        .unwrap();
    assert_eq!(controller.state(), ControllerState::Suspended);
    assert!(controller.stats().is_none());

    let decoded = peer.join().unwrap();
    assert!(decoded >= 3 * 2560);
    assert_eq!(daemon.releases.load(Ordering::SeqCst), 1);
    assert!(events
        .lock()
        .unwrap()
        .contains(&ProfileEvent::SinkSuspended(Profile::A2dpSink)));
}
