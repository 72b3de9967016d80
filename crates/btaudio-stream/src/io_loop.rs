//! The realtime I/O loop.
//!
//! One thread per active profile polls the stream socket and the control
//! queue, decides when to read and write, paces playback against the
//! monotonic clock and applies the error propagation policy.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use btaudio_core::{Direction, Error, Result, StreamConfig, StreamError, Usec, USEC_PER_MSEC};
use btaudio_timing::TimeSource;
use btaudio_transport::TransportSession;
use crossbeam_channel::{Sender, TryRecvError};
use tracing::{debug, error, info, warn};

use crate::control::{control_channel, ControlMessage, ControlReceiver, ControlSender, Notification};
use crate::pacer::{PaceDecision, PlaybackPacer};
use crate::sink::{CaptureSink, PlaybackSink};
use crate::stats::StreamStats;
use crate::stream::Stream;

/// Lifecycle of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No transport, or suspended.
    Idle,
    Streaming,
    /// Teardown requested; the loop exits.
    Draining,
    /// The session failed; only control messages are processed.
    Failed,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Shutdown,
}

const POLL_ERRORS: libc::c_short = libc::POLLERR | libc::POLLHUP | libc::POLLPRI | libc::POLLNVAL;

/// Poll-driven stream engine for one profile.
pub struct IoEventLoop {
    stream: Stream,
    config: StreamConfig,
    clock: Arc<dyn TimeSource>,
    playback: Option<Box<dyn PlaybackSink>>,
    capture: Option<Box<dyn CaptureSink>>,
    control: ControlReceiver,
    notifications: Sender<Notification>,
    stats: Arc<StreamStats>,
    pacer: PlaybackPacer,
    state: LoopState,
    do_write: usize,
    pending_read_bytes: usize,
    writable: bool,
    revents: libc::c_short,
    notified: bool,
}

impl IoEventLoop {
    /// Create a loop over `stream`. Returns the loop and its control sender.
    pub fn new(
        stream: Stream,
        config: StreamConfig,
        clock: Arc<dyn TimeSource>,
        notifications: Sender<Notification>,
    ) -> Result<(Self, ControlSender)> {
        let channel = control_channel()?;
        Ok(Self::with_channel(stream, config, clock, notifications, channel))
    }

    /// Build the loop on an existing control channel.
    pub fn with_channel(
        stream: Stream,
        config: StreamConfig,
        clock: Arc<dyn TimeSource>,
        notifications: Sender<Notification>,
        (sender, control): (ControlSender, ControlReceiver),
    ) -> (Self, ControlSender) {
        let pacer = PlaybackPacer::new(config.max_playback_catch_up);

        (
            Self {
                stream,
                config,
                clock,
                playback: None,
                capture: None,
                control,
                notifications,
                stats: Arc::new(StreamStats::new()),
                pacer,
                state: LoopState::Idle,
                do_write: 0,
                pending_read_bytes: 0,
                writable: false,
                revents: 0,
                notified: false,
            },
            sender,
        )
    }

    /// Attach the playback producer. Ignored by profiles without output.
    pub fn with_playback(mut self, sink: Box<dyn PlaybackSink>) -> Self {
        if self.stream.profile().has_output() {
            self.playback = Some(sink);
        }
        self
    }

    /// Attach the capture consumer. Ignored by profiles without input.
    pub fn with_capture(mut self, sink: Box<dyn CaptureSink>) -> Self {
        if self.stream.profile().has_input() {
            self.capture = Some(sink);
        }
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Drop the loop and keep its transport session.
    pub fn into_session(self) -> TransportSession {
        self.stream.into_session()
    }

    fn sink_linked(&self) -> bool {
        self.playback.is_some()
    }

    fn source_linked(&self) -> bool {
        self.capture.is_some()
    }

    /// Set up the stream if the transport is already acquired.
    pub fn begin(&mut self) {
        debug!("IO thread starting up");
        if self.stream.session().is_acquired() {
            self.start_streaming();
        }
    }

    /// Run until teardown and hand the transport session back.
    pub fn run(mut self) -> TransportSession {
        self.begin();
        while self.iterate() == Step::Continue {}
        debug!("IO thread shutting down");
        self.stream.into_session()
    }

    /// One pass: service the socket, sleep in `poll`, then handle control
    /// messages and socket errors.
    pub fn iterate(&mut self) -> Step {
        match self.state {
            LoopState::Draining => return Step::Shutdown,
            LoopState::Failed => return self.wait_for_teardown(),
            LoopState::Idle | LoopState::Streaming => {}
        }

        let timer = match self.service() {
            Ok(timer) => timer,
            Err(e) if e.is_fatal() => {
                self.fail(e);
                return Step::Continue;
            }
            Err(e) => {
                warn!("Stream I/O error: {}", e);
                None
            }
        };

        let socket_events = self.poll_events();
        let socket_fd = self.stream.socket_fd().unwrap_or(-1);
        let mut fds = [
            libc::pollfd {
                fd: self.control.wake_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: socket_fd,
                events: socket_events,
                revents: 0,
            },
        ];
        let timeout = poll_timeout(timer);

        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            self.revents = 0;
            if err.kind() != io::ErrorKind::Interrupted {
                error!("poll() failed: {}", err);
                self.fail(Error::Io(err));
            }
            return Step::Continue;
        }
        self.revents = if socket_fd >= 0 { fds[1].revents } else { 0 };

        if let Step::Shutdown = self.process_control() {
            return Step::Shutdown;
        }

        if self.state == LoopState::Streaming && self.revents & POLL_ERRORS != 0 {
            info!("FD error: {}", describe_revents(self.revents));
            if self.revents & libc::POLLHUP != 0 {
                self.hang_up();
            } else {
                let err = io::Error::new(io::ErrorKind::Other, describe_revents(self.revents));
                self.fail(StreamError::Socket(err).into());
            }
        }

        Step::Continue
    }

    /// Read and write what is due. Returns the poll timer, `None` for none.
    fn service(&mut self) -> Result<Option<Usec>> {
        if self.state != LoopState::Streaming || !self.stream.is_ready() {
            return Ok(None);
        }

        let sink_linked = self.sink_linked();
        let source_linked = self.source_linked();
        let spec = *self.stream.sample_spec();
        let mut timer = None;

        if source_linked {
            // Two blocks go out before we expect a response
            if self.stream.write_index() == 0 && self.stream.read_index() == 0 {
                self.do_write = 2;
            }

            if self.revents & libc::POLLIN != 0 {
                if let Some(sink) = self.capture.as_deref_mut() {
                    let n_read = self.stream.process_push(sink, self.clock.as_ref(), &self.stats)?;
                    let block = self.stream.geometry().write_block_size;
                    if n_read > 0 && sink_linked && block > 0 {
                        // We just read something, so a write is owed too
                        self.pending_read_bytes += n_read;
                        self.do_write += self.pending_read_bytes / block;
                        self.pending_read_bytes %= block;
                    }
                }
            }
        }

        let Some(playback) = self.playback.as_deref_mut() else {
            return Ok(timer);
        };

        if self.revents & libc::POLLOUT != 0 {
            self.writable = true;
        }

        if !source_linked && self.do_write == 0 && self.writable {
            // No input stream to follow, pace by time
            let now = self.clock.now();
            let decision = self.pacer.decide(now, self.stream.write_index(), &spec);
            if let PaceDecision::Write {
                skip_usec,
                skip_bytes,
            } = decision
            {
                if skip_bytes > 0 {
                    warn!(
                        "Skipping {} us (= {} bytes) in audio stream",
                        skip_usec, skip_bytes
                    );
                    self.stream.skip(playback, skip_bytes, &self.stats);
                    if self.stream.reduce_bitpool(&self.config, &self.stats)? {
                        self.stream.update_playback_latency(&self.config, playback);
                    }
                }
                self.do_write = 1;
                self.pending_read_bytes = 0;
            }
        }

        if self.writable && self.do_write > 0 {
            if self.stream.write_index() == 0 {
                self.pacer.start(self.clock.now());
            }

            let n_written = self.stream.process_render(playback, &self.stats)?;
            if n_written == 0 {
                warn!("EAGAIN on write() after POLLOUT");
                self.stats.record_write_anomaly();
            }
            self.do_write = self.do_write.saturating_sub(n_written);
            self.writable = false;
        }

        if !source_linked && self.do_write == 0 {
            timer = Some(if self.writable {
                self.pacer
                    .sleep_for(self.clock.now(), self.stream.write_index(), &spec)
            } else {
                // Drop the stream if the socket stays unwritable
                self.config.idle_drop_interval
            });
        }

        Ok(timer)
    }

    fn poll_events(&self) -> libc::c_short {
        if self.state != LoopState::Streaming || !self.stream.is_ready() {
            return 0;
        }
        let mut events = 0;
        if self.sink_linked() && !self.writable {
            events |= libc::POLLOUT;
        }
        if self.source_linked() {
            events |= libc::POLLIN;
        }
        events
    }

    fn process_control(&mut self) -> Step {
        self.control.drain_wakeups();
        loop {
            match self.control.try_recv() {
                Ok(message) => {
                    if let Step::Shutdown = self.handle_message(message) {
                        return Step::Shutdown;
                    }
                }
                Err(TryRecvError::Empty) => return Step::Continue,
                Err(TryRecvError::Disconnected) => {
                    debug!("Control plane gone, stopping");
                    return self.shutdown();
                }
            }
        }
    }

    fn handle_message(&mut self, message: ControlMessage) -> Step {
        match message {
            ControlMessage::Suspend => self.suspend(),
            ControlMessage::Resume => self.resume(),
            ControlMessage::Teardown => {
                debug!("IO thread shutdown requested, stopping cleanly");
                return self.shutdown();
            }
            ControlMessage::GetLatency(direction, reply) => {
                let _ = reply.send(self.latency(direction));
            }
        }
        Step::Continue
    }

    fn latency(&mut self, direction: Direction) -> Usec {
        if self.state != LoopState::Streaming {
            return 0;
        }
        let now = self.clock.now();
        match direction {
            Direction::Output => {
                self.stream
                    .playback_latency(&self.config, now, self.pacer.started_at())
            }
            Direction::Input => self.stream.capture_latency(&self.config, now),
        }
    }

    fn shutdown(&mut self) -> Step {
        self.stream.release(self.clock.as_ref());
        self.state = LoopState::Draining;
        Step::Shutdown
    }

    /// After a failure only teardown ends the loop.
    fn wait_for_teardown(&mut self) -> Step {
        match self.control.recv() {
            None => {
                self.state = LoopState::Draining;
                Step::Shutdown
            }
            Some(ControlMessage::Teardown) => {
                debug!("IO thread shutdown requested after failure");
                self.state = LoopState::Draining;
                Step::Shutdown
            }
            Some(ControlMessage::GetLatency(_, reply)) => {
                let _ = reply.send(0);
                Step::Continue
            }
            Some(message) => {
                debug!("Ignoring {:?} on failed IO thread", message);
                Step::Continue
            }
        }
    }

    fn reset_scheduling(&mut self) {
        self.do_write = 0;
        self.pending_read_bytes = 0;
        self.writable = false;
        self.revents = 0;
        self.pacer.reset();
    }

    fn start_streaming(&mut self) {
        let capture = self.source_linked();
        if let Err(e) = self.stream.setup(&self.config, self.clock.as_ref(), capture) {
            self.fail(e);
            return;
        }

        if let Some(sink) = self.playback.as_deref_mut() {
            self.stream.update_playback_latency(&self.config, sink);
        }
        if let Some(sink) = self.capture.as_deref_mut() {
            self.stream.update_capture_latency(&self.config, sink);
        }

        self.reset_scheduling();
        self.state = LoopState::Streaming;
    }

    fn suspend(&mut self) {
        if self.state != LoopState::Streaming {
            return;
        }

        self.stream.release(self.clock.as_ref());
        self.reset_scheduling();
        if let Some(sink) = self.playback.as_deref_mut() {
            sink.suspend();
        }
        if let Some(sink) = self.capture.as_deref_mut() {
            sink.suspend();
        }
        self.state = LoopState::Idle;
        info!("Stream for {} suspended", self.stream.profile());
    }

    fn resume(&mut self) {
        if self.state != LoopState::Idle {
            return;
        }

        if let Err(e) = self.stream.acquire(false) {
            warn!("Cannot resume {}, staying idle: {}", self.stream.profile(), e);
            return;
        }
        if let Some(sink) = self.playback.as_deref_mut() {
            sink.resume();
        }
        if let Some(sink) = self.capture.as_deref_mut() {
            sink.resume();
        }
        self.start_streaming();
    }

    fn hang_up(&mut self) {
        self.stream.release(self.clock.as_ref());
        self.reset_scheduling();
        self.state = LoopState::Failed;
        self.notify(Notification::StreamHangUp);
    }

    fn fail(&mut self, e: Error) {
        error!("IO thread failed: {}", e);
        self.stream.release(self.clock.as_ref());
        self.reset_scheduling();
        self.state = LoopState::Failed;
        self.notify(Notification::IoThreadFailed);
    }

    /// At most one failure report per session.
    fn notify(&mut self, notification: Notification) {
        if self.notified {
            return;
        }
        self.notified = true;
        if self.notifications.send(notification).is_err() {
            debug!("Nobody listening for {:?}", notification);
        }
    }
}

fn poll_timeout(timer: Option<Usec>) -> libc::c_int {
    match timer {
        // Round up so a due write is never missed by a millisecond
        Some(usec) => usec
            .div_ceil(USEC_PER_MSEC)
            .min(libc::c_int::MAX as u64) as libc::c_int,
        None => -1,
    }
}

fn describe_revents(revents: libc::c_short) -> String {
    let mut flags = Vec::new();
    for (flag, name) in [
        (libc::POLLERR, "POLLERR"),
        (libc::POLLHUP, "POLLHUP"),
        (libc::POLLPRI, "POLLPRI"),
        (libc::POLLNVAL, "POLLNVAL"),
    ] {
        if revents & flag != 0 {
            flags.push(name);
        }
    }
    flags.join(" ")
}

/// Handle on an I/O loop running on its own thread.
pub struct IoThread {
    control: ControlSender,
    stats: Arc<StreamStats>,
    handle: Option<JoinHandle<Option<TransportSession>>>,
}

impl IoThread {
    /// Start `event_loop` on a thread named after the configuration.
    pub fn spawn(event_loop: IoEventLoop, control: ControlSender) -> Result<Self> {
        Self::try_spawn(event_loop, control).map_err(|(e, _)| e)
    }

    /// Like [`IoThread::spawn`], but hands the loop back if no thread starts.
    pub fn try_spawn(
        event_loop: IoEventLoop,
        control: ControlSender,
    ) -> std::result::Result<Self, (Error, IoEventLoop)> {
        let stats = event_loop.stats();
        let name = event_loop.config.thread_name.clone();

        // The loop only moves once the thread exists
        let (handoff_tx, handoff_rx) = crossbeam_channel::bounded::<IoEventLoop>(1);
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || handoff_rx.recv().ok().map(IoEventLoop::run));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => return Err((Error::Io(e), event_loop)),
        };
        if let Err(returned) = handoff_tx.send(event_loop) {
            let e = io::Error::new(io::ErrorKind::BrokenPipe, "I/O thread exited before start");
            return Err((Error::Io(e), returned.into_inner()));
        }

        Ok(Self {
            control,
            stats,
            handle: Some(handle),
        })
    }

    pub fn control(&self) -> &ControlSender {
        &self.control
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    /// Request teardown and wait for the thread. Returns the session unless
    /// the thread panicked.
    pub fn shutdown(mut self) -> Option<TransportSession> {
        self.join()
    }

    fn join(&mut self) -> Option<TransportSession> {
        let handle = self.handle.take()?;
        self.control.teardown();
        match handle.join() {
            Ok(session) => session,
            Err(_) => {
                error!("IO thread panicked");
                None
            }
        }
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MockCaptureSink, MockPlaybackSink, SilenceSource};
    use crate::stream::SocketFactory;
    use btaudio_core::{Profile, TransportError, TransportState};
    use btaudio_sbc::{CodecRole, SbcCapabilities, SbcCodecState};
    use btaudio_timing::ManualClock;
    use btaudio_transport::{
        seqpacket_pair, AcquiredTransport, Received, SeqPacketSocket, StreamSocket, Transport,
    };
    use crossbeam_channel::{unbounded, Receiver};
    use mockall::predicate::eq;
    use std::os::fd::{AsRawFd, OwnedFd, RawFd};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const START: Usec = 1_000_000;

    struct LinkTransport {
        profile: Profile,
        fds: Vec<OwnedFd>,
        mtu: usize,
        releases: Arc<AtomicUsize>,
    }

    impl Transport for LinkTransport {
        fn profile(&self) -> Profile {
            self.profile
        }

        fn state(&self) -> TransportState {
            TransportState::Playing
        }

        fn acquire(&mut self, _optional: bool) -> std::result::Result<AcquiredTransport, TransportError> {
            let fd = self.fds.pop().ok_or(TransportError::Busy)?;
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
            vec![0x21, 0x15, 2, 53]
        }
    }

    /// Accepts only half of every packet.
    struct ShortWriteSocket(RawFd);

    impl StreamSocket for ShortWriteSocket {
        fn as_raw_fd(&self) -> RawFd {
            self.0
        }

        fn configure(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn send(&mut self, packet: &[u8]) -> io::Result<usize> {
            Ok(packet.len() / 2)
        }

        fn recv(&mut self, _buf: &mut [u8]) -> io::Result<Received> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    /// Real socket with receive timestamps stripped.
    struct UntimedSocket(SeqPacketSocket);

    impl StreamSocket for UntimedSocket {
        fn as_raw_fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }

        fn configure(&mut self) -> io::Result<()> {
            self.0.configure()
        }

        fn send(&mut self, packet: &[u8]) -> io::Result<usize> {
            self.0.send(packet)
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<Received> {
            let mut received = self.0.recv(buf)?;
            received.wall_timestamp = None;
            Ok(received)
        }
    }

    struct Harness {
        event_loop: IoEventLoop,
        control: ControlSender,
        notifications: Receiver<Notification>,
        clock: ManualClock,
        releases: Arc<AtomicUsize>,
        peers: Vec<OwnedFd>,
    }

    fn harness(profile: Profile, links: usize, factory: Option<SocketFactory>) -> Harness {
        let mut fds = Vec::new();
        let mut peers = Vec::new();
        for _ in 0..links {
            let (local, remote) = seqpacket_pair().unwrap();
            fds.push(local);
            peers.push(remote);
        }
        let mtu = if profile.is_a2dp() { 672 } else { 48 };
        let releases = Arc::new(AtomicUsize::new(0));
        let transport = LinkTransport {
            profile,
            fds,
            mtu,
            releases: releases.clone(),
        };

        let mut session = TransportSession::new(Box::new(transport));
        session.acquire(false).unwrap();

        let codec = profile.is_a2dp().then(|| {
            let caps = SbcCapabilities::from_a2dp_bytes(&[0x21, 0x15, 2, 53]).unwrap();
            let role = if profile == Profile::A2dpSink {
                CodecRole::Encode
            } else {
                CodecRole::Decode
            };
            SbcCodecState::configure(&caps, role).unwrap()
        });

        let config = StreamConfig::default();
        let mut stream = Stream::new(session, codec, config.sco_sample_spec).unwrap();
        if let Some(factory) = factory {
            stream = stream.with_socket_factory(factory);
        }

        let clock = ManualClock::new(START);
        let (tx, notifications) = unbounded();
        let (event_loop, control) =
            IoEventLoop::new(stream, config, Arc::new(clock.clone()), tx).unwrap();

        Harness {
            event_loop,
            control,
            notifications,
            clock,
            releases,
            peers,
        }
    }

    mod playback {
        use super::*;

        #[test]
        fn geometry_reported_on_setup() {
            let mut h = harness(Profile::A2dpSink, 1, None);
            let mut sink = MockPlaybackSink::new();
            // 2560 bytes at 44.1 kHz stereo is 14512 us
            sink.expect_update_latency()
                .with(eq(2560), eq(25 * USEC_PER_MSEC + 14_512))
                .times(1)
                .return_const(());
            h.event_loop = h.event_loop.with_playback(Box::new(sink));

            h.event_loop.begin();
            assert_eq!(h.event_loop.state(), LoopState::Streaming);
            assert_eq!(h.event_loop.stream().geometry().write_block_size, 2560);
        }

        #[test]
        fn partial_write_fails_once() {
            let factory: SocketFactory = Box::new(|fd| Box::new(ShortWriteSocket(fd)));
            let mut h = harness(Profile::A2dpSink, 1, Some(factory));
            let mut sink = MockPlaybackSink::new();
            sink.expect_update_latency().return_const(());
            sink.expect_render_full().times(1).returning(|buf| buf.fill(0));
            h.event_loop = h.event_loop.with_playback(Box::new(sink));

            h.event_loop.begin();
            // First pass waits for POLLOUT, second writes
            assert_eq!(h.event_loop.iterate(), Step::Continue);
            assert_eq!(h.event_loop.iterate(), Step::Continue);

            assert_eq!(h.event_loop.state(), LoopState::Failed);
            assert_eq!(h.notifications.try_recv(), Ok(Notification::IoThreadFailed));
            assert!(h.notifications.try_recv().is_err());
            assert_eq!(h.releases.load(Ordering::SeqCst), 1);

            // Still answers the control plane until teardown
            h.control.resume();
            assert_eq!(h.event_loop.iterate(), Step::Continue);
            assert_eq!(h.event_loop.state(), LoopState::Failed);
            h.control.teardown();
            assert_eq!(h.event_loop.iterate(), Step::Shutdown);
            assert_eq!(h.event_loop.state(), LoopState::Draining);
            assert!(h.notifications.try_recv().is_err());
        }

        #[test]
        fn stall_skips_excess_and_reduces_bitpool_once() {
            let mut h = harness(Profile::A2dpSink, 1, None);
            h.event_loop = h.event_loop.with_playback(Box::new(SilenceSource));
            h.event_loop.begin();
            let stats = h.event_loop.stats();

            h.event_loop.iterate();
            h.event_loop.iterate();
            assert_eq!(stats.snapshot().packets_written, 1);
            assert_eq!(h.event_loop.stream().write_index(), 2560);

            // 2560 bytes took 14512 us; stall 300 ms beyond that
            h.clock.set(START + 14_512 + 300 * USEC_PER_MSEC);
            h.event_loop.iterate();

            let snapshot = stats.snapshot();
            assert_eq!(snapshot.bytes_skipped, 35_280);
            assert_eq!(snapshot.bitpool_reductions, 1);
            assert_eq!(snapshot.packets_written, 2);
            assert_eq!(h.event_loop.stream().codec().unwrap().bitpool(), 48);

            for _ in 0..8 {
                h.event_loop.iterate();
            }
            assert_eq!(stats.snapshot().bitpool_reductions, 1);
            assert_eq!(stats.snapshot().bytes_skipped, 35_280);
        }

        #[test]
        fn playback_latency_counts_unplayed_audio() {
            let mut h = harness(Profile::A2dpSink, 1, None);
            h.event_loop = h.event_loop.with_playback(Box::new(SilenceSource));
            h.event_loop.begin();

            let (tx, rx) = crossbeam_channel::bounded(1);
            h.control
                .send(ControlMessage::GetLatency(Direction::Output, tx))
                .unwrap();
            h.event_loop.iterate();
            // Nothing written yet, only the fixed part
            assert_eq!(rx.try_recv(), Ok(25 * USEC_PER_MSEC));

            h.event_loop.iterate();
            assert_eq!(h.event_loop.stream().write_index(), 2560);

            // 14512 us queued, 5 ms of it played
            h.clock.set(START + 5 * USEC_PER_MSEC);
            let (tx, rx) = crossbeam_channel::bounded(1);
            h.control
                .send(ControlMessage::GetLatency(Direction::Output, tx))
                .unwrap();
            h.event_loop.iterate();
            assert_eq!(h.event_loop.stream().write_index(), 2560);
            assert_eq!(rx.try_recv(), Ok(25 * USEC_PER_MSEC + 14_512 - 5_000));

            // Played past everything written
            h.clock.set(START + 14_512 + 50 * USEC_PER_MSEC);
            let (tx, rx) = crossbeam_channel::bounded(1);
            h.control
                .send(ControlMessage::GetLatency(Direction::Output, tx))
                .unwrap();
            h.event_loop.iterate();
            assert!(rx.try_recv().unwrap() <= 25 * USEC_PER_MSEC);
        }

        #[test]
        fn hang_up_tears_down_and_reports_once() {
            let mut h = harness(Profile::A2dpSink, 1, None);
            h.event_loop = h.event_loop.with_playback(Box::new(SilenceSource));
            h.event_loop.begin();
            h.peers.clear();

            h.event_loop.iterate();
            assert_eq!(h.event_loop.state(), LoopState::Failed);
            assert_eq!(h.notifications.try_recv(), Ok(Notification::StreamHangUp));
            assert!(h.notifications.try_recv().is_err());
            assert!(!h.event_loop.stream().session().is_acquired());

            h.control.teardown();
            assert_eq!(h.event_loop.iterate(), Step::Shutdown);
        }
    }

    mod control {
        use super::*;

        #[test]
        fn teardown_releases_and_exits() {
            let mut h = harness(Profile::A2dpSink, 1, None);
            h.event_loop = h.event_loop.with_playback(Box::new(SilenceSource));
            h.event_loop.begin();

            h.control.teardown();
            assert_eq!(h.event_loop.iterate(), Step::Shutdown);
            assert_eq!(h.event_loop.state(), LoopState::Draining);
            assert_eq!(h.releases.load(Ordering::SeqCst), 1);
            assert!(h.notifications.try_recv().is_err());
        }

        #[test]
        fn suspend_then_resume_reacquires() {
            let mut h = harness(Profile::HeadsetHeadUnit, 2, None);
            h.event_loop = h.event_loop.with_playback(Box::new(SilenceSource));
            h.event_loop.begin();
            assert_eq!(h.event_loop.state(), LoopState::Streaming);

            h.control.suspend();
            h.event_loop.iterate();
            assert_eq!(h.event_loop.state(), LoopState::Idle);
            assert!(!h.event_loop.stream().is_ready());
            assert_eq!(h.releases.load(Ordering::SeqCst), 1);

            h.control.resume();
            h.event_loop.iterate();
            assert_eq!(h.event_loop.state(), LoopState::Streaming);
            assert!(h.event_loop.stream().is_ready());
            assert_eq!(h.event_loop.stream().geometry().write_block_size, 48);
        }

        #[test]
        fn failed_resume_stays_idle() {
            let mut h = harness(Profile::HeadsetHeadUnit, 1, None);
            h.event_loop = h.event_loop.with_playback(Box::new(SilenceSource));
            h.event_loop.begin();

            h.control.suspend();
            h.event_loop.iterate();
            h.control.resume();
            h.event_loop.iterate();

            assert_eq!(h.event_loop.state(), LoopState::Idle);
            assert!(h.notifications.try_recv().is_err());
        }

        #[test]
        fn dropped_control_plane_stops_loop() {
            let mut h = harness(Profile::A2dpSink, 1, None);
            h.event_loop.begin();
            drop(h.control);
            assert_eq!(h.event_loop.iterate(), Step::Shutdown);
        }
    }

    mod capture {
        use super::*;

        fn untimed() -> SocketFactory {
            Box::new(|fd| Box::new(UntimedSocket(SeqPacketSocket::new(fd))))
        }

        #[test]
        fn sco_packet_posted_and_latency_reported() {
            let mut h = harness(Profile::HeadsetAudioGateway, 1, Some(untimed()));
            let mut sink = MockCaptureSink::new();
            sink.expect_set_fixed_latency()
                .with(eq(25 * USEC_PER_MSEC + 3_000))
                .times(1)
                .return_const(());
            sink.expect_post()
                .withf(|pcm, timestamp| pcm.len() == 48 && *timestamp == START)
                .times(1)
                .return_const(());
            h.event_loop = h.event_loop.with_capture(Box::new(sink));
            h.event_loop.begin();

            let mut peer = SeqPacketSocket::new(h.peers[0].as_raw_fd());
            peer.send(&[0x10; 48]).unwrap();

            // Poll sees POLLIN, next pass reads and answers the query
            h.event_loop.iterate();
            let (tx, rx) = crossbeam_channel::bounded(1);
            h.control
                .send(ControlMessage::GetLatency(Direction::Input, tx))
                .unwrap();
            h.event_loop.iterate();

            assert_eq!(h.event_loop.stream().read_index(), 48);
            assert_eq!(rx.try_recv(), Ok(25 * USEC_PER_MSEC));
        }

        #[test]
        fn misaligned_sco_packet_dropped() {
            let mut h = harness(Profile::HeadsetAudioGateway, 1, Some(untimed()));
            let mut sink = MockCaptureSink::new();
            sink.expect_set_fixed_latency().return_const(());
            sink.expect_post().times(0);
            h.event_loop = h.event_loop.with_capture(Box::new(sink));
            h.event_loop.begin();
            let stats = h.event_loop.stats();

            let mut peer = SeqPacketSocket::new(h.peers[0].as_raw_fd());
            peer.send(&[0x10; 47]).unwrap();

            h.event_loop.iterate();
            // Resume while streaming is a no-op that wakes the loop
            h.control.resume();
            h.event_loop.iterate();
            assert_eq!(h.event_loop.state(), LoopState::Streaming);
            assert_eq!(stats.snapshot().dropped_packets, 1);
            assert_eq!(h.event_loop.stream().read_index(), 0);
        }

        #[test]
        fn corrupted_a2dp_packet_dropped() {
            let mut h = harness(Profile::A2dpSource, 1, Some(untimed()));
            let mut sink = MockCaptureSink::new();
            sink.expect_set_fixed_latency().return_const(());
            sink.expect_post().times(0);
            h.event_loop = h.event_loop.with_capture(Box::new(sink));
            h.event_loop.begin();
            let stats = h.event_loop.stats();

            let caps = SbcCapabilities::from_a2dp_bytes(&[0x21, 0x15, 2, 53]).unwrap();
            let mut encoder = SbcCodecState::configure(&caps, CodecRole::Encode).unwrap();
            let mut packet = vec![0u8; 672];
            let len = crate::path::encode_packet(
                &mut encoder,
                &mut crate::rtp::RtpFramer::new(),
                &[0u8; 1024],
                0,
                &mut packet,
            )
            .unwrap();
            packet[crate::rtp::PACKET_OVERHEAD + 2] = 0;

            let mut peer = SeqPacketSocket::new(h.peers[0].as_raw_fd());
            peer.send(&packet[..len]).unwrap();

            h.event_loop.iterate();
            h.control.resume();
            h.event_loop.iterate();
            assert_eq!(h.event_loop.state(), LoopState::Streaming);
            assert_eq!(stats.snapshot().dropped_packets, 1);
            assert_eq!(h.event_loop.stream().read_index(), 0);
            assert!(h.notifications.try_recv().is_err());
        }

        #[test]
        fn latency_without_capture_is_zero() {
            let mut h = harness(Profile::A2dpSink, 1, None);
            h.event_loop.begin();
            let (tx, rx) = crossbeam_channel::bounded(1);
            h.control
                .send(ControlMessage::GetLatency(Direction::Input, tx))
                .unwrap();
            h.event_loop.iterate();
            assert_eq!(rx.try_recv(), Ok(0));
        }
    }

    mod setup {
        use super::*;

        #[test]
        fn stream_without_codec_hands_session_back() {
            let (local, _remote) = seqpacket_pair().unwrap();
            let transport = LinkTransport {
                profile: Profile::A2dpSink,
                fds: vec![local],
                mtu: 672,
                releases: Arc::new(AtomicUsize::new(0)),
            };
            let mut session = TransportSession::new(Box::new(transport));
            session.acquire(false).unwrap();

            let spec = StreamConfig::default().sco_sample_spec;
            let (e, session) = Stream::try_new(session, None, spec).unwrap_err();
            assert_eq!(e.class(), btaudio_core::ErrorClass::ConfigurationFatal);
            assert_eq!(session.profile(), Profile::A2dpSink);
            assert!(session.is_acquired());
        }

        #[test]
        fn unstarted_loop_gives_session_back() {
            let h = harness(Profile::HeadsetAudioGateway, 1, None);
            let session = h.event_loop.into_session();
            assert_eq!(session.profile(), Profile::HeadsetAudioGateway);
            assert!(session.is_acquired());
            assert_eq!(h.releases.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn spawned_loop_returns_session_on_shutdown() {
            let h = harness(Profile::HeadsetAudioGateway, 1, None);
            let io = match IoThread::try_spawn(h.event_loop, h.control) {
                Ok(io) => io,
                Err((e, _)) => panic!("spawn failed: {}", e),
            };
            let session = io.shutdown().unwrap();
            assert_eq!(session.profile(), Profile::HeadsetAudioGateway);
        }
    }

    #[test]
    fn poll_timeout_rounds_up() {
        assert_eq!(poll_timeout(None), -1);
        assert_eq!(poll_timeout(Some(0)), 0);
        assert_eq!(poll_timeout(Some(1)), 1);
        assert_eq!(poll_timeout(Some(500 * USEC_PER_MSEC)), 500);
    }
}
