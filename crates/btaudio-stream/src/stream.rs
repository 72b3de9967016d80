//! Per-session stream state driven by the I/O loop.

use std::os::fd::RawFd;

use btaudio_core::{
    Error, ErrorClass, Profile, Result, SampleSpec, StreamConfig, TransportError, Usec,
};
use btaudio_sbc::{CodecRole, SbcCodecState};
use btaudio_timing::{ClockSmoother, TimeSource};
use btaudio_transport::{SeqPacketSocket, StreamGeometry, StreamSocket, TransportSession};
use tracing::{debug, info, warn};

use crate::buffer::CodecBuffer;
use crate::path::{self, SendOutcome};
use crate::rtp::RtpFramer;
use crate::sink::{CaptureSink, PlaybackSink};
use crate::stats::StreamStats;

/// Builds the socket wrapper for an acquired descriptor.
pub type SocketFactory = Box<dyn FnMut(RawFd) -> Box<dyn StreamSocket> + Send>;

/// Factory wrapping descriptors in [`SeqPacketSocket`].
pub fn seqpacket_factory() -> SocketFactory {
    Box::new(|fd| Box::new(SeqPacketSocket::new(fd)))
}

/// State of one streaming session: transport, codec, indices and buffers.
pub struct Stream {
    session: TransportSession,
    codec: Option<SbcCodecState>,
    sample_spec: SampleSpec,
    geometry: StreamGeometry,
    socket: Option<Box<dyn StreamSocket>>,
    socket_factory: SocketFactory,
    buffer: CodecBuffer,
    framer: RtpFramer,
    smoother: Option<ClockSmoother>,
    write_block: Option<Vec<u8>>,
    skip_scratch: Vec<u8>,
    read_index: u64,
    write_index: u64,
    logged_encoder: bool,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("session", &self.session)
            .field("sample_spec", &self.sample_spec)
            .field("geometry", &self.geometry)
            .field("ready", &self.socket.is_some())
            .field("read_index", &self.read_index)
            .field("write_index", &self.write_index)
            .finish()
    }
}

impl Stream {
    /// Create a stream over a session. A2DP needs a codec; SCO runs on
    /// `sco_spec`.
    pub fn new(
        session: TransportSession,
        codec: Option<SbcCodecState>,
        sco_spec: SampleSpec,
    ) -> Result<Self> {
        Self::try_new(session, codec, sco_spec).map_err(|(e, _)| e)
    }

    /// Like [`Stream::new`], but hands the session back on failure.
    pub fn try_new(
        session: TransportSession,
        codec: Option<SbcCodecState>,
        sco_spec: SampleSpec,
    ) -> std::result::Result<Self, (Error, TransportSession)> {
        let profile = session.profile();
        let sample_spec = match (&codec, profile.is_a2dp()) {
            (Some(codec), true) => codec.config().sample_spec(),
            (None, true) => {
                let e = Error::Config(format!("{} needs an SBC configuration", profile));
                return Err((e, session));
            }
            (_, false) => sco_spec,
        };

        Ok(Self {
            buffer: CodecBuffer::for_profile(profile),
            session,
            codec: if profile.is_a2dp() { codec } else { None },
            sample_spec,
            geometry: StreamGeometry {
                read_block_size: 0,
                write_block_size: 0,
            },
            socket: None,
            socket_factory: seqpacket_factory(),
            framer: RtpFramer::new(),
            smoother: None,
            write_block: None,
            skip_scratch: Vec::new(),
            read_index: 0,
            write_index: 0,
            logged_encoder: false,
        })
    }

    /// Replace the socket wrapper used for acquired descriptors.
    pub fn with_socket_factory(mut self, factory: SocketFactory) -> Self {
        self.socket_factory = factory;
        self
    }

    pub fn profile(&self) -> Profile {
        self.session.profile()
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut TransportSession {
        &mut self.session
    }

    /// Give up the stream and hand the session back.
    pub fn into_session(self) -> TransportSession {
        self.session
    }

    pub fn codec(&self) -> Option<&SbcCodecState> {
        self.codec.as_ref()
    }

    pub fn sample_spec(&self) -> &SampleSpec {
        &self.sample_spec
    }

    pub fn geometry(&self) -> StreamGeometry {
        self.geometry
    }

    /// Whether a socket is set up for I/O.
    pub fn is_ready(&self) -> bool {
        self.socket.is_some()
    }

    pub fn socket_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }

    pub fn read_index(&self) -> u64 {
        self.read_index
    }

    pub fn write_index(&self) -> u64 {
        self.write_index
    }

    /// Prepare an acquired transport for streaming.
    ///
    /// Resets the bitpool to max for A2DP playback, sizes the blocks and
    /// buffers, configures the socket and, with `capture`, starts a fresh
    /// paused smoother.
    pub fn setup(
        &mut self,
        config: &StreamConfig,
        clock: &dyn TimeSource,
        capture: bool,
    ) -> Result<()> {
        let profile = self.session.profile();
        let fd = self.session.stream_fd().ok_or(TransportError::NotAcquired)?;
        info!("Transport for {} resuming", profile);

        if let Some(codec) = self.codec.as_mut() {
            if codec.role() == CodecRole::Encode {
                codec.set_bitpool(codec.config().max_bitpool);
            }
        }
        self.geometry = self
            .session
            .compute_block_sizes(self.codec.as_ref().map(|c| c.config()))?;

        let mut socket = (self.socket_factory)(fd);
        socket.configure()?;
        self.socket = Some(socket);

        let read_mtu = self.session.read_mtu().unwrap_or(0);
        let write_mtu = self.session.write_mtu().unwrap_or(0);
        self.buffer
            .prepare(read_mtu, write_mtu, self.geometry.read_block_size);

        self.read_index = 0;
        self.write_index = 0;
        self.write_block = None;

        self.smoother = capture.then(|| {
            ClockSmoother::new(
                config.smoother_adjust_time,
                config.smoother_history_time,
                config.smoother_min_history,
                clock.now(),
                true,
            )
        });

        debug!("Stream properly set up, we're ready to roll!");
        Ok(())
    }

    /// Close the socket and drop pending data. The transport stays acquired.
    pub fn teardown(&mut self, clock: &dyn TimeSource) {
        self.socket = None;
        self.session.close_stream();
        if let Some(smoother) = self.smoother.as_mut() {
            smoother.pause(clock.now());
        }
        self.write_block = None;
        debug!("Audio stream torn down");
    }

    /// Release the transport and tear the stream down.
    pub fn release(&mut self, clock: &dyn TimeSource) {
        if !self.session.is_acquired() {
            return;
        }
        debug!("Releasing transport for {}", self.session.profile());
        self.teardown(clock);
        self.session.release();
    }

    /// Acquire the transport if not held yet.
    pub fn acquire(&mut self, optional: bool) -> std::result::Result<(), TransportError> {
        let result = self.session.acquire(optional);
        if let Err(e) = &result {
            if optional {
                info!("Failed optional acquire of transport for {}: {}", self.profile(), e);
            } else {
                warn!("Failed to acquire transport for {}: {}", self.profile(), e);
            }
        }
        result
    }

    /// Tell the playback side its request size and link latency.
    pub fn update_playback_latency(&self, config: &StreamConfig, sink: &mut dyn PlaybackSink) {
        let block = self.geometry.write_block_size;
        sink.update_latency(
            block,
            config.fixed_latency_playback(self.session.profile())
                + self.sample_spec.bytes_to_usec(block as u64),
        );
    }

    /// Tell the capture side its link latency.
    pub fn update_capture_latency(&self, config: &StreamConfig, sink: &mut dyn CaptureSink) {
        let block = self.geometry.read_block_size as u64;
        sink.set_fixed_latency(
            config.fixed_latency_record(self.session.profile())
                + self.sample_spec.bytes_to_usec(block),
        );
    }

    /// Render, encode and write one block.
    ///
    /// Returns 1 if the block went out and 0 on EAGAIN, in which case the
    /// rendered block is kept for the next attempt.
    pub fn process_render(
        &mut self,
        sink: &mut dyn PlaybackSink,
        stats: &StreamStats,
    ) -> Result<usize> {
        let block_size = self.geometry.write_block_size;
        let block = self.write_block.get_or_insert_with(|| {
            let mut block = vec![0u8; block_size];
            sink.render_full(&mut block);
            block
        });
        let socket = self
            .socket
            .as_deref_mut()
            .ok_or(TransportError::NotAcquired)?;

        let outcome = match (&mut self.buffer, self.codec.as_mut()) {
            (CodecBuffer::A2dp { packet, .. }, Some(codec)) => {
                let limit = packet
                    .len()
                    .min(self.session.write_mtu().unwrap_or(packet.len()));
                let timestamp = (self.write_index / self.sample_spec.frame_size() as u64) as u32;
                let len = path::encode_packet(
                    codec,
                    &mut self.framer,
                    block,
                    timestamp,
                    &mut packet[..limit],
                )?;
                if !self.logged_encoder {
                    debug!(
                        "Using SBC encoder implementation: pure Rust, {} byte frames",
                        codec.frame_length()
                    );
                    self.logged_encoder = true;
                }
                path::send_packet(socket, &packet[..len])?
            }
            _ => path::send_packet(socket, block)?,
        };

        match outcome {
            SendOutcome::Sent => {
                let written = block.len();
                self.write_index += written as u64;
                self.write_block = None;
                stats.record_write(written);
                Ok(1)
            }
            SendOutcome::WouldBlock => Ok(0),
        }
    }

    /// Read, decode and deliver one packet.
    ///
    /// Returns the packet length, or 0 when nothing was read or the packet
    /// was dropped.
    pub fn process_push(
        &mut self,
        sink: &mut dyn CaptureSink,
        clock: &dyn TimeSource,
        stats: &StreamStats,
    ) -> Result<usize> {
        match self.push_packet(sink, clock, stats) {
            Err(e) if e.class() == ErrorClass::LocalRecoverable => {
                warn!("Dropping received packet: {}", e);
                stats.record_dropped_packet();
                Ok(0)
            }
            other => other,
        }
    }

    fn push_packet(
        &mut self,
        sink: &mut dyn CaptureSink,
        clock: &dyn TimeSource,
        stats: &StreamStats,
    ) -> Result<usize> {
        let socket = self
            .socket
            .as_deref_mut()
            .ok_or(TransportError::NotAcquired)?;

        let (received, pcm_len) = match (&mut self.buffer, self.codec.as_mut()) {
            (CodecBuffer::A2dp { packet, pcm }, Some(codec)) => {
                let Some(received) = path::recv_packet(socket, packet)? else {
                    return Ok(0);
                };
                let decoded = path::decode_packet(codec, &packet[..received.len], pcm)?;
                (received, decoded)
            }
            (CodecBuffer::Sco { pcm }, _) => {
                let Some(received) = path::recv_packet(socket, pcm)? else {
                    return Ok(0);
                };
                path::check_sco_alignment(&self.sample_spec, received.len)?;
                (received, received.len)
            }
            (CodecBuffer::A2dp { .. }, None) => {
                return Err(Error::Config("A2DP stream without codec".to_string()))
            }
        };

        let timestamp = match received.wall_timestamp {
            Some(wall) => clock.wallclock_to_monotonic(wall),
            None => clock.now(),
        };

        self.read_index += pcm_len as u64;
        if let Some(smoother) = self.smoother.as_mut() {
            smoother.resume(timestamp, true);
            smoother.put(timestamp, self.sample_spec.bytes_to_usec(self.read_index));
        }

        let pcm = match &self.buffer {
            CodecBuffer::A2dp { pcm, .. } => &pcm[..pcm_len],
            CodecBuffer::Sco { pcm } => &pcm[..pcm_len],
        };
        sink.post(pcm, timestamp);
        stats.record_read(pcm_len);
        Ok(received.len)
    }

    /// Render and discard `bytes` of playback audio.
    pub fn skip(&mut self, sink: &mut dyn PlaybackSink, bytes: u64, stats: &StreamStats) {
        self.skip_scratch.resize(bytes as usize, 0);
        sink.render_full(&mut self.skip_scratch);
        self.write_index += bytes;
        stats.record_skip(bytes);
    }

    /// Lower the A2DP bitpool as a congestion signal and resize the blocks.
    ///
    /// Returns whether anything changed.
    pub fn reduce_bitpool(&mut self, config: &StreamConfig, stats: &StreamStats) -> Result<bool> {
        let Some(codec) = self.codec.as_mut() else {
            return Ok(false);
        };
        if !codec
            .reduce_bitpool_by(config.bitpool_dec_step, config.bitpool_dec_limit)
            .is_changed()
        {
            return Ok(false);
        }

        stats.record_bitpool_reduction();
        self.geometry = self.session.compute_block_sizes(Some(codec.config()))?;
        Ok(true)
    }

    /// Playback latency: fixed part plus the audio written but not played.
    ///
    /// With a capture direction the smoother tells how far the link has
    /// played; otherwise wall time since `started_at` does. Nothing written
    /// yet leaves only the fixed part.
    pub fn playback_latency(&mut self, config: &StreamConfig, now: Usec, started_at: Usec) -> Usec {
        let profile = self.session.profile();
        if !profile.has_output() {
            return 0;
        }

        let fixed = config.fixed_latency_playback(profile);
        let (written, played) = match self.smoother.as_mut() {
            Some(smoother) => (
                self.sample_spec
                    .bytes_to_usec(self.write_index + self.geometry.write_block_size as u64),
                smoother.get(now),
            ),
            None if self.write_index == 0 => (0, 0),
            None => (
                self.sample_spec.bytes_to_usec(self.write_index),
                now.saturating_sub(started_at),
            ),
        };
        (fixed + written).saturating_sub(played)
    }

    /// Capture latency: fixed part plus the smoothed audio not yet read.
    pub fn capture_latency(&mut self, config: &StreamConfig, now: Usec) -> Usec {
        let Some(smoother) = self.smoother.as_mut() else {
            return 0;
        };
        let fixed = config.fixed_latency_record(self.session.profile());
        let read = self.sample_spec.bytes_to_usec(self.read_index);
        (fixed + smoother.get(now)).saturating_sub(read)
    }
}
