//! Playback and capture collaborators.
//!
//! The I/O loop pulls PCM from a [`PlaybackSink`] and pushes PCM into a
//! [`CaptureSink`]. Both run on the I/O thread and must not block.

use btaudio_core::Usec;

/// Producer of PCM for the playback direction.
#[cfg_attr(test, mockall::automock)]
pub trait PlaybackSink: Send {
    /// Fill `buf` completely with PCM.
    fn render_full(&mut self, buf: &mut [u8]);

    /// Stream geometry changed: at most `max_request` bytes are pulled at once
    /// and the link adds `fixed_latency`.
    fn update_latency(&mut self, max_request: usize, fixed_latency: Usec);

    fn suspend(&mut self) {}

    fn resume(&mut self) {}
}

/// Consumer of PCM for the capture direction.
#[cfg_attr(test, mockall::automock)]
pub trait CaptureSink: Send {
    /// Deliver captured PCM stamped with its monotonic receive time.
    fn post(&mut self, pcm: &[u8], timestamp: Usec);

    fn set_fixed_latency(&mut self, latency: Usec);

    fn suspend(&mut self) {}

    fn resume(&mut self) {}
}

/// Playback source producing silence.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilenceSource;

impl PlaybackSink for SilenceSource {
    fn render_full(&mut self, buf: &mut [u8]) {
        buf.fill(0);
    }

    fn update_latency(&mut self, _max_request: usize, _fixed_latency: Usec) {}
}

/// Capture sink discarding everything it is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl CaptureSink for DiscardSink {
    fn post(&mut self, _pcm: &[u8], _timestamp: Usec) {}

    fn set_fixed_latency(&mut self, _latency: Usec) {}
}
