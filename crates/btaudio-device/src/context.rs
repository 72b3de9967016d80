//! The owning context handed to a profile controller.

use std::fmt;
use std::sync::Arc;

use btaudio_core::{Profile, StreamConfig};
use btaudio_stream::{CaptureSink, DiscardSink, PlaybackSink, SilenceSource};
use btaudio_timing::{RtClock, TimeSource};

use crate::events::{NoOpObserver, ProfileObserver};

/// Creates the playback producer each time a pipeline is built.
pub type PlaybackFactory = Box<dyn FnMut(Profile) -> Box<dyn PlaybackSink> + Send>;

/// Creates the capture consumer each time a pipeline is built.
pub type CaptureFactory = Box<dyn FnMut(Profile) -> Box<dyn CaptureSink> + Send>;

/// Everything a controller needs from the surrounding system.
pub struct DeviceContext {
    pub(crate) config: StreamConfig,
    pub(crate) clock: Arc<dyn TimeSource>,
    pub(crate) observer: Arc<dyn ProfileObserver>,
    pub(crate) playback: PlaybackFactory,
    pub(crate) capture: CaptureFactory,
}

impl DeviceContext {
    /// Context with the real clock, no observer, silence for playback and a
    /// discarding capture sink.
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            clock: Arc::new(RtClock::new()),
            observer: Arc::new(NoOpObserver),
            playback: Box::new(|_| Box::new(SilenceSource)),
            capture: Box::new(|_| Box::new(DiscardSink)),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProfileObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_playback(mut self, factory: PlaybackFactory) -> Self {
        self.playback = factory;
        self
    }

    pub fn with_capture(mut self, factory: CaptureFactory) -> Self {
        self.capture = factory;
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
