//! PCM sample specification and time unit helpers.

/// Microseconds, the time unit used throughout the engine.
pub type Usec = u64;

pub const USEC_PER_MSEC: Usec = 1_000;
pub const USEC_PER_SEC: Usec = 1_000_000;
pub const NSEC_PER_USEC: u64 = 1_000;

/// Sample formats carried over the Bluetooth link.
///
/// Both SBC and SCO audio are 16-bit signed little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S16Le,
}

impl SampleFormat {
    /// Bytes per sample of a single channel.
    pub fn sample_size(&self) -> usize {
        match self {
            Self::S16Le => 2,
        }
    }
}

/// Complete PCM sample specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u8,
}

impl SampleSpec {
    pub fn new(format: SampleFormat, rate: u32, channels: u8) -> Self {
        Self {
            format,
            rate,
            channels,
        }
    }

    /// The fixed SCO format: S16LE mono at 8 kHz.
    pub fn sco_default() -> Self {
        Self::new(SampleFormat::S16Le, 8000, 1)
    }

    /// Bytes per frame (one sample on every channel).
    pub fn frame_size(&self) -> usize {
        self.format.sample_size() * self.channels as usize
    }

    /// Bytes per second of audio.
    pub fn bytes_per_second(&self) -> u64 {
        self.frame_size() as u64 * self.rate as u64
    }

    /// Duration of `bytes` of audio, rounded down to whole frames.
    pub fn bytes_to_usec(&self, bytes: u64) -> Usec {
        let frame_size = self.frame_size() as u64;
        if frame_size == 0 || self.rate == 0 {
            return 0;
        }
        (bytes / frame_size) * USEC_PER_SEC / self.rate as u64
    }

    /// Number of bytes covering `usec` of audio, rounded down to whole frames.
    pub fn usec_to_bytes(&self, usec: Usec) -> u64 {
        (usec * self.rate as u64 / USEC_PER_SEC) * self.frame_size() as u64
    }

    /// Whether `bytes` holds a whole number of frames.
    pub fn is_frame_aligned(&self, bytes: usize) -> bool {
        let frame_size = self.frame_size();
        frame_size != 0 && bytes % frame_size == 0
    }

    /// Whether the rate can be used at all.
    pub fn is_valid(&self) -> bool {
        self.rate > 0 && self.channels > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod sample_spec {
        use super::*;

        #[test]
        fn stereo_frame_size() {
            let spec = SampleSpec::new(SampleFormat::S16Le, 44100, 2);
            assert_eq!(spec.frame_size(), 4);
            assert_eq!(spec.bytes_per_second(), 176_400);
        }

        #[test]
        fn sco_default_is_8k_mono() {
            let spec = SampleSpec::sco_default();
            assert_eq!(spec.rate, 8000);
            assert_eq!(spec.channels, 1);
            assert_eq!(spec.frame_size(), 2);
        }

        #[test]
        fn one_second_round_trips() {
            let spec = SampleSpec::new(SampleFormat::S16Le, 48000, 2);
            assert_eq!(spec.usec_to_bytes(USEC_PER_SEC), 192_000);
            assert_eq!(spec.bytes_to_usec(192_000), USEC_PER_SEC);
        }

        #[test]
        fn partial_frames_round_down() {
            let spec = SampleSpec::new(SampleFormat::S16Le, 8000, 1);
            // 3 bytes is one whole frame
            assert_eq!(spec.bytes_to_usec(3), 125);
        }

        #[test]
        fn write_block_duration() {
            // 2560 bytes of 44.1kHz stereo
            let spec = SampleSpec::new(SampleFormat::S16Le, 44100, 2);
            assert_eq!(spec.bytes_to_usec(2560), 14_512);
        }

        #[test]
        fn alignment() {
            let spec = SampleSpec::sco_default();
            assert!(spec.is_frame_aligned(48));
            assert!(!spec.is_frame_aligned(47));
        }
    }
}
