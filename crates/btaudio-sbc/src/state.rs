//! Per-stream SBC state and bitpool control.

use tracing::{debug, info};

use crate::caps::SbcCapabilities;
use crate::config::CodecConfig;
use crate::decoder::SbcDecoder;
use crate::encoder::SbcEncoder;
use crate::frame::FrameHeader;
use crate::Result;

/// Which side of the codec this stream uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecRole {
    /// We encode for a remote A2DP sink. Starts at the max bitpool.
    Encode,
    /// We decode from a remote A2DP source. Starts at the min bitpool.
    Decode,
}

/// Result of a bitpool update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitpoolChange {
    Unchanged,
    /// Stream geometry must be recomputed from the new sizes.
    Changed {
        bitpool: u8,
        codesize: usize,
        frame_length: usize,
    },
}

impl BitpoolChange {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// SBC codec state owned by one streaming session.
#[derive(Debug)]
pub struct SbcCodecState {
    config: CodecConfig,
    role: CodecRole,
    encoder: SbcEncoder,
    decoder: SbcDecoder,
    codesize: usize,
    frame_length: usize,
}

impl SbcCodecState {
    /// Resolve negotiated capabilities into a codec state.
    ///
    /// Any field outside the known enumeration is rejected.
    pub fn configure(caps: &SbcCapabilities, role: CodecRole) -> Result<Self> {
        let config = CodecConfig::from_capabilities(caps)?;
        Ok(Self::with_config(config, role))
    }

    pub fn with_config(mut config: CodecConfig, role: CodecRole) -> Self {
        let initial = match role {
            CodecRole::Encode => config.max_bitpool,
            CodecRole::Decode => config.min_bitpool,
        };
        config.store_bitpool(initial);

        debug!(
            "SBC {:?}: {} Hz {:?}, {} subbands, {} blocks, {:?}, bitpool {} in [{}, {}]",
            role,
            config.sample_rate(),
            config.channel_mode,
            config.subbands.count(),
            config.block_length.count(),
            config.allocation,
            config.bitpool(),
            config.min_bitpool,
            config.max_bitpool,
        );

        Self {
            encoder: SbcEncoder::new(&config),
            decoder: SbcDecoder::new(),
            codesize: config.codesize(),
            frame_length: config.frame_length(),
            config,
            role,
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn role(&self) -> CodecRole {
        self.role
    }

    pub fn bitpool(&self) -> u8 {
        self.config.bitpool()
    }

    pub fn codesize(&self) -> usize {
        self.codesize
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Set the bitpool, clamped into the negotiated range.
    pub fn set_bitpool(&mut self, value: u8) -> BitpoolChange {
        if !self.config.store_bitpool(value) {
            return BitpoolChange::Unchanged;
        }

        self.codesize = self.config.codesize();
        self.frame_length = self.config.frame_length();
        debug!(
            "Bitpool has changed to {} (codesize {}, frame length {})",
            self.config.bitpool(),
            self.codesize,
            self.frame_length
        );
        BitpoolChange::Changed {
            bitpool: self.config.bitpool(),
            codesize: self.codesize,
            frame_length: self.frame_length,
        }
    }

    /// Lower the bitpool by `step`, never below `floor`. Never raises it.
    pub fn reduce_bitpool_by(&mut self, step: u8, floor: u8) -> BitpoolChange {
        let current = self.config.bitpool();
        if current <= floor {
            return BitpoolChange::Unchanged;
        }

        let target = current.saturating_sub(step).max(floor);
        let change = self.set_bitpool(target);
        if change.is_changed() {
            info!("Reduced SBC bitpool from {} to {}", current, self.config.bitpool());
        }
        change
    }

    /// Encode exactly one frame. Returns `(consumed, written)`.
    pub fn encode_frame(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize)> {
        self.encoder.encode(&self.config, input, output)
    }

    /// Decode exactly one frame. Returns `(consumed, written)`.
    ///
    /// The remote encoder may change its bitpool at any time. A new bitpool
    /// inside the negotiated range is adopted, and the cached codesize and
    /// frame length always follow the header of the frame just decoded.
    pub fn decode_frame(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize)> {
        let (consumed, written, header) = self.decoder.decode(input, output)?;
        self.follow_header(&header);
        Ok((consumed, written))
    }

    fn follow_header(&mut self, header: &FrameHeader) {
        if header.matches_layout(&self.config)
            && header.bitpool != self.config.bitpool()
            && (self.config.min_bitpool..=self.config.max_bitpool).contains(&header.bitpool)
        {
            self.set_bitpool(header.bitpool);
        }
        self.codesize = header.codesize();
        self.frame_length = header.frame_length();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btaudio_core::CodecError;

    fn caps() -> SbcCapabilities {
        // 44.1kHz, joint stereo, 16 blocks, 8 subbands, loudness, bitpool 2..53
        SbcCapabilities::from_a2dp_bytes(&[0x21, 0x15, 2, 53]).unwrap()
    }

    mod configure {
        use super::*;

        #[test]
        fn encoder_starts_at_max() {
            let state = SbcCodecState::configure(&caps(), CodecRole::Encode).unwrap();
            assert_eq!(state.bitpool(), 53);
            assert_eq!(state.codesize(), 512);
            assert_eq!(state.frame_length(), 119);
        }

        #[test]
        fn decoder_starts_at_min() {
            let state = SbcCodecState::configure(&caps(), CodecRole::Decode).unwrap();
            assert_eq!(state.bitpool(), 2);
            assert_eq!(state.frame_length(), 4 + 8 + (8 + 16 * 2usize).div_ceil(8));
        }

        #[test]
        fn unknown_field_rejected() {
            let mut bad = caps();
            bad.block_length = 0x3;
            assert!(matches!(
                SbcCodecState::configure(&bad, CodecRole::Encode),
                Err(CodecError::UnsupportedCodecParameter { field: "block_length", .. })
            ));
        }
    }

    mod bitpool {
        use super::*;

        #[test]
        fn set_is_idempotent() {
            let mut state = SbcCodecState::configure(&caps(), CodecRole::Encode).unwrap();
            for b in 2..=53 {
                state.set_bitpool(b);
                let (codesize, frame_length) = (state.codesize(), state.frame_length());
                assert_eq!(state.set_bitpool(b), BitpoolChange::Unchanged);
                assert_eq!(state.codesize(), codesize);
                assert_eq!(state.frame_length(), frame_length);
            }
        }

        #[test]
        fn set_clamps_into_range() {
            let mut state = SbcCodecState::configure(&caps(), CodecRole::Encode).unwrap();
            let change = state.set_bitpool(1);
            assert_eq!(
                change,
                BitpoolChange::Changed {
                    bitpool: 2,
                    codesize: 512,
                    frame_length: 17,
                }
            );
            assert!(state.set_bitpool(200).is_changed());
            assert_eq!(state.bitpool(), 53);
            assert_eq!(state.set_bitpool(53), BitpoolChange::Unchanged);
        }

        #[test]
        fn reduce_converges_to_floor() {
            let mut state = SbcCodecState::configure(&caps(), CodecRole::Encode).unwrap();
            let mut seen = vec![state.bitpool()];
            for _ in 0..20 {
                state.reduce_bitpool_by(5, 32);
                seen.push(state.bitpool());
                assert!(state.bitpool() >= 32);
            }
            assert_eq!(state.bitpool(), 32);
            assert_eq!(&seen[..6], &[53, 48, 43, 38, 33, 32]);
        }

        #[test]
        fn reduce_never_raises() {
            let mut state = SbcCodecState::configure(&caps(), CodecRole::Encode).unwrap();
            state.set_bitpool(20);
            assert_eq!(state.reduce_bitpool_by(5, 32), BitpoolChange::Unchanged);
            assert_eq!(state.bitpool(), 20);
        }

        #[test]
        fn reduce_reports_new_geometry() {
            let mut state = SbcCodecState::configure(&caps(), CodecRole::Encode).unwrap();
            match state.reduce_bitpool_by(5, 32) {
                BitpoolChange::Changed { bitpool, frame_length, .. } => {
                    assert_eq!(bitpool, 48);
                    assert_eq!(frame_length, state.frame_length());
                }
                BitpoolChange::Unchanged => panic!("expected a change"),
            }
        }
    }

    mod decoding {
        use super::*;

        #[test]
        fn decoder_follows_remote_bitpool() {
            let mut encoder = SbcCodecState::configure(&caps(), CodecRole::Encode).unwrap();
            encoder.set_bitpool(40);
            let mut decoder = SbcCodecState::configure(&caps(), CodecRole::Decode).unwrap();
            assert_eq!(decoder.bitpool(), 2);

            let pcm = vec![0u8; 512];
            let mut frame = vec![0u8; encoder.frame_length()];
            let (_, written) = encoder.encode_frame(&pcm, &mut frame).unwrap();

            let mut out = vec![0u8; 512];
            let (consumed, produced) = decoder.decode_frame(&frame[..written], &mut out).unwrap();
            assert_eq!(consumed, encoder.frame_length());
            assert_eq!(produced, 512);
            assert_eq!(decoder.bitpool(), 40);
            assert_eq!(decoder.frame_length(), encoder.frame_length());
        }

        #[test]
        fn frame_length_follows_bitpool_above_negotiated_range() {
            let remote = SbcCapabilities::from_a2dp_bytes(&[0x21, 0x15, 2, 64]).unwrap();
            let mut encoder = SbcCodecState::configure(&remote, CodecRole::Encode).unwrap();
            let mut decoder = SbcCodecState::configure(&caps(), CodecRole::Decode).unwrap();

            let pcm = vec![0u8; 512];
            let mut frame = vec![0u8; encoder.frame_length()];
            let (_, written) = encoder.encode_frame(&pcm, &mut frame).unwrap();
            assert_eq!(written, 141);

            let mut out = vec![0u8; 512];
            let (consumed, _) = decoder.decode_frame(&frame, &mut out).unwrap();
            assert_eq!(consumed, 141);
            assert_eq!(decoder.frame_length(), 141);
            // Outside [2, 53], so the negotiated bitpool is kept
            assert_eq!(decoder.bitpool(), 2);
        }
    }
}
