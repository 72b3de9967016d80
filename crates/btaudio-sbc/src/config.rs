//! Resolved SBC codec configuration and frame geometry.

use btaudio_core::{CodecError, SampleFormat, SampleSpec};

use crate::caps::{
    AllocationMethod, BlockLength, ChannelMode, SamplingFrequency, SbcCapabilities, Subbands,
};
use crate::Result;

/// Smallest bitpool any SBC frame may use.
pub const MIN_BITPOOL: u8 = 2;
/// Largest bitpool the A2DP SBC configuration can express.
pub const MAX_BITPOOL: u8 = 250;
/// PCM bytes of the largest frame: 8 subbands, 16 blocks, 2 channels.
pub const MAX_CODESIZE: usize = 8 * 16 * 2 * 2;

/// A fully resolved SBC configuration.
///
/// The current bitpool is kept private so that it can only move inside
/// `[min_bitpool, max_bitpool]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    pub frequency: SamplingFrequency,
    pub channel_mode: ChannelMode,
    pub allocation: AllocationMethod,
    pub subbands: Subbands,
    pub block_length: BlockLength,
    pub min_bitpool: u8,
    pub max_bitpool: u8,
    bitpool: u8,
}

impl CodecConfig {
    /// Build a configuration with the bitpool starting at `max_bitpool`.
    pub fn new(
        frequency: SamplingFrequency,
        channel_mode: ChannelMode,
        allocation: AllocationMethod,
        subbands: Subbands,
        block_length: BlockLength,
        min_bitpool: u8,
        max_bitpool: u8,
    ) -> Result<Self> {
        let limit = bitpool_limit(channel_mode, subbands);
        if min_bitpool < MIN_BITPOOL || min_bitpool > max_bitpool || max_bitpool > limit {
            return Err(CodecError::BitpoolOutOfRange {
                min: min_bitpool,
                max: max_bitpool,
            });
        }

        Ok(Self {
            frequency,
            channel_mode,
            allocation,
            subbands,
            block_length,
            min_bitpool,
            max_bitpool,
            bitpool: max_bitpool,
        })
    }

    /// Map negotiated A2DP codes to a configuration.
    pub fn from_capabilities(caps: &SbcCapabilities) -> Result<Self> {
        Self::new(
            SamplingFrequency::from_a2dp_bit(caps.frequency)?,
            ChannelMode::from_a2dp_bit(caps.channel_mode)?,
            AllocationMethod::from_a2dp_bit(caps.allocation_method)?,
            Subbands::from_a2dp_bit(caps.subbands)?,
            BlockLength::from_a2dp_bit(caps.block_length)?,
            caps.min_bitpool,
            caps.max_bitpool,
        )
    }

    pub fn bitpool(&self) -> u8 {
        self.bitpool
    }

    /// Clamp `value` into range and store it. Returns true if it changed.
    pub(crate) fn store_bitpool(&mut self, value: u8) -> bool {
        let value = value.clamp(self.min_bitpool, self.max_bitpool);
        if value == self.bitpool {
            return false;
        }
        self.bitpool = value;
        true
    }

    pub fn channels(&self) -> u8 {
        self.channel_mode.channels()
    }

    pub fn sample_rate(&self) -> u32 {
        self.frequency.as_hz()
    }

    /// PCM layout this configuration encodes from and decodes to.
    pub fn sample_spec(&self) -> SampleSpec {
        SampleSpec::new(SampleFormat::S16Le, self.sample_rate(), self.channels())
    }

    /// PCM bytes consumed or produced by one frame.
    pub fn codesize(&self) -> usize {
        self.subbands.count() * self.block_length.count() * self.channels() as usize * 2
    }

    /// Encoded bytes of one frame at the current bitpool.
    pub fn frame_length(&self) -> usize {
        self.frame_length_for(self.bitpool)
    }

    /// Encoded bytes of one frame at `bitpool`.
    pub fn frame_length_for(&self, bitpool: u8) -> usize {
        frame_length(
            self.channel_mode,
            self.subbands,
            self.block_length,
            bitpool,
        )
    }
}

/// Encoded size of one SBC frame.
pub fn frame_length(
    channel_mode: ChannelMode,
    subbands: Subbands,
    block_length: BlockLength,
    bitpool: u8,
) -> usize {
    let subbands = subbands.count();
    let blocks = block_length.count();
    let channels = channel_mode.channels() as usize;
    let bitpool = bitpool as usize;

    let data_bits = match channel_mode {
        ChannelMode::Mono | ChannelMode::DualChannel => blocks * channels * bitpool,
        ChannelMode::Stereo => blocks * bitpool,
        ChannelMode::JointStereo => subbands + blocks * bitpool,
    };

    4 + (4 * subbands * channels) / 8 + data_bits.div_ceil(8)
}

/// Largest bitpool usable with the given channel mode and subband count.
fn bitpool_limit(channel_mode: ChannelMode, subbands: Subbands) -> u8 {
    let per_subband = if channel_mode.shares_bitpool() { 32 } else { 16 };
    (per_subband * subbands.count()).min(MAX_BITPOOL as usize) as u8
}
