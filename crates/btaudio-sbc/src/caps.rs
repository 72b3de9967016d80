//! SBC capability fields and the A2DP configuration blob.
//!
//! Each field has two encodings: the one-hot bit used in the A2DP media
//! codec configuration, and the packed code used in the SBC frame header.

use btaudio_core::CodecError;

use crate::Result;

/// Sampling frequency of an SBC stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingFrequency {
    Hz16000,
    Hz32000,
    Hz44100,
    Hz48000,
}

impl SamplingFrequency {
    pub fn as_hz(&self) -> u32 {
        match self {
            Self::Hz16000 => 16000,
            Self::Hz32000 => 32000,
            Self::Hz44100 => 44100,
            Self::Hz48000 => 48000,
        }
    }

    pub fn from_a2dp_bit(bit: u8) -> Result<Self> {
        match bit {
            0x8 => Ok(Self::Hz16000),
            0x4 => Ok(Self::Hz32000),
            0x2 => Ok(Self::Hz44100),
            0x1 => Ok(Self::Hz48000),
            _ => Err(unsupported("frequency", bit)),
        }
    }

    pub fn a2dp_bit(&self) -> u8 {
        match self {
            Self::Hz16000 => 0x8,
            Self::Hz32000 => 0x4,
            Self::Hz44100 => 0x2,
            Self::Hz48000 => 0x1,
        }
    }

    /// Two-bit code in the frame header. Also indexes the loudness tables.
    pub fn header_code(&self) -> u8 {
        match self {
            Self::Hz16000 => 0,
            Self::Hz32000 => 1,
            Self::Hz44100 => 2,
            Self::Hz48000 => 3,
        }
    }

    pub fn from_header_code(code: u8) -> Self {
        match code & 0x3 {
            0 => Self::Hz16000,
            1 => Self::Hz32000,
            2 => Self::Hz44100,
            _ => Self::Hz48000,
        }
    }
}

/// Channel mode of an SBC stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Mono,
    DualChannel,
    Stereo,
    JointStereo,
}

impl ChannelMode {
    pub fn channels(&self) -> u8 {
        match self {
            Self::Mono => 1,
            _ => 2,
        }
    }

    /// Stereo and joint stereo share one bitpool across both channels.
    pub fn shares_bitpool(&self) -> bool {
        matches!(self, Self::Stereo | Self::JointStereo)
    }

    pub fn from_a2dp_bit(bit: u8) -> Result<Self> {
        match bit {
            0x8 => Ok(Self::Mono),
            0x4 => Ok(Self::DualChannel),
            0x2 => Ok(Self::Stereo),
            0x1 => Ok(Self::JointStereo),
            _ => Err(unsupported("channel_mode", bit)),
        }
    }

    pub fn a2dp_bit(&self) -> u8 {
        match self {
            Self::Mono => 0x8,
            Self::DualChannel => 0x4,
            Self::Stereo => 0x2,
            Self::JointStereo => 0x1,
        }
    }

    pub fn header_code(&self) -> u8 {
        match self {
            Self::Mono => 0,
            Self::DualChannel => 1,
            Self::Stereo => 2,
            Self::JointStereo => 3,
        }
    }

    pub fn from_header_code(code: u8) -> Self {
        match code & 0x3 {
            0 => Self::Mono,
            1 => Self::DualChannel,
            2 => Self::Stereo,
            _ => Self::JointStereo,
        }
    }
}

/// Bit allocation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMethod {
    Snr,
    Loudness,
}

impl AllocationMethod {
    pub fn from_a2dp_bit(bit: u8) -> Result<Self> {
        match bit {
            0x2 => Ok(Self::Snr),
            0x1 => Ok(Self::Loudness),
            _ => Err(unsupported("allocation_method", bit)),
        }
    }

    pub fn a2dp_bit(&self) -> u8 {
        match self {
            Self::Snr => 0x2,
            Self::Loudness => 0x1,
        }
    }

    pub fn header_code(&self) -> u8 {
        match self {
            Self::Loudness => 0,
            Self::Snr => 1,
        }
    }

    pub fn from_header_code(code: u8) -> Self {
        if code & 0x1 == 0 {
            Self::Loudness
        } else {
            Self::Snr
        }
    }
}

/// Number of subbands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subbands {
    Four,
    Eight,
}

impl Subbands {
    pub fn count(&self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    pub fn from_a2dp_bit(bit: u8) -> Result<Self> {
        match bit {
            0x2 => Ok(Self::Four),
            0x1 => Ok(Self::Eight),
            _ => Err(unsupported("subbands", bit)),
        }
    }

    pub fn a2dp_bit(&self) -> u8 {
        match self {
            Self::Four => 0x2,
            Self::Eight => 0x1,
        }
    }

    pub fn header_code(&self) -> u8 {
        match self {
            Self::Four => 0,
            Self::Eight => 1,
        }
    }

    pub fn from_header_code(code: u8) -> Self {
        if code & 0x1 == 0 {
            Self::Four
        } else {
            Self::Eight
        }
    }
}

/// Number of blocks per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLength {
    Four,
    Eight,
    Twelve,
    Sixteen,
}

impl BlockLength {
    pub fn count(&self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
            Self::Twelve => 12,
            Self::Sixteen => 16,
        }
    }

    pub fn from_a2dp_bit(bit: u8) -> Result<Self> {
        match bit {
            0x8 => Ok(Self::Four),
            0x4 => Ok(Self::Eight),
            0x2 => Ok(Self::Twelve),
            0x1 => Ok(Self::Sixteen),
            _ => Err(unsupported("block_length", bit)),
        }
    }

    pub fn a2dp_bit(&self) -> u8 {
        match self {
            Self::Four => 0x8,
            Self::Eight => 0x4,
            Self::Twelve => 0x2,
            Self::Sixteen => 0x1,
        }
    }

    pub fn header_code(&self) -> u8 {
        match self {
            Self::Four => 0,
            Self::Eight => 1,
            Self::Twelve => 2,
            Self::Sixteen => 3,
        }
    }

    pub fn from_header_code(code: u8) -> Self {
        match code & 0x3 {
            0 => Self::Four,
            1 => Self::Eight,
            2 => Self::Twelve,
            _ => Self::Sixteen,
        }
    }
}

/// Negotiated SBC configuration as raw A2DP codes.
///
/// Every code field must hold exactly one known bit. This is what the
/// transport hands over after negotiation with the remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcCapabilities {
    pub frequency: u8,
    pub channel_mode: u8,
    pub block_length: u8,
    pub subbands: u8,
    pub allocation_method: u8,
    pub min_bitpool: u8,
    pub max_bitpool: u8,
}

/// Size of the A2DP SBC media codec configuration.
pub const A2DP_SBC_CONFIG_SIZE: usize = 4;

impl SbcCapabilities {
    /// Parse the 4-byte A2DP SBC configuration.
    ///
    /// Layout: `frequency:4 | channel_mode:4`, `block_length:4 | subbands:2 |
    /// allocation:2`, `min_bitpool`, `max_bitpool`.
    pub fn from_a2dp_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != A2DP_SBC_CONFIG_SIZE {
            return Err(CodecError::UnsupportedCodecParameter {
                field: "configuration_size",
                value: bytes.len().min(u8::MAX as usize) as u8,
            });
        }

        let caps = Self {
            frequency: bytes[0] >> 4,
            channel_mode: bytes[0] & 0x0F,
            block_length: bytes[1] >> 4,
            subbands: (bytes[1] >> 2) & 0x03,
            allocation_method: bytes[1] & 0x03,
            min_bitpool: bytes[2],
            max_bitpool: bytes[3],
        };
        caps.validate()?;
        Ok(caps)
    }

    /// Serialize back to the 4-byte A2DP layout.
    pub fn to_a2dp_bytes(&self) -> [u8; A2DP_SBC_CONFIG_SIZE] {
        [
            (self.frequency << 4) | (self.channel_mode & 0x0F),
            (self.block_length << 4) | ((self.subbands & 0x03) << 2) | (self.allocation_method & 0x03),
            self.min_bitpool,
            self.max_bitpool,
        ]
    }

    /// Check that every code field names exactly one known value.
    pub fn validate(&self) -> Result<()> {
        SamplingFrequency::from_a2dp_bit(self.frequency)?;
        ChannelMode::from_a2dp_bit(self.channel_mode)?;
        BlockLength::from_a2dp_bit(self.block_length)?;
        Subbands::from_a2dp_bit(self.subbands)?;
        AllocationMethod::from_a2dp_bit(self.allocation_method)?;
        Ok(())
    }
}

fn unsupported(field: &'static str, value: u8) -> CodecError {
    CodecError::UnsupportedCodecParameter { field, value }
}
