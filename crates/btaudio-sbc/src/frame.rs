//! SBC frame header, bit-level I/O and CRC.

use btaudio_core::CodecError;

use crate::caps::{AllocationMethod, BlockLength, ChannelMode, SamplingFrequency, Subbands};
use crate::config::{self, CodecConfig};
use crate::Result;

pub const SBC_SYNCWORD: u8 = 0x9C;
/// Syncword, flags, bitpool and CRC.
pub const SBC_HEADER_SIZE: usize = 4;

const CRC_POLY: u8 = 0x1D;
const CRC_INIT: u8 = 0x0F;

/// Fixed header of one SBC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frequency: SamplingFrequency,
    pub block_length: BlockLength,
    pub channel_mode: ChannelMode,
    pub allocation: AllocationMethod,
    pub subbands: Subbands,
    pub bitpool: u8,
    pub crc: u8,
}

impl FrameHeader {
    pub fn from_config(config: &CodecConfig) -> Self {
        Self {
            frequency: config.frequency,
            block_length: config.block_length,
            channel_mode: config.channel_mode,
            allocation: config.allocation,
            subbands: config.subbands,
            bitpool: config.bitpool(),
            crc: 0,
        }
    }

    /// Parse the fixed header. The CRC is stored but not checked here.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < SBC_HEADER_SIZE {
            return Err(CodecError::FrameTooShort {
                needed: SBC_HEADER_SIZE,
                available: data.len(),
            });
        }
        if data[0] != SBC_SYNCWORD {
            return Err(CodecError::BadSyncword(data[0]));
        }

        let flags = data[1];
        Ok(Self {
            frequency: SamplingFrequency::from_header_code(flags >> 6),
            block_length: BlockLength::from_header_code(flags >> 4),
            channel_mode: ChannelMode::from_header_code(flags >> 2),
            allocation: AllocationMethod::from_header_code(flags >> 1),
            subbands: Subbands::from_header_code(flags),
            bitpool: data[2],
            crc: data[3],
        })
    }

    pub fn flags(&self) -> u8 {
        (self.frequency.header_code() << 6)
            | (self.block_length.header_code() << 4)
            | (self.channel_mode.header_code() << 2)
            | (self.allocation.header_code() << 1)
            | self.subbands.header_code()
    }

    pub fn channels(&self) -> usize {
        self.channel_mode.channels() as usize
    }

    pub fn frame_length(&self) -> usize {
        config::frame_length(self.channel_mode, self.subbands, self.block_length, self.bitpool)
    }

    pub fn codesize(&self) -> usize {
        self.subbands.count() * self.block_length.count() * self.channels() * 2
    }

    /// Whether this header describes the same stream layout as `config`.
    pub fn matches_layout(&self, config: &CodecConfig) -> bool {
        self.frequency == config.frequency
            && self.block_length == config.block_length
            && self.channel_mode == config.channel_mode
            && self.allocation == config.allocation
            && self.subbands == config.subbands
    }
}

/// MSB-first bit writer over a growable buffer.
#[derive(Debug, Clone, Default)]
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.bits = 0;
    }

    /// Append the low `count` bits of `value`.
    pub fn put(&mut self, value: u32, count: u8) {
        for shift in (0..count).rev() {
            let bit = ((value >> shift) & 1) as u8;
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            if bit != 0 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bits
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// MSB-first bit reader.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8], start_bit: usize) -> Self {
        Self {
            data,
            position: start_bit,
        }
    }

    /// Read `count` bits. Callers check the frame length up front.
    pub fn get(&mut self, count: u8) -> Result<u32> {
        let end = self.position + count as usize;
        if end > self.data.len() * 8 {
            return Err(CodecError::FrameTooShort {
                needed: end.div_ceil(8),
                available: self.data.len(),
            });
        }

        let mut value = 0u32;
        for _ in 0..count {
            let byte = self.data[self.position / 8];
            let bit = (byte >> (7 - (self.position % 8))) & 1;
            value = (value << 1) | bit as u32;
            self.position += 1;
        }
        Ok(value)
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// CRC-8 over the first `bits` bits of `data`, MSB first.
pub(crate) fn crc8(data: &[u8], bits: usize) -> u8 {
    let mut crc = CRC_INIT;
    for i in 0..bits {
        let bit = (data[i / 8] >> (7 - (i % 8))) & 1;
        let top = crc >> 7;
        crc <<= 1;
        if top ^ bit != 0 {
            crc ^= CRC_POLY;
        }
    }
    crc
}

/// CRC of a frame: flags, bitpool, then the given join and scale factor bits.
pub(crate) fn frame_crc(header: &FrameHeader, side_info: &BitWriter) -> u8 {
    let mut input = BitWriter::new();
    input.put(header.flags() as u32, 8);
    input.put(header.bitpool as u32, 8);
    for (i, &byte) in side_info.as_bytes().iter().enumerate() {
        let remaining = side_info.bit_len() - i * 8;
        if remaining >= 8 {
            input.put(byte as u32, 8);
        } else {
            input.put((byte >> (8 - remaining)) as u32, remaining as u8);
        }
    }
    crc8(input.as_bytes(), input.bit_len())
}
