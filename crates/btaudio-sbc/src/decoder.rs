//! SBC frame decoder.

use btaudio_core::CodecError;

use crate::bitalloc::{allocate_bits, AllocationParams, ChannelTable, MAX_CHANNELS, MAX_SUBBANDS};
use crate::caps::ChannelMode;
use crate::config::{MAX_BITPOOL, MIN_BITPOOL};
use crate::filterbank::Synthesis;
use crate::frame::{frame_crc, BitReader, BitWriter, FrameHeader, SBC_HEADER_SIZE};
use crate::Result;

/// Decodes SBC frames into interleaved S16LE PCM.
///
/// Frames are self-describing; the decoder follows whatever layout the
/// frame header announces and resets its filterbank when that changes.
#[derive(Debug, Clone)]
pub struct SbcDecoder {
    synthesis: [Synthesis; MAX_CHANNELS],
    subbands: usize,
    side_info: BitWriter,
}

impl Default for SbcDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SbcDecoder {
    pub fn new() -> Self {
        Self {
            synthesis: [Synthesis::new(8), Synthesis::new(8)],
            subbands: 8,
            side_info: BitWriter::new(),
        }
    }

    /// Decode one frame from the start of `input` into `output`.
    ///
    /// Returns `(consumed, written, header)`: the frame's encoded length, the
    /// PCM bytes produced, and the parsed header.
    pub fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize, FrameHeader)> {
        let header = FrameHeader::parse(input)?;

        let subbands = header.subbands.count();
        let blocks = header.block_length.count();
        let channels = header.channels();

        let frame_length = header.frame_length();
        if input.len() < frame_length {
            return Err(CodecError::FrameTooShort {
                needed: frame_length,
                available: input.len(),
            });
        }
        let codesize = header.codesize();
        if output.len() < codesize {
            return Err(CodecError::FrameTooShort {
                needed: codesize,
                available: output.len(),
            });
        }

        let frame = &input[..frame_length];
        let mut reader = BitReader::new(frame, SBC_HEADER_SIZE * 8);

        let mut join = [false; MAX_SUBBANDS];
        self.side_info.clear();
        if header.channel_mode == ChannelMode::JointStereo {
            for joined in join.iter_mut().take(subbands) {
                let bit = reader.get(1)?;
                *joined = bit != 0;
                self.side_info.put(bit, 1);
            }
        }

        let mut scale_factors: ChannelTable = [[0; MAX_SUBBANDS]; MAX_CHANNELS];
        for row in scale_factors.iter_mut().take(channels) {
            for sf in row.iter_mut().take(subbands) {
                let value = reader.get(4)?;
                *sf = value as u8;
                self.side_info.put(value, 4);
            }
        }

        let crc = frame_crc(&header, &self.side_info);
        if crc != header.crc {
            return Err(CodecError::CrcMismatch {
                expected: header.crc,
                actual: crc,
            });
        }

        // The CRC covers the bitpool byte, so this only trips on a bad encoder
        let per_subband = if header.channel_mode.shares_bitpool() { 32 } else { 16 };
        let limit = (per_subband * subbands).min(MAX_BITPOOL as usize) as u8;
        if header.bitpool < MIN_BITPOOL || header.bitpool > limit {
            return Err(CodecError::InvalidFrameBitpool {
                bitpool: header.bitpool,
                limit,
            });
        }

        if subbands != self.subbands {
            self.synthesis = [Synthesis::new(subbands), Synthesis::new(subbands)];
            self.subbands = subbands;
        }

        let params = AllocationParams {
            channel_mode: header.channel_mode,
            allocation: header.allocation,
            frequency: header.frequency,
            subbands,
            bitpool: header.bitpool,
        };
        let bits = allocate_bits(&params, &scale_factors);

        let mut block = [[0.0f64; MAX_SUBBANDS]; MAX_CHANNELS];
        let mut pcm = [0.0f64; MAX_SUBBANDS];
        for blk in 0..blocks {
            for ch in 0..channels {
                for sb in 0..subbands {
                    let nbits = bits[ch][sb];
                    block[ch][sb] = if nbits == 0 {
                        0.0
                    } else {
                        dequantize(reader.get(nbits)?, scale_factors[ch][sb], nbits)
                    };
                }
            }

            if header.channel_mode == ChannelMode::JointStereo {
                for sb in 0..subbands {
                    if join[sb] {
                        let (mid, side) = (block[0][sb], block[1][sb]);
                        block[0][sb] = mid + side;
                        block[1][sb] = mid - side;
                    }
                }
            }

            for ch in 0..channels {
                self.synthesis[ch].process(&block[ch][..subbands], &mut pcm);
                for (i, &sample) in pcm.iter().take(subbands).enumerate() {
                    let value = sample.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
                    let offset = ((blk * subbands + i) * channels + ch) * 2;
                    output[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
                }
            }
        }

        Ok((frame_length, codesize, header))
    }
}

fn dequantize(q: u32, scale_factor: u8, bits: u8) -> f64 {
    let levels = ((1u32 << bits) - 1) as f64;
    let scale = f64::from(2u32 << scale_factor);
    scale * ((2.0 * q as f64 + 1.0) / levels - 1.0)
}
