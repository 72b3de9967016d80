//! SBC frame encoder.

use btaudio_core::CodecError;

use crate::bitalloc::{allocate_bits, AllocationParams, ChannelTable, MAX_CHANNELS, MAX_SUBBANDS};
use crate::caps::ChannelMode;
use crate::config::CodecConfig;
use crate::filterbank::Analysis;
use crate::frame::{frame_crc, BitWriter, FrameHeader, SBC_HEADER_SIZE, SBC_SYNCWORD};
use crate::Result;

const MAX_BLOCKS: usize = 16;
const MAX_SCALE_FACTOR: u8 = 15;

type SubbandSamples = [[[f64; MAX_SUBBANDS]; MAX_CHANNELS]; MAX_BLOCKS];

/// Encodes interleaved S16LE PCM into SBC frames.
///
/// Filterbank history is kept between frames, so one encoder must be used
/// for one continuous stream.
#[derive(Debug, Clone)]
pub struct SbcEncoder {
    analysis: [Analysis; MAX_CHANNELS],
    side_info: BitWriter,
    body: BitWriter,
}

impl SbcEncoder {
    pub fn new(config: &CodecConfig) -> Self {
        let subbands = config.subbands.count();
        Self {
            analysis: [Analysis::new(subbands), Analysis::new(subbands)],
            side_info: BitWriter::new(),
            body: BitWriter::new(),
        }
    }

    /// Encode one frame from `input` into `output`.
    ///
    /// Returns `(consumed, written)`: `codesize` PCM bytes and `frame_length`
    /// encoded bytes on success.
    pub fn encode(
        &mut self,
        config: &CodecConfig,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(usize, usize)> {
        let codesize = config.codesize();
        let frame_length = config.frame_length();
        if input.len() < codesize {
            return Err(CodecError::FrameTooShort {
                needed: codesize,
                available: input.len(),
            });
        }
        if output.len() < frame_length {
            return Err(CodecError::FrameTooShort {
                needed: frame_length,
                available: output.len(),
            });
        }

        let subbands = config.subbands.count();
        let blocks = config.block_length.count();
        let channels = config.channels() as usize;

        let mut samples: SubbandSamples = [[[0.0; MAX_SUBBANDS]; MAX_CHANNELS]; MAX_BLOCKS];
        let mut pcm = [0.0f64; MAX_SUBBANDS];
        for (blk, block) in samples.iter_mut().take(blocks).enumerate() {
            for ch in 0..channels {
                for (i, sample) in pcm.iter_mut().take(subbands).enumerate() {
                    let offset = ((blk * subbands + i) * channels + ch) * 2;
                    *sample = i16::from_le_bytes([input[offset], input[offset + 1]]) as f64;
                }
                self.analysis[ch].process(&pcm[..subbands], &mut block[ch]);
            }
        }

        let mut scale_factors: ChannelTable = [[0; MAX_SUBBANDS]; MAX_CHANNELS];
        for ch in 0..channels {
            for sb in 0..subbands {
                scale_factors[ch][sb] =
                    scale_factor(samples[..blocks].iter().map(|block| block[ch][sb]));
            }
        }

        let mut join = [false; MAX_SUBBANDS];
        if config.channel_mode == ChannelMode::JointStereo {
            apply_joint_stereo(&mut samples[..blocks], &mut scale_factors, &mut join, subbands);
        }

        let header = FrameHeader::from_config(config);
        let params = AllocationParams {
            channel_mode: config.channel_mode,
            allocation: config.allocation,
            frequency: config.frequency,
            subbands,
            bitpool: config.bitpool(),
        };
        let bits = allocate_bits(&params, &scale_factors);

        self.side_info.clear();
        if config.channel_mode == ChannelMode::JointStereo {
            for &joined in &join[..subbands] {
                self.side_info.put(joined as u32, 1);
            }
        }
        for row in scale_factors.iter().take(channels) {
            for &sf in &row[..subbands] {
                self.side_info.put(sf as u32, 4);
            }
        }
        let crc = frame_crc(&header, &self.side_info);

        self.body.clear();
        self.body.put(SBC_SYNCWORD as u32, 8);
        self.body.put(header.flags() as u32, 8);
        self.body.put(header.bitpool as u32, 8);
        self.body.put(crc as u32, 8);
        for (i, &byte) in self.side_info.as_bytes().iter().enumerate() {
            let remaining = self.side_info.bit_len() - i * 8;
            if remaining >= 8 {
                self.body.put(byte as u32, 8);
            } else {
                self.body.put((byte >> (8 - remaining)) as u32, remaining as u8);
            }
        }

        for block in samples.iter().take(blocks) {
            for ch in 0..channels {
                for sb in 0..subbands {
                    let nbits = bits[ch][sb];
                    if nbits == 0 {
                        continue;
                    }
                    let q = quantize(block[ch][sb], scale_factors[ch][sb], nbits);
                    self.body.put(q, nbits);
                }
            }
        }

        let encoded = self.body.as_bytes();
        if encoded.len() > frame_length || encoded.len() < SBC_HEADER_SIZE {
            return Err(CodecError::CodecInvariantViolation {
                stage: "packing SBC frame",
                expected: frame_length,
                actual: encoded.len(),
            });
        }
        output[..encoded.len()].copy_from_slice(encoded);
        output[encoded.len()..frame_length].fill(0);

        Ok((codesize, frame_length))
    }
}

/// Smallest scale factor whose range `±2^(sf+1)` holds every sample.
fn scale_factor(values: impl Iterator<Item = f64>) -> u8 {
    let peak = values.fold(0.0f64, |acc, v| acc.max(v.abs()));
    let mut sf = 0u8;
    while sf < MAX_SCALE_FACTOR && peak >= f64::from(2u32 << sf) {
        sf += 1;
    }
    sf
}

/// Replace L/R by mid/side where that needs smaller scale factors.
///
/// The last subband is never joined.
fn apply_joint_stereo(
    samples: &mut [[[f64; MAX_SUBBANDS]; MAX_CHANNELS]],
    scale_factors: &mut ChannelTable,
    join: &mut [bool; MAX_SUBBANDS],
    subbands: usize,
) {
    for sb in 0..subbands - 1 {
        let mid = scale_factor(samples.iter().map(|b| (b[0][sb] + b[1][sb]) / 2.0));
        let side = scale_factor(samples.iter().map(|b| (b[0][sb] - b[1][sb]) / 2.0));
        if (mid as u32 + side as u32) < (scale_factors[0][sb] as u32 + scale_factors[1][sb] as u32)
        {
            join[sb] = true;
            scale_factors[0][sb] = mid;
            scale_factors[1][sb] = side;
            for block in samples.iter_mut() {
                let (left, right) = (block[0][sb], block[1][sb]);
                block[0][sb] = (left + right) / 2.0;
                block[1][sb] = (left - right) / 2.0;
            }
        }
    }
}

fn quantize(sample: f64, scale_factor: u8, bits: u8) -> u32 {
    let levels = ((1u32 << bits) - 1) as f64;
    let scale = f64::from(2u32 << scale_factor);
    let q = ((sample / scale + 1.0) * levels / 2.0).floor();
    q.clamp(0.0, levels - 1.0) as u32
}
