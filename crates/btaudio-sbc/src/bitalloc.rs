//! SBC bit allocation.
//!
//! Both encoder and decoder derive the per-subband bit counts from the
//! scale factors, so the two sides must run exactly the same algorithm.

use crate::caps::{AllocationMethod, ChannelMode, SamplingFrequency};
use crate::tables::{LOUDNESS_OFFSET_4, LOUDNESS_OFFSET_8};

pub(crate) const MAX_CHANNELS: usize = 2;
pub(crate) const MAX_SUBBANDS: usize = 8;

/// Per-channel, per-subband values.
pub(crate) type ChannelTable = [[u8; MAX_SUBBANDS]; MAX_CHANNELS];

/// Parameters shared by every allocation call of one frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AllocationParams {
    pub channel_mode: ChannelMode,
    pub allocation: AllocationMethod,
    pub frequency: SamplingFrequency,
    pub subbands: usize,
    pub bitpool: u8,
}

/// Compute the number of bits for every channel and subband.
pub(crate) fn allocate_bits(params: &AllocationParams, scale_factors: &ChannelTable) -> ChannelTable {
    let mut bits = [[0u8; MAX_SUBBANDS]; MAX_CHANNELS];
    let channels = params.channel_mode.channels() as usize;

    if params.channel_mode.shares_bitpool() {
        allocate_group(params, scale_factors, &[0, 1], &mut bits);
    } else {
        for ch in 0..channels {
            allocate_group(params, scale_factors, &[ch], &mut bits);
        }
    }

    bits
}

fn bitneed(params: &AllocationParams, scale_factor: u8, subband: usize) -> i32 {
    let scale_factor = scale_factor as i32;
    match params.allocation {
        AllocationMethod::Snr => scale_factor,
        AllocationMethod::Loudness => {
            if scale_factor == 0 {
                return -5;
            }
            let freq = params.frequency.header_code() as usize;
            let offset = if params.subbands == 4 {
                LOUDNESS_OFFSET_4[freq][subband]
            } else {
                LOUDNESS_OFFSET_8[freq][subband]
            };
            let loudness = scale_factor - offset;
            if loudness > 0 {
                loudness / 2
            } else {
                loudness
            }
        }
    }
}

/// Distribute one bitpool over the given channels.
///
/// For stereo the channels alternate inside each subband when the leftover
/// bits are handed out.
fn allocate_group(
    params: &AllocationParams,
    scale_factors: &ChannelTable,
    channels: &[usize],
    bits: &mut ChannelTable,
) {
    let bitpool = params.bitpool as i32;
    let subbands = params.subbands;

    let mut need = [[0i32; MAX_SUBBANDS]; MAX_CHANNELS];
    let mut max_bitneed = 0;
    let mut min_bitneed = i32::MAX;
    for &ch in channels {
        for sb in 0..subbands {
            let n = bitneed(params, scale_factors[ch][sb], sb);
            need[ch][sb] = n;
            max_bitneed = max_bitneed.max(n);
            min_bitneed = min_bitneed.min(n);
        }
    }

    let mut bitcount = 0;
    let mut slicecount = 0;
    let mut bitslice = max_bitneed + 1;
    loop {
        bitslice -= 1;
        bitcount += slicecount;
        slicecount = 0;
        for &ch in channels {
            for &n in &need[ch][..subbands] {
                if n > bitslice + 1 && n < bitslice + 16 {
                    slicecount += 1;
                } else if n == bitslice + 1 {
                    slicecount += 2;
                }
            }
        }
        if bitcount + slicecount >= bitpool {
            break;
        }
        // Every subband is saturated at 16 bits.
        if bitslice + 16 <= min_bitneed {
            break;
        }
    }

    if bitcount + slicecount == bitpool {
        bitcount += slicecount;
        bitslice -= 1;
    }

    for &ch in channels {
        for sb in 0..subbands {
            let n = need[ch][sb];
            bits[ch][sb] = if n < bitslice + 2 {
                0
            } else {
                (n - bitslice).min(16) as u8
            };
        }
    }

    let order = channels.len() * subbands;
    let slot = |i: usize| (channels[i % channels.len()], i / channels.len());

    let mut i = 0;
    while bitcount < bitpool && i < order {
        let (ch, sb) = slot(i);
        if bits[ch][sb] >= 2 && bits[ch][sb] < 16 {
            bits[ch][sb] += 1;
            bitcount += 1;
        } else if need[ch][sb] == bitslice + 1 && bitpool > bitcount + 1 {
            bits[ch][sb] = 2;
            bitcount += 2;
        }
        i += 1;
    }

    let mut i = 0;
    while bitcount < bitpool && i < order {
        let (ch, sb) = slot(i);
        if bits[ch][sb] < 16 {
            bits[ch][sb] += 1;
            bitcount += 1;
        }
        i += 1;
    }
}
