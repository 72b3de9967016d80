//! Scratch memory for the stream paths.

use btaudio_core::Profile;
use tracing::debug;

/// Per-link scratch buffer, shaped by the link type.
#[derive(Debug, Clone)]
pub enum CodecBuffer {
    /// Packet assembly space plus decoded PCM output.
    A2dp { packet: Vec<u8>, pcm: Vec<u8> },
    /// Raw PCM, one MTU-sized chunk.
    Sco { pcm: Vec<u8> },
}

impl CodecBuffer {
    pub fn for_profile(profile: Profile) -> Self {
        if profile.is_a2dp() {
            CodecBuffer::A2dp {
                packet: Vec::new(),
                pcm: Vec::new(),
            }
        } else {
            CodecBuffer::Sco { pcm: Vec::new() }
        }
    }

    /// Make sure the buffer can hold one packet of either link direction.
    ///
    /// A2DP packet space is regrown to twice the larger MTU when it is too
    /// small. SCO space is sized to the read block.
    pub fn prepare(&mut self, read_mtu: usize, write_mtu: usize, read_block_size: usize) {
        match self {
            CodecBuffer::A2dp { packet, .. } => {
                let min_size = read_mtu.max(write_mtu);
                if packet.len() >= min_size {
                    return;
                }
                packet.resize(2 * min_size, 0);
                debug!("A2DP packet buffer grown to {} bytes", packet.len());
            }
            CodecBuffer::Sco { pcm } => {
                pcm.resize(read_block_size, 0);
            }
        }
    }

    /// Bytes available for one packet.
    pub fn capacity(&self) -> usize {
        match self {
            CodecBuffer::A2dp { packet, .. } => packet.len(),
            CodecBuffer::Sco { pcm } => pcm.len(),
        }
    }
}
