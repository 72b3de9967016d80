//! RTP framing for A2DP media packets.
//!
//! Each packet is a 12-byte RTP header, a 1-byte SBC payload descriptor
//! carrying the frame count, and the concatenated SBC frames.

use btaudio_core::StreamError;
use btaudio_transport::{PAYLOAD_HEADER_SIZE, RTP_HEADER_SIZE};

pub const RTP_VERSION: u8 = 2;
/// Payload type used for SBC media packets.
pub const SBC_PAYLOAD_TYPE: u8 = 1;
/// Single stream, no multiplexing.
pub const SSRC: u32 = 1;
/// Header plus payload descriptor.
pub const PACKET_OVERHEAD: usize = RTP_HEADER_SIZE + PAYLOAD_HEADER_SIZE;

const FRAME_COUNT_MASK: u8 = 0x0f;

/// Header fields of one media packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub payload_type: u8,
    pub sequence_number: u16,
    /// Sample-clock timestamp in frames.
    pub timestamp: u32,
    pub ssrc: u32,
    pub frame_count: u8,
}

impl PacketHeader {
    /// Serialize into the first [`PACKET_OVERHEAD`] bytes of `buf`.
    ///
    /// Panics if `buf` is shorter than the header.
    pub fn write_to(&self, buf: &mut [u8]) -> usize {
        buf[0] = self.version << 6;
        buf[1] = self.payload_type & 0x7f;
        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        // The descriptor frame count is 4 bits wide; receivers decode until
        // the payload ends
        buf[RTP_HEADER_SIZE] = self.frame_count & FRAME_COUNT_MASK;
        PACKET_OVERHEAD
    }

    /// Parse a header from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, StreamError> {
        if buf.len() < PACKET_OVERHEAD {
            return Err(StreamError::MalformedPacket {
                len: buf.len(),
                min: PACKET_OVERHEAD,
            });
        }

        Ok(Self {
            version: buf[0] >> 6,
            payload_type: buf[1] & 0x7f,
            sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            frame_count: buf[RTP_HEADER_SIZE] & FRAME_COUNT_MASK,
        })
    }
}

/// Builds outbound headers. Only the sequence number is stateful.
#[derive(Debug, Clone, Default)]
pub struct RtpFramer {
    sequence_number: u16,
}

impl RtpFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a given sequence number.
    pub fn with_sequence(sequence_number: u16) -> Self {
        Self { sequence_number }
    }

    /// Sequence number the next header will carry.
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    /// Header for the next packet. Advances the sequence number, wrapping at 2^16.
    pub fn next_header(&mut self, frame_count: u8, timestamp: u32) -> PacketHeader {
        let sequence_number = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);

        PacketHeader {
            version: RTP_VERSION,
            payload_type: SBC_PAYLOAD_TYPE,
            sequence_number,
            timestamp,
            ssrc: SSRC,
            frame_count,
        }
    }

    /// Split an inbound packet into its frame count and SBC payload.
    ///
    /// Sequence continuity is not checked; lost packets are tolerated.
    pub fn parse_header(packet: &[u8]) -> Result<(u8, &[u8]), StreamError> {
        let header = PacketHeader::parse(packet)?;
        Ok((header.frame_count, &packet[PACKET_OVERHEAD..]))
    }
}
