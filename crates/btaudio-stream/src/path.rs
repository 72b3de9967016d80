//! Encode and decode paths between PCM blocks and link packets.
//!
//! These functions hold no state of their own. The codec, framer and
//! scratch buffers are borrowed from the stream that owns them.

use std::io;

use btaudio_core::{CodecError, Result, SampleSpec, StreamError};
use btaudio_sbc::{SbcCodecState, MAX_CODESIZE};
use btaudio_transport::{Received, StreamSocket};
use tracing::{error, trace};

use crate::rtp::{RtpFramer, PACKET_OVERHEAD};

/// Outcome of offering one packet to the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// EAGAIN; nothing was written.
    WouldBlock,
}

fn invariant(stage: &'static str, expected: usize, actual: usize) -> CodecError {
    CodecError::CodecInvariantViolation {
        stage,
        expected,
        actual,
    }
}

/// Encode one PCM block into an RTP packet in `packet`.
///
/// Every encoder call must consume exactly one codesize and produce exactly
/// one frame length. Returns the packet length.
pub fn encode_packet(
    codec: &mut SbcCodecState,
    framer: &mut RtpFramer,
    pcm: &[u8],
    timestamp: u32,
    packet: &mut [u8],
) -> Result<usize> {
    let codesize = codec.codesize();
    let frame_length = codec.frame_length();

    let mut consumed = 0;
    let mut offset = PACKET_OVERHEAD;
    let mut frame_count: usize = 0;

    while pcm.len() - consumed >= codesize && packet.len().saturating_sub(offset) >= frame_length {
        let (encoded, written) = codec.encode_frame(&pcm[consumed..], &mut packet[offset..])?;
        if encoded != codesize {
            return Err(invariant("encoding", codesize, encoded).into());
        }
        if written != frame_length {
            return Err(invariant("encoding", frame_length, written).into());
        }

        consumed += encoded;
        offset += written;
        frame_count += 1;
    }

    if consumed != pcm.len() {
        return Err(invariant("packing frames", pcm.len(), consumed).into());
    }

    let header = framer.next_header(frame_count as u8, timestamp);
    header.write_to(packet);
    trace!(
        "Packet {}: {} frames, {} bytes",
        header.sequence_number,
        frame_count,
        offset
    );
    Ok(offset)
}

/// Decode the SBC payload of one RTP packet into `pcm`, growing it as needed.
///
/// Every decoder call must consume exactly one frame length and produce
/// exactly one codesize. Returns the PCM byte count.
pub fn decode_packet(codec: &mut SbcCodecState, packet: &[u8], pcm: &mut Vec<u8>) -> Result<usize> {
    let (_, payload) = RtpFramer::parse_header(packet)?;

    let mut offset = 0;
    let mut total = 0;
    while offset < payload.len() {
        // The remote side may change the frame layout between packets
        if pcm.len() < total + MAX_CODESIZE {
            pcm.resize(total + MAX_CODESIZE, 0);
        }

        let (decoded, written) = codec.decode_frame(&payload[offset..], &mut pcm[total..])?;
        // Cached sizes now describe the frame just decoded
        let frame_length = codec.frame_length();
        if decoded != frame_length {
            return Err(invariant("decoding", frame_length, decoded).into());
        }
        let codesize = codec.codesize();
        if written != codesize {
            return Err(invariant("decoding", codesize, written).into());
        }

        offset += decoded;
        total += written;
    }

    Ok(total)
}

/// Reject SCO chunks that do not hold whole frames.
pub fn check_sco_alignment(spec: &SampleSpec, len: usize) -> Result<()> {
    if !spec.is_frame_aligned(len) {
        return Err(StreamError::MisalignedRead {
            len,
            frame_size: spec.frame_size(),
        }
        .into());
    }
    Ok(())
}

/// Write one packet. Link sockets accept whole packets or nothing, so a
/// short write is fatal.
pub fn send_packet(socket: &mut dyn StreamSocket, packet: &[u8]) -> Result<SendOutcome> {
    match socket.send(packet) {
        Ok(written) if written == packet.len() => Ok(SendOutcome::Sent),
        Ok(written) => Err(StreamError::PartialWrite {
            written,
            wanted: packet.len(),
        }
        .into()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(SendOutcome::WouldBlock),
        Err(e) => {
            error!("Failed to write data to socket: {}", e);
            Err(StreamError::Socket(e).into())
        }
    }
}

/// Read one packet. `Ok(None)` when nothing is available; EOF is fatal.
pub fn recv_packet(socket: &mut dyn StreamSocket, buf: &mut [u8]) -> Result<Option<Received>> {
    match socket.recv(buf) {
        Ok(received) if received.len == 0 => {
            error!("Failed to read data from socket: EOF");
            Err(StreamError::Eof.into())
        }
        Ok(received) => Ok(Some(received)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => {
            error!("Failed to read data from socket: {}", e);
            Err(StreamError::Socket(e).into())
        }
    }
}
