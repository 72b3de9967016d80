//! # btaudio-transport
//!
//! Bluetooth audio transports and their stream sockets.
//!
//! This crate provides:
//! - The `Transport` collaborator contract
//! - `TransportSession`, which owns an acquired link and sizes its blocks
//! - Non-blocking SEQPACKET socket I/O with kernel receive timestamps

pub mod session;
pub mod socket;
pub mod transport;

pub use session::{
    compute_block_sizes, StreamGeometry, TransportSession, PAYLOAD_HEADER_SIZE, RTP_HEADER_SIZE,
};
pub use socket::{seqpacket_pair, Received, SeqPacketSocket, StreamSocket, LOW_DELAY_PRIORITY};
pub use transport::{AcquiredTransport, Transport};
