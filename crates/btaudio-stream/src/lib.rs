//! # btaudio-stream
//!
//! The streaming engine for one Bluetooth audio profile.
//!
//! This crate provides:
//! - RTP framing for SBC payloads
//! - Encode and decode paths between PCM blocks and link packets
//! - Wall-clock playback pacing with bounded catch-up
//! - The poll-driven I/O loop and its control plane

pub mod buffer;
pub mod control;
pub mod io_loop;
pub mod pacer;
pub mod path;
pub mod rtp;
pub mod sink;
pub mod stats;
pub mod stream;

pub use buffer::CodecBuffer;
pub use control::{control_channel, ControlMessage, ControlReceiver, ControlSender, Notification};
pub use io_loop::{IoEventLoop, IoThread, LoopState, Step};
pub use pacer::{PaceDecision, PlaybackPacer};
pub use path::SendOutcome;
pub use rtp::{PacketHeader, RtpFramer, PACKET_OVERHEAD};
pub use sink::{CaptureSink, DiscardSink, PlaybackSink, SilenceSource};
pub use stats::{StatsSnapshot, StreamStats};
pub use stream::{seqpacket_factory, SocketFactory, Stream};
