//! # btaudio-sbc
//!
//! Pure-Rust SBC codec for A2DP streaming.
//!
//! This crate provides:
//! - A2DP SBC capability parsing
//! - Frame geometry (codesize, frame length)
//! - SNR and loudness bit allocation
//! - 4/8-subband analysis and synthesis filterbanks
//! - Frame encoder and decoder
//! - Per-stream codec state with bitpool congestion control

mod bitalloc;
pub mod caps;
pub mod config;
pub mod decoder;
pub mod encoder;
mod filterbank;
pub mod frame;
pub mod state;
mod tables;

pub use caps::{
    AllocationMethod, BlockLength, ChannelMode, SamplingFrequency, SbcCapabilities, Subbands,
    A2DP_SBC_CONFIG_SIZE,
};
pub use config::{frame_length, CodecConfig, MAX_BITPOOL, MAX_CODESIZE, MIN_BITPOOL};
pub use decoder::SbcDecoder;
pub use encoder::SbcEncoder;
pub use frame::{FrameHeader, SBC_HEADER_SIZE, SBC_SYNCWORD};
pub use state::{BitpoolChange, CodecRole, SbcCodecState};

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, btaudio_core::CodecError>;
