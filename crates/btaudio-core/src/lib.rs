//! # btaudio-core
//!
//! Core types, configuration and error definitions shared across the
//! Bluetooth audio crates.
//!
//! This crate provides:
//! - Profile and transport state definitions
//! - PCM sample specification and time helpers
//! - Stream engine configuration
//! - The common error taxonomy

pub mod config;
pub mod error;
pub mod profile;
pub mod spec;

pub use config::{StreamConfig, StreamConfigBuilder};
pub use error::{CodecError, Error, ErrorClass, Result, StreamError, TransportError};
pub use profile::{Availability, Direction, Profile, TransportState};
pub use spec::{SampleFormat, SampleSpec, Usec, NSEC_PER_USEC, USEC_PER_MSEC, USEC_PER_SEC};
