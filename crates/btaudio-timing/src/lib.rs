//! # btaudio-timing
//!
//! Time keeping for the Bluetooth audio I/O loop.
//!
//! This crate provides:
//! - Monotonic clock access and wall-clock conversion
//! - A `TimeSource` trait with a manual clock for tests
//! - The capture clock smoother used for latency reporting

pub mod clock;
pub mod smoother;

pub use clock::{timeval_to_usec, ManualClock, RtClock, TimeSource};
pub use smoother::ClockSmoother;
