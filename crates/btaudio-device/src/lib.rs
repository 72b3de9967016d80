//! # btaudio-device
//!
//! Profile control for one Bluetooth audio device.
//!
//! This crate provides:
//! - `DeviceContext`, the owning context for a device's collaborators
//! - `ProfileController`, the per-device profile state machine
//! - Profile events and observers

pub mod context;
pub mod controller;
pub mod events;

pub use context::{CaptureFactory, DeviceContext, PlaybackFactory};
pub use controller::ProfileController;
pub use events::{CallbackObserver, ControllerState, NoOpObserver, ProfileEvent, ProfileObserver};
