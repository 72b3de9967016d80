//! The transport collaborator.
//!
//! A transport is the Bluetooth daemon's handle on one audio link. Acquiring
//! it yields a connected SEQPACKET file descriptor and the link MTUs.

use std::os::fd::OwnedFd;

use btaudio_core::{Profile, TransportError, TransportState};

/// A successfully acquired link.
#[derive(Debug)]
pub struct AcquiredTransport {
    pub fd: OwnedFd,
    pub read_mtu: usize,
    pub write_mtu: usize,
}

/// Transport collaborator contract.
///
/// Implementations talk to the Bluetooth daemon. The engine moves the
/// transport into its I/O thread, hence `Send`.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Profile this transport carries.
    fn profile(&self) -> Profile;

    /// Current state as last reported by the daemon.
    fn state(&self) -> TransportState;

    /// Acquire the link.
    ///
    /// With `optional` the daemon only hands out a link that is already
    /// being set up by the remote side and fails otherwise.
    fn acquire(&mut self, optional: bool) -> Result<AcquiredTransport, TransportError>;

    /// Give the link back to the daemon.
    fn release(&mut self);

    /// Negotiated codec configuration blob. Empty for SCO.
    fn configuration(&self) -> Vec<u8>;
}
