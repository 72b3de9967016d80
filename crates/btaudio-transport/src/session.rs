//! Transport acquisition state and stream geometry.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use btaudio_core::{Error, Profile, Result, TransportError};
use btaudio_sbc::CodecConfig;
use tracing::{debug, info};

use crate::transport::Transport;

/// RTP fixed header.
pub const RTP_HEADER_SIZE: usize = 12;
/// SBC payload descriptor following the RTP header (frame count).
pub const PAYLOAD_HEADER_SIZE: usize = 1;

/// Read and write block sizes of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGeometry {
    pub read_block_size: usize,
    pub write_block_size: usize,
}

#[derive(Debug)]
struct Link {
    fd: Option<OwnedFd>,
    read_mtu: usize,
    write_mtu: usize,
}

/// Owns a transport and, while acquired, its file descriptor.
pub struct TransportSession {
    transport: Box<dyn Transport>,
    profile: Profile,
    link: Option<Link>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("profile", &self.profile)
            .field("link", &self.link)
            .finish()
    }
}

impl TransportSession {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let profile = transport.profile();
        Self {
            transport,
            profile,
            link: None,
        }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn is_acquired(&self) -> bool {
        self.link.is_some()
    }

    /// Acquire the transport. A no-op if already acquired.
    ///
    /// Errors from the collaborator are returned unchanged.
    pub fn acquire(&mut self, optional: bool) -> std::result::Result<(), TransportError> {
        if self.link.is_some() {
            return Ok(());
        }

        debug!("Acquiring transport for {}", self.profile);
        let acquired = self.transport.acquire(optional)?;
        info!(
            "Transport for {} acquired: fd {}, read MTU {}, write MTU {}",
            self.profile,
            acquired.fd.as_raw_fd(),
            acquired.read_mtu,
            acquired.write_mtu
        );

        self.link = Some(Link {
            fd: Some(acquired.fd),
            read_mtu: acquired.read_mtu,
            write_mtu: acquired.write_mtu,
        });
        Ok(())
    }

    /// Release the transport and close its descriptor. A no-op if not acquired.
    pub fn release(&mut self) {
        if self.link.take().is_none() {
            return;
        }
        self.transport.release();
        info!("Transport for {} released", self.profile);
    }

    /// Close the stream descriptor but stay acquired.
    ///
    /// Used when the socket hung up; the daemon still considers the
    /// transport ours until it is released.
    pub fn close_stream(&mut self) {
        if let Some(link) = self.link.as_mut() {
            if link.fd.take().is_some() {
                debug!("Stream descriptor for {} closed", self.profile);
            }
        }
    }

    /// The stream descriptor, while acquired and open.
    pub fn stream_fd(&self) -> Option<RawFd> {
        self.link
            .as_ref()
            .and_then(|link| link.fd.as_ref())
            .map(|fd| fd.as_raw_fd())
    }

    pub fn read_mtu(&self) -> Option<usize> {
        self.link.as_ref().map(|link| link.read_mtu)
    }

    pub fn write_mtu(&self) -> Option<usize> {
        self.link.as_ref().map(|link| link.write_mtu)
    }

    /// Compute block sizes from the acquired MTUs.
    ///
    /// SCO blocks are the MTUs. A2DP blocks hold as many whole SBC frames as
    /// fit behind the RTP header and payload descriptor, in PCM bytes.
    pub fn compute_block_sizes(&self, codec: Option<&CodecConfig>) -> Result<StreamGeometry> {
        let link = self.link.as_ref().ok_or(TransportError::NotAcquired)?;
        let geometry = compute_block_sizes(self.profile, link.read_mtu, link.write_mtu, codec)?;

        if (self.profile.has_output() && geometry.write_block_size == 0)
            || (self.profile.has_input() && geometry.read_block_size == 0)
        {
            return Err(Error::Config(format!(
                "MTUs {}/{} too small for {}",
                link.read_mtu, link.write_mtu, self.profile
            )));
        }

        debug!(
            "Block sizes for {}: read {}, write {}",
            self.profile, geometry.read_block_size, geometry.write_block_size
        );
        Ok(geometry)
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Block sizes for the given MTUs.
pub fn compute_block_sizes(
    profile: Profile,
    read_mtu: usize,
    write_mtu: usize,
    codec: Option<&CodecConfig>,
) -> Result<StreamGeometry> {
    if profile.is_sco() {
        return Ok(StreamGeometry {
            read_block_size: read_mtu,
            write_block_size: write_mtu,
        });
    }

    let codec = codec.ok_or_else(|| {
        Error::Config(format!("{} needs an SBC configuration", profile))
    })?;
    let block = |mtu: usize| {
        let frames = mtu.saturating_sub(RTP_HEADER_SIZE + PAYLOAD_HEADER_SIZE) / codec.frame_length();
        frames * codec.codesize()
    };

    Ok(StreamGeometry {
        read_block_size: block(read_mtu),
        write_block_size: block(write_mtu),
    })
}
