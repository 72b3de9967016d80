//! Non-blocking stream socket I/O on an acquired transport descriptor.

use std::io;
use std::mem;
use std::os::fd::RawFd;

use btaudio_core::{Usec, USEC_PER_SEC};
use tracing::{debug, warn};

/// Socket priority used for audio links (interactive, low delay).
pub const LOW_DELAY_PRIORITY: libc::c_int = 6;

/// One received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    /// Kernel receive timestamp on the wall clock, if `SO_TIMESTAMP` worked.
    pub wall_timestamp: Option<Usec>,
}

/// Packet I/O used by the stream paths.
///
/// Implementations never block: a socket that is not ready returns
/// `io::ErrorKind::WouldBlock`.
pub trait StreamSocket: Send {
    fn as_raw_fd(&self) -> RawFd;

    /// Prepare the descriptor for streaming.
    fn configure(&mut self) -> io::Result<()>;

    /// Send one packet. Returns the bytes accepted.
    fn send(&mut self, packet: &[u8]) -> io::Result<usize>;

    /// Receive one packet into `buf`.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Received>;
}

/// SEQPACKET socket on a borrowed descriptor.
///
/// The descriptor is owned by the transport session and must outlive
/// this value.
#[derive(Debug)]
pub struct SeqPacketSocket {
    fd: RawFd,
    use_write: bool,
    warned_timestamp: bool,
}

impl SeqPacketSocket {
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            use_write: false,
            warned_timestamp: false,
        }
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        unsafe {
            let flags = libc::fcntl(self.fd, libc::F_GETFL);
            if flags < 0 {
                return Err(io::Error::last_os_error());
            }
            if flags & libc::O_NONBLOCK == 0
                && libc::fcntl(self.fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0
            {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn set_int_option(&self, option: libc::c_int, value: libc::c_int) -> io::Result<()> {
        let ret = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                option,
                &value as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn write_fallback(&self, packet: &[u8]) -> isize {
        unsafe { libc::write(self.fd, packet.as_ptr() as *const libc::c_void, packet.len()) }
    }
}

impl StreamSocket for SeqPacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    fn configure(&mut self) -> io::Result<()> {
        self.set_nonblocking()?;

        if let Err(e) = self.set_int_option(libc::SO_PRIORITY, LOW_DELAY_PRIORITY) {
            warn!("SO_PRIORITY failed: {}", e);
        }
        if let Err(e) = self.set_int_option(libc::SO_TIMESTAMP, 1) {
            warn!("Failed to enable SO_TIMESTAMP: {}", e);
        }
        debug!("Stream socket {} configured", self.fd);
        Ok(())
    }

    fn send(&mut self, packet: &[u8]) -> io::Result<usize> {
        loop {
            let ret = if self.use_write {
                self.write_fallback(packet)
            } else {
                let ret = unsafe {
                    libc::send(
                        self.fd,
                        packet.as_ptr() as *const libc::c_void,
                        packet.len(),
                        libc::MSG_NOSIGNAL,
                    )
                };
                if ret < 0 && io::Error::last_os_error().raw_os_error() == Some(libc::ENOTSOCK) {
                    debug!("Descriptor {} is not a socket, using write()", self.fd);
                    self.use_write = true;
                    continue;
                }
                ret
            };

            if ret >= 0 {
                return Ok(ret as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Received> {
        // Room for one SCM_TIMESTAMP control message
        let mut control = [0u64; 8];

        loop {
            let mut iov = libc::iovec {
                iov_base: buf.as_mut_ptr() as *mut libc::c_void,
                iov_len: buf.len(),
            };
            let mut msg: libc::msghdr = unsafe { mem::zeroed() };
            msg.msg_iov = &mut iov;
            msg.msg_iovlen = 1;
            msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
            msg.msg_controllen = mem::size_of_val(&control) as _;

            let ret = unsafe { libc::recvmsg(self.fd, &mut msg, 0) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                if err.raw_os_error() == Some(libc::ENOTSOCK) {
                    return self.read_fallback(buf);
                }
                return Err(err);
            }

            let wall_timestamp = unsafe { find_timestamp(&msg) };
            if wall_timestamp.is_none() && !self.warned_timestamp {
                warn!("Couldn't find SO_TIMESTAMP data in auxiliary recvmsg() data!");
                self.warned_timestamp = true;
            }

            return Ok(Received {
                len: ret as usize,
                wall_timestamp,
            });
        }
    }
}

impl SeqPacketSocket {
    fn read_fallback(&mut self, buf: &mut [u8]) -> io::Result<Received> {
        loop {
            let ret = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if ret >= 0 {
                return Ok(Received {
                    len: ret as usize,
                    wall_timestamp: None,
                });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

/// Extract an `SCM_TIMESTAMP` control message.
///
/// # Safety
/// `msg` must be a header filled in by a successful `recvmsg`.
unsafe fn find_timestamp(msg: &libc::msghdr) -> Option<Usec> {
    let mut cmsg = libc::CMSG_FIRSTHDR(msg);
    while !cmsg.is_null() {
        let header = &*cmsg;
        if header.cmsg_level == libc::SOL_SOCKET && header.cmsg_type == libc::SCM_TIMESTAMP {
            let data = libc::CMSG_DATA(cmsg) as *const libc::timeval;
            let tv = std::ptr::read_unaligned(data);
            return Some(tv.tv_sec as Usec * USEC_PER_SEC + tv.tv_usec as Usec);
        }
        cmsg = libc::CMSG_NXTHDR(msg, cmsg);
    }
    None
}

/// Create a connected `AF_UNIX` SEQPACKET pair.
///
/// Stands in for a Bluetooth link in tests and demos.
pub fn seqpacket_pair() -> io::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    use std::os::fd::FromRawFd;

    let mut fds = [0 as libc::c_int; 2];
    let ret = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
            0,
            fds.as_mut_ptr(),
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    // socketpair returned two fresh descriptors we now own
    unsafe {
        Ok((
            std::os::fd::OwnedFd::from_raw_fd(fds[0]),
            std::os::fd::OwnedFd::from_raw_fd(fds[1]),
        ))
    }
}
