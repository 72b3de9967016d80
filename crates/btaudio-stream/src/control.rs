//! Control plane between the I/O thread and its owner.
//!
//! Messages travel over a crossbeam channel. A socket pair wakes the I/O
//! loop out of `poll` whenever a message is posted.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use btaudio_core::{Direction, Usec};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tracing::trace;

/// Requests consumed by the I/O loop at each wakeup.
#[derive(Debug)]
pub enum ControlMessage {
    /// Release the transport and stop streaming.
    Suspend,
    /// Re-acquire the transport and start streaming again.
    Resume,
    /// Release everything and exit the loop.
    Teardown,
    /// Reply with the current latency of one direction.
    GetLatency(Direction, Sender<Usec>),
}

/// Reports from the I/O thread, processed on the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// The session failed; the loop waits for teardown.
    IoThreadFailed,
    /// The remote end hung up the stream socket.
    StreamHangUp,
}

/// Sending half of the control queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ControlSender {
    tx: Sender<ControlMessage>,
    wake: Arc<UnixStream>,
}

impl ControlSender {
    /// Post a message and wake the loop.
    ///
    /// Fails only once the loop is gone.
    pub fn send(&self, message: ControlMessage) -> Result<(), ControlMessage> {
        self.tx.send(message).map_err(|e| e.into_inner())?;
        // A full wake pipe already guarantees a wakeup
        if let Err(e) = (&*self.wake).write(&[1]) {
            trace!("Control wakeup not written: {}", e);
        }
        Ok(())
    }

    pub fn suspend(&self) -> bool {
        self.send(ControlMessage::Suspend).is_ok()
    }

    pub fn resume(&self) -> bool {
        self.send(ControlMessage::Resume).is_ok()
    }

    pub fn teardown(&self) -> bool {
        self.send(ControlMessage::Teardown).is_ok()
    }

    /// Ask the loop for the latency of `direction` and wait for the answer.
    pub fn latency(&self, direction: Direction) -> Option<Usec> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(ControlMessage::GetLatency(direction, tx)).ok()?;
        rx.recv().ok()
    }
}

/// Receiving half, owned by the I/O loop.
#[derive(Debug)]
pub struct ControlReceiver {
    rx: Receiver<ControlMessage>,
    wake: UnixStream,
}

impl ControlReceiver {
    /// Descriptor to poll for incoming messages.
    pub fn wake_fd(&self) -> RawFd {
        self.wake.as_raw_fd()
    }

    /// Clear pending wakeups.
    pub fn drain_wakeups(&mut self) {
        let mut scratch = [0u8; 64];
        while let Ok(n) = self.wake.read(&mut scratch) {
            if n == 0 {
                break;
            }
        }
    }

    /// Next message without blocking.
    pub fn try_recv(&self) -> Result<ControlMessage, TryRecvError> {
        self.rx.try_recv()
    }

    /// Block for the next message. `None` once every sender is gone.
    pub fn recv(&mut self) -> Option<ControlMessage> {
        let message = self.rx.recv().ok();
        self.drain_wakeups();
        message
    }
}

/// Create a connected control queue.
pub fn control_channel() -> io::Result<(ControlSender, ControlReceiver)> {
    let (wake_tx, wake_rx) = UnixStream::pair()?;
    wake_tx.set_nonblocking(true)?;
    wake_rx.set_nonblocking(true)?;
    let (tx, rx) = unbounded();

    Ok((
        ControlSender {
            tx,
            wake: Arc::new(wake_tx),
        },
        ControlReceiver { rx, wake: wake_rx },
    ))
}
