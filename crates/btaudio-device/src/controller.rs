//! Profile state machine.
//!
//! The controller owns the transport sessions of one device and runs at most
//! one streaming pipeline at a time, on its own I/O thread. It reacts to
//! profile switches, transport state changes and failure reports from the
//! loop.

use std::collections::HashMap;

use btaudio_core::{
    Availability, Direction, Error, Profile, Result, TransportError, TransportState, Usec,
};
use btaudio_sbc::{CodecRole, SbcCapabilities, SbcCodecState};
use btaudio_stream::{control_channel, IoEventLoop, IoThread, Notification, StatsSnapshot, Stream};
use btaudio_transport::{Transport, TransportSession};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::context::DeviceContext;
use crate::events::{ControllerState, ProfileEvent};

/// Drives the selected profile of one device.
pub struct ProfileController {
    context: DeviceContext,
    sessions: HashMap<Profile, TransportSession>,
    profile: Option<Profile>,
    state: ControllerState,
    io: Option<IoThread>,
    notify_tx: Sender<Notification>,
    notify_rx: Receiver<Notification>,
}

impl ProfileController {
    pub fn new(context: DeviceContext) -> Self {
        let (notify_tx, notify_rx) = unbounded();
        Self {
            context,
            sessions: HashMap::new(),
            profile: None,
            state: ControllerState::Off,
            io: None,
            notify_tx,
            notify_rx,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn profile(&self) -> Option<Profile> {
        self.profile
    }

    pub fn has_transport(&self, profile: Profile) -> bool {
        self.sessions.contains_key(&profile) || (self.profile == Some(profile) && self.io.is_some())
    }

    /// Failure reports from the running I/O thread. Call
    /// [`process_notifications`](Self::process_notifications) once readable.
    pub fn notifications(&self) -> &Receiver<Notification> {
        &self.notify_rx
    }

    /// Register the transport for its profile, replacing an idle one.
    ///
    /// A profile waiting for its transport starts once the new transport is
    /// playing.
    pub fn add_transport(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        let profile = transport.profile();
        if self.profile == Some(profile) && self.io.is_some() {
            warn!("Transport for {} is streaming, not replacing it", profile);
            return Ok(());
        }

        let available = transport.state().availability() == Availability::Available;
        debug!("Transport for {} added", profile);
        self.sessions.insert(profile, TransportSession::new(transport));

        if self.profile == Some(profile) && self.state == ControllerState::Acquiring && available {
            self.activate(profile)?;
        }
        Ok(())
    }

    /// Forget the transport of `profile`, switching off if it was selected.
    pub fn remove_transport(&mut self, profile: Profile) {
        if self.profile == Some(profile) {
            self.switch_off();
        }
        if self.sessions.remove(&profile).is_some() {
            debug!("Transport for {} removed", profile);
        }
    }

    /// Select a profile, or `None` for off.
    ///
    /// The previous pipeline is fully stopped first. Sink and head unit roles
    /// fail without a transport; source and gateway roles wait for one.
    pub fn set_profile(&mut self, profile: Option<Profile>) -> Result<()> {
        if profile == self.profile && self.state != ControllerState::Off {
            return Ok(());
        }

        self.stop_pipeline();
        match profile {
            None => {
                self.switch_off();
                Ok(())
            }
            Some(profile) => {
                self.profile = Some(profile);
                self.activate(profile)
            }
        }
    }

    /// Apply a transport state change reported by the daemon.
    pub fn on_transport_state_changed(
        &mut self,
        profile: Profile,
        state: TransportState,
    ) -> Result<()> {
        debug!("Transport state of {} changed to {:?}", profile, state);
        if self.profile != Some(profile) {
            return Ok(());
        }

        match state.availability() {
            Availability::Unavailable => {
                info!("Transport for {} disconnected, switching profile off", profile);
                self.switch_off();
                Ok(())
            }
            Availability::Idle => {
                if self.state == ControllerState::Active {
                    self.suspend(profile);
                }
                Ok(())
            }
            Availability::Available => match self.state {
                ControllerState::Suspended => self.resume(profile),
                ControllerState::Acquiring => self.activate(profile),
                ControllerState::Active | ControllerState::Off => Ok(()),
            },
        }
    }

    /// Handle pending failure reports. Returns how many were acted on.
    pub fn process_notifications(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(notification) = self.notify_rx.try_recv() {
            let Some(profile) = self.profile.filter(|_| self.io.is_some()) else {
                debug!("Ignoring stale {:?}", notification);
                continue;
            };

            let reason = match notification {
                Notification::IoThreadFailed => "I/O thread failed",
                Notification::StreamHangUp => "stream socket hung up",
            };
            warn!("Stream for {} stopped: {}", profile, reason);
            self.stop_pipeline();
            self.emit(ProfileEvent::Failed {
                profile,
                reason: reason.to_string(),
            });

            if profile.acquire_is_optional() {
                // Retried on the next availability change
                self.set_state(ControllerState::Acquiring);
            } else {
                self.switch_off();
            }
            handled += 1;
        }
        handled
    }

    /// Ask the running loop to release the transport without leaving
    /// `Active`.
    pub fn suspend_stream(&self) -> bool {
        self.io.as_ref().is_some_and(|io| io.control().suspend())
    }

    pub fn resume_stream(&self) -> bool {
        self.io.as_ref().is_some_and(|io| io.control().resume())
    }

    /// Latency of one direction of the running stream.
    pub fn latency(&self, direction: Direction) -> Option<Usec> {
        self.io.as_ref().and_then(|io| io.control().latency(direction))
    }

    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.io.as_ref().map(|io| io.stats().snapshot())
    }

    fn activate(&mut self, profile: Profile) -> Result<()> {
        self.set_state(ControllerState::Acquiring);

        match self.start(profile) {
            Ok(()) => Ok(()),
            Err(Error::Transport(e)) if profile.acquire_is_optional() => {
                info!("{} waiting for its transport: {}", profile, e);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start {}: {}", profile, e);
                self.emit(ProfileEvent::Failed {
                    profile,
                    reason: e.to_string(),
                });
                self.switch_off();
                Err(e)
            }
        }
    }

    fn suspend(&mut self, profile: Profile) {
        info!("Transport for {} idle, suspending", profile);
        self.stop_pipeline();
        self.set_state(ControllerState::Suspended);
        if profile.has_output() {
            self.emit(ProfileEvent::SinkSuspended(profile));
        }
        if profile.has_input() {
            self.emit(ProfileEvent::SourceSuspended(profile));
        }
    }

    fn resume(&mut self, profile: Profile) -> Result<()> {
        if let Err(e) = self.start(profile) {
            warn!("Failed to resume {}, staying suspended: {}", profile, e);
            self.emit(ProfileEvent::Failed {
                profile,
                reason: e.to_string(),
            });
            return Err(e);
        }

        if profile.has_output() {
            self.emit(ProfileEvent::SinkResumed(profile));
        }
        if profile.has_input() {
            self.emit(ProfileEvent::SourceResumed(profile));
        }
        Ok(())
    }

    /// Acquire, configure and launch the pipeline for `profile`.
    fn start(&mut self, profile: Profile) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&profile)
            .ok_or(TransportError::NoTransport)?;
        session.acquire(profile.acquire_is_optional())?;

        let codec = match configure_codec(session) {
            Ok(codec) => codec,
            Err(e) => {
                session.release();
                return Err(e);
            }
        };
        let geometry = match session.compute_block_sizes(codec.as_ref().map(|c| c.config())) {
            Ok(geometry) => geometry,
            Err(e) => {
                session.release();
                return Err(e);
            }
        };
        info!(
            "Starting {}: read block {} bytes, write block {} bytes",
            profile, geometry.read_block_size, geometry.write_block_size
        );

        let channel = match control_channel() {
            Ok(channel) => channel,
            Err(e) => {
                session.release();
                return Err(e.into());
            }
        };
        let session = self
            .sessions
            .remove(&profile)
            .ok_or(TransportError::NoTransport)?;
        let config = self.context.config.clone();
        let stream = match Stream::try_new(session, codec, config.sco_sample_spec) {
            Ok(stream) => stream,
            Err((e, session)) => return Err(self.restore(session, e)),
        };
        let (mut event_loop, control) = IoEventLoop::with_channel(
            stream,
            config,
            self.context.clock.clone(),
            self.notify_tx.clone(),
            channel,
        );
        if profile.has_output() {
            event_loop = event_loop.with_playback((self.context.playback)(profile));
        }
        if profile.has_input() {
            event_loop = event_loop.with_capture((self.context.capture)(profile));
        }

        match IoThread::try_spawn(event_loop, control) {
            Ok(io) => self.io = Some(io),
            Err((e, event_loop)) => return Err(self.restore(event_loop.into_session(), e)),
        }
        self.set_state(ControllerState::Active);
        Ok(())
    }

    /// Put a session back after a failed start.
    fn restore(&mut self, mut session: TransportSession, e: Error) -> Error {
        session.release();
        self.sessions.insert(session.profile(), session);
        e
    }

    /// Join the I/O thread and take the session back.
    fn stop_pipeline(&mut self) {
        let Some(io) = self.io.take() else {
            return;
        };

        match io.shutdown() {
            Some(mut session) => {
                session.release();
                self.sessions.insert(session.profile(), session);
            }
            None => error!("I/O thread lost the transport for {:?}", self.profile),
        }

        // Reports from the old session no longer apply
        while self.notify_rx.try_recv().is_ok() {}
    }

    fn switch_off(&mut self) {
        self.stop_pipeline();
        self.profile = None;
        self.set_state(ControllerState::Off);
    }

    fn set_state(&mut self, state: ControllerState) {
        if self.state == state {
            return;
        }
        debug!("Profile {:?}: {:?} -> {:?}", self.profile, self.state, state);
        self.state = state;
        self.emit(ProfileEvent::StateChanged {
            profile: self.profile,
            state,
        });
    }

    fn emit(&self, event: ProfileEvent) {
        self.context.observer.on_event(event);
    }
}

impl Drop for ProfileController {
    fn drop(&mut self) {
        self.stop_pipeline();
    }
}

impl std::fmt::Debug for ProfileController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileController")
            .field("profile", &self.profile)
            .field("state", &self.state)
            .field("streaming", &self.io.is_some())
            .finish()
    }
}

/// SBC state for A2DP profiles, from the configuration the transport
/// negotiated.
fn configure_codec(session: &TransportSession) -> Result<Option<SbcCodecState>> {
    let profile = session.profile();
    if !profile.is_a2dp() {
        return Ok(None);
    }

    let caps = SbcCapabilities::from_a2dp_bytes(&session.transport().configuration())?;
    let role = match profile {
        Profile::A2dpSink => CodecRole::Encode,
        _ => CodecRole::Decode,
    };
    Ok(Some(SbcCodecState::configure(&caps, role)?))
}
