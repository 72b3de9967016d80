//! Profile events and observers.

use btaudio_core::Profile;

/// Lifecycle of the selected profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No profile selected.
    Off,
    /// Selected, waiting for a transport.
    Acquiring,
    /// Streaming on its own I/O thread.
    Active,
    /// Selected, transport idle; the pipeline is torn down.
    Suspended,
}

/// Events reported by the profile controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    /// The controller moved to a new state.
    StateChanged {
        profile: Option<Profile>,
        state: ControllerState,
    },
    /// The playback direction was suspended.
    SinkSuspended(Profile),
    /// The capture direction was suspended.
    SourceSuspended(Profile),
    SinkResumed(Profile),
    SourceResumed(Profile),
    /// The streaming session ended with an error.
    Failed { profile: Profile, reason: String },
}

/// Receiver of profile events.
#[cfg_attr(test, mockall::automock)]
pub trait ProfileObserver: Send + Sync {
    /// Called on the controller's thread for every event.
    fn on_event(&self, event: ProfileEvent);
}

/// Observer ignoring every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpObserver;

impl ProfileObserver for NoOpObserver {
    fn on_event(&self, _event: ProfileEvent) {}
}

/// Closure-based observer.
pub struct CallbackObserver<F>
where
    F: Fn(ProfileEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackObserver<F>
where
    F: Fn(ProfileEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProfileObserver for CallbackObserver<F>
where
    F: Fn(ProfileEvent) + Send + Sync,
{
    fn on_event(&self, event: ProfileEvent) {
        (self.callback)(event);
    }
}
