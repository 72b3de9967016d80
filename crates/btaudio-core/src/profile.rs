//! Bluetooth audio profiles and transport states.

/// A Bluetooth audio profile the device can be switched to.
///
/// "Off" is represented by the absence of a profile (`Option<Profile>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// We stream SBC to a remote A2DP sink (headphones, speakers).
    A2dpSink,
    /// A remote A2DP source streams SBC to us (phone playback).
    A2dpSource,
    /// Headset head unit role over SCO.
    HeadsetHeadUnit,
    /// Headset audio gateway role over SCO.
    HeadsetAudioGateway,
}

/// Direction of an audio stream relative to the local host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local audio leaves through the socket.
    Output,
    /// Remote audio arrives through the socket.
    Input,
}

impl Profile {
    pub fn is_a2dp(&self) -> bool {
        matches!(self, Self::A2dpSink | Self::A2dpSource)
    }

    pub fn is_sco(&self) -> bool {
        !self.is_a2dp()
    }

    /// Whether the profile carries a playback direction.
    pub fn has_output(&self) -> bool {
        !matches!(self, Self::A2dpSource)
    }

    /// Whether the profile carries a capture direction.
    pub fn has_input(&self) -> bool {
        !matches!(self, Self::A2dpSink)
    }

    pub fn has_direction(&self, direction: Direction) -> bool {
        match direction {
            Direction::Output => self.has_output(),
            Direction::Input => self.has_input(),
        }
    }

    /// Source and gateway roles may get their transport later from the peer.
    pub fn acquire_is_optional(&self) -> bool {
        matches!(self, Self::A2dpSource | Self::HeadsetAudioGateway)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A2dpSink => "a2dp_sink",
            Self::A2dpSource => "a2dp_source",
            Self::HeadsetHeadUnit => "headset_head_unit",
            Self::HeadsetAudioGateway => "headset_audio_gateway",
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a transport as reported by the Bluetooth daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Idle,
    Playing,
}

/// What a transport state means for the profile using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// The device is gone; the profile must be switched off.
    Unavailable,
    /// Connected but not streaming; suspend.
    Idle,
    /// Streaming may start.
    Available,
}

impl TransportState {
    pub fn availability(&self) -> Availability {
        match self {
            Self::Disconnected => Availability::Unavailable,
            Self::Idle => Availability::Idle,
            Self::Playing => Availability::Available,
        }
    }
}
