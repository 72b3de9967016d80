//! Error types for the Bluetooth audio I/O engine.

use std::io;

use thiserror::Error;

/// Primary error type for all Bluetooth audio operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Errors raised while negotiating or running the SBC codec.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported codec parameter {field}: 0x{value:02x}")]
    UnsupportedCodecParameter { field: &'static str, value: u8 },

    #[error("Bitpool range [{min}, {max}] is invalid")]
    BitpoolOutOfRange { min: u8, max: u8 },

    #[error("Codec invariant violated while {stage}: expected {expected} bytes, got {actual}")]
    CodecInvariantViolation {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Bad SBC syncword 0x{0:02x}")]
    BadSyncword(u8),

    #[error("SBC frame bitpool {bitpool} outside [2, {limit}]")]
    InvalidFrameBitpool { bitpool: u8, limit: u8 },

    #[error("SBC frame CRC mismatch: header 0x{expected:02x}, computed 0x{actual:02x}")]
    CrcMismatch { expected: u8, actual: u8 },

    #[error("SBC frame too short: need {needed} bytes, have {available}")]
    FrameTooShort { needed: usize, available: usize },
}

/// Errors reported by the transport collaborator.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No transport available")]
    NoTransport,

    #[error("Transport busy")]
    Busy,

    #[error("Transport not acquired")]
    NotAcquired,

    #[error("Transport I/O failure: {0}")]
    Io(#[source] io::Error),
}

/// Errors on the streaming data path.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Malformed packet of {len} bytes (minimum {min})")]
    MalformedPacket { len: usize, min: usize },

    #[error("Wrote memory block to socket only partially: {written} written, wanted {wanted}")]
    PartialWrite { written: usize, wanted: usize },

    #[error("Packet of unaligned size {len} (frame size {frame_size})")]
    MisalignedRead { len: usize, frame_size: usize },

    #[error("Stream socket hung up")]
    HangUp,

    #[error("Stream socket reached EOF")]
    Eof,

    #[error("Socket error: {0}")]
    Socket(#[source] io::Error),
}

/// How far an error is allowed to travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Not ready now; re-poll and try again.
    Transient,
    /// Drop the current unit of work and keep streaming.
    LocalRecoverable,
    /// Ends the current streaming session.
    ProfileFatal,
    /// Rejected before any I/O starts.
    ConfigurationFatal,
}

impl Error {
    /// Classify this error for the propagation policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Codec(e) => e.class(),
            Error::Transport(_) => ErrorClass::ProfileFatal,
            Error::Stream(e) => e.class(),
            Error::Io(e) => io_class(e),
            Error::Config(_) => ErrorClass::ConfigurationFatal,
        }
    }

    /// Whether this error ends the streaming session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::ProfileFatal | ErrorClass::ConfigurationFatal
        )
    }
}

impl CodecError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CodecError::UnsupportedCodecParameter { .. } | CodecError::BitpoolOutOfRange { .. } => {
                ErrorClass::ConfigurationFatal
            }
            CodecError::CodecInvariantViolation { .. } => ErrorClass::ProfileFatal,
            CodecError::BadSyncword(_)
            | CodecError::CrcMismatch { .. }
            | CodecError::InvalidFrameBitpool { .. }
            | CodecError::FrameTooShort { .. } => ErrorClass::LocalRecoverable,
        }
    }
}

impl StreamError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StreamError::MalformedPacket { .. } | StreamError::MisalignedRead { .. } => {
                ErrorClass::LocalRecoverable
            }
            StreamError::PartialWrite { .. } | StreamError::HangUp | StreamError::Eof => {
                ErrorClass::ProfileFatal
            }
            StreamError::Socket(e) => io_class(e),
        }
    }
}

fn io_class(e: &io::Error) -> ErrorClass {
    match e.kind() {
        io::ErrorKind::WouldBlock => ErrorClass::Transient,
        io::ErrorKind::Interrupted => ErrorClass::LocalRecoverable,
        _ => ErrorClass::ProfileFatal,
    }
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        let err = Error::Codec(CodecError::UnsupportedCodecParameter {
            field: "frequency",
            value: 0x30,
        });
        assert!(err.to_string().contains("Codec error"));
        assert!(err.to_string().contains("frequency"));
        assert!(err.to_string().contains("0x30"));

        let err = Error::Stream(StreamError::PartialWrite {
            written: 100,
            wanted: 672,
        });
        assert!(err.to_string().contains("partially"));
        assert!(err.to_string().contains("672"));

        let err = Error::Transport(TransportError::NoTransport);
        assert!(err.to_string().contains("No transport"));
    }

    #[test]
    fn error_conversions() {
        let err: Error = CodecError::BadSyncword(0x12).into();
        assert!(matches!(err, Error::Codec(_)));

        let err: Error = TransportError::Busy.into();
        assert!(matches!(err, Error::Transport(_)));

        let err: Error = StreamError::HangUp.into();
        assert!(matches!(err, Error::Stream(_)));

        let err: Error = io::Error::new(io::ErrorKind::NotFound, "test").into();
        assert!(matches!(err, Error::Io(_)));
    }

    mod classification {
        use super::*;

        #[test]
        fn would_block_is_transient() {
            let err = Error::Stream(StreamError::Socket(io::Error::from(
                io::ErrorKind::WouldBlock,
            )));
            assert_eq!(err.class(), ErrorClass::Transient);
            assert!(!err.is_fatal());
        }

        #[test]
        fn malformed_input_is_local() {
            let err: Error = StreamError::MalformedPacket { len: 3, min: 13 }.into();
            assert_eq!(err.class(), ErrorClass::LocalRecoverable);

            let err: Error = StreamError::MisalignedRead { len: 47, frame_size: 2 }.into();
            assert_eq!(err.class(), ErrorClass::LocalRecoverable);

            let err: Error = CodecError::CrcMismatch { expected: 1, actual: 2 }.into();
            assert_eq!(err.class(), ErrorClass::LocalRecoverable);

            let err: Error = CodecError::InvalidFrameBitpool { bitpool: 0, limit: 250 }.into();
            assert_eq!(err.class(), ErrorClass::LocalRecoverable);
        }

        #[test]
        fn session_enders_are_profile_fatal() {
            let err: Error = StreamError::PartialWrite { written: 1, wanted: 2 }.into();
            assert_eq!(err.class(), ErrorClass::ProfileFatal);

            let err: Error = CodecError::CodecInvariantViolation {
                stage: "encoding",
                expected: 512,
                actual: 256,
            }
            .into();
            assert_eq!(err.class(), ErrorClass::ProfileFatal);

            let err = Error::Stream(StreamError::Socket(io::Error::from(
                io::ErrorKind::ConnectionReset,
            )));
            assert!(err.is_fatal());
        }

        #[test]
        fn negotiation_failures_are_configuration_fatal() {
            let err: Error = CodecError::UnsupportedCodecParameter {
                field: "subbands",
                value: 0,
            }
            .into();
            assert_eq!(err.class(), ErrorClass::ConfigurationFatal);
        }
    }
}
