//! Unified error types for rtmp-mux

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all publishing operations
#[derive(Debug)]
pub enum Error {
    /// I/O error on the underlying transport (connect, read, write, EOF)
    Io(io::Error),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF0 encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// The server sent `_error` or a failing status code
    Server(String),
    /// A write did not reach the OS before the write deadline
    WriteTimeout,
    /// No acknowledgement arrived within the ACK-wait deadline
    AckTimeout,
    /// S1/S2 did not arrive within the handshake deadline
    HandshakeTimeout,
    /// The connection was closed
    ConnectionClosed,
    /// A send was attempted while another send was in progress
    Busy,
    /// Public method called in the wrong session state
    InvalidState(&'static str),
    /// Invalid caller-supplied value
    InvalidArgument(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Server(msg) => write!(f, "Server error: {}", msg),
            Error::WriteTimeout => write!(f, "Write timed out"),
            Error::AckTimeout => write!(f, "Timed out waiting for acknowledgement"),
            Error::HandshakeTimeout => write!(f, "Handshake timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Busy => write!(f, "A send is already in progress"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    /// The basic header byte was not one of the chunk streams this peer uses
    BadFraming(u8),
    /// A control payload was shorter than its fixed layout
    TruncatedMessage(&'static str),
    /// A command arrived with a transaction ID that matches no request
    UnexpectedTransactionId(f64),
    /// A command name this publisher does not understand
    UnknownCommand(String),
    /// A required field was absent from a server response
    MissingField(&'static str),
    /// Peer-bandwidth limit type outside {HARD, SOFT, DYNAMIC}
    InvalidLimitType(u8),
    /// User-control event type this publisher cannot parse
    InvalidUserControlEvent(u16),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadFraming(b) => write!(f, "Unknown basic header: 0x{:02x}", b),
            ProtocolError::TruncatedMessage(what) => write!(f, "Truncated {} message", what),
            ProtocolError::UnexpectedTransactionId(tid) => {
                write!(f, "Unexpected transaction ID: {}", tid)
            }
            ProtocolError::UnknownCommand(name) => write!(f, "Unknown command: {}", name),
            ProtocolError::MissingField(field) => write!(f, "Missing required field: {}", field),
            ProtocolError::InvalidLimitType(t) => {
                write!(f, "Invalid peer bandwidth limit type: {}", t)
            }
            ProtocolError::InvalidUserControlEvent(t) => {
                write!(f, "Invalid user control event type: {}", t)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF0 encoding/decoding errors
#[derive(Debug)]
pub enum AmfError {
    /// The type marker did not match the expected kind
    KindMismatch { expected: &'static str, found: u8 },
    /// A marker no decoder branch exists for
    UnknownMarker(u8),
    /// Ran out of bytes mid-value
    UnexpectedEof,
    /// A string value was not valid UTF-8
    InvalidUtf8,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::KindMismatch { expected, found } => {
                write!(f, "Expected {}, found marker 0x{:02x}", expected, found)
            }
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    /// S0 carried an RTMP version other than 3
    UnsupportedVersion(u8),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::UnsupportedVersion(v) => {
                write!(f, "Server is not RTMP 3, found version: {}", v)
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;
    use std::io;

    #[test]
    fn test_error_display() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error"));

        let err = Error::Protocol(ProtocolError::BadFraming(0x44));
        assert!(err.to_string().contains("0x44"));

        let err = Error::Amf(AmfError::KindMismatch {
            expected: "string",
            found: 0x05,
        });
        assert!(err.to_string().contains("string"));
        assert!(err.to_string().contains("0x05"));

        let err = Error::Handshake(HandshakeError::UnsupportedVersion(6));
        assert!(err.to_string().contains("6"));

        let err = Error::Server("NetStream.Publish.BadName".into());
        assert!(err.to_string().contains("NetStream.Publish.BadName"));

        assert!(Error::WriteTimeout.to_string().contains("timed out"));
        assert!(Error::AckTimeout.to_string().contains("acknowledgement"));
        assert!(Error::HandshakeTimeout.to_string().contains("Handshake"));
        assert!(Error::ConnectionClosed.to_string().contains("closed"));
        assert!(Error::Busy.to_string().contains("in progress"));
        assert!(Error::InvalidState("not streaming")
            .to_string()
            .contains("not streaming"));
    }

    #[test]
    fn test_error_source() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err = Error::Io(io_err);
        assert!(StdError::source(&err).is_some());

        let err = Error::Protocol(ProtocolError::BadFraming(0));
        assert!(StdError::source(&err).is_none());
    }

    #[test]
    fn test_from_conversions() {
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "timeout").into();
        assert!(matches!(err, Error::Io(_)));

        let err: Error = ProtocolError::UnknownCommand("bogus".into()).into();
        assert!(matches!(err, Error::Protocol(_)));

        let err: Error = AmfError::UnexpectedEof.into();
        assert!(matches!(err, Error::Amf(_)));

        let err: Error = HandshakeError::UnsupportedVersion(9).into();
        assert!(matches!(err, Error::Handshake(_)));
    }
}
