//! Error and status types shared across the transport core.

use std::fmt;
use std::sync::Arc;

use crate::util::define_from_for_arc;

/// A latched connection status: healthy, or a terminal error code.
///
/// Once a [`Status`] other than [`Status::Healthy`] is observed on a
/// connection, it is permanent: nothing in this crate ever clears it.
/// Modeling it as a two-variant enum (rather than a bare `i32`, where
/// `0` happens to mean healthy) makes that "once latched, forever
/// latched" invariant unrepresentable to violate by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No error has been latched.
    Healthy,
    /// A terminal error has been latched, identified by an errno-space
    /// code.
    Failed(ErrorCode),
}

impl Status {
    /// Returns `true` if this status is [`Status::Healthy`].
    pub fn is_healthy(self) -> bool {
        matches!(self, Status::Healthy)
    }

    /// Returns the latched code, or `0` if healthy, matching the
    /// integer-errno convention used on the wire-adjacent APIs.
    pub fn code(self) -> i32 {
        match self {
            Status::Healthy => 0,
            Status::Failed(c) => c.0,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Healthy => write!(f, "healthy"),
            Status::Failed(c) => write!(f, "{c}"),
        }
    }
}

impl std::error::Error for Status {}

/// An errno-space error code, as latched onto a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(i32);

impl ErrorCode {
    /// Transient "try again" condition; never latched, only returned
    /// from non-blocking calls that would otherwise block.
    pub const EAGAIN: ErrorCode = ErrorCode(1);
    /// Malformed or semantically invalid JSON-RPC traffic.
    pub const EPROTO: ErrorCode = ErrorCode(2);
    /// Operation attempted on a connection that isn't connected.
    pub const ENOTCONN: ErrorCode = ErrorCode(3);
    /// Peer closed the stream (a zero-length read).
    pub const EOF: ErrorCode = ErrorCode(4);

    /// Wraps an arbitrary nonzero code from the underlying stream.
    ///
    /// # Panics
    ///
    /// Panics if `code` is zero; zero means healthy and must never be
    /// latched.
    pub fn from_raw(code: i32) -> ErrorCode {
        assert_ne!(code, 0, "error code 0 means healthy, not an error");
        ErrorCode(code)
    }

    /// The raw integer code.
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            ErrorCode::EAGAIN => "EAGAIN",
            ErrorCode::EPROTO => "EPROTO",
            ErrorCode::ENOTCONN => "ENOTCONN",
            ErrorCode::EOF => "EOF",
            ErrorCode(other) => return write!(f, "error {other}"),
        };
        write!(f, "{name}")
    }
}

/// An error encoding a [`Message`](crate::message::Message) to JSON.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum EncodeError {
    /// `serde_json` rejected the value (practically unreachable for the
    /// value shapes this crate constructs, but the fallible API is kept
    /// honest rather than unwrapped away).
    #[error("failed to encode message: {0}")]
    Json(#[from] Arc<serde_json::Error>),
}

define_from_for_arc!(serde_json::Error => EncodeError [Json]);

/// An error decoding a [`Message`](crate::message::Message) from JSON.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The top-level JSON value was not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    /// An unrecognized member was present after extracting the known
    /// fields.
    #[error("unrecognized field {0:?}")]
    UnknownField(String),
    /// The object's populated fields don't match any message shape.
    #[error("message does not match any known shape: {0}")]
    BadShape(String),
    /// `serde_json` could not even parse the bytes as JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] Arc<serde_json::Error>),
}

define_from_for_arc!(serde_json::Error => DecodeError [Json]);

/// An error opening a stream from a connect string.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// The connect string didn't match any recognized scheme.
    #[error("unrecognized connect string {0:?}")]
    UnrecognizedScheme(String),
    /// The underlying OS call failed.
    #[error("failed to open stream: {0}")]
    Io(#[from] Arc<std::io::Error>),
}

define_from_for_arc!(std::io::Error => ConnectError [Io]);

/// A [`Session`](crate::session::Session)-level error: a superset of
/// [`Status`] that also names session-specific usage errors.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The session has no active connection.
    #[error("not connected")]
    NotConnected,
    /// The underlying connection latched an error.
    #[error("connection failed: {0}")]
    Connection(Status),
    /// Opening a replacement stream failed.
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
}

impl From<Status> for SessionError {
    fn from(s: Status) -> SessionError {
        SessionError::Connection(s)
    }
}
