//! A non-blocking JSON-RPC 1.0 transport core: a message-framed
//! connection with backlog-accounted output and a streaming parser,
//! plus a reconnecting, liveness-probed session built on top of it.
//!
//! This crate implements the wire format and state machines only. The
//! underlying byte stream, its readiness multiplexing, and the outer
//! poll loop are the caller's responsibility; see [`stream`] for the
//! narrow traits this crate expects of them.

#![allow(missing_docs)]

#[macro_use]
mod util;

pub mod connection;
pub mod error;
pub mod message;
mod parser;
pub mod ratelimit;
pub mod reconnect;
pub mod session;
pub mod stream;
#[cfg(test)]
mod testing;

pub use connection::Connection;
pub use error::{ConnectError, DecodeError, EncodeError, ErrorCode, SessionError, Status};
pub use message::Message;
pub use reconnect::{Command, ReconnectController};
pub use session::Session;
pub use stream::{ConnectStringOpener, MioStream, OpenOutcome, PendingStream, Stream, StreamOpener};
