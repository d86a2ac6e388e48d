//! The byte-stream abstraction a [`Connection`](crate::connection::Connection)
//! runs over, plus a small ready-to-use opener for TCP and Unix-domain
//! connect strings.

use std::io;
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::error::ConnectError;

/// Any type a [`Connection`](crate::connection::Connection) can run
/// over: a non-blocking, full-duplex byte stream.
///
/// Callers are responsible for putting the underlying OS handle into
/// non-blocking mode before handing it to this crate.
pub trait Stream: io::Read + io::Write + Send {
    /// Upcasts to a [`MioStream`] if this stream supports `mio`
    /// readiness registration, for use by the blocking convenience
    /// wrappers. Returns `None` for streams driven by an external
    /// readiness loop that doesn't go through `mio`.
    fn as_mio_stream(&mut self) -> Option<&mut dyn MioStream>;
}

/// A [`Stream`] that can be registered with a [`mio::Poll`].
pub trait MioStream: Stream + mio::event::Source {}

/// Describes which IO directions a connection currently wants to be
/// woken for.
///
/// A connection is always interested in readability (so it notices
/// peer close / incoming bytes); it is interested in writability only
/// while it has queued output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WantIo {
    write: bool,
}

impl WantIo {
    pub(crate) fn new(write: bool) -> Self {
        WantIo { write }
    }

    /// Always `true`: a connection is always interested in reading.
    pub fn want_read(&self) -> bool {
        true
    }

    /// `true` if the connection has queued output to flush.
    pub fn want_write(&self) -> bool {
        self.write
    }
}

impl From<WantIo> for mio::Interest {
    fn from(value: WantIo) -> Self {
        if value.write {
            mio::Interest::READABLE | mio::Interest::WRITABLE
        } else {
            mio::Interest::READABLE
        }
    }
}

macro_rules! impl_traits {
    { $stream:ty => $mio_stream:ty } => {
        impl Stream for $stream {
            fn as_mio_stream(&mut self) -> Option<&mut dyn MioStream> {
                None
            }
        }
        impl Stream for $mio_stream {
            fn as_mio_stream(&mut self) -> Option<&mut dyn MioStream> {
                Some(self as _)
            }
        }
        impl MioStream for $mio_stream {}
    }
}

impl_traits! { TcpStream => mio::net::TcpStream }
#[cfg(unix)]
impl_traits! { UnixStream => mio::net::UnixStream }

/// The outcome of asking a [`StreamOpener`] to open a new stream.
pub enum OpenOutcome {
    /// The stream connected immediately (loopback, already-listening
    /// Unix socket, etc).
    Connected(Box<dyn Stream>),
    /// The connect is in progress; poll `PendingStream` for
    /// completion once it becomes writable.
    Pending(Box<dyn PendingStream>),
}

/// An external collaborator that knows how to turn a session name into
/// a byte stream.
///
/// A [`Session`](crate::session::Session) calls this each time its
/// reconnect controller issues a `CONNECT` command.
pub trait StreamOpener {
    /// Begins opening a stream identified by `name`.
    fn open(&self, name: &str) -> Result<OpenOutcome, ConnectError>;
}

/// A stream whose connection attempt has not yet completed.
pub trait PendingStream {
    /// Upcasts to a [`MioStream`] for readiness registration while
    /// connecting.
    fn as_mio_stream(&mut self) -> Option<&mut dyn MioStream>;

    /// Checks whether the connect attempt has finished.
    ///
    /// Returns `Ok(None)` if still in progress, `Ok(Some(stream))` once
    /// connected, or an error if the attempt failed.
    fn poll_connect(&mut self) -> Result<Option<Box<dyn Stream>>, ConnectError>;
}

struct PendingTcp(TcpStream);

impl PendingStream for PendingTcp {
    fn as_mio_stream(&mut self) -> Option<&mut dyn MioStream> {
        // A raw std::net::TcpStream isn't mio-registerable directly;
        // callers driving PendingTcp through the blocking wrappers
        // poll it by retrying poll_connect from their own loop.
        None
    }

    fn poll_connect(&mut self) -> Result<Option<Box<dyn Stream>>, ConnectError> {
        match self.0.take_error() {
            Ok(None) => match self.0.peer_addr() {
                Ok(_) => Ok(Some(Box::new(self.0.try_clone()?) as Box<dyn Stream>)),
                Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(None),
                Err(e) => Err(e.into()),
            },
            Ok(Some(e)) => Err(e.into()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A [`StreamOpener`] understanding `tcp:<host>:<port>` and (on
/// non-Windows) `unix:<path>` connect strings.
///
/// Grounded on the scheme-dispatch idea of connect-string parsing:
/// split once on `:`, match the scheme, and hand the remainder to the
/// matching constructor.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectStringOpener;

impl StreamOpener for ConnectStringOpener {
    fn open(&self, name: &str) -> Result<OpenOutcome, ConnectError> {
        let (scheme, payload) = name
            .split_once(':')
            .ok_or_else(|| ConnectError::UnrecognizedScheme(name.to_owned()))?;
        match scheme {
            "tcp" => {
                let stream = TcpStream::connect(payload)?;
                stream.set_nonblocking(true)?;
                Ok(OpenOutcome::Pending(Box::new(PendingTcp(stream))))
            }
            #[cfg(unix)]
            "unix" => {
                let stream = UnixStream::connect(payload)?;
                stream.set_nonblocking(true)?;
                Ok(OpenOutcome::Connected(Box::new(stream)))
            }
            _ => Err(ConnectError::UnrecognizedScheme(name.to_owned())),
        }
    }
}
