//! The non-blocking Connection I/O engine: message-framed send/recv
//! over a single byte stream, with backlog accounting and a latched
//! terminal status.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use crate::error::{ErrorCode, Status};
use crate::message::{IdGenerator, Message};
use crate::parser::{Parser, Progress};
use crate::ratelimit::RateLimitedWarn;
use crate::stream::{Stream, WantIo};

const STREAM_TOKEN: mio::Token = mio::Token(0);

/// A queued outbound buffer, along with how much of it has already
/// been written.
#[derive(Debug)]
struct OutBuf {
    data: Vec<u8>,
    start: usize,
}

impl OutBuf {
    fn remaining(&self) -> &[u8] {
        &self.data[self.start..]
    }

    fn is_drained(&self) -> bool {
        self.start >= self.data.len()
    }
}

/// What a caller should do to make progress on [`Connection::recv`].
#[derive(Debug, Clone, Copy)]
pub enum RecvWait {
    /// Calling `recv` again will make progress without blocking (a
    /// message is already staged, or bytes are already buffered for
    /// the parser).
    Immediate,
    /// Register this interest and wait for readiness before calling
    /// `recv` again.
    Interest(WantIo),
}

/// A single JSON-RPC 1.0 connection: owns one byte stream, a streaming
/// parser, an outbound byte queue, and a latched terminal status.
///
/// All operations are non-blocking except the `*_block` convenience
/// wrappers, which drive their own private `mio::Poll` loop. There is
/// no internal locking: a `Connection` must not be used concurrently
/// from more than one task.
#[derive(derive_more::Debug)]
pub struct Connection {
    name: String,
    status: Status,
    #[debug(ignore)]
    stream: Option<Box<dyn Stream>>,
    parser: Parser,
    read_buf: Vec<u8>,
    staged: Option<Message>,
    out_queue: VecDeque<OutBuf>,
    backlog: usize,
    ids: IdGenerator,
    #[debug(ignore)]
    warn_protocol: RateLimitedWarn,
    #[debug(ignore)]
    warn_io: RateLimitedWarn,
}

impl Connection {
    /// Takes ownership of an already-open, already-nonblocking stream.
    pub fn open(stream: Box<dyn Stream>, name: impl Into<String>) -> Connection {
        Connection {
            name: name.into(),
            status: Status::Healthy,
            stream: Some(stream),
            parser: Parser::new(),
            read_buf: Vec::new(),
            staged: None,
            out_queue: VecDeque::new(),
            backlog: 0,
            ids: IdGenerator::new(),
            warn_protocol: RateLimitedWarn::new("connection.protocol"),
            warn_io: RateLimitedWarn::new("connection.io"),
        }
    }

    /// This connection's name, as given to [`Connection::open`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current latched status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Total unsent bytes across all queued outbound buffers.
    pub fn backlog(&self) -> usize {
        self.backlog
    }

    /// Allocates the next request id on this connection.
    pub fn next_id(&self) -> serde_json::Value {
        self.ids.next()
    }

    /// Queues `msg` for transmission, attempting one immediate
    /// non-blocking flush if nothing else was already queued.
    ///
    /// Returns the latched status: [`Status::Healthy`] on success,
    /// or a terminal [`Status::Failed`] if this connection was already
    /// latched, or becomes so while attempting the flush.
    pub fn send(&mut self, msg: Message) -> Status {
        if !self.status.is_healthy() {
            return self.status;
        }
        let bytes = match msg.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                self.warn_protocol
                    .event(std::time::Instant::now(), &format_args!("{e}"));
                return self.latch(ErrorCode::EPROTO);
            }
        };
        let was_empty = self.out_queue.is_empty();
        self.backlog += bytes.len();
        self.out_queue.push_back(OutBuf { data: bytes, start: 0 });
        if was_empty {
            self.run();
        }
        self.status
    }

    /// Flushes as much of the queued output as the stream accepts
    /// without blocking.
    pub fn run(&mut self) -> Status {
        if !self.status.is_healthy() {
            return self.status;
        }
        loop {
            let Some(stream) = self.stream.as_deref_mut() else {
                break;
            };
            let Some(buf) = self.out_queue.front_mut() else {
                break;
            };
            match stream.write(buf.remaining()) {
                Ok(0) => break,
                Ok(n) => {
                    buf.start += n;
                    self.backlog -= n;
                    if buf.is_drained() {
                        self.out_queue.pop_front();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let code = io_error_code(&e);
                    self.warn_io
                        .event(std::time::Instant::now(), &format_args!("write: {e}"));
                    return self.latch(code);
                }
            }
        }
        self.status
    }

    /// Attempts to receive one message without blocking.
    ///
    /// Returns `Ok(Some(msg))` on success, `Ok(None)` if no complete
    /// message is available yet, or `Err(status)` once this connection
    /// has latched an error (including peer close, surfaced as
    /// [`ErrorCode::EOF`]).
    pub fn recv(&mut self) -> Result<Option<Message>, Status> {
        if !self.status.is_healthy() {
            return Err(self.status);
        }
        loop {
            if let Some(msg) = self.staged.take() {
                return Ok(Some(msg));
            }

            if !self.read_buf.is_empty() {
                let (consumed, progress) = self.parser.feed(&self.read_buf);
                vec_pop_from_front(&mut self.read_buf, consumed);
                match progress {
                    Progress::NeedMore => {
                        if consumed > 0 {
                            continue;
                        }
                    }
                    Progress::Value(v) => match Message::decode(v) {
                        Ok(msg) => {
                            self.staged = Some(msg);
                            continue;
                        }
                        Err(e) => {
                            self.warn_protocol
                                .event(std::time::Instant::now(), &format_args!("{e}"));
                            return Err(self.latch(ErrorCode::EPROTO));
                        }
                    },
                    Progress::Error(e) => {
                        self.warn_protocol
                            .event(std::time::Instant::now(), &format_args!("{e}"));
                        return Err(self.latch(ErrorCode::EPROTO));
                    }
                }
            }

            let Some(stream) = self.stream.as_deref_mut() else {
                return Ok(None);
            };
            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk) {
                Ok(0) => return Err(self.latch(ErrorCode::EOF)),
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let code = io_error_code(&e);
                    self.warn_io
                        .event(std::time::Instant::now(), &format_args!("read: {e}"));
                    return Err(self.latch(code));
                }
            }
        }
    }

    /// Readiness interest to register before the next `run`: always
    /// readable, plus writable while output is queued.
    pub fn wait(&self) -> WantIo {
        WantIo::new(!self.out_queue.is_empty())
    }

    /// Readiness interest to register before the next `recv`.
    pub fn recv_wait(&self) -> RecvWait {
        if !self.status.is_healthy() || self.staged.is_some() || !self.read_buf.is_empty() {
            RecvWait::Immediate
        } else {
            RecvWait::Interest(WantIo::new(false))
        }
    }

    /// Forces this connection into a latched error state.
    ///
    /// Idempotent: only the first call after `open` has any effect.
    pub fn error(&mut self, code: ErrorCode) -> Status {
        self.latch(code)
    }

    fn latch(&mut self, code: ErrorCode) -> Status {
        if self.status.is_healthy() {
            self.status = Status::Failed(code);
            self.stream = None;
            self.parser = Parser::new();
            self.staged = None;
            self.out_queue.clear();
            self.backlog = 0;
        }
        self.status
    }

    /// Sends `msg`, blocking (via a private readiness loop) until the
    /// entire serialized message has been flushed or an error latches.
    pub fn send_block(&mut self, msg: Message) -> Result<(), Status> {
        let status = self.send(msg);
        if !status.is_healthy() {
            return Err(status);
        }
        self.block_loop(
            |conn| {
                conn.run();
                if !conn.status.is_healthy() {
                    Some(Err(conn.status))
                } else if conn.out_queue.is_empty() {
                    Some(Ok(()))
                } else {
                    None
                }
            },
            Connection::wait,
        )
        .and_then(|r| r)
    }

    /// Receives one message, blocking until it arrives or an error
    /// latches.
    pub fn recv_block(&mut self) -> Result<Message, Status> {
        self.block_loop(
            |conn| match conn.recv() {
                Ok(Some(m)) => Some(Ok(m)),
                Ok(None) => None,
                Err(s) => Some(Err(s)),
            },
            Connection::wait,
        )
        .and_then(|r| r)
    }

    /// Sends a request and blocks for the matching reply or error,
    /// silently discarding any other message received in the meantime.
    ///
    /// Only safe on a connection nobody else is concurrently reading
    /// from; mismatched messages are dropped, not buffered.
    pub fn transact_block(&mut self, msg: Message) -> Result<Message, Status> {
        let want_id = msg.id().cloned();
        self.send_block(msg)?;
        loop {
            let reply = self.recv_block()?;
            if reply.id() == want_id.as_ref() {
                return Ok(reply);
            }
        }
    }

    /// Drives `attempt` to completion, registering `want(self)` with a
    /// private `mio::Poll` and blocking between attempts.
    ///
    /// # Panics
    ///
    /// Panics if this connection's stream does not support `mio`
    /// registration (i.e. [`Stream::as_mio_stream`] returns `None`).
    fn block_loop<T>(
        &mut self,
        mut attempt: impl FnMut(&mut Self) -> Option<T>,
        want: impl Fn(&Connection) -> WantIo,
    ) -> Result<T, Status> {
        let mut poll = mio::Poll::new().map_err(|e| self.latch(io_error_code(&e)))?;
        let mut events = mio::Events::with_capacity(4);
        let mut registered = false;

        loop {
            if let Some(t) = attempt(self) {
                return Ok(t);
            }
            if !self.status.is_healthy() {
                return Err(self.status);
            }

            let interest: mio::Interest = want(self).into();
            {
                let mio_stream = self
                    .stream
                    .as_mut()
                    .and_then(|s| s.as_mio_stream())
                    .expect("connection stream must support mio registration for *_block methods");
                let result = if registered {
                    poll.registry().reregister(mio_stream, STREAM_TOKEN, interest)
                } else {
                    poll.registry().register(mio_stream, STREAM_TOKEN, interest)
                };
                result.map_err(|e| self.latch(io_error_code(&e)))?;
                registered = true;
            }

            loop {
                match poll.poll(&mut events, None) {
                    Ok(()) => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(self.latch(io_error_code(&e))),
                }
            }
        }
    }
}

fn io_error_code(e: &io::Error) -> ErrorCode {
    e.raw_os_error()
        .map(ErrorCode::from_raw)
        .unwrap_or(ErrorCode::EPROTO)
}

/// Removes `n` bytes from the front of `v`, shifting the remainder down.
fn vec_pop_from_front(v: &mut Vec<u8>, n: usize) {
    v.copy_within(n.., 0);
    let new_len = v.len() - n;
    v.truncate(new_len);
}
