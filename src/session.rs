//! A reconnecting, liveness-probed session built on top of
//! [`Connection`] and [`ReconnectController`].

use std::time::Instant;

use serde_json::json;

use crate::connection::Connection;
use crate::error::{ErrorCode, SessionError, Status};
use crate::message::Message;
use crate::reconnect::{Command, ReconnectController};
use crate::stream::{OpenOutcome, PendingStream, Stream, StreamOpener};

/// The reserved id used for the liveness probe's reply.
///
/// A caller-supplied request using this id as its own will have its
/// reply silently absorbed by [`Session::recv`] instead of delivered —
/// a known footgun inherited from the wire protocol this session
/// implements. Don't use the string `"echo"` as a request id.
pub const PROBE_REPLY_ID: &str = "echo";

#[derive(derive_more::Debug)]
enum Inner {
    Idle,
    Connecting(#[debug(ignore)] Box<dyn PendingStream>),
    Active(Connection),
}

/// A session that transparently reconnects, using a
/// [`ReconnectController`] for backoff timing and an `echo` liveness
/// probe to detect a dead peer.
///
/// At most one of {connecting stream, active connection} exists at a
/// time. `seqno` increments once per connectivity transition, so
/// callers can detect that the underlying connection was replaced.
#[derive(derive_more::Debug)]
pub struct Session<O: StreamOpener> {
    name: String,
    #[debug(ignore)]
    opener: O,
    controller: ReconnectController,
    inner: Inner,
    seqno: u64,
}

impl<O: StreamOpener> Session<O> {
    /// Creates a detached session. Call [`Session::enable`] to let it
    /// start connecting.
    pub fn new(name: impl Into<String>, opener: O, now: Instant) -> Self {
        let name = name.into();
        let mut controller = ReconnectController::create(now);
        controller.set_name(name.clone());
        Session {
            name,
            opener,
            controller,
            inner: Inner::Idle,
            seqno: 0,
        }
    }

    /// The session's name, passed verbatim to the stream opener.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A monotonically non-decreasing counter bumped on every
    /// connectivity transition (connect, disconnect, replace).
    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    /// `true` if this session currently has an active connection.
    pub fn is_active(&self) -> bool {
        matches!(self.inner, Inner::Active(_))
    }

    /// Mutable access to the reconnect controller, for configuration
    /// (`set_max_tries`, etc.) before or after [`Session::enable`].
    pub fn controller_mut(&mut self) -> &mut ReconnectController {
        &mut self.controller
    }

    /// Permits the session to start connecting.
    pub fn enable(&mut self, now: Instant) {
        self.controller.enable(now);
    }

    /// Sends `msg` on the active connection, or fails with
    /// [`SessionError::NotConnected`] if there is none.
    pub fn send(&mut self, msg: Message) -> Result<(), SessionError> {
        match &mut self.inner {
            Inner::Active(conn) => {
                let status = conn.send(msg);
                if status.is_healthy() {
                    Ok(())
                } else {
                    Err(SessionError::Connection(status))
                }
            }
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Receives the next message meant for the caller.
    ///
    /// Returns `Ok(None)` if nothing is ready (including "not
    /// connected"). Internally consumes `echo` liveness traffic: an
    /// incoming `echo` request is auto-replied to and never surfaced;
    /// a reply whose id is [`PROBE_REPLY_ID`] is silently dropped.
    pub fn recv(&mut self, now: Instant) -> Result<Option<Message>, SessionError> {
        loop {
            let Inner::Active(conn) = &mut self.inner else {
                return Ok(None);
            };
            let msg = match conn.recv() {
                Ok(Some(m)) => m,
                Ok(None) => return Ok(None),
                Err(status) => return Err(SessionError::Connection(status)),
            };

            self.controller.received(now);

            if let Message::Request { method, params, id } = &msg {
                if method == "echo" {
                    let reply = Message::Reply {
                        result: json!(params.clone()),
                        id: id.clone(),
                    };
                    // If this send fails, the next run/recv observes the latch.
                    conn.send(reply);
                    continue;
                }
            }

            if msg.id().and_then(|v| v.as_str()) == Some(PROBE_REPLY_ID)
                && matches!(msg, Message::Reply { .. })
            {
                continue;
            }

            return Ok(Some(msg));
        }
    }

    /// Advances the session's state machine by one step: drives the
    /// active connection or in-progress stream, then consults the
    /// reconnect controller for a command.
    pub fn run(&mut self, now: Instant) {
        match &mut self.inner {
            Inner::Idle => {}
            Inner::Connecting(pending) => match pending.poll_connect() {
                Ok(None) => {}
                Ok(Some(stream)) => {
                    let conn = Connection::open(stream, self.name.clone());
                    self.inner = Inner::Active(conn);
                    self.controller.connected(now);
                }
                Err(e) => {
                    self.inner = Inner::Idle;
                    self.controller.connect_failed(now, &e.to_string());
                }
            },
            Inner::Active(conn) => {
                conn.run();
                if !conn.status().is_healthy() {
                    let status = conn.status();
                    self.inner = Inner::Idle;
                    self.controller.disconnected(now, &status.to_string());
                    self.seqno += 1;
                }
            }
        }

        match self.controller.run(now) {
            Command::None => {}
            Command::Connect => {
                self.teardown();
                self.seqno += 1;
                self.controller.connecting(now);
                match self.opener.open(&self.name) {
                    Ok(OpenOutcome::Connected(stream)) => {
                        let conn = Connection::open(stream, self.name.clone());
                        self.inner = Inner::Active(conn);
                        self.controller.connected(now);
                    }
                    Ok(OpenOutcome::Pending(pending)) => {
                        self.inner = Inner::Connecting(pending);
                    }
                    Err(e) => {
                        self.controller.connect_failed(now, &e.to_string());
                    }
                }
            }
            Command::Disconnect => {
                self.teardown();
                self.controller.disconnected(now, "disconnect requested");
                self.seqno += 1;
            }
            Command::Probe => {
                if let Inner::Active(conn) = &mut self.inner {
                    conn.send(Message::echo_probe());
                }
            }
        }
    }

    fn teardown(&mut self) {
        self.inner = Inner::Idle;
    }

    /// Latches a manual error onto the active connection, if any
    /// (e.g. from a caller-detected protocol violation above this
    /// layer). A no-op if not connected.
    pub fn fail_active(&mut self, code: ErrorCode) -> Status {
        match &mut self.inner {
            Inner::Active(conn) => conn.error(code),
            _ => Status::Healthy,
        }
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    // @@ end test lint list maintained by maint/add_warning @@
    use super::*;
    use crate::error::ConnectError;
    use crate::testing::{construct_socketpair, FakeClock};
    use std::io::{self, Read, Write};
    use std::sync::Mutex;

    /// A [`StreamOpener`] that hands back one pre-built, already-connected
    /// stream exactly once; these tests never exercise reconnection, just
    /// the first `Connect`.
    struct FixedOpener(Mutex<Option<Box<dyn Stream>>>);

    impl FixedOpener {
        fn new(stream: mio::net::UnixStream) -> Self {
            FixedOpener(Mutex::new(Some(Box::new(stream))))
        }
    }

    impl StreamOpener for FixedOpener {
        fn open(&self, _name: &str) -> Result<OpenOutcome, ConnectError> {
            let stream = self
                .0
                .lock()
                .unwrap()
                .take()
                .expect("FixedOpener only opens once in these tests");
            Ok(OpenOutcome::Connected(stream))
        }
    }

    /// Drains whatever bytes are currently sitting in `stream`'s receive
    /// buffer, without blocking if there's nothing (yet).
    fn read_available(stream: &mut mio::net::UnixStream) -> Vec<u8> {
        let mut buf = [0u8; 4096];
        let mut out = Vec::new();
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => panic!("read failed: {e}"),
            }
        }
        out
    }

    #[test]
    #[cfg(unix)]
    fn connects_and_bumps_seqno() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        let (a, _b) = construct_socketpair().unwrap();
        let mut session = Session::new("test", FixedOpener::new(a), t0);
        assert_eq!(session.seqno(), 0);
        session.enable(t0);
        session.run(t0);
        assert!(session.is_active());
        assert_eq!(session.seqno(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn send_without_connection_fails() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        let (a, _b) = construct_socketpair().unwrap();
        let mut session = Session::new("test", FixedOpener::new(a), t0);
        let err = session
            .send(Message::Notify {
                method: "x".into(),
                params: vec![],
            })
            .unwrap_err();
        assert_matches::assert_matches!(err, SessionError::NotConnected);
    }

    #[test]
    #[cfg(unix)]
    fn echo_request_is_auto_answered_and_hidden() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        let (a, mut b) = construct_socketpair().unwrap();
        let mut session = Session::new("test", FixedOpener::new(a), t0);
        session.enable(t0);
        session.run(t0);
        assert!(session.is_active());

        b.write_all(br#"{"method":"echo","params":[1,2],"id":9}"#)
            .unwrap();
        let got = session.recv(t0).unwrap();
        assert!(got.is_none());

        let out = read_available(&mut b);
        let decoded: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(decoded, json!({"result":[1,2],"error":null,"id":9}));
    }

    #[test]
    #[cfg(unix)]
    fn probe_reply_is_absorbed_not_delivered() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        let (a, mut b) = construct_socketpair().unwrap();
        let mut session = Session::new("test", FixedOpener::new(a), t0);
        session.enable(t0);
        session.run(t0);

        b.write_all(br#"{"result":true,"error":null,"id":"echo"}"#)
            .unwrap();
        let got = session.recv(t0).unwrap();
        assert!(got.is_none());
    }

    #[test]
    #[cfg(unix)]
    fn ordinary_reply_is_delivered() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        let (a, mut b) = construct_socketpair().unwrap();
        let mut session = Session::new("test", FixedOpener::new(a), t0);
        session.enable(t0);
        session.run(t0);

        b.write_all(br#"{"result":42,"error":null,"id":1}"#)
            .unwrap();
        let got = session.recv(t0).unwrap().unwrap();
        assert_eq!(
            got,
            Message::Reply {
                result: json!(42),
                id: json!(1)
            }
        );
    }

    #[test]
    #[cfg(unix)]
    fn disconnect_on_eof_bumps_seqno_and_schedules_retry() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        let (a, _b) = construct_socketpair().unwrap();
        let mut session = Session::new("test", FixedOpener::new(a), t0);
        session.enable(t0);
        session.run(t0);
        assert_eq!(session.seqno(), 1);

        // Force the latch directly rather than closing the peer: simpler
        // to drive deterministically than relying on socket EOF timing.
        session.fail_active(ErrorCode::EOF);
        session.run(t0);
        assert!(!session.is_active());
        assert_eq!(session.seqno(), 2);
    }
}
