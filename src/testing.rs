//! Test-only helpers: a real non-blocking loopback stream pair, and a
//! controllable clock for exercising [`crate::reconnect`] without
//! sleeping in real time.

#![cfg(test)]

use std::time::{Duration, Instant};

/// Builds a connected, always-non-blocking pair of streams for driving
/// [`crate::connection::Connection`] tests over a real socket rather
/// than a hand-rolled mock. `mio::net::UnixStream` already implements
/// [`crate::stream::MioStream`] (see `stream.rs`), so the pair can also
/// drive the `*_block` wrappers, which need real `mio::Poll`
/// registration and would panic against a mock whose
/// `as_mio_stream()` returns `None`.
#[cfg(unix)]
pub(crate) fn construct_socketpair() -> std::io::Result<(mio::net::UnixStream, mio::net::UnixStream)> {
    mio::net::UnixStream::pair()
}

/// A fake clock for backoff/liveness tests: hands out `Instant`s
/// advancing deterministically from a fixed epoch captured once at
/// construction, since `Instant` can't otherwise be built out of thin
/// air.
#[derive(Debug, Clone)]
pub(crate) struct FakeClock {
    epoch: Instant,
    offset: Duration,
}

impl FakeClock {
    pub(crate) fn new() -> Self {
        FakeClock {
            epoch: Instant::now(),
            offset: Duration::ZERO,
        }
    }

    pub(crate) fn now(&self) -> Instant {
        self.epoch + self.offset
    }

    pub(crate) fn advance(&mut self, d: Duration) -> Instant {
        self.offset += d;
        self.now()
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
    use std::io::{Read, Write};

    #[test]
    #[cfg(unix)]
    fn socketpair_is_bidirectional_and_nonblocking() {
        let (mut a, mut b) = construct_socketpair().unwrap();
        // nothing written yet: a nonblocking read must not block
        let mut buf = [0u8; 16];
        assert_eq!(
            a.read(&mut buf).unwrap_err().kind(),
            std::io::ErrorKind::WouldBlock
        );
        b.write_all(b"hello").unwrap();
        let n = a.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn fake_clock_advances_deterministically() {
        let mut clock = FakeClock::new();
        let t0 = clock.now();
        let t1 = clock.advance(Duration::from_secs(5));
        assert_eq!(t1, t0 + Duration::from_secs(5));
        assert_eq!(clock.now(), t1);
    }
}
