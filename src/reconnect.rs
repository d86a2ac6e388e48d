//! A synchronous exponential-backoff reconnect controller.
//!
//! Drives the CONNECT/DISCONNECT/PROBE decisions a
//! [`Session`](crate::session::Session) acts on. Unlike an async
//! backoff runner driven by a executor, this is a plain step function:
//! the caller polls [`ReconnectController::run`] and [`wait`] from its
//! own non-blocking loop.

use std::time::{Duration, Instant};

/// A command a [`ReconnectController`] advises its caller to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Nothing to do right now.
    None,
    /// Open a new stream.
    Connect,
    /// Tear down the current connection/attempt.
    Disconnect,
    /// Send a liveness probe on the current connection.
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disabled,
    Idle,
    Connecting { since: Instant, attempt: u32 },
    WaitingToRetry { retry_at: Instant, attempt: u32 },
    Active { connected_at: Instant, last_probe: Option<Instant> },
    GaveUp,
}

/// The exponential-backoff schedule: delay doubles per attempt, capped,
/// with a liveness probe interval once connected.
///
/// Grounded on the shape of an async backoff schedule (a notion of
/// "next delay given an attempt count", a retry ceiling, an overall
/// give-up condition), reworked into a synchronous `Instant`-driven
/// step function with no executor involved.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    name: String,
    max_tries: Option<u32>,
    enabled: bool,
    state: State,
    initial_delay: Duration,
    max_delay: Duration,
    probe_interval: Duration,
    force_probe: bool,
    force_reconnect: bool,
}

impl ReconnectController {
    /// Creates a controller in the "not yet enabled" state.
    pub fn create(_now: Instant) -> Self {
        ReconnectController {
            name: String::new(),
            max_tries: None,
            enabled: false,
            state: State::Disabled,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
            probe_interval: Duration::from_secs(30),
            force_probe: false,
            force_reconnect: false,
        }
    }

    /// Sets the human-readable name used in logging.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// The controller's name.
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Sets the maximum number of consecutive failed attempts before
    /// giving up permanently. `None` means unlimited.
    pub fn set_max_tries(&mut self, n: Option<u32>) {
        self.max_tries = n;
    }

    /// The configured retry ceiling.
    pub fn get_max_tries(&self) -> Option<u32> {
        self.max_tries
    }

    /// Permits the controller to start issuing `Connect` commands.
    pub fn enable(&mut self, now: Instant) {
        self.enabled = true;
        if matches!(self.state, State::Disabled) {
            self.state = State::WaitingToRetry {
                retry_at: now,
                attempt: 0,
            };
        }
    }

    /// Notifies the controller that a connect attempt has begun.
    pub fn connecting(&mut self, now: Instant) {
        let attempt = self.current_attempt();
        self.state = State::Connecting { since: now, attempt };
    }

    /// Notifies the controller that the connection succeeded.
    pub fn connected(&mut self, now: Instant) {
        self.state = State::Active {
            connected_at: now,
            last_probe: None,
        };
    }

    /// Notifies the controller that a connect attempt failed.
    pub fn connect_failed(&mut self, now: Instant, _err: &str) {
        self.schedule_retry(now);
    }

    /// Notifies the controller that an established connection was lost.
    pub fn disconnected(&mut self, now: Instant, _err: &str) {
        self.schedule_retry(now);
    }

    /// Notifies the controller that data was received (evidence of
    /// liveness; resets the probe clock).
    pub fn received(&mut self, now: Instant) {
        if let State::Active { last_probe, .. } = &mut self.state {
            *last_probe = Some(now);
        }
    }

    /// Requests an immediate reconnect regardless of backoff state.
    pub fn force_reconnect(&mut self, _now: Instant) {
        self.force_reconnect = true;
    }

    fn current_attempt(&self) -> u32 {
        match self.state {
            State::WaitingToRetry { attempt, .. } => attempt,
            State::Connecting { attempt, .. } => attempt,
            _ => 0,
        }
    }

    fn schedule_retry(&mut self, now: Instant) {
        let attempt = self.current_attempt() + 1;
        if let Some(max) = self.max_tries {
            if attempt > max {
                self.state = State::GaveUp;
                return;
            }
        }
        let delay = self.delay_for_attempt(attempt);
        self.state = State::WaitingToRetry {
            retry_at: now + delay,
            attempt,
        };
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // attempt 1 uses the base delay; each attempt after that doubles it.
        let shift = attempt.saturating_sub(1).min(16);
        let scale = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        self.initial_delay
            .checked_mul(scale as u32)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Advances the controller and returns the command its caller
    /// should act on.
    pub fn run(&mut self, now: Instant) -> Command {
        if std::mem::take(&mut self.force_reconnect) {
            self.state = State::WaitingToRetry {
                retry_at: now,
                attempt: self.current_attempt(),
            };
            return Command::Disconnect;
        }

        if !self.enabled {
            return Command::None;
        }

        match self.state {
            State::Disabled | State::GaveUp => Command::None,
            State::WaitingToRetry { retry_at, .. } if now >= retry_at => Command::Connect,
            State::WaitingToRetry { .. } => Command::None,
            State::Connecting { .. } => Command::None,
            State::Active { last_probe, connected_at, .. } => {
                let last = last_probe.unwrap_or(connected_at);
                if now.duration_since(last) >= self.probe_interval {
                    Command::Probe
                } else {
                    Command::None
                }
            }
            State::Idle => Command::None,
        }
    }

    /// How long until [`ReconnectController::run`] would next return a
    /// non-`None` command, for registering a timeout with the
    /// readiness layer.
    pub fn wait(&self, now: Instant) -> Option<Duration> {
        match self.state {
            State::Disabled | State::GaveUp | State::Idle | State::Connecting { .. } => None,
            State::WaitingToRetry { retry_at, .. } => Some(retry_at.saturating_duration_since(now)),
            State::Active { last_probe, connected_at, .. } => {
                let last = last_probe.unwrap_or(connected_at);
                let elapsed = now.duration_since(last);
                Some(self.probe_interval.saturating_sub(elapsed))
            }
        }
    }

    /// Whether the controller has permanently given up (exhausted
    /// `max_tries`).
    pub fn has_given_up(&self) -> bool {
        matches!(self.state, State::GaveUp)
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
    use crate::testing::FakeClock;

    #[test]
    fn disabled_controller_never_connects() {
        let mut clock = FakeClock::new();
        let t0 = clock.now();
        let mut c = ReconnectController::create(t0);
        assert_eq!(c.run(t0), Command::None);
        let t1 = clock.advance(Duration::from_secs(100));
        assert_eq!(c.run(t1), Command::None);
    }

    #[test]
    fn enable_then_connect_immediately() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        let mut c = ReconnectController::create(t0);
        c.enable(t0);
        assert_eq!(c.run(t0), Command::Connect);
    }

    #[test]
    fn failed_connect_backs_off_exponentially() {
        let mut clock = FakeClock::new();
        let t0 = clock.now();
        let mut c = ReconnectController::create(t0);
        c.enable(t0);
        assert_eq!(c.run(t0), Command::Connect);
        c.connecting(t0);
        c.connect_failed(t0, "refused");
        let first_delay = c.wait(t0).unwrap();
        assert_eq!(first_delay, Duration::from_millis(200));

        // not yet time
        let t_partial = clock.advance(Duration::from_millis(100));
        assert_eq!(c.run(t_partial), Command::None);
        let t1 = clock.advance(first_delay - Duration::from_millis(100));
        assert_eq!(c.run(t1), Command::Connect);

        c.connecting(t1);
        c.connect_failed(t1, "refused again");
        let second_delay = c.wait(t1).unwrap();
        assert_eq!(second_delay, Duration::from_millis(400));
    }

    #[test]
    fn max_tries_gives_up() {
        let mut clock = FakeClock::new();
        let t0 = clock.now();
        let mut c = ReconnectController::create(t0);
        c.set_max_tries(Some(1));
        c.enable(t0);
        assert_eq!(c.run(t0), Command::Connect);
        c.connecting(t0);
        c.connect_failed(t0, "refused");
        assert!(!c.has_given_up());
        let retry_at = clock.advance(c.wait(t0).unwrap());
        assert_eq!(c.run(retry_at), Command::Connect);
        c.connecting(retry_at);
        c.connect_failed(retry_at, "refused again");
        assert!(c.has_given_up());
        let t_later = clock.advance(Duration::from_secs(1000));
        assert_eq!(c.run(t_later), Command::None);
    }

    #[test]
    fn connected_then_probes_after_interval() {
        let mut clock = FakeClock::new();
        let t0 = clock.now();
        let mut c = ReconnectController::create(t0);
        c.enable(t0);
        c.run(t0);
        c.connecting(t0);
        c.connected(t0);
        let t1 = clock.advance(Duration::from_secs(1));
        assert_eq!(c.run(t1), Command::None);
        let t2 = clock.advance(Duration::from_secs(30));
        assert_eq!(c.run(t2), Command::Probe);
    }

    #[test]
    fn received_resets_probe_clock() {
        let mut clock = FakeClock::new();
        let t0 = clock.now();
        let mut c = ReconnectController::create(t0);
        c.enable(t0);
        c.run(t0);
        c.connecting(t0);
        c.connected(t0);
        let t1 = clock.advance(Duration::from_secs(20));
        c.received(t1);
        // probe interval restarts from t1, so at t0+31s we shouldn't probe yet
        let t0_plus_31 = clock.advance(Duration::from_secs(11));
        assert_eq!(c.run(t0_plus_31), Command::None);
        let t1_plus_31 = clock.advance(Duration::from_secs(20));
        assert_eq!(c.run(t1_plus_31), Command::Probe);
    }

    #[test]
    fn disconnect_after_active_schedules_retry() {
        let mut clock = FakeClock::new();
        let t0 = clock.now();
        let mut c = ReconnectController::create(t0);
        c.enable(t0);
        c.run(t0);
        c.connecting(t0);
        c.connected(t0);
        c.disconnected(t0, "reset by peer");
        assert_eq!(c.run(t0), Command::None);
        let retry_at = clock.advance(c.wait(t0).unwrap());
        assert_eq!(c.run(retry_at), Command::Connect);
    }

    #[test]
    fn force_reconnect_overrides_backoff() {
        let mut clock = FakeClock::new();
        let t0 = clock.now();
        let mut c = ReconnectController::create(t0);
        c.enable(t0);
        c.run(t0);
        c.connecting(t0);
        c.connected(t0);
        c.force_reconnect(t0);
        let t1 = clock.advance(Duration::from_millis(5));
        assert_eq!(c.run(t1), Command::Disconnect);
    }
}
