//! A small synchronous rate limiter for warn-level logging.
//!
//! A wedged or hostile peer can otherwise make a single call site log
//! thousands of times a second; this caps each site to a budget per
//! window and reports how much was suppressed once the window rolls.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default event budget per window, per call site.
const DEFAULT_BUDGET: u32 = 5;
/// Default window length.
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

struct Inner {
    window_start: Instant,
    count: u32,
    suppressed: u32,
}

/// A rate limiter for one log call site.
///
/// Construct one `RateLimitedWarn` per site (typically as a
/// `static`-adjacent field or a field on the owning struct) and call
/// [`RateLimitedWarn::event`] at each place you'd otherwise call
/// `tracing::warn!` directly.
pub struct RateLimitedWarn {
    site: &'static str,
    budget: u32,
    window: Duration,
    inner: Mutex<Option<Inner>>,
}

impl RateLimitedWarn {
    /// Creates a limiter for `site`, using the default budget (5 events
    /// per 5 seconds).
    pub fn new(site: &'static str) -> Self {
        Self::with_budget(site, DEFAULT_BUDGET, DEFAULT_WINDOW)
    }

    /// Creates a limiter for `site` with an explicit budget and window.
    pub fn with_budget(site: &'static str, budget: u32, window: Duration) -> Self {
        RateLimitedWarn {
            site,
            budget,
            window,
            inner: Mutex::new(None),
        }
    }

    /// Records one warning-worthy event at `now`, logging it via
    /// `tracing::warn!` unless this window's budget is already spent.
    ///
    /// When a suppressed window rolls over, one extra line is emitted
    /// noting how many events were dropped.
    pub fn event(&self, now: Instant, message: &dyn std::fmt::Display) {
        let mut guard = self.inner.lock().expect("rate limiter mutex poisoned");
        let inner = guard.get_or_insert_with(|| Inner {
            window_start: now,
            count: 0,
            suppressed: 0,
        });

        if now.duration_since(inner.window_start) >= self.window {
            if inner.suppressed > 0 {
                tracing::warn!(
                    site = self.site,
                    suppressed = inner.suppressed,
                    "suppressed {} further warnings at {} in the last window",
                    inner.suppressed,
                    self.site
                );
            }
            inner.window_start = now;
            inner.count = 0;
            inner.suppressed = 0;
        }

        if inner.count < self.budget {
            inner.count += 1;
            tracing::warn!(site = self.site, "{message}");
        } else {
            inner.suppressed += 1;
        }
    }
}
