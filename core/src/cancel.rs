//! Per-call deadline, cancellation and header options.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Cooperative cancellation signal shared between a caller and a running call.
///
/// Clones observe the same state. Threads blocked in [`wait_for`] wake as
/// soon as [`cancel`] is called.
///
/// [`wait_for`]: CancellationToken::wait_for
/// [`cancel`]: CancellationToken::cancel
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block for up to `timeout`. Returns `true` if the token was cancelled.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if cvar.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// Options attached to a single logical call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub deadline: Option<Instant>,
    pub cancellation: Option<CancellationToken>,
    pub headers: Vec<(String, String)>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Time left before the deadline; `None` without a deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Sleep for `delay`, waking early on cancellation.
    /// Returns `true` if the sleep was cut short by cancellation.
    pub fn sleep(&self, delay: Duration) -> bool {
        match &self.cancellation {
            Some(token) => token.wait_for(delay),
            None => {
                std::thread::sleep(delay);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_wakes_waiter_promptly() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let started = Instant::now();
        let handle = std::thread::spawn(move || remote.wait_for(Duration::from_secs(10)));
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn wait_times_out_without_cancel() {
        let token = CancellationToken::new();
        assert!(!token.wait_for(Duration::from_millis(10)));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn remaining_and_expiry() {
        let opts = CallOptions::new();
        assert!(opts.remaining().is_none());
        assert!(!opts.is_expired());

        let opts = CallOptions::new().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(opts.is_expired());

        let opts = CallOptions::new().with_timeout(Duration::from_secs(60));
        assert!(opts.remaining().unwrap() > Duration::from_secs(50));
    }

    #[test]
    fn sleep_is_cut_short_by_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let opts = CallOptions::new().with_cancellation(token);
        assert!(opts.is_cancelled());
        let started = Instant::now();
        assert!(opts.sleep(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
