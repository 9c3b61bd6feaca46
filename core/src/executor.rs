//! Retrying, deadline-aware execution of a single logical call.
//!
//! # Design
//! `Executor::execute` is the only place that decides whether an attempt is
//! repeated. Transport failures are retried when `TransportError` says they
//! are connection-level; responses are retried when their status is in the
//! policy's retryable set. Everything else, including 2xx and ordinary 4xx,
//! is handed back after the first attempt.
//!
//! The caller's deadline bounds every attempt (it becomes the transport
//! timeout) and every backoff sleep: a sleep that would end past the
//! deadline is not started and the call fails with `Timeout` instead. With a
//! cancellation token attached, the attempt runs on a worker thread so the
//! executor can stop waiting as soon as the token fires; the worker still
//! finishes within the attempt timeout and drops what it received. When
//! neither a deadline nor a per-attempt cap applies, the worker is bounded
//! by the worker limit instead, so an abandoned attempt never outlives it.
//!
//! When retries run out on a retryable status, the last response is
//! returned unchanged so the decoder reports it as an ordinary HTTP error.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::CallOptions;
use crate::error::{ApiError, TransportError};
use crate::http::{HttpRequest, HttpResponse};
use crate::retry::RetryPolicy;
use crate::transport::Transport;

/// Poll interval while waiting on a worker thread with a cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(5);

/// Transport timeout for a worker-thread attempt that has no other bound.
pub const DEFAULT_WORKER_LIMIT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    attempt_timeout: Option<Duration>,
    worker_limit: Duration,
}

impl Executor {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            attempt_timeout: None,
            worker_limit: DEFAULT_WORKER_LIMIT,
        }
    }

    /// Upper bound for a single attempt, applied even without a deadline.
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Timeout given to a cancellable attempt when nothing else bounds it.
    pub fn with_worker_limit(mut self, limit: Duration) -> Self {
        self.worker_limit = limit;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn execute(
        &self,
        operation: &'static str,
        request: &HttpRequest,
        call: &CallOptions,
    ) -> Result<HttpResponse, ApiError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if call.is_cancelled() {
                return Err(ApiError::Cancelled { operation });
            }
            if call.is_expired() {
                return Err(timeout(operation, started));
            }

            debug!(
                operation,
                attempt = attempt + 1,
                method = %request.method,
                url = %request.url,
                "sending request"
            );

            let (budget, deadline_bound) = self.attempt_budget(call);
            let response = match self.attempt(operation, request, call, budget, started)? {
                Ok(response) => {
                    debug!(operation, attempt = attempt + 1, status = response.status, "received response");
                    if !self.policy.should_retry_status(response.status)
                        || !self.policy.has_attempts_left(attempt)
                    {
                        return Ok(response);
                    }
                    Some(response)
                }
                Err(TransportError::Timeout(_)) if deadline_bound => {
                    return Err(timeout(operation, started));
                }
                Err(error) => {
                    debug!(operation, attempt = attempt + 1, error = %error, "request failed");
                    if !self.policy.should_retry_error(&error)
                        || !self.policy.has_attempts_left(attempt)
                    {
                        return Err(ApiError::Transport {
                            operation,
                            source: error,
                        });
                    }
                    None
                }
            };

            let delay = self.policy.backoff(attempt, response.as_ref());
            if call.remaining().is_some_and(|left| left <= delay) {
                return Err(timeout(operation, started));
            }
            warn!(
                operation,
                attempt = attempt + 1,
                status = response.as_ref().map(|r| r.status),
                delay_ms = delay.as_millis() as u64,
                "retrying request"
            );
            if call.sleep(delay) {
                return Err(ApiError::Cancelled { operation });
            }
            attempt += 1;
        }
    }

    /// Timeout for the next attempt, and whether it is the caller's
    /// deadline (rather than the per-attempt cap) that bounds it.
    fn attempt_budget(&self, call: &CallOptions) -> (Option<Duration>, bool) {
        match (call.remaining(), self.attempt_timeout) {
            (Some(left), Some(cap)) if cap < left => (Some(cap), false),
            (Some(left), _) => (Some(left), true),
            (None, cap) => (cap, false),
        }
    }

    /// One attempt. The outer `Result` carries outcomes that end the call
    /// regardless of policy (cancellation, deadline while waiting).
    fn attempt(
        &self,
        operation: &'static str,
        request: &HttpRequest,
        call: &CallOptions,
        timeout: Option<Duration>,
        started: Instant,
    ) -> Result<Result<HttpResponse, TransportError>, ApiError> {
        let Some(token) = call.cancellation.clone() else {
            return Ok(self.transport.send(request, timeout));
        };

        let timeout = timeout.or(Some(self.worker_limit));
        let (tx, rx) = mpsc::channel();
        let transport = Arc::clone(&self.transport);
        let owned = request.clone();
        std::thread::spawn(move || {
            // The receiver is gone if the call was abandoned; the response
            // is simply dropped.
            let _ = tx.send(transport.send(&owned, timeout));
        });

        loop {
            match rx.recv_timeout(CANCEL_POLL) {
                Ok(result) => return Ok(result),
                Err(RecvTimeoutError::Timeout) => {
                    if token.is_cancelled() {
                        return Err(ApiError::Cancelled { operation });
                    }
                    if call.is_expired() {
                        return Err(self::timeout(operation, started));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Ok(Err(TransportError::Other(
                        "transport worker exited without a result".to_string(),
                    )));
                }
            }
        }
    }
}

fn timeout(operation: &'static str, started: Instant) -> ApiError {
    ApiError::Timeout {
        operation,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::cancel::CancellationToken;
    use crate::error::ErrorKind;
    use crate::http::HttpMethod;

    /// Replays a fixed script of outcomes, optionally sleeping before each.
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        latency: Duration,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Self::slow(outcomes, Duration::ZERO)
        }

        fn slow(outcomes: Vec<Result<HttpResponse, TransportError>>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                latency,
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    impl Transport for Scripted {
        fn send(
            &self,
            _request: &HttpRequest,
            timeout: Option<Duration>,
        ) -> Result<HttpResponse, TransportError> {
            *self.calls.lock() += 1;
            if !self.latency.is_zero() {
                if let Some(t) = timeout.filter(|t| *t < self.latency) {
                    std::thread::sleep(t);
                    return Err(TransportError::Timeout(t));
                }
                std::thread::sleep(self.latency);
            }
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(200, "")))
        }
    }

    fn request() -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: "http://localhost/volumes".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy::new(retries, Duration::from_millis(20)).with_min_interval(Duration::from_millis(1))
    }

    #[test]
    fn success_is_not_retried() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(200, "{}"))]);
        let exec = Executor::new(transport.clone(), fast_policy(3));
        let resp = exec.execute("get_volume", &request(), &CallOptions::new()).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn retryable_status_is_retried_until_success() {
        let transport = Scripted::new(vec![
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::new(429, "")),
            Ok(HttpResponse::new(200, "{}")),
        ]);
        let exec = Executor::new(transport.clone(), fast_policy(3));
        let resp = exec.execute("list_volumes", &request(), &CallOptions::new()).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(transport.calls(), 3);
    }

    #[test]
    fn exhausted_retries_return_last_response() {
        let transport = Scripted::new(vec![
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::new(503, "still down")),
        ]);
        let exec = Executor::new(transport.clone(), fast_policy(2));
        let resp = exec.execute("list_volumes", &request(), &CallOptions::new()).unwrap();
        assert_eq!(resp.status, 503);
        assert_eq!(resp.body_text(), "still down");
        assert_eq!(transport.calls(), 3);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(404, ""))]);
        let exec = Executor::new(transport.clone(), fast_policy(3));
        let resp = exec.execute("get_volume", &request(), &CallOptions::new()).unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn disabled_policy_makes_exactly_one_attempt() {
        let transport = Scripted::new(vec![Err(TransportError::Connect("refused".into()))]);
        let exec = Executor::new(transport.clone(), RetryPolicy::disabled());
        let err = exec.execute("list_volumes", &request(), &CallOptions::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn connection_failures_are_retried() {
        let transport = Scripted::new(vec![
            Err(TransportError::Connect("refused".into())),
            Ok(HttpResponse::new(201, "{}")),
        ]);
        let exec = Executor::new(transport.clone(), fast_policy(1));
        let resp = exec.execute("create_volume", &request(), &CallOptions::new()).unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn request_assembly_failures_are_not_retried() {
        let transport = Scripted::new(vec![Err(TransportError::Request("bad header".into()))]);
        let exec = Executor::new(transport.clone(), fast_policy(3));
        let err = exec.execute("list_volumes", &request(), &CallOptions::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn deadline_fails_identically_with_and_without_retries() {
        for policy in [RetryPolicy::disabled(), fast_policy(0), fast_policy(3)] {
            let transport = Scripted::slow(vec![], Duration::from_millis(100));
            let exec = Executor::new(transport, policy);
            let call = CallOptions::new().with_timeout(Duration::from_millis(80));
            let err = exec.execute("list_volumes", &request(), &call).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Timeout);
            assert!(err.to_string().contains("deadline exceeded"));
        }
    }

    #[test]
    fn backoff_past_deadline_is_a_timeout() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(503, ""))]);
        let policy = RetryPolicy::new(3, Duration::from_secs(10)).with_min_interval(Duration::from_secs(5));
        let exec = Executor::new(transport.clone(), policy);
        let call = CallOptions::new().with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = exec.execute("list_volumes", &request(), &call).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn cancellation_during_backoff_stops_promptly() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(503, ""))]);
        let policy = RetryPolicy::new(3, Duration::from_secs(10)).with_min_interval(Duration::from_secs(5));
        let exec = Executor::new(transport.clone(), policy);
        let token = CancellationToken::new();
        let call = CallOptions::new().with_cancellation(token.clone());

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        });
        let started = Instant::now();
        let err = exec.execute("list_volumes", &request(), &call).unwrap_err();
        canceller.join().unwrap();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn cancellation_while_in_flight_stops_promptly() {
        let transport = Scripted::slow(vec![], Duration::from_secs(2));
        let exec = Executor::new(transport, RetryPolicy::disabled());
        let token = CancellationToken::new();
        let call = CallOptions::new().with_cancellation(token.clone());

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        });
        let started = Instant::now();
        let err = exec.execute("list_volumes", &request(), &call).unwrap_err();
        canceller.join().unwrap();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn already_cancelled_call_makes_no_attempt() {
        let transport = Scripted::new(vec![]);
        let exec = Executor::new(transport.clone(), fast_policy(3));
        let token = CancellationToken::new();
        token.cancel();
        let call = CallOptions::new().with_cancellation(token);
        let err = exec.execute("list_volumes", &request(), &call).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(transport.calls(), 0);
    }

    /// Blocks until its timeout elapses, recording the timeout and the exit.
    #[derive(Default)]
    struct Hanging {
        timeout: Mutex<Option<Option<Duration>>>,
        exited: AtomicBool,
    }

    impl Transport for Hanging {
        fn send(
            &self,
            _request: &HttpRequest,
            timeout: Option<Duration>,
        ) -> Result<HttpResponse, TransportError> {
            *self.timeout.lock() = Some(timeout);
            let wait = timeout.unwrap_or(Duration::from_secs(30));
            std::thread::sleep(wait);
            self.exited.store(true, Ordering::SeqCst);
            Err(TransportError::Timeout(wait))
        }
    }

    #[test]
    fn abandoned_worker_is_bounded_without_deadline_or_cap() {
        let transport = Arc::new(Hanging::default());
        let exec = Executor::new(transport.clone(), RetryPolicy::disabled())
            .with_attempt_timeout(None)
            .with_worker_limit(Duration::from_millis(50));
        let token = CancellationToken::new();
        let call = CallOptions::new().with_cancellation(token.clone());

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            token.cancel();
        });
        let err = exec.execute("list_volumes", &request(), &call).unwrap_err();
        canceller.join().unwrap();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(*transport.timeout.lock(), Some(Some(Duration::from_millis(50))));

        let waited = Instant::now();
        while !transport.exited.load(Ordering::SeqCst) {
            assert!(waited.elapsed() < Duration::from_secs(1), "worker still running");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn worker_keeps_the_attempt_cap_when_one_is_set() {
        let transport = Arc::new(Hanging::default());
        let exec = Executor::new(transport.clone(), RetryPolicy::disabled())
            .with_attempt_timeout(Some(Duration::from_millis(20)))
            .with_worker_limit(Duration::from_secs(5));
        let call = CallOptions::new().with_cancellation(CancellationToken::new());

        let err = exec.execute("list_volumes", &request(), &call).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(*transport.timeout.lock(), Some(Some(Duration::from_millis(20))));
    }
}
