//! The `Transport` seam and its default blocking implementation.
//!
//! # Design
//! The executor only ever talks to `dyn Transport`, so tests can script
//! responses and count calls without a socket. `UreqTransport` is the real
//! implementation: status codes come back as data (never as errors), the
//! per-attempt timeout is applied as ureq's global timeout, and the body is
//! read to completion before returning so the connection goes back to the
//! agent on every path.

use std::time::Duration;

use ureq::http::{Method, Request};

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Sends one request and returns the full response.
pub trait Transport: Send + Sync {
    /// `timeout` bounds the whole attempt; `None` means no bound.
    fn send(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError>;
}

/// Blocking transport backed by a shared `ureq::Agent` (and its connection pool).
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        // 3xx responses come back as data so the decoder reports them.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .build()
            .new_agent();
        Self { agent }
    }

    fn run<S: ureq::AsSendBody>(
        &self,
        request: Request<S>,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        let configured = self
            .agent
            .configure_request(request)
            .timeout_global(timeout)
            .build();

        let mut response = self
            .agent
            .run(configured)
            .map_err(|e| classify(e, timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| classify(e, timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl Transport for UreqTransport {
    fn send(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = Request::builder()
            .method(method(request.method))
            .uri(request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match &request.body {
            Some(body) => {
                let request = builder
                    .body(body.clone())
                    .map_err(|e| TransportError::Request(e.to_string()))?;
                self.run(request, timeout)
            }
            None => {
                let request = builder
                    .body(())
                    .map_err(|e| TransportError::Request(e.to_string()))?;
                self.run(request, timeout)
            }
        }
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn classify(error: ureq::Error, timeout: Option<Duration>) -> TransportError {
    match error {
        ureq::Error::Timeout(_) => TransportError::Timeout(timeout.unwrap_or_default()),
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => {
            TransportError::Connect(error.to_string())
        }
        ureq::Error::Io(e) => TransportError::Io(e.to_string()),
        ureq::Error::BadUri(uri) => TransportError::Request(format!("bad URI: {uri}")),
        ureq::Error::Http(e) => TransportError::Request(e.to_string()),
        other => TransportError::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_host_is_a_connect_or_io_failure() {
        // Port 9 on localhost is reserved (discard) and normally closed.
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "http://127.0.0.1:9/volumes".to_string(),
            headers: Vec::new(),
            body: None,
        };
        let err = UreqTransport::new()
            .send(&request, Some(Duration::from_secs(2)))
            .unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }

    #[test]
    fn methods_map_to_http_methods() {
        assert_eq!(method(HttpMethod::Patch), Method::PATCH);
        assert_eq!(method(HttpMethod::Delete), Method::DELETE);
    }
}
