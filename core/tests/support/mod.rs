//! Shared fixtures: a live mock server and transports that count or script
//! round-trips.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use blockstore_core::{
    ClientConfig, HttpRequest, HttpResponse, RetryPolicy, StorageClient, Transport, TransportError,
    UreqTransport,
};
use mock_server::MockOptions;
use parking_lot::Mutex;

/// Start the mock server on a random port and return its `/v1` base URL.
pub fn spawn_server(options: MockOptions) -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run_with(listener, options).await
        })
        .unwrap();
    });

    format!("http://{addr}/v1")
}

/// Real HTTP transport that counts and records every attempt.
#[derive(Default)]
pub struct CountingTransport {
    inner: UreqTransport,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl CountingTransport {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

impl Transport for CountingTransport {
    fn send(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(request.url.clone());
        self.inner.send(request, timeout)
    }
}

/// Transport answering from a fixed script, recording what it was sent.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    sent: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: &HttpRequest,
        _timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        self.sent.lock().push(request.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("script exhausted".to_string())))
    }
}

/// Client against `base_url` with fast retries suitable for tests.
pub fn live_client(base_url: &str, transport: Arc<CountingTransport>) -> StorageClient {
    let config = ClientConfig::builder(base_url)
        .retry(RetryPolicy::new(3, Duration::from_millis(50)).with_min_interval(Duration::from_millis(5)))
        .build();
    StorageClient::with_transport(config, transport)
}
