//! The generic build → authenticate → execute → decode pipeline.
//!
//! # Design
//! `StorageClient` owns its `ClientConfig`, an `Executor` (transport plus
//! retry policy), an `Authenticator` and a `Compressor`. Resource
//! operations (see `resources`) only describe a request and name a result
//! type; every one of them funnels through `send`, so validation, default
//! headers, authentication, compression, retries and error classification
//! happen in exactly one place.
//!
//! The client holds no mutable state and is cheap to share behind `&`.
//! Concurrent calls from several threads each get their own executor run.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::auth::{Authenticator, NoAuth};
use crate::cancel::CallOptions;
use crate::compress::{Compressor, GzipCompressor};
use crate::config::ClientConfig;
use crate::decode;
use crate::error::{ApiError, ValidationError};
use crate::executor::Executor;
use crate::http::{self, HttpRequest, HttpResponse};
use crate::pager::Collection;
use crate::request::RequestDescriptor;
use crate::transport::{Transport, UreqTransport};
use crate::types::Validate;

#[derive(Clone)]
pub struct StorageClient {
    config: ClientConfig,
    executor: Executor,
    authenticator: Arc<dyn Authenticator>,
    compressor: Arc<dyn Compressor>,
}

impl StorageClient {
    /// Client talking to `config.service_url` over a blocking ureq agent.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(UreqTransport::new()))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let executor = Executor::new(transport, config.retry.clone())
            .with_attempt_timeout(config.request_timeout);
        Self {
            config,
            executor,
            authenticator: Arc::new(NoAuth),
            compressor: Arc::new(GzipCompressor::default()),
        }
    }

    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Compressor used when `enable_gzip` is set.
    pub fn with_compressor(mut self, compressor: impl Compressor + 'static) -> Self {
        self.compressor = Arc::new(compressor);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Headers every request starts with. Each call gets a fresh request id.
    fn default_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (http::USER_AGENT.to_string(), self.config.user_agent.clone()),
            (http::ACCEPT.to_string(), http::JSON.to_string()),
            (http::REQUEST_ID.to_string(), Uuid::new_v4().to_string()),
        ];
        headers.extend(self.config.default_headers.iter().cloned());
        headers
    }

    /// Build the executable request for `descriptor`, without sending it.
    pub fn prepare(
        &self,
        descriptor: &RequestDescriptor,
        call: &CallOptions,
    ) -> Result<HttpRequest, ApiError> {
        let operation = descriptor.operation;
        let descriptor = descriptor.clone().headers(&call.headers);
        let mut request = descriptor.build(&self.config.service_url, &self.default_headers())?;

        self.authenticator
            .authenticate(&mut request)
            .map_err(|source| ApiError::Authentication { operation, source })?;

        if self.config.enable_gzip {
            if let Some(body) = &request.body {
                let wrapped = self
                    .compressor
                    .maybe_wrap(body)
                    .map_err(|source| ApiError::Transport { operation, source })?;
                if let Some((compressed, encoding)) = wrapped {
                    request.body = Some(compressed);
                    request.set_header(http::CONTENT_ENCODING, encoding);
                }
            }
        }
        Ok(request)
    }

    /// Build and execute, returning the raw response whatever its status.
    pub fn send(
        &self,
        descriptor: &RequestDescriptor,
        call: &CallOptions,
    ) -> Result<HttpResponse, ApiError> {
        let request = self.prepare(descriptor, call)?;
        let response = self.executor.execute(descriptor.operation, &request, call)?;
        debug!(
            operation = descriptor.operation,
            status = response.status,
            bytes = response.body.len(),
            "call completed"
        );
        Ok(response)
    }

    /// Execute and decode the body into `T`; `None` for an empty 2xx body.
    pub fn invoke<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
        call: &CallOptions,
    ) -> Result<Option<T>, ApiError> {
        let response = self.send(descriptor, call)?;
        decode::parse(descriptor.operation, &response)
    }

    /// Execute an operation whose response body is not interesting.
    pub fn invoke_empty(
        &self,
        descriptor: &RequestDescriptor,
        call: &CallOptions,
    ) -> Result<(), ApiError> {
        let response = self.send(descriptor, call)?;
        decode::check_status(descriptor.operation, &response)
    }

    /// Execute a list call and decode one collection page.
    pub fn fetch_page<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
        items_key: &str,
        call: &CallOptions,
    ) -> Result<Collection<T>, ApiError> {
        let response = self.send(descriptor, call)?;
        Collection::from_response(descriptor.operation, items_key, &response)
    }
}

/// Run `options.validate()` and attach the operation id on failure.
pub(crate) fn validate<V: Validate>(operation: &'static str, options: &V) -> Result<(), ApiError> {
    options
        .validate()
        .map_err(|source| ApiError::Validation { operation, source })
}

/// Reject an empty identifier before it reaches path substitution.
pub(crate) fn require_id(
    operation: &'static str,
    name: &'static str,
    value: &str,
) -> Result<(), ApiError> {
    if value.is_empty() {
        return Err(ApiError::Validation {
            operation,
            source: ValidationError::MissingPathParameter {
                name: name.to_string(),
            },
        });
    }
    Ok(())
}
