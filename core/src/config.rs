//! Client configuration.
//!
//! # Design
//! Everything that would otherwise be SDK-wide state (service URL, retry
//! policy, gzip, default headers) lives in a `ClientConfig` value owned by
//! each `StorageClient`, so clients with different policies can coexist.
//! The struct derives `Deserialize` so a host application can embed it in
//! its own configuration file; reading files or the environment is the
//! host's job.

use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = concat!("blockstore-core/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    pub service_url: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Ceiling for a single attempt, independent of any per-call deadline.
    #[serde(default = "default_request_timeout", with = "optional_millis")]
    pub request_timeout: Option<Duration>,
    #[serde(default)]
    pub enable_gzip: bool,
    #[serde(default)]
    pub default_headers: Vec<(String, String)>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_request_timeout() -> Option<Duration> {
    Some(Duration::from_secs(60))
}

impl ClientConfig {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
            retry: RetryPolicy::default(),
            request_timeout: default_request_timeout(),
            enable_gzip: false,
            default_headers: Vec::new(),
            user_agent: default_user_agent(),
        }
    }

    pub fn builder(service_url: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::new(service_url),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Shorthand for `RetryPolicy::new(max_retries, max_interval)`.
    pub fn retries(mut self, max_retries: u32, max_interval: Duration) -> Self {
        self.config.retry = RetryPolicy::new(max_retries, max_interval);
        self
    }

    pub fn disable_retries(mut self) -> Self {
        self.config.retry = RetryPolicy::disabled();
        self
    }

    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn enable_gzip(mut self, enabled: bool) -> Self {
        self.config.enable_gzip = enabled;
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
