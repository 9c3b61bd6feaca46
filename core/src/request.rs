//! Request descriptors and the builder that turns them into `HttpRequest`s.
//!
//! # Design
//! A resource operation is described as data: method, path template, path
//! parameters, query parameters, caller headers and a `Body`. `build`
//! resolves all of that against the service URL without any I/O, so every
//! local failure (missing path parameter, bad URL) is reported before the
//! executor is involved.
//!
//! Header precedence, lowest to highest: client defaults, body negotiation
//! (`Content-Type`), caller headers.

use serde::Serialize;
use url::Url;

use crate::error::{ApiError, ValidationError};
use crate::http::{self, Body, HttpMethod, HttpRequest};

/// Everything needed to build one request for one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub operation: &'static str,
    pub method: HttpMethod,
    pub path: &'static str,
    pub path_params: Vec<(&'static str, String)>,
    pub query: Vec<(&'static str, Option<String>)>,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl RequestDescriptor {
    pub fn new(operation: &'static str, method: HttpMethod, path: &'static str) -> Self {
        Self {
            operation,
            method,
            path,
            path_params: Vec::new(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn path_param(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.path_params.push((name, value.into()));
        self
    }

    /// Add a query parameter. `None` values are dropped at build time.
    pub fn query<V: ToString>(mut self, name: &'static str, value: Option<V>) -> Self {
        self.query.push((name, value.map(|v| v.to_string())));
        self
    }

    /// Set (or clear) a query parameter, replacing any earlier value.
    pub fn set_query(mut self, name: &'static str, value: Option<String>) -> Self {
        self.query.retain(|(n, _)| *n != name);
        self.query.push((name, value));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend_from_slice(headers);
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Serialize `value` as a full JSON body.
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self, ApiError> {
        let value = to_value(self.operation, value)?;
        Ok(self.body(Body::Json(value)))
    }

    /// Serialize `value` as a merge-patch body; only serialized fields are sent.
    pub fn merge_patch<T: Serialize>(self, value: &T) -> Result<Self, ApiError> {
        let value = to_value(self.operation, value)?;
        Ok(self.body(Body::Patch(value)))
    }

    pub fn raw(self, bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        self.body(Body::Raw {
            bytes,
            content_type: content_type.into(),
        })
    }

    /// Resolve the descriptor against `service_url`.
    ///
    /// `defaults` are the client's default headers; they are applied first
    /// and may be overridden by the body negotiation and by caller headers.
    pub fn build(
        &self,
        service_url: &str,
        defaults: &[(String, String)],
    ) -> Result<HttpRequest, ApiError> {
        let path = resolve_path(self.path, &self.path_params)
            .map_err(|e| ApiError::validation(self.operation, e))?;
        let mut url = resolve_url(self.operation, service_url, &path)?;

        let present: Vec<(&str, &str)> = self
            .query
            .iter()
            .filter_map(|(name, value)| value.as_deref().map(|v| (*name, v)))
            .collect();
        if !present.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in present {
                pairs.append_pair(name, value);
            }
        }

        let mut headers = Vec::with_capacity(defaults.len() + self.headers.len() + 1);
        for (name, value) in defaults {
            http::set_header(&mut headers, name, value.clone());
        }

        let body = match &self.body {
            Body::Empty => None,
            Body::Json(value) => {
                http::set_header(&mut headers, http::CONTENT_TYPE, http::JSON.to_string());
                Some(to_bytes(self.operation, value)?)
            }
            Body::Patch(value) => {
                http::set_header(
                    &mut headers,
                    http::CONTENT_TYPE,
                    http::MERGE_PATCH_JSON.to_string(),
                );
                Some(to_bytes(self.operation, value)?)
            }
            Body::Raw {
                bytes,
                content_type,
            } => {
                http::set_header(&mut headers, http::CONTENT_TYPE, content_type.clone());
                Some(bytes.clone())
            }
        };

        for (name, value) in &self.headers {
            http::set_header(&mut headers, name, value.clone());
        }

        Ok(HttpRequest {
            method: self.method,
            url: url.into(),
            headers,
            body,
        })
    }
}

/// Substitute `{name}` placeholders in `template` with percent-encoded values.
pub fn resolve_path(
    template: &str,
    params: &[(&'static str, String)],
) -> Result<String, ValidationError> {
    let malformed = || ValidationError::MalformedPathTemplate {
        template: template.to_string(),
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find(['{', '}']) {
        if rest.as_bytes()[open] == b'}' {
            return Err(malformed());
        }
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(malformed)?;
        let name = &after[..close];
        if name.is_empty() || name.contains('{') {
            return Err(malformed());
        }
        let value = params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ValidationError::MissingPathParameter {
                name: name.to_string(),
            })?;
        out.push_str(&urlencoding::encode(value));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve_url(operation: &'static str, service_url: &str, path: &str) -> Result<Url, ApiError> {
    let joined = format!("{}{}", service_url.trim_end_matches('/'), path);
    let url = Url::parse(&joined).map_err(|e| ApiError::UrlResolution {
        operation,
        url: service_url.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ApiError::UrlResolution {
            operation,
            url: service_url.to_string(),
            message: "expected an absolute http(s) URL".to_string(),
        });
    }
    Ok(url)
}

fn to_value<T: Serialize>(
    operation: &'static str,
    value: &T,
) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(value).map_err(|e| {
        ApiError::validation(operation, ValidationError::Serialization(e.to_string()))
    })
}

fn to_bytes(operation: &'static str, value: &serde_json::Value) -> Result<Vec<u8>, ApiError> {
    serde_json::to_vec(value).map_err(|e| {
        ApiError::validation(operation, ValidationError::Serialization(e.to_string()))
    })
}
