//! Response status interpretation and body decoding.
//!
//! # Design
//! `check_status` turns any status of 300 or above into `ApiError::Http`,
//! pulling the trace id and error list out of the service's error payload
//! when there is one. `decode` then maps a successful response to
//! `Some(T)`, or to `None` when the body is empty: several endpoints answer
//! 200/201/204 without a payload, and that is not a decode failure.
//!
//! Decoding leans on serde's defaults: unknown fields are ignored, fields
//! marked `#[serde(default)]` tolerate absence, and everything else is
//! mandatory.

use serde::de::DeserializeOwned;

use crate::error::{ApiError, ServiceErrorBody};
use crate::http::HttpResponse;

const TRACE_HEADERS: [&str; 2] = ["X-Request-Id", "X-Correlation-Id"];

/// Map non-success status codes to `ApiError::Http`.
pub fn check_status(operation: &'static str, response: &HttpResponse) -> Result<(), ApiError> {
    if response.is_success() {
        return Ok(());
    }

    let body = response.body_text();
    let payload: ServiceErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
    let message = payload
        .summary()
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| status_text(response.status).to_string());
    let trace = payload.trace.clone().or_else(|| {
        TRACE_HEADERS
            .iter()
            .find_map(|h| response.header(h))
            .map(str::to_string)
    });

    Err(ApiError::Http {
        operation,
        status: response.status,
        message,
        trace,
        errors: payload.errors,
        body,
    })
}

/// Decode a successful response body into `T`.
///
/// Returns `Ok(None)` for an empty (or whitespace-only) body.
pub fn decode<T: DeserializeOwned>(
    operation: &'static str,
    response: &HttpResponse,
) -> Result<Option<T>, ApiError> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&response.body)
        .map(Some)
        .map_err(|e| ApiError::decode(operation, e.to_string()))
}

/// `check_status` followed by `decode`.
pub fn parse<T: DeserializeOwned>(
    operation: &'static str,
    response: &HttpResponse,
) -> Result<Option<T>, ApiError> {
    check_status(operation, response)?;
    decode(operation, response)
}

fn status_text(status: u16) -> &'static str {
    match status {
        300..=399 => "unexpected redirect",
        400 => "bad request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not found",
        409 => "conflict",
        429 => "too many requests",
        500 => "internal server error",
        502 => "bad gateway",
        503 => "service unavailable",
        504 => "gateway timeout",
        _ => "unexpected status",
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::error::ErrorKind;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Thing {
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        capacity: i64,
    }

    #[test]
    fn empty_success_bodies_decode_to_none() {
        for status in [200, 201, 204] {
            let resp = HttpResponse::new(status, "");
            let out: Option<Thing> = parse("get_thing", &resp).unwrap();
            assert!(out.is_none(), "status {status}");
        }
        let resp = HttpResponse::new(200, "  \n");
        assert!(parse::<Thing>("get_thing", &resp).unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let resp = HttpResponse::new(200, "} this is not valid json {");
        let err = parse::<Thing>("get_thing", &resp).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.operation(), "get_thing");
    }

    #[test]
    fn unknown_fields_are_ignored_and_optional_fields_default() {
        let resp = HttpResponse::new(200, r#"{"id":"t1","color":"blue"}"#);
        let out: Thing = parse("get_thing", &resp).unwrap().unwrap();
        assert_eq!(
            out,
            Thing {
                id: "t1".to_string(),
                name: None,
                capacity: 0
            }
        );
    }

    #[test]
    fn missing_mandatory_field_is_a_decode_error() {
        let resp = HttpResponse::new(200, r#"{"name":"no id"}"#);
        let err = parse::<Thing>("get_thing", &resp).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn error_payload_populates_http_error() {
        let resp = HttpResponse::new(
            404,
            r#"{"errors":[{"code":"volume_not_found","message":"Volume not found"}],"trace":"trace-9"}"#,
        );
        let err = parse::<Thing>("get_volume", &resp).unwrap_err();
        match err {
            ApiError::Http {
                status,
                message,
                trace,
                errors,
                ..
            } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Volume not found");
                assert_eq!(trace.as_deref(), Some("trace-9"));
                assert_eq!(errors[0].code.as_deref(), Some("volume_not_found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn trace_falls_back_to_response_header() {
        let resp = HttpResponse::new(500, "upstream exploded").with_header("x-correlation-id", "c-7");
        let err = parse::<Thing>("list_volumes", &resp).unwrap_err();
        assert_eq!(err.trace(), Some("c-7"));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[test]
    fn redirects_are_errors() {
        let resp = HttpResponse::new(302, "");
        let err = parse::<Thing>("get_thing", &resp).unwrap_err();
        assert_eq!(err.status(), Some(302));
    }
}
